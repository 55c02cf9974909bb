//! Read-only views of quota usage and page statistics.

use std::collections::BTreeSet;

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use tilequota_core::error::AppError;
use tilequota_core::types::Quota;
use tilequota_entity::policy::PolicyRegistry;
use tilequota_store::QuotaStore;

use super::StoreContext;
use crate::output::{self, OutputFormat};

/// Arguments for the usage command
#[derive(Debug, Args)]
pub struct UsageArgs {
    /// Only show this layer
    #[arg(short, long)]
    pub layer: Option<String>,
}

/// Arguments for the tilesets command
#[derive(Debug, Args)]
pub struct TileSetsArgs {
    /// Only show tile sets of this layer
    #[arg(short, long)]
    pub layer: Option<String>,
}

/// Arguments for the candidate command
#[derive(Debug, Args)]
pub struct CandidateArgs {
    /// Expiration policy name
    #[arg(short, long, default_value = "LFU")]
    pub policy: String,
    /// Layers to consider
    #[arg(required = true)]
    pub layers: Vec<String>,
}

/// Usage display row
#[derive(Debug, Serialize, Tabled)]
struct UsageRow {
    /// Layer name, or `*` for the global total
    layer: String,
    /// Bytes used
    used: String,
    /// Configured limit
    limit: String,
    /// Effective expiration policy
    policy: String,
    /// Whether usage exceeds the limit
    exceeded: String,
}

/// Tile set display row
#[derive(Debug, Serialize, Tabled)]
struct TileSetRow {
    layer: String,
    gridset: String,
    format: String,
    parameters: String,
    used: String,
}

/// Candidate page display row
#[derive(Debug, Serialize, Tabled)]
struct CandidateRow {
    page: String,
    tiles: u64,
    fill: String,
    hits: u64,
    frequency: String,
    last_access_minute: i64,
    tile_range: String,
}

fn limit_text(limit: Option<Quota>) -> String {
    limit
        .map(|q| q.to_string())
        .unwrap_or_else(|| "global".to_string())
}

fn exceeded(used: Quota, limit: Option<Quota>) -> String {
    match limit {
        Some(limit) if used > limit => "yes".to_string(),
        _ => String::new(),
    }
}

/// Show used and allowed bytes per layer
pub async fn usage(args: &UsageArgs, config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let ctx = StoreContext::open(config_path).await?;
    let quota = &ctx.config.diskquota;

    let layers: BTreeSet<String> = match &args.layer {
        Some(layer) => BTreeSet::from([layer.clone()]),
        None => {
            let mut layers = ctx.calculator.layer_names();
            layers.extend(
                ctx.store
                    .get_tile_sets()
                    .await?
                    .into_iter()
                    .map(|ts| ts.layer_name),
            );
            layers
        }
    };

    let mut rows = Vec::with_capacity(layers.len() + 1);
    for layer in &layers {
        let used = ctx.store.get_used_quota_by_layer_name(layer).await?;
        let limit = quota.layer_quota(layer).and_then(|lq| lq.quota);
        rows.push(UsageRow {
            layer: layer.clone(),
            used: used.to_string(),
            limit: limit_text(limit),
            policy: quota.policy_for_layer(layer).unwrap_or_default(),
            exceeded: exceeded(used, limit),
        });
    }
    if args.layer.is_none() {
        let used = ctx.store.get_globally_used_quota().await?;
        rows.push(UsageRow {
            layer: "*".to_string(),
            used: used.to_string(),
            limit: quota
                .global_quota
                .map(|q| q.to_string())
                .unwrap_or_else(|| "unlimited".to_string()),
            policy: quota.global_expiration_policy_name.clone().unwrap_or_default(),
            exceeded: exceeded(used, quota.global_quota),
        });
    }

    output::print_list(&rows, format);
    ctx.close().await
}

/// List tracked tile sets
pub async fn tile_sets(
    args: &TileSetsArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let ctx = StoreContext::open(config_path).await?;

    let mut rows = Vec::new();
    for ts in ctx.store.get_tile_sets().await? {
        if args.layer.as_ref().is_some_and(|l| *l != ts.layer_name) {
            continue;
        }
        let used = ctx.store.get_used_quota_by_tile_set_id(&ts.id()).await?;
        rows.push(TileSetRow {
            used: used.to_string(),
            parameters: ts.parameters_id.clone().unwrap_or_default(),
            layer: ts.layer_name,
            gridset: ts.gridset_id,
            format: ts.blob_format,
        });
    }

    output::print_list(&rows, format);
    ctx.close().await
}

/// Show the page a policy would evict next
pub async fn candidate(
    args: &CandidateArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let policy = PolicyRegistry::with_defaults().resolve(&args.policy)?;
    let ctx = StoreContext::open(config_path).await?;
    let layers: BTreeSet<String> = args.layers.iter().cloned().collect();

    let rows = match ctx.store.find_page_to_expire(policy.as_ref(), &layers).await? {
        Some(stats) => {
            let tile_range = match ctx.store.get_tiles_for_page(&stats.page).await {
                Ok(range) => format!(
                    "x {}..={}, y {}..={}",
                    range.bounds.min_x, range.bounds.max_x, range.bounds.min_y, range.bounds.max_y
                ),
                Err(e) if e.is_not_found() => "unknown".to_string(),
                Err(e) => return Err(e),
            };
            vec![CandidateRow {
                page: stats.page.to_string(),
                tiles: stats.tile_count,
                fill: format!("{:.1}%", stats.fill_factor * 100.0),
                hits: stats.num_hits,
                frequency: format!("{:.2}/min", stats.frequency_of_use_per_minute()),
                last_access_minute: stats.last_access_time_minutes,
                tile_range,
            }]
        }
        None => Vec::new(),
    };

    output::print_list(&rows, format);
    ctx.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exceeded_marker() {
        let limit = Some(Quota::from_bytes(100));
        assert_eq!(exceeded(Quota::from_bytes(101), limit), "yes");
        assert_eq!(exceeded(Quota::from_bytes(100), limit), "");
        assert_eq!(exceeded(Quota::from_bytes(1_000), None), "");
        assert_eq!(limit_text(None), "global");
    }
}
