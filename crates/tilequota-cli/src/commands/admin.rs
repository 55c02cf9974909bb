//! Commands that change tracked quota state.

use clap::Args;

use tilequota_core::error::AppError;
use tilequota_core::types::Quota;
use tilequota_store::QuotaStore;

use super::{StoreContext, confirm};
use crate::output;

/// Arguments for delete-layer
#[derive(Debug, Args)]
pub struct DeleteLayerArgs {
    /// Layer name
    pub layer: String,
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for delete-gridset
#[derive(Debug, Args)]
pub struct DeleteGridsetArgs {
    /// Layer name
    pub layer: String,
    /// Gridset identifier
    pub gridset: String,
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for delete-parameters
#[derive(Debug, Args)]
pub struct DeleteParametersArgs {
    /// Layer name
    pub layer: String,
    /// Parameter-set identifier
    pub parameters_id: String,
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for rename-layer
#[derive(Debug, Args)]
pub struct RenameLayerArgs {
    /// Current layer name
    pub old_name: String,
    /// New layer name
    pub new_name: String,
}

/// Arguments for reconcile
#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

fn report_freed(what: &str, freed: Quota) {
    if freed.is_zero() {
        output::print_warning(&format!("Nothing tracked for {what}"));
    } else {
        output::print_success(&format!("Released {freed} tracked for {what}"));
    }
}

/// Forget every tile set of a layer
pub async fn delete_layer(args: &DeleteLayerArgs, config_path: &str) -> Result<(), AppError> {
    let prompt = format!("Delete all quota records of layer '{}'?", args.layer);
    if !confirm(&prompt, args.yes)? {
        println!("Cancelled.");
        return Ok(());
    }
    let ctx = StoreContext::open(config_path).await?;
    let freed = ctx.store.delete_layer(&args.layer).await?;
    report_freed(&format!("layer '{}'", args.layer), freed);
    ctx.close().await
}

/// Forget the tile sets of one gridset
pub async fn delete_gridset(args: &DeleteGridsetArgs, config_path: &str) -> Result<(), AppError> {
    let prompt = format!(
        "Delete quota records of gridset '{}' in layer '{}'?",
        args.gridset, args.layer
    );
    if !confirm(&prompt, args.yes)? {
        println!("Cancelled.");
        return Ok(());
    }
    let ctx = StoreContext::open(config_path).await?;
    let freed = ctx.store.delete_gridset(&args.layer, &args.gridset).await?;
    report_freed(&format!("gridset '{}' of '{}'", args.gridset, args.layer), freed);
    ctx.close().await
}

/// Forget the tile sets of one parameter variant
pub async fn delete_parameters(
    args: &DeleteParametersArgs,
    config_path: &str,
) -> Result<(), AppError> {
    let prompt = format!(
        "Delete quota records of parameters '{}' in layer '{}'?",
        args.parameters_id, args.layer
    );
    if !confirm(&prompt, args.yes)? {
        println!("Cancelled.");
        return Ok(());
    }
    let ctx = StoreContext::open(config_path).await?;
    let freed = ctx
        .store
        .delete_parameters(&args.layer, &args.parameters_id)
        .await?;
    report_freed(
        &format!("parameters '{}' of '{}'", args.parameters_id, args.layer),
        freed,
    );
    ctx.close().await
}

/// Rename a layer
pub async fn rename_layer(args: &RenameLayerArgs, config_path: &str) -> Result<(), AppError> {
    let ctx = StoreContext::open(config_path).await?;
    ctx.store.rename_layer(&args.old_name, &args.new_name).await?;
    output::print_success(&format!(
        "Layer '{}' renamed to '{}'",
        args.old_name, args.new_name
    ));
    ctx.close().await
}

/// Reconcile tracked tile sets with the `[[layers]]` configuration
pub async fn reconcile(args: &ReconcileArgs, config_path: &str) -> Result<(), AppError> {
    if !confirm(
        "Tile sets of layers missing from the configuration will be deleted. Continue?",
        args.yes,
    )? {
        println!("Cancelled.");
        return Ok(());
    }
    let ctx = StoreContext::open(config_path).await?;
    ctx.store.start_up().await?;
    let tile_sets = ctx.store.get_tile_sets().await?.len();
    let used = ctx.store.get_globally_used_quota().await?;
    output::print_success("Quota store reconciled");
    output::print_kv("Tile sets", &tile_sets.to_string());
    output::print_kv("Global usage", &used.to_string());
    ctx.close().await
}
