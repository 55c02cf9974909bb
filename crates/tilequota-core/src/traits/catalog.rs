//! Read-only view of the live layer configuration.

use std::collections::BTreeSet;

use crate::types::layer::LayerInfo;

/// Live layer configuration consumed by the page calculator and the
/// start-up reconciliation sweep. The engine never mutates it.
pub trait LayerCatalog: Send + Sync + std::fmt::Debug + 'static {
    /// Names of all currently configured layers.
    fn layer_names(&self) -> BTreeSet<String>;

    /// The configuration of a layer, or `None` once it has been removed.
    fn layer(&self, name: &str) -> Option<LayerInfo>;

    /// Parameter-set identifiers for which the storage layer holds tiles.
    fn cached_parameter_ids(&self, name: &str) -> BTreeSet<String>;

    /// A counter that changes whenever a layer is added, replaced or
    /// removed. Derived data keyed by layer is valid while it holds.
    fn generation(&self) -> u64;

    /// Whether the layer is still configured.
    fn has_layer(&self, name: &str) -> bool {
        self.layer(name).is_some()
    }
}
