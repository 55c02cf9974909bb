//! Tile set identity.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An independently quota-tracked group of tiles: one layer cached in one
/// grid set, one format and one parameter variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileSet {
    /// Layer name.
    pub layer_name: String,
    /// Grid set identifier.
    pub gridset_id: String,
    /// MIME format of the stored tiles.
    pub blob_format: String,
    /// Parameter-set identifier; `None` for the default variant.
    pub parameters_id: Option<String>,
}

impl TileSet {
    /// Create a tile set.
    pub fn new(
        layer_name: impl Into<String>,
        gridset_id: impl Into<String>,
        blob_format: impl Into<String>,
        parameters_id: Option<String>,
    ) -> Self {
        Self {
            layer_name: layer_name.into(),
            gridset_id: gridset_id.into(),
            blob_format: blob_format.into(),
            parameters_id,
        }
    }

    /// The composite key identifying this tile set.
    pub fn id(&self) -> TileSetId {
        TileSetId(Arc::new(self.clone()))
    }

    /// Copy of this tile set under another layer name.
    pub fn renamed(&self, layer_name: &str) -> TileSet {
        TileSet {
            layer_name: layer_name.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for TileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.layer_name, self.gridset_id, self.blob_format)?;
        if let Some(params) = &self.parameters_id {
            write!(f, "/{params}")?;
        }
        Ok(())
    }
}

/// Composite key of a [`TileSet`].
///
/// Equality, ordering and hashing are defined field by field. Cloning is
/// cheap, so every page can carry its tile set id. [`TileSetId::key`] renders
/// the stable primary key used by persistent stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileSetId(Arc<TileSet>);

impl TileSetId {
    /// Reserved primary key of the global usage counter.
    ///
    /// Tile set keys always contain a `#` separator, so this can never collide.
    pub const GLOBAL_KEY: &'static str = "__GLOBAL_QUOTA__";

    /// The identified tile set.
    pub fn tile_set(&self) -> &TileSet {
        &self.0
    }

    /// Layer name.
    pub fn layer_name(&self) -> &str {
        &self.0.layer_name
    }

    /// Grid set identifier.
    pub fn gridset_id(&self) -> &str {
        &self.0.gridset_id
    }

    /// MIME format.
    pub fn blob_format(&self) -> &str {
        &self.0.blob_format
    }

    /// Parameter-set identifier.
    pub fn parameters_id(&self) -> Option<&str> {
        self.0.parameters_id.as_deref()
    }

    /// Stable, injective primary key.
    ///
    /// Segments are joined with `#` after escaping `%` and `#`; the
    /// parameter segment is present only for parameter variants.
    pub fn key(&self) -> String {
        let mut key = format!(
            "{}#{}#{}",
            escape(&self.0.layer_name),
            escape(&self.0.gridset_id),
            escape(&self.0.blob_format)
        );
        if let Some(params) = &self.0.parameters_id {
            key.push('#');
            key.push_str(&escape(params));
        }
        key
    }
}

impl From<TileSet> for TileSetId {
    fn from(tile_set: TileSet) -> Self {
        TileSetId(Arc::new(tile_set))
    }
}

impl fmt::Display for TileSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for TileSetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TileSetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TileSet::deserialize(deserializer).map(TileSetId::from)
    }
}

fn escape(segment: &str) -> String {
    segment.replace('%', "%25").replace('#', "%23")
}
