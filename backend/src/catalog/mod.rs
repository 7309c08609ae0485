//! Layer catalog: resolves logical layers to the physical tables that carry
//! `pin` counters.
//!
//! The catalog itself is an external collaborator. [`StaticCatalog`] serves
//! the entries declared under `[[catalog.layers]]` in the configuration.

pub mod mapping;
pub mod registry;

pub use mapping::{load_mapping_file, parse_mapping, MappingEntry};
pub use registry::LayerRegistry;

use std::collections::HashMap;

use crate::config::CatalogLayer;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read layer mapping {path}: {source}")]
    MappingFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog lookup failed for {layer}: {message}")]
    Lookup { layer: String, message: String },
}

/// Physical binding of a catalog layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerBinding {
    /// Schema-qualified table name.
    pub table_name: String,
    pub temporal_attribute: String,
}

/// Read-only resolver from `workspace:layer_name` to its binding.
pub trait LayerCatalog: Send + Sync {
    /// `Ok(None)` when the catalog has no such layer.
    fn resolve(&self, workspace: &str, layer_name: &str)
        -> Result<Option<LayerBinding>, CatalogError>;
}

/// Catalog backed by a fixed list of entries.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    layers: HashMap<(String, String), LayerBinding>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a CatalogLayer>) -> Self {
        let mut catalog = Self::new();
        for entry in entries {
            catalog.insert(
                &entry.workspace,
                &entry.name,
                &entry.table,
                &entry.temporal_attribute,
            );
        }
        catalog
    }

    pub fn insert(
        &mut self,
        workspace: &str,
        layer_name: &str,
        table_name: &str,
        temporal_attribute: &str,
    ) {
        self.layers.insert(
            (workspace.to_string(), layer_name.to_string()),
            LayerBinding {
                table_name: table_name.to_string(),
                temporal_attribute: temporal_attribute.to_string(),
            },
        );
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_layer(
        mut self,
        workspace: &str,
        layer_name: &str,
        table_name: &str,
        temporal_attribute: &str,
    ) -> Self {
        self.insert(workspace, layer_name, table_name, temporal_attribute);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl LayerCatalog for StaticCatalog {
    fn resolve(
        &self,
        workspace: &str,
        layer_name: &str,
    ) -> Result<Option<LayerBinding>, CatalogError> {
        Ok(self
            .layers
            .get(&(workspace.to_string(), layer_name.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_catalog_from_config_entries() {
        let entries = vec![CatalogLayer {
            workspace: "meteo".into(),
            name: "fes_rdt".into(),
            table: "public.msg_fes_rdt".into(),
            temporal_attribute: "testtime".into(),
        }];
        let catalog = StaticCatalog::from_entries(&entries);

        let binding = catalog.resolve("meteo", "fes_rdt").unwrap().unwrap();
        assert_eq!(binding.table_name, "public.msg_fes_rdt");
        assert_eq!(binding.temporal_attribute, "testtime");
        assert!(catalog.resolve("meteo", "other").unwrap().is_none());
        assert!(catalog.resolve("other", "fes_rdt").unwrap().is_none());
    }
}
