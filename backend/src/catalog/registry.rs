//! Resolved layer registry: feed layer id to its physical tables.

use log::{info, warn};
use std::collections::{BTreeMap, HashMap};

use super::{CatalogError, LayerCatalog, MappingEntry};
use crate::models::MappedLayer;

/// Immutable snapshot of the layer mapping, rebuilt on every reset.
#[derive(Debug, Clone, Default)]
pub struct LayerRegistry {
    layers: HashMap<String, Vec<MappedLayer>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves every mapping entry against the catalog.
    ///
    /// Entries without a catalog counterpart are skipped with a warning. A
    /// layer id listed more than once fans out to every resolved table.
    pub fn resolve(
        entries: &[MappingEntry],
        catalog: &dyn LayerCatalog,
    ) -> Result<Self, CatalogError> {
        let mut registry = Self::new();
        for entry in entries {
            match catalog.resolve(&entry.workspace, &entry.layer_name)? {
                Some(binding) => registry.insert(MappedLayer::new(
                    entry.layer_id.clone(),
                    entry.workspace.clone(),
                    entry.layer_name.clone(),
                    binding.table_name,
                    binding.temporal_attribute,
                )),
                None => warn!(
                    "No catalog entry for {}:{} (layer {}), skipping",
                    entry.workspace, entry.layer_name, entry.layer_id
                ),
            }
        }
        info!(
            "Layer registry resolved {} layer ids over {} tables",
            registry.layers.len(),
            registry.tables().len()
        );
        Ok(registry)
    }

    pub fn insert(&mut self, layer: MappedLayer) {
        let bindings = self.layers.entry(layer.layer_id.clone()).or_default();
        if !bindings.contains(&layer) {
            bindings.push(layer);
        }
    }

    /// Physical tables of a layer id, empty when the id is unmapped.
    pub fn layers_for(&self, layer_id: &str) -> &[MappedLayer] {
        self.layers.get(layer_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, layer_id: &str) -> bool {
        self.layers.contains_key(layer_id)
    }

    /// One representative binding per distinct table, ordered by table name.
    pub fn tables(&self) -> Vec<MappedLayer> {
        let mut tables: BTreeMap<&str, &MappedLayer> = BTreeMap::new();
        for layer in self.layers.values().flatten() {
            tables.entry(layer.table_name.as_str()).or_insert(layer);
        }
        tables.into_values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;

    fn entry(id: &str, workspace: &str, name: &str) -> MappingEntry {
        MappingEntry {
            layer_id: id.into(),
            workspace: workspace.into(),
            layer_name: name.into(),
        }
    }

    #[test]
    fn test_resolve_skips_unknown_catalog_entries() {
        let catalog = StaticCatalog::new()
            .with_layer("meteo", "fes_rdt", "public.msg_fes_rdt", "testtime");
        let entries = vec![
            entry("fes", "meteo", "fes_rdt"),
            entry("ghost", "meteo", "missing"),
        ];

        let registry = LayerRegistry::resolve(&entries, &catalog).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("fes"));
        assert!(registry.layers_for("ghost").is_empty());
        assert_eq!(registry.layers_for("fes")[0].table_name, "public.msg_fes_rdt");
    }

    #[test]
    fn test_layer_id_fans_out_and_tables_are_deduplicated() {
        let catalog = StaticCatalog::new()
            .with_layer("meteo", "fes_rdt", "public.msg_fes_rdt", "testtime")
            .with_layer("meteo", "fes_rdt_alt", "public.msg_fes_rdt_alt", "testtime")
            .with_layer("ops", "fes_rdt", "public.msg_fes_rdt", "testtime");
        let entries = vec![
            entry("fes", "meteo", "fes_rdt"),
            entry("fes", "meteo", "fes_rdt_alt"),
            entry("fes", "meteo", "fes_rdt"),
            entry("fes_ops", "ops", "fes_rdt"),
        ];

        let registry = LayerRegistry::resolve(&entries, &catalog).unwrap();

        assert_eq!(registry.layers_for("fes").len(), 2);
        let tables: Vec<String> = registry.tables().into_iter().map(|l| l.table_name).collect();
        assert_eq!(tables, vec!["public.msg_fes_rdt", "public.msg_fes_rdt_alt"]);
    }
}
