use serde::{Deserialize, Serialize};

/// Physical binding of a logical layer: the data table whose rows carry a
/// `pin` counter, and the temporal column used to select rows.
///
/// Several `MappedLayer`s may share one `layer_id` when a logical layer fans
/// out to more than one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappedLayer {
    pub layer_id: String,
    pub workspace: String,
    pub layer_name: String,
    /// Schema-qualified table name, e.g. `public.msg_fes_rdt`.
    pub table_name: String,
    pub temporal_attribute: String,
}

impl MappedLayer {
    pub fn new(
        layer_id: impl Into<String>,
        workspace: impl Into<String>,
        layer_name: impl Into<String>,
        table_name: impl Into<String>,
        temporal_attribute: impl Into<String>,
    ) -> Self {
        Self {
            layer_id: layer_id.into(),
            workspace: workspace.into(),
            layer_name: layer_name.into(),
            table_name: table_name.into(),
            temporal_attribute: temporal_attribute.into(),
        }
    }

    /// `workspace:layer_name`, the qualified name used by the catalog.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.workspace, self.layer_name)
    }
}
