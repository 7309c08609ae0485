//! Layer mapping file.
//!
//! One entry per line: `layerId, workspace, layerName`. Lines starting with
//! `#` and blank lines are ignored; malformed lines are logged and skipped.

use log::warn;
use std::fs;
use std::path::Path;

use super::CatalogError;

/// Association of a feed layer id with a catalog layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub layer_id: String,
    pub workspace: String,
    pub layer_name: String,
}

pub fn parse_mapping(content: &str) -> Vec<MappingEntry> {
    let mut entries = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        match fields.as_slice() {
            [layer_id, workspace, layer_name]
                if !layer_id.is_empty() && !workspace.is_empty() && !layer_name.is_empty() =>
            {
                entries.push(MappingEntry {
                    layer_id: layer_id.to_string(),
                    workspace: workspace.to_string(),
                    layer_name: layer_name.to_string(),
                });
            }
            _ => warn!("Skipping malformed layer mapping line {}: {:?}", index + 1, raw),
        }
    }
    entries
}

pub fn load_mapping_file<P: AsRef<Path>>(path: P) -> Result<Vec<MappingEntry>, CatalogError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| CatalogError::MappingFile {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_mapping(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_blanks_and_malformed_lines() {
        let content = "\
# layerId, workspace, layerName
fes-rdt, meteo, fes_rdt

radar,meteo
lightning , meteo , lightning_strikes
,meteo,empty_id
a,b,c,d
";
        let entries = parse_mapping(content);
        assert_eq!(
            entries,
            vec![
                MappingEntry {
                    layer_id: "fes-rdt".into(),
                    workspace: "meteo".into(),
                    layer_name: "fes_rdt".into(),
                },
                MappingEntry {
                    layer_id: "lightning".into(),
                    workspace: "meteo".into(),
                    layer_name: "lightning_strikes".into(),
                },
            ]
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_mapping_file("/nonexistent/layers.csv");
        assert!(matches!(result, Err(CatalogError::MappingFile { .. })));
    }
}
