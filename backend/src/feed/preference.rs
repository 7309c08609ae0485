//! Wire types of the preferences feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::FeedError;
use crate::models::{ParsedView, TimeMode, ViewId};

/// A view as listed by the feed. `preference` is an embedded JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawView {
    pub id: ViewId,
    #[serde(default)]
    pub disabled: bool,
    pub preference: String,
    #[serde(default, alias = "last_update")]
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "_embedded", default)]
    embedded: Option<Embedded>,
}

#[derive(Debug, Deserialize)]
struct Embedded {
    #[serde(default)]
    preferences: Vec<RawView>,
}

/// Saved state of a map view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub layers: Vec<PreferenceLayer>,
    pub time: PreferenceTime,
    #[serde(default)]
    pub driving_layer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceLayer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceTime {
    pub mode: TimeMode,
    pub value: DateTime<Utc>,
}

/// Decodes a feed page. A page without `_embedded` holds no views.
pub fn decode_envelope(body: &str) -> Result<Vec<RawView>, FeedError> {
    let deserializer = &mut serde_json::Deserializer::from_str(body);
    let envelope: Envelope =
        serde_path_to_error::deserialize(deserializer).map_err(|e| FeedError::Envelope {
            path: e.path().to_string(),
            message: e.inner().to_string(),
        })?;
    Ok(envelope
        .embedded
        .map(|embedded| embedded.preferences)
        .unwrap_or_default())
}

/// Decodes the embedded preference of `raw`.
///
/// Layer ids must be non-empty; duplicates are dropped keeping the first
/// occurrence.
pub fn parse_view(raw: &RawView) -> Result<ParsedView, FeedError> {
    let deserializer = &mut serde_json::Deserializer::from_str(&raw.preference);
    let preference: Preference =
        serde_path_to_error::deserialize(deserializer).map_err(|e| FeedError::Preference {
            view_id: raw.id,
            path: e.path().to_string(),
            message: e.inner().to_string(),
        })?;

    let mut seen = HashSet::new();
    let mut layers = Vec::with_capacity(preference.layers.len());
    for (index, layer) in preference.layers.into_iter().enumerate() {
        let id = layer.id.trim();
        if id.is_empty() {
            return Err(FeedError::InvalidPreference {
                view_id: raw.id,
                reason: format!("layers[{}].id is empty", index),
            });
        }
        if seen.insert(id.to_string()) {
            layers.push(id.to_string());
        }
    }

    Ok(ParsedView {
        view_id: raw.id,
        layers,
        time: preference.time.value,
        time_mode: preference.time.mode,
        disabled: raw.disabled,
        driving_layer: preference.driving_layer,
        last_update: raw.last_update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(preference: &str) -> RawView {
        RawView {
            id: 42,
            disabled: false,
            preference: preference.to_string(),
            last_update: None,
        }
    }

    #[test]
    fn test_decode_envelope() {
        let body = r#"{
            "_embedded": {
                "preferences": [
                    {"id": 1, "preference": "{}", "lastUpdate": "2025-03-20T15:00:00Z"},
                    {"id": 2, "disabled": true, "preference": "{}"}
                ]
            },
            "_links": {}
        }"#;
        let views = decode_envelope(body).unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(
            views[0].last_update,
            Some(Utc.with_ymd_and_hms(2025, 3, 20, 15, 0, 0).unwrap())
        );
        assert!(!views[0].disabled);
        assert!(views[1].disabled);
    }

    #[test]
    fn test_missing_embedded_is_an_empty_page() {
        assert!(decode_envelope(r#"{"_links": {}}"#).unwrap().is_empty());
    }

    #[test]
    fn test_envelope_error_carries_path() {
        let body = r#"{"_embedded": {"preferences": [{"id": "x", "preference": "{}"}]}}"#;
        match decode_envelope(body) {
            Err(FeedError::Envelope { path, .. }) => {
                assert_eq!(path, "_embedded.preferences[0].id")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_view_flattens_preference() {
        let view = parse_view(&raw(
            r#"{
                "layers": [
                    {"id": "fes", "name": "FES RDT", "state": {"opacity": 0.5}},
                    {"id": "radar"},
                    {"id": "fes"}
                ],
                "time": {"mode": "absolute", "value": "2025-03-20T15:00:00Z"},
                "drivingLayer": "fes"
            }"#,
        ))
        .unwrap();

        assert_eq!(view.view_id, 42);
        assert_eq!(view.layers, vec!["fes", "radar"]);
        assert_eq!(view.time, Utc.with_ymd_and_hms(2025, 3, 20, 15, 0, 0).unwrap());
        assert_eq!(view.time_mode, TimeMode::Absolute);
        assert_eq!(view.driving_layer.as_deref(), Some("fes"));
    }

    #[test]
    fn test_parse_view_reports_path_of_bad_field() {
        let result = parse_view(&raw(
            r#"{"layers": [], "time": {"mode": "absolute", "value": "yesterday"}}"#,
        ));
        match result {
            Err(FeedError::Preference { view_id, path, .. }) => {
                assert_eq!(view_id, 42);
                assert_eq!(path, "time.value");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_view_rejects_empty_layer_id() {
        let result = parse_view(&raw(
            r#"{"layers": [{"id": " "}], "time": {"mode": "relative", "value": "2025-03-20T15:00:00Z"}}"#,
        ));
        assert!(matches!(result, Err(FeedError::InvalidPreference { .. })));
    }
}
