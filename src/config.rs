//! Config Loader.
//!
//! Parses a config document (JSON or YAML, selected by file extension) into
//! an ordered list of [`UpstreamDescriptor`]s. Accepts three document
//! shapes: a list of descriptors, `{"servers": [...]}`, or a single
//! descriptor object. Has no I/O side effects beyond reading the file.

use std::path::Path;

use serde_json::Value;

use crate::error::{HubError, Result};
use crate::model::UpstreamDescriptor;

/// Loads and validates upstream descriptors from a config file.
///
/// The parser is selected by the file's extension: `.yaml`/`.yml` → YAML,
/// anything else → JSON.
///
/// # Errors
/// Returns [`HubError::BadConfig`] on parse failure, duplicate `name`,
/// missing `name`/`endpoint`, or non-positive `timeout`.
pub fn load(path: &Path) -> Result<Vec<UpstreamDescriptor>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| HubError::BadConfig(format!("failed to read '{}': {e}", path.display())))?;
    load_str(&raw, is_yaml(path))
}

/// Parses a config document already in memory (used by callers that already
/// hold file contents, and by tests).
///
/// # Errors
/// Same as [`load`].
pub fn load_str(raw: &str, yaml: bool) -> Result<Vec<UpstreamDescriptor>> {
    let doc: Value = if yaml {
        serde_yaml::from_str(raw).map_err(|e| HubError::BadConfig(format!("invalid YAML: {e}")))?
    } else {
        serde_json::from_str(raw).map_err(|e| HubError::BadConfig(format!("invalid JSON: {e}")))?
    };

    let descriptors = extract_descriptors(doc)?;
    validate_unique_and_each(descriptors)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("yaml") | Some("yml")
    )
}

/// Normalizes any of the three accepted document shapes into a flat list of
/// descriptor `Value`s, then deserializes each one.
fn extract_descriptors(doc: Value) -> Result<Vec<UpstreamDescriptor>> {
    let rows: Vec<Value> = match doc {
        Value::Array(items) => items,
        Value::Object(ref map) if map.contains_key("servers") => map
            .get("servers")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| HubError::BadConfig("'servers' must be a list".to_string()))?,
        Value::Object(_) => vec![doc],
        other => {
            return Err(HubError::BadConfig(format!(
                "config document must be a list, {{servers:[...]}}, or an object, got {other}"
            )))
        }
    };

    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<UpstreamDescriptor>(row)
                .map_err(|e| HubError::BadConfig(format!("invalid upstream descriptor: {e}")))
        })
        .collect()
}

fn validate_unique_and_each(descriptors: Vec<UpstreamDescriptor>) -> Result<Vec<UpstreamDescriptor>> {
    let mut seen = std::collections::HashSet::with_capacity(descriptors.len());
    for d in &descriptors {
        d.validate()?;
        if !seen.insert(d.name.clone()) {
            return Err(HubError::BadConfig(format!("duplicate upstream name '{}'", d.name)));
        }
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_list_shape_json() {
        let raw = r#"[{"name":"local","endpoint":"http://u/mcp"}]"#;
        let rows = load_str(raw, false).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "local");
        assert_eq!(rows[0].timeout, 30);
        assert!(rows[0].enabled);
    }

    #[test]
    fn parses_servers_wrapper_shape() {
        let raw = r#"{"servers": [{"name":"a","endpoint":"http://a"},{"name":"b","endpoint":"http://b","enabled":false}]}"#;
        let rows = load_str(raw, false).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!rows[1].enabled);
    }

    #[test]
    fn parses_single_object_shape() {
        let raw = r#"{"name":"solo","endpoint":"http://solo","timeout":5}"#;
        let rows = load_str(raw, false).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timeout, 5);
    }

    #[test]
    fn parses_yaml_list() {
        let raw = "- name: local\n  endpoint: http://u/mcp\n  timeout: 10\n";
        let rows = load_str(raw, true).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timeout, 10);
    }

    #[test]
    fn rejects_duplicate_names() {
        let raw = r#"[{"name":"a","endpoint":"http://a"},{"name":"a","endpoint":"http://b"}]"#;
        let err = load_str(raw, false).unwrap_err();
        assert!(matches!(err, HubError::BadConfig(_)));
    }

    #[test]
    fn rejects_missing_endpoint() {
        let raw = r#"[{"name":"a"}]"#;
        assert!(load_str(raw, false).is_err());
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let raw = r#"[{"name":"a","endpoint":"http://a","timeout":0}]"#;
        assert!(load_str(raw, false).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(load_str("{not json", false).is_err());
    }

    #[test]
    fn load_from_file_selects_parser_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("servers.json");
        let mut f = std::fs::File::create(&json_path).unwrap();
        writeln!(f, r#"[{{"name":"a","endpoint":"http://a"}}]"#).unwrap();

        let rows = load(&json_path).unwrap();
        assert_eq!(rows.len(), 1);

        let yaml_path = dir.path().join("servers.yaml");
        let mut f = std::fs::File::create(&yaml_path).unwrap();
        writeln!(f, "- name: b\n  endpoint: http://b").unwrap();

        let rows = load(&yaml_path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "b");
    }
}
