//! Errors raised at external data boundaries.
//!
//! Everything parsed from another tool (skopeo, gh, SBOM documents, the
//! inline first-boot config) goes through [`parse_json`], so callers can
//! tell a malformed document apart from a failed command.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoundaryError {
    /// The input is not JSON at all.
    #[error("{source_name}: not valid JSON: {reason}")]
    InvalidJson {
        source_name: String,
        reason: String,
    },

    /// JSON, but it does not match the expected document shape.
    #[error("{source_name}: unexpected document shape: {reason}")]
    Schema {
        source_name: String,
        reason: String,
    },
}

impl BoundaryError {
    pub fn source_name(&self) -> &str {
        match self {
            Self::InvalidJson { source_name, .. } | Self::Schema { source_name, .. } => source_name,
        }
    }
}

/// Parse `text` as `T`, classifying failures as syntax or shape errors.
pub fn parse_json<T: DeserializeOwned>(source_name: &str, text: &str) -> Result<T, BoundaryError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| BoundaryError::InvalidJson {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })?;
    serde_json::from_value(value).map_err(|e| BoundaryError::Schema {
        source_name: source_name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tags {
        #[serde(rename = "Tags")]
        tags: Vec<String>,
    }

    #[test]
    fn test_parse_json_ok() {
        let parsed: Tags = parse_json("skopeo", r#"{"Tags":["1","2"]}"#).unwrap();
        assert_eq!(parsed.tags, vec!["1", "2"]);
    }

    #[test]
    fn test_parse_json_syntax_error() {
        let err = parse_json::<Tags>("skopeo", "not json").unwrap_err();
        assert!(matches!(err, BoundaryError::InvalidJson { .. }));
        assert_eq!(err.source_name(), "skopeo");
    }

    #[test]
    fn test_parse_json_shape_error() {
        let err = parse_json::<Tags>("skopeo", r#"{"Tags":"nope"}"#).unwrap_err();
        assert!(matches!(err, BoundaryError::Schema { .. }));
        assert!(err.to_string().contains("unexpected document shape"));
    }
}
