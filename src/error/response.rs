use serde::{Deserialize, Serialize};

use super::ExportError;

/// Structured error information sent to clients before streaming starts.
///
/// Serialized as `{"error": {...}}` in the body of 4xx/5xx responses.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub(crate) error_type: String,
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) field: Option<String>,
}

/// Wrapper holding the `error` object of a JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

impl ErrorResponse {
    /// Build a response body from an export error.
    pub fn from_export_error(err: &ExportError) -> Self {
        let field = match err {
            ExportError::InvalidParameters { field, .. } => Some(field.clone()),
            _ => None,
        };
        Self {
            error: ErrorInfo {
                error_type: err.kind().to_string(),
                message: err.to_string(),
                field,
            },
        }
    }

    /// Build a response body for a routing failure (unknown path, bad method).
    pub fn routing(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.to_string(),
                message: message.into(),
                field: None,
            },
        }
    }

    /// Convert to compact JSON (single line).
    pub fn to_json_compact(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameters_body_names_field() {
        let err = ExportError::out_of_range("total_rows", 0, 1, 1_000_000);
        let json = ErrorResponse::from_export_error(&err)
            .to_json_compact()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["error"]["type"], "export.invalid_parameters");
        assert_eq!(value["error"]["field"], "total_rows");
        assert!(value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("1..=1000000"));
    }

    #[test]
    fn test_routing_body_omits_field() {
        let json = ErrorResponse::routing("http.not_found", "No route for /nope")
            .to_json_compact()
            .unwrap();
        assert_eq!(
            json,
            r#"{"error":{"type":"http.not_found","message":"No route for /nope"}}"#
        );
    }
}
