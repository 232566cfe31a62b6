//! Request line parsing for the export host
//!
//! Only the request line is interpreted; headers are read and skipped.

use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::export::{ExportLimits, ExportParams};

/// Reasons a request never reaches the export pipeline
#[derive(Debug, PartialEq, Eq)]
pub enum RouteError {
    /// Request line could not be parsed
    Malformed(String),
    /// Method other than GET
    MethodNotAllowed(String),
    /// Path other than the export route
    NotFound(String),
}

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
}

impl RequestLine {
    /// Parse `METHOD TARGET VERSION`
    pub fn parse(line: &str) -> Result<Self, RouteError> {
        let mut parts = line.split_whitespace();
        let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RouteError::Malformed(line.trim().to_string()));
        };
        if !version.starts_with("HTTP/1.") || parts.next().is_some() {
            return Err(RouteError::Malformed(line.trim().to_string()));
        }

        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (target, None),
        };

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            query,
        })
    }

    /// Check method and path against the export route
    pub fn route(&self, export_path: &str) -> Result<(), RouteError> {
        if self.path != export_path {
            return Err(RouteError::NotFound(self.path.clone()));
        }
        if self.method != "GET" {
            return Err(RouteError::MethodNotAllowed(self.method.clone()));
        }
        Ok(())
    }
}

/// Export parameters as supplied by the client, before defaults and bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportQuery {
    pub chunk_size: Option<u64>,
    pub total_rows: Option<u64>,
}

impl ExportQuery {
    /// Parse `chunk_size` and `total_rows` from a query string
    ///
    /// Unknown keys are ignored; a repeated key keeps its last value.
    pub fn parse(query: Option<&str>) -> Result<Self, ExportError> {
        let mut parsed = Self::default();
        let Some(query) = query else {
            return Ok(parsed);
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "chunk_size" => parsed.chunk_size = Some(parse_count(key, value)?),
                "total_rows" => parsed.total_rows = Some(parse_count(key, value)?),
                _ => {}
            }
        }
        Ok(parsed)
    }

    /// Apply configured defaults and validate against the configured bounds
    pub fn into_params(self, config: &ExportConfig) -> Result<ExportParams, ExportError> {
        ExportParams::new(
            self.chunk_size.unwrap_or(config.default_chunk_size),
            self.total_rows.unwrap_or(config.default_total_rows),
            &ExportLimits::from(config),
        )
    }
}

fn parse_count(field: &str, value: &str) -> Result<u64, ExportError> {
    value
        .parse::<u64>()
        .map_err(|_| ExportError::InvalidParameters {
            field: field.to_string(),
            reason: format!("expected a non-negative integer, got '{value}'"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        let line = RequestLine::parse("GET /export-report?chunk_size=500&total_rows=3 HTTP/1.1\r\n")
            .unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.path, "/export-report");
        assert_eq!(line.query.as_deref(), Some("chunk_size=500&total_rows=3"));
        assert!(line.route("/export-report").is_ok());
    }

    #[test]
    fn test_malformed_request_line() {
        assert!(matches!(RequestLine::parse("GET\r\n"), Err(RouteError::Malformed(_))));
        assert!(matches!(
            RequestLine::parse("GET / SPDY/3\r\n"),
            Err(RouteError::Malformed(_))
        ));
    }

    #[test]
    fn test_routing() {
        let line = RequestLine::parse("POST /export-report HTTP/1.1").unwrap();
        assert_eq!(
            line.route("/export-report"),
            Err(RouteError::MethodNotAllowed("POST".to_string()))
        );

        let line = RequestLine::parse("HEAD /export-report HTTP/1.1").unwrap();
        assert_eq!(
            line.route("/export-report"),
            Err(RouteError::MethodNotAllowed("HEAD".to_string()))
        );

        let line = RequestLine::parse("GET /other HTTP/1.1").unwrap();
        assert_eq!(
            line.route("/export-report"),
            Err(RouteError::NotFound("/other".to_string()))
        );
    }

    #[test]
    fn test_query_defaults() {
        let params = ExportQuery::parse(None)
            .unwrap()
            .into_params(&ExportConfig::default())
            .unwrap();
        assert_eq!(params.chunk_size(), 10_000);
        assert_eq!(params.total_rows(), 100_000);
    }

    #[test]
    fn test_query_values_and_unknown_keys() {
        let query = ExportQuery::parse(Some("total_rows=25&format=csv&chunk_size=600&")).unwrap();
        assert_eq!(query.chunk_size, Some(600));
        assert_eq!(query.total_rows, Some(25));
    }

    #[test]
    fn test_non_numeric_value_is_invalid() {
        match ExportQuery::parse(Some("chunk_size=lots")) {
            Err(ExportError::InvalidParameters { field, .. }) => assert_eq!(field, "chunk_size"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(ExportQuery::parse(Some("total_rows=-1")).is_err());
        assert!(ExportQuery::parse(Some("total_rows")).is_err());
    }

    #[test]
    fn test_out_of_range_after_defaults() {
        let err = ExportQuery::parse(Some("chunk_size=100"))
            .unwrap()
            .into_params(&ExportConfig::default())
            .unwrap_err();
        assert!(err.is_client_error());
    }
}
