//! Structural check of the OpenAPI document before anything is started.
//!
//! This is not a full OpenAPI validator. It rejects documents the mock server
//! would certainly refuse: unreadable or unparsable files, anything that does
//! not declare `openapi: 3.x`, and documents without `info.title` or `paths`.
//! YAML and JSON are both accepted.

use std::path::Path;

use serde_yml::Value;

use crate::error::ValidationError;

/// What a validated document describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSummary {
    /// Declared OpenAPI version.
    pub openapi: String,
    /// `info.title`.
    pub title: String,
    /// `info.version`, if present.
    pub version: Option<String>,
    /// Number of entries under `paths`.
    pub path_count: usize,
}

/// Read and check the document at `path`.
pub fn validate_spec(path: &Path) -> Result<SpecSummary, ValidationError> {
    let text = std::fs::read_to_string(path).map_err(|source| ValidationError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    validate_document(path, &text)
}

/// Check an already-loaded document. `path` is only used in errors.
pub fn validate_document(path: &Path, text: &str) -> Result<SpecSummary, ValidationError> {
    let doc: Value = serde_yml::from_str(text).map_err(|e| ValidationError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if !doc.is_mapping() {
        return Err(ValidationError::NotOpenApi {
            path: path.to_path_buf(),
            reason: "document root is not a mapping".to_string(),
        });
    }

    let openapi = match doc.get("openapi") {
        Some(Value::String(version)) => version.clone(),
        Some(Value::Number(version)) => version.to_string(),
        Some(_) => {
            return Err(ValidationError::NotOpenApi {
                path: path.to_path_buf(),
                reason: "'openapi' is not a version string".to_string(),
            });
        }
        None => {
            let reason = if doc.get("swagger").is_some() {
                "Swagger 2.0 documents are not supported".to_string()
            } else {
                "no 'openapi' version declared".to_string()
            };
            return Err(ValidationError::NotOpenApi {
                path: path.to_path_buf(),
                reason,
            });
        }
    };

    if !openapi.starts_with("3.") {
        return Err(ValidationError::NotOpenApi {
            path: path.to_path_buf(),
            reason: format!("unsupported version {openapi}"),
        });
    }

    let missing = |field| ValidationError::MissingField {
        path: path.to_path_buf(),
        field,
    };

    let info = doc.get("info").ok_or_else(|| missing("info"))?;
    let title = info
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("info.title"))?
        .to_string();
    let version = info.get("version").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    let path_count = doc
        .get("paths")
        .and_then(Value::as_mapping)
        .map(|paths| paths.len())
        .ok_or_else(|| missing("paths"))?;

    Ok(SpecSummary {
        openapi,
        title,
        version,
        path_count,
    })
}
