use thiserror::Error;

/// A message that does not satisfy the schema. `path` names the first
/// offending field, e.g. `data[2].type` or `jobidentifier`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("schema violation at {path}: {reason}")]
pub struct SchemaViolation {
    pub path: String,
    pub reason: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
