use serde::{Deserialize, Serialize};
use std::fmt;

pub mod collection;
pub mod record;
pub mod streaming;
pub mod wire;

// Re-export collection types
pub use collection::{Collection, CollectionSchema, CollectionState, FieldSchema, UniqueName};

// Re-export record types
pub use record::{rows_to_records, Fields, Record, TempId, TEMP_ID_PREFIX};

// Re-export streaming types
pub use streaming::{Change, ChangeOrigin, MirrorEvent, Notification};

// Re-export wire types
pub use wire::{MutationAction, MutationRequest, MutationResponse, ReadResponse, ResponseStatus};

/// Result type used across the sheetmirror crates
pub type Result<T> = std::result::Result<T, SyncError>;

/// Cell value as delivered by the remote sheet.
///
/// Sheets hand back strings for most cells, but numeric ids and booleans
/// arrive as JSON numbers/bools, so the variants mirror the JSON primitives.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
}

impl Value {
    /// Create a Value from a serde_json::Value
    ///
    /// Arrays and objects are kept as their JSON text; sheets never nest.
    pub fn from_json_value(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::String(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }
    }

    /// Render the value as a comparable key.
    ///
    /// The remote store issues numeric ids while forms submit them as text,
    /// so `42` and `"42"` must compare equal when looking records up.
    pub fn as_key(&self) -> String {
        match self {
            Value::String(s) => s.trim().to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Null => String::new(),
        }
    }

    /// True for `Null` and for strings that are empty after trimming
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

/// Error taxonomy shared by the gateway, the coordinator and the reconciler.
///
/// `Validation` and `NotFound` are raised locally before any state changes.
/// `Network`, `Timeout` and `Decode` are transient and retried on reads.
/// `Remote` means the store answered with `status: "error"`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Timeout: {message}")]
    Timeout { message: String },

    #[error("Unexpected response: {message}")]
    Decode { message: String },

    #[error("Remote store rejected the request: {message}")]
    Remote { message: String },

    #[error("Snapshot storage error: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation {
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        SyncError::Remote {
            message: message.into(),
        }
    }

    /// Transient failures are worth another attempt on the read path
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Network { .. } | SyncError::Timeout { .. } | SyncError::Decode { .. }
        )
    }

    /// Local failures never reached the network and left no side effects
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            SyncError::Validation { .. } | SyncError::NotFound { .. }
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_text_ids_share_a_key() {
        assert_eq!(Value::Integer(42).as_key(), Value::from("42").as_key());
        assert_eq!(Value::Float(42.0).as_key(), "42");
        assert_eq!(Value::from(" 7 ").as_key(), "7");
    }

    #[test]
    fn json_values_map_to_cells() {
        assert_eq!(
            Value::from_json_value(serde_json::json!(3)),
            Value::Integer(3)
        );
        assert_eq!(
            Value::from_json_value(serde_json::json!("x")),
            Value::from("x")
        );
        assert_eq!(Value::from_json_value(serde_json::Value::Null), Value::Null);
    }

    #[test]
    fn transient_errors_are_classified() {
        assert!(SyncError::Timeout {
            message: "slow".into()
        }
        .is_transient());
        assert!(!SyncError::remote("no").is_transient());
        assert!(SyncError::validation("empty").is_local());
    }
}
