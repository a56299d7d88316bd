use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure reported by an external collaborator (settings store, directory, notifier).
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

/// A structured error suitable for returning to an API client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub data: Value,
}

impl ApiError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("settings store unavailable during {operation}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("identity directory unavailable during {operation}")]
    DirectoryUnavailable {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

impl RegistryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Adapter for `map_err` on settings-store calls.
    pub fn store(operation: &'static str) -> impl FnOnce(BackendError) -> Self {
        move |source| Self::StoreUnavailable { operation, source }
    }

    /// Adapter for `map_err` on directory calls.
    pub fn directory(operation: &'static str) -> impl FnOnce(BackendError) -> Self {
        move |source| Self::DirectoryUnavailable { operation, source }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::DirectoryUnavailable { .. } => "directory_unavailable",
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let code = e.code();
        match e {
            RegistryError::InvalidRequest(msg)
            | RegistryError::Forbidden(msg)
            | RegistryError::NotFound(msg) => Self::new(code, msg),
            // Backend internals stay in the logs; clients only learn which dependency failed.
            RegistryError::StoreUnavailable { operation, .. } => Self::new(
                code,
                format!("settings store unavailable during {operation}; retry later"),
            ),
            RegistryError::DirectoryUnavailable { operation, .. } => Self::new(
                code,
                format!("identity directory unavailable during {operation}; retry later"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_hides_backend_detail() {
        let e = RegistryError::StoreUnavailable {
            operation: "bind address",
            source: "connection reset by peer".into(),
        };
        let api = ApiError::from(e);
        assert_eq!(api.code, "store_unavailable");
        assert!(
            !api.message.contains("connection reset"),
            "leaked backend detail: {}",
            api.message
        );
    }

    #[test]
    fn caller_errors_keep_their_message() {
        let api = ApiError::from(RegistryError::forbidden("not a manager of space dev"));
        assert_eq!(api.code, "forbidden");
        assert_eq!(api.message, "not a manager of space dev");
    }
}
