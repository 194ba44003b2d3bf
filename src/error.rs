//! Error types shared by the registry, the gate, providers and the event bus.

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a caller-supplied compute function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by a storage provider.
///
/// `NotFound` is the "absent" signal and must stay distinct from every other
/// failure: the memoization gate only treats it as a miss.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Provider not initialized")]
    NotInitialized,
    #[error("Provider connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Provider operation failed: {0}")]
    OperationFailed(String),
}

impl ProviderError {
    /// Returns true for the "absent" signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Coarse classification of a [`CacheError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Provider,
    Serialize,
    Deserialize,
    Uninitialized,
    Compute,
    Delivery,
}

/// Errors that can occur during cache, gate and event bus operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Module not found: {0}")]
    ModuleNotFound(String),
    #[error("Key '{key}' not found in module '{module}'")]
    KeyNotFound { module: String, key: String },
    #[error("Event type not found: {0}")]
    EventTypeNotFound(String),
    #[error("Event module not found: {0}")]
    EventModuleNotFound(String),

    #[error("Module already exists: {0}")]
    ModuleConflict(String),
    #[error("Event type already exists: {0}")]
    EventTypeConflict(String),
    #[error("Event module already exists: {0}")]
    EventModuleConflict(String),
    #[error("Module '{module}' already subscribed to '{event_type}'")]
    SubscriptionConflict { module: String, event_type: String },

    #[error("Provider error in module '{module}': {source}")]
    Provider {
        module: String,
        #[source]
        source: ProviderError,
    },

    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Deserialization error: {0}")]
    Deserialize(String),

    #[error("Cache storage not initialized for module: {0}")]
    Uninitialized(String),

    #[error("Compute failed: {0}")]
    Compute(#[source] BoxError),

    #[error("Delivery of '{event_type}' to '{module}' timed out after {timeout:?}")]
    DeliveryTimeout {
        module: String,
        event_type: String,
        timeout: Duration,
    },
    #[error("Mailbox closed: {0}")]
    MailboxClosed(String),
    #[error("No Tokio runtime available to spawn listener for: {0}")]
    NoRuntime(String),
}

impl CacheError {
    /// Maps a provider failure for `key` in `module`, turning the absent signal
    /// into [`CacheError::KeyNotFound`].
    pub(crate) fn from_provider(module: &str, key: &str, err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(_) => Self::KeyNotFound {
                module: module.to_string(),
                key: key.to_string(),
            },
            other => Self::Provider {
                module: module.to_string(),
                source: other,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModuleNotFound(_)
            | Self::KeyNotFound { .. }
            | Self::EventTypeNotFound(_)
            | Self::EventModuleNotFound(_) => ErrorKind::NotFound,
            Self::ModuleConflict(_)
            | Self::EventTypeConflict(_)
            | Self::EventModuleConflict(_)
            | Self::SubscriptionConflict { .. } => ErrorKind::Conflict,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::Serialize(_) => ErrorKind::Serialize,
            Self::Deserialize(_) => ErrorKind::Deserialize,
            Self::Uninitialized(_) => ErrorKind::Uninitialized,
            Self::Compute(_) => ErrorKind::Compute,
            Self::DeliveryTimeout { .. } | Self::MailboxClosed(_) | Self::NoRuntime(_) => {
                ErrorKind::Delivery
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_not_found_maps_to_key_not_found() {
        let err = CacheError::from_provider("users", "42", ProviderError::NotFound("42".into()));
        assert!(matches!(err, CacheError::KeyNotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "Key '42' not found in module 'users'");
    }

    #[test]
    fn test_other_provider_errors_pass_through() {
        let err = CacheError::from_provider(
            "users",
            "42",
            ProviderError::ConnectionFailed("refused".into()),
        );
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Provider error in module 'users': Provider connection failed: refused"
        );
    }

    #[test]
    fn test_conflict_kinds() {
        let err = CacheError::SubscriptionConflict {
            module: "search_index".into(),
            event_type: "invalidate".into(),
        };
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "Module 'search_index' already subscribed to 'invalidate'"
        );
    }

    #[test]
    fn test_compute_keeps_source() {
        let err = CacheError::Compute("upstream down".into());
        assert_eq!(err.kind(), ErrorKind::Compute);
        assert!(std::error::Error::source(&err).is_some());
    }
}
