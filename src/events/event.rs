//! Built-in cache events.

use serde::{Deserialize, Serialize};

/// Well-known event type names used by [`crate::CacheContext`] when it
/// announces its own mutations.
pub mod types {
    pub const STORED: &str = "cache.stored";
    pub const DELETED: &str = "cache.deleted";
    pub const RESET: &str = "cache.reset";
}

/// An occurrence that affects cached data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheEvent {
    /// Drop `key` from every module that receives this event.
    Invalidate { key: String },
    /// Drop every entry of every module that receives this event.
    Purge,
    /// `key` was written in `module`.
    Stored { module: String, key: String },
    /// `key` was removed from `module`.
    Deleted { module: String, key: String },
    /// `module` was reset.
    Cleared { module: String },
    /// Application-defined payload.
    Custom { payload: serde_json::Value },
}

impl CacheEvent {
    pub fn invalidate(key: impl Into<String>) -> Self {
        Self::Invalidate { key: key.into() }
    }

    /// The key this event is about, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Invalidate { key } | Self::Stored { key, .. } | Self::Deleted { key, .. } => {
                Some(key)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_accessor() {
        assert_eq!(CacheEvent::invalidate("total").key(), Some("total"));
        assert_eq!(CacheEvent::Purge.key(), None);
        assert_eq!(
            CacheEvent::Cleared {
                module: "m".into()
            }
            .key(),
            None
        );
    }

    #[test]
    fn test_tagged_json_shape() {
        let json = serde_json::to_value(CacheEvent::invalidate("total")).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "invalidate", "key": "total" }));
    }
}
