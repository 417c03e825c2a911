use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::ParseError as UrlParseError;

#[cfg(feature = "service")]
use sqlx::Error as SqlxError;

use serde_json::Error as JsonError;

use crate::properties::{ConstructId, Locator, Revision};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum TopicStoreError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Identity constraint violated: {locator} is already held by {existing}, cannot be claimed by {construct}")]
    IdentityConstraint {
        locator: Locator,
        existing: ConstructId,
        construct: ConstructId,
    },
    #[error("Internal engine error: {0}")]
    Internal(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Model constraint violated: {0}")]
    ModelConstraint(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Topic map is opened read-only")]
    ReadOnly,
    #[error("Revision conflict on {id}: expected {expected:?}, store holds {actual:?}")]
    RevisionConflict {
        id: ConstructId,
        expected: Option<Revision>,
        actual: Option<Revision>,
    },
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Topic {0} is still in use")]
    TopicInUse(String),
    #[error("A topic map with locator {0} already exists")]
    TopicMapExists(String),
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),
}

impl TopicStoreError {
    pub fn model(msg: impl Into<String>) -> Self {
        TopicStoreError::ModelConstraint(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        TopicStoreError::Internal(msg.into())
    }

    /// Stale revisions and store outages leave the graph untouched, so the whole call can be
    /// re-issued. Everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TopicStoreError::Unavailable(_) | TopicStoreError::RevisionConflict { .. }
        )
    }
}

impl From<toml::de::Error> for TopicStoreError {
    fn from(src: toml::de::Error) -> TopicStoreError {
        TopicStoreError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for TopicStoreError {
    fn from(src: toml::ser::Error) -> TopicStoreError {
        TopicStoreError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for TopicStoreError {
    fn from(src: JsonError) -> TopicStoreError {
        TopicStoreError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<uuid::Error> for TopicStoreError {
    fn from(src: uuid::Error) -> TopicStoreError {
        TopicStoreError::Serialization(format!("UUID conversion failed: {src}"))
    }
}

impl From<UrlParseError> for TopicStoreError {
    fn from(src: UrlParseError) -> TopicStoreError {
        TopicStoreError::Serialization(format!("Invalid locator: {src}"))
    }
}

impl From<io::Error> for TopicStoreError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => TopicStoreError::NotFound(format!("{x}")),
            _ => TopicStoreError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

#[cfg(feature = "service")]
impl From<SqlxError> for TopicStoreError {
    fn from(x: SqlxError) -> Self {
        match x {
            SqlxError::RowNotFound => TopicStoreError::NotFound("sqlite row not found".to_string()),
            SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) => {
                TopicStoreError::Unavailable(format!("{x}"))
            }
            SqlxError::Migrate(err) => TopicStoreError::Config(format!("Migration failed: {err}")),
            _ => TopicStoreError::Unavailable(format!("sqlite: {x}")),
        }
    }
}
