use std::time::Duration;

use thiserror::Error;

/// Top-level failure of a single publish.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Structurally invalid publish or registration requests.
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("topic and data are required")]
    MissingTopicOrData,

    #[error("data must be a JSON object")]
    DataNotObject,

    #[error("topics must be a non-empty list")]
    EmptyTopics,

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("filters must be a JSON object")]
    FiltersNotObject,

    #[error("Invalid function: {0}")]
    InvalidPredicate(String),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt subscription for topic {topic}: {reason}")]
    Corrupt { topic: String, reason: String },

    #[error("Registry query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::Backend(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue not found: {0}")]
    UnknownQueue(String),

    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Queue call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Backend(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredicateError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Unknown name: {0}")]
    UnknownName(String),

    #[error("Predicate source too long: {0} bytes (max {max})", max = crate::predicate::MAX_SOURCE_LEN)]
    TooLong(usize),

    #[error("Predicate nested too deeply")]
    TooDeep,

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Division by zero")]
    DivisionByZero,
}
