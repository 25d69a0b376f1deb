use serde_json::Value;

use crate::error::ValidationError;
use crate::models::{ContentFilter, SubscribeRequest};
use crate::predicate::Predicate;

/// Longest accepted topic name.
pub const MAX_TOPIC_LEN: usize = 256;

/// A registration request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRegistration {
    pub topics: Vec<String>,
    pub filters: ContentFilter,
    pub function: Option<String>,
}

/// Validator for registration requests.
pub struct Validator;

impl Validator {
    /// Validate topic names. Duplicates collapse, order is kept.
    pub fn validate_topics(topics: &[String]) -> Result<Vec<String>, ValidationError> {
        if topics.is_empty() {
            return Err(ValidationError::EmptyTopics);
        }

        let mut unique: Vec<String> = Vec::with_capacity(topics.len());
        for topic in topics {
            if topic.is_empty() || topic.len() > MAX_TOPIC_LEN {
                return Err(ValidationError::InvalidTopic(format!(
                    "topic must be 1-{} bytes",
                    MAX_TOPIC_LEN
                )));
            }
            if !unique.contains(topic) {
                unique.push(topic.clone());
            }
        }
        Ok(unique)
    }

    /// Filters must be an object. Missing or null means no filter.
    pub fn validate_filters(filters: Option<&Value>) -> Result<ContentFilter, ValidationError> {
        match filters {
            None | Some(Value::Null) => Ok(ContentFilter::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(ValidationError::FiltersNotObject),
        }
    }

    /// A non-blank function must compile.
    pub fn validate_function(function: Option<&str>) -> Result<Option<String>, ValidationError> {
        match function.map(str::trim) {
            None | Some("") => Ok(None),
            Some(source) => Predicate::compile(source)
                .map(|_| Some(source.to_string()))
                .map_err(|e| ValidationError::InvalidPredicate(e.to_string())),
        }
    }

    pub fn validate_registration(
        request: &SubscribeRequest,
    ) -> Result<ValidRegistration, ValidationError> {
        Ok(ValidRegistration {
            topics: Self::validate_topics(&request.topics)?,
            filters: Self::validate_filters(request.filters.as_ref())?,
            function: Self::validate_function(request.function.as_deref())?,
        })
    }
}
