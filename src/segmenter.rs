//! Clause segmentation through the completion service.
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::llm::{CompletionService, LlmError, Message, parse_json_reply};
use crate::prompts;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("segmentation request failed: {0}")]
    Completion(#[from] LlmError),

    #[error("segmentation reply is not a JSON array of strings: {0}")]
    Malformed(String),
}

pub struct Segmenter {
    llm: Arc<dyn CompletionService>,
}

impl Segmenter {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    /// Ordered clause texts. The service decides the boundaries; only the
    /// reply's shape is checked.
    pub async fn segment(&self, text: &str) -> Result<Vec<String>, SegmentError> {
        let messages = [
            Message::system(prompts::SEGMENT_SYSTEM),
            Message::user(text),
        ];
        let reply = self.llm.complete(&messages).await?;
        let clauses = parse_clause_list(&reply)?;
        info!("Segmented document into {} clauses", clauses.len());
        Ok(clauses)
    }
}

pub fn parse_clause_list(reply: &str) -> Result<Vec<String>, SegmentError> {
    let value = parse_json_reply(reply).map_err(|e| SegmentError::Malformed(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(SegmentError::Malformed("top-level value is not an array".to_string()));
    };

    let mut clauses = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        match item {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    debug!("Dropping empty clause at position {i}");
                } else {
                    clauses.push(trimmed.to_string());
                }
            }
            other => {
                return Err(SegmentError::Malformed(format!(
                    "element {i} is {other}, not a string"
                )));
            }
        }
    }
    Ok(clauses)
}
