/// Scripted completion service for tests and dry runs.
///
/// Replies are chosen by rules matched against the last user message, so
/// concurrent clause analyses get deterministic answers regardless of the
/// order in which they reach the service.
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CompletionService, LlmError, Message, ResponseSchema, Role, parse_json_reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Plain,
    Structured,
}

struct Rule {
    kind: Kind,
    needle: String,
    reply: Result<String, String>,
}

#[derive(Default)]
pub struct MockCompletion {
    rules: Vec<Rule>,
    plain_fallback: Option<String>,
    structured_fallback: Option<String>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockCompletion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain completions whose last user message contains `needle`.
    #[must_use]
    pub fn on_plain(mut self, needle: &str, reply: impl Into<String>) -> Self {
        self.rules.push(Rule {
            kind: Kind::Plain,
            needle: needle.to_string(),
            reply: Ok(reply.into()),
        });
        self
    }

    /// Structured completions whose last user message contains `needle`.
    #[must_use]
    pub fn on_structured(mut self, needle: &str, reply: impl Into<String>) -> Self {
        self.rules.push(Rule {
            kind: Kind::Structured,
            needle: needle.to_string(),
            reply: Ok(reply.into()),
        });
        self
    }

    #[must_use]
    pub fn fail_plain(mut self, needle: &str, error: &str) -> Self {
        self.rules.push(Rule {
            kind: Kind::Plain,
            needle: needle.to_string(),
            reply: Err(error.to_string()),
        });
        self
    }

    #[must_use]
    pub fn fail_structured(mut self, needle: &str, error: &str) -> Self {
        self.rules.push(Rule {
            kind: Kind::Structured,
            needle: needle.to_string(),
            reply: Err(error.to_string()),
        });
        self
    }

    #[must_use]
    pub fn otherwise_plain(mut self, reply: impl Into<String>) -> Self {
        self.plain_fallback = Some(reply.into());
        self
    }

    #[must_use]
    pub fn otherwise_structured(mut self, reply: impl Into<String>) -> Self {
        self.structured_fallback = Some(reply.into());
        self
    }

    /// Every conversation received so far, in arrival order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn respond(&self, kind: Kind, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let rule = self
            .rules
            .iter()
            .find(|r| r.kind == kind && prompt.contains(&r.needle));

        match rule {
            Some(Rule { reply: Ok(text), .. }) => Ok(text.clone()),
            Some(Rule { reply: Err(msg), .. }) => Err(LlmError::Request(msg.clone())),
            None => {
                let fallback = match kind {
                    Kind::Plain => &self.plain_fallback,
                    Kind::Structured => &self.structured_fallback,
                };
                fallback
                    .clone()
                    .ok_or_else(|| LlmError::Request("no scripted reply".to_string()))
            }
        }
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.respond(Kind::Plain, messages)
    }

    async fn complete_structured(
        &self,
        messages: &[Message],
        _schema: &ResponseSchema,
    ) -> Result<serde_json::Value, LlmError> {
        let text = self.respond(Kind::Structured, messages)?;
        parse_json_reply(&text)
    }
}
