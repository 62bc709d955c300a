//! Per-clause structured analysis.
//!
//! One structured completion per clause yields the topic match, summary,
//! risk flags and questions together. Any failure turns into a degraded
//! judgment; nothing here aborts the document.
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::checklist::Checklist;
use crate::config::{AnalysisConfig, ReferenceConfig};
use crate::llm::{CompletionService, LlmError, Message, ResponseSchema};
use crate::prompts;
use crate::vector::{Collection, QueryHit};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("analysis request failed: {0}")]
    Completion(#[from] LlmError),

    #[error("analysis reply has an unexpected shape: {0}")]
    Shape(String),

    #[error("analysis reply names unknown topic {0:?}")]
    UnknownTopic(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicAssignment {
    Topic(u32),
    Extra,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClauseJudgment {
    /// 1-based position of the clause in the document.
    pub index: usize,
    pub topic: TopicAssignment,
    pub sub_points: Option<Vec<bool>>,
    pub summary: String,
    pub vague: bool,
    pub red_flag: bool,
    pub issue_reason: String,
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseOutcome {
    Analyzed(ClauseJudgment),
    Degraded {
        judgment: ClauseJudgment,
        cause: String,
    },
}

impl ClauseOutcome {
    pub fn judgment(&self) -> &ClauseJudgment {
        match self {
            Self::Analyzed(j) | Self::Degraded { judgment: j, .. } => j,
        }
    }

    pub fn into_judgment(self) -> ClauseJudgment {
        match self {
            Self::Analyzed(j) | Self::Degraded { judgment: j, .. } => j,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Fallback judgment substituted for a clause whose analysis failed.
pub fn degraded_judgment(index: usize, cause: &str) -> ClauseJudgment {
    ClauseJudgment {
        index,
        topic: TopicAssignment::Extra,
        sub_points: None,
        summary: prompts::DEGRADED_SUMMARY.to_string(),
        vague: false,
        red_flag: false,
        issue_reason: cause.to_string(),
        questions: vec![prompts::DEGRADED_QUESTION.to_string()],
    }
}

pub fn degraded(index: usize, cause: impl Into<String>) -> ClauseOutcome {
    let cause = cause.into();
    ClauseOutcome::Degraded {
        judgment: degraded_judgment(index, &cause),
        cause,
    }
}

/// Keeps at most `limit` whitespace-separated words.
pub fn truncate_words(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if trimmed.split_whitespace().count() <= limit {
        return trimmed.to_string();
    }
    trimmed
        .split_whitespace()
        .take(limit)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub summary_word_limit: usize,
    pub reason_word_limit: usize,
    pub track_sub_points: bool,
    pub context_top_k: usize,
}

impl AnalyzerSettings {
    pub fn from_config(analysis: &AnalysisConfig, reference: &ReferenceConfig) -> Self {
        Self {
            summary_word_limit: analysis.summary_word_limit,
            reason_word_limit: analysis.reason_word_limit,
            track_sub_points: analysis.track_sub_points,
            context_top_k: reference.context_top_k,
        }
    }
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default(), &ReferenceConfig::default())
    }
}

#[derive(Deserialize)]
struct RawJudgment {
    topic: Value,
    summary: String,
    vague: bool,
    red_flag: bool,
    #[serde(default)]
    issue_reason: String,
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    sub_points: Option<Vec<bool>>,
}

pub struct ClauseAnalyzer {
    llm: Arc<dyn CompletionService>,
    checklist: Arc<Checklist>,
    reference: Option<Collection>,
    settings: AnalyzerSettings,
    system_prompt: String,
    schema: ResponseSchema,
}

impl ClauseAnalyzer {
    pub fn new(
        llm: Arc<dyn CompletionService>,
        checklist: Arc<Checklist>,
        reference: Option<Collection>,
        settings: AnalyzerSettings,
    ) -> Self {
        let system_prompt = prompts::analysis_system(
            &checklist.render_for_prompt(settings.track_sub_points),
            settings.summary_word_limit,
            settings.reason_word_limit,
            settings.track_sub_points,
        );
        let schema = response_schema(&checklist, settings.track_sub_points);
        Self {
            llm,
            checklist,
            reference,
            settings,
            system_prompt,
            schema,
        }
    }

    /// Always yields exactly one judgment for the clause.
    pub async fn analyze(&self, index: usize, clause: &str) -> ClauseOutcome {
        match self.try_analyze(index, clause).await {
            Ok(judgment) => ClauseOutcome::Analyzed(judgment),
            Err(e) => {
                warn!("Clause {index} analysis degraded: {e}");
                degraded(index, e.to_string())
            }
        }
    }

    pub async fn try_analyze(
        &self,
        index: usize,
        clause: &str,
    ) -> Result<ClauseJudgment, AnalysisError> {
        let mut messages = vec![Message::system(self.system_prompt.as_str())];
        let context = self.reference_context(clause).await;
        if !context.is_empty() {
            messages.push(Message::system(prompts::reference_context(&context)));
        }
        messages.push(Message::user(prompts::clause_message(index, clause)));

        let reply = self.llm.complete_structured(&messages, &self.schema).await?;
        self.validate(index, reply)
    }

    async fn reference_context(&self, clause: &str) -> Vec<String> {
        let Some(collection) = &self.reference else {
            return Vec::new();
        };
        if self.settings.context_top_k == 0 {
            return Vec::new();
        }
        match collection.query(clause, self.settings.context_top_k).await {
            Ok(hits) => {
                debug!("Retrieved {} reference articles", hits.len());
                hits.iter().map(format_hit).collect()
            }
            Err(e) => {
                warn!("Reference retrieval failed, continuing without context: {e}");
                Vec::new()
            }
        }
    }

    fn validate(&self, index: usize, reply: Value) -> Result<ClauseJudgment, AnalysisError> {
        let raw: RawJudgment =
            serde_json::from_value(reply).map_err(|e| AnalysisError::Shape(e.to_string()))?;

        let topic = self.parse_topic(&raw.topic)?;

        let sub_points = match (topic, raw.sub_points) {
            (TopicAssignment::Topic(id), Some(points)) if self.settings.track_sub_points => {
                let expected = self.checklist.get(id).map_or(0, |t| t.sub_points.len());
                if points.len() == expected {
                    Some(points)
                } else {
                    warn!(
                        "Clause {index}: expected {expected} sub-point flags for topic {id}, got {}",
                        points.len()
                    );
                    None
                }
            }
            _ => None,
        };

        let issue_reason = if raw.vague || raw.red_flag {
            truncate_words(&raw.issue_reason, self.settings.reason_word_limit)
        } else {
            String::new()
        };

        let questions = raw
            .questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        Ok(ClauseJudgment {
            index,
            topic,
            sub_points,
            summary: truncate_words(&raw.summary, self.settings.summary_word_limit),
            vague: raw.vague,
            red_flag: raw.red_flag,
            issue_reason,
            questions,
        })
    }

    fn parse_topic(&self, value: &Value) -> Result<TopicAssignment, AnalysisError> {
        let id = match value {
            Value::String(s) if s.trim().eq_ignore_ascii_case("extra") => {
                return Ok(TopicAssignment::Extra);
            }
            Value::String(s) => s.trim().parse::<u32>().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        };
        match id {
            Some(id) if self.checklist.get(id).is_some() => Ok(TopicAssignment::Topic(id)),
            _ => Err(AnalysisError::UnknownTopic(value.to_string())),
        }
    }
}

fn format_hit(hit: &QueryHit) -> String {
    let mut header = Vec::new();
    if let Some(numeral) = hit.meta_str("chapter_numeral") {
        header.push(format!("Chapter {numeral}"));
    }
    if let Some(title) = hit.meta_str("chapter_title") {
        header.push(title.to_string());
    }
    if let Some(article) = hit.meta_str("article_number") {
        header.push(format!("Article {article}"));
    }
    if header.is_empty() {
        hit.text.clone()
    } else {
        format!("[{}]\n{}", header.join(" | "), hit.text)
    }
}

/// JSON Schema for the analysis reply; the topic enum follows the checklist.
pub fn response_schema(checklist: &Checklist, with_sub_points: bool) -> ResponseSchema {
    let mut topics: Vec<String> = checklist.topics().iter().map(|t| t.id.to_string()).collect();
    topics.push("extra".to_string());

    let mut properties = json!({
        "topic": { "type": "string", "enum": topics },
        "summary": { "type": "string" },
        "vague": { "type": "boolean" },
        "red_flag": { "type": "boolean" },
        "issue_reason": { "type": "string" },
        "questions": { "type": "array", "items": { "type": "string" } },
    });
    let mut required = vec![
        "topic",
        "summary",
        "vague",
        "red_flag",
        "issue_reason",
        "questions",
    ];
    if with_sub_points {
        properties["sub_points"] = json!({ "type": "array", "items": { "type": "boolean" } });
        required.push("sub_points");
    }

    ResponseSchema {
        name: "clause_analysis".to_string(),
        schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockCompletion;

    fn analyzer(mock: MockCompletion, settings: AnalyzerSettings) -> ClauseAnalyzer {
        ClauseAnalyzer::new(
            Arc::new(mock),
            Arc::new(Checklist::builtin()),
            None,
            settings,
        )
    }

    fn reply(topic: &str, vague: bool, red_flag: bool) -> String {
        json!({
            "topic": topic,
            "summary": "The employee is paid monthly.",
            "vague": vague,
            "red_flag": red_flag,
            "issue_reason": "Payment date is not specified.",
            "questions": ["When exactly is salary paid?", "  "],
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_analyzed_judgment() {
        let mock = MockCompletion::new().on_structured("salary", reply("4", true, false));
        let outcome = analyzer(mock, AnalyzerSettings::default())
            .analyze(1, "The salary is paid monthly.")
            .await;

        assert!(!outcome.is_degraded());
        let j = outcome.judgment();
        assert_eq!(j.index, 1);
        assert_eq!(j.topic, TopicAssignment::Topic(4));
        assert!(j.vague);
        assert_eq!(j.issue_reason, "Payment date is not specified.");
        assert_eq!(j.questions, vec!["When exactly is salary paid?"]);
        assert_eq!(j.sub_points, None);
    }

    #[tokio::test]
    async fn test_reason_cleared_without_flags() {
        let mock = MockCompletion::new().otherwise_structured(reply("extra", false, false));
        let j = analyzer(mock, AnalyzerSettings::default())
            .analyze(2, "Closing words.")
            .await
            .into_judgment();
        assert_eq!(j.topic, TopicAssignment::Extra);
        assert!(j.issue_reason.is_empty());
    }

    #[tokio::test]
    async fn test_failure_yields_degraded_judgment() {
        let mock = MockCompletion::new().fail_structured("", "quota exceeded");
        let outcome = analyzer(mock, AnalyzerSettings::default())
            .analyze(3, "Anything")
            .await;

        let ClauseOutcome::Degraded { judgment, cause } = outcome else {
            panic!("expected degraded outcome");
        };
        assert!(cause.contains("quota exceeded"));
        assert_eq!(judgment.index, 3);
        assert_eq!(judgment.topic, TopicAssignment::Extra);
        assert_eq!(judgment.summary, prompts::DEGRADED_SUMMARY);
        assert!(!judgment.vague && !judgment.red_flag);
        assert!(judgment.issue_reason.contains("quota exceeded"));
        assert_eq!(judgment.questions.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_replies_degrade() {
        let mock = MockCompletion::new()
            .on_structured("unknown", reply("99", false, false))
            .on_structured("shape", r#"{"topic": "1"}"#);
        let analyzer = analyzer(mock, AnalyzerSettings::default());

        let unknown = analyzer.try_analyze(1, "unknown topic").await.unwrap_err();
        assert!(matches!(unknown, AnalysisError::UnknownTopic(_)));

        let shape = analyzer.try_analyze(1, "bad shape").await.unwrap_err();
        assert!(matches!(shape, AnalysisError::Shape(_)));

        assert!(analyzer.analyze(1, "bad shape").await.is_degraded());
    }

    #[tokio::test]
    async fn test_word_limits_applied() {
        let long = "word ".repeat(200);
        let body = json!({
            "topic": 5,
            "summary": long,
            "vague": false,
            "red_flag": true,
            "issue_reason": long,
            "questions": [],
        })
        .to_string();
        let settings = AnalyzerSettings {
            summary_word_limit: 10,
            reason_word_limit: 3,
            ..AnalyzerSettings::default()
        };
        let j = analyzer(MockCompletion::new().otherwise_structured(body), settings)
            .analyze(1, "Hours")
            .await
            .into_judgment();
        assert_eq!(j.topic, TopicAssignment::Topic(5));
        assert_eq!(j.summary.split_whitespace().count(), 10);
        assert_eq!(j.issue_reason, "word word word");
    }

    #[tokio::test]
    async fn test_sub_points_checked_against_topic() {
        let ok = json!({
            "topic": "4", "summary": "s", "vague": false, "red_flag": false,
            "issue_reason": "", "questions": [], "sub_points": [true, false, true],
        });
        let wrong = json!({
            "topic": "4", "summary": "s", "vague": false, "red_flag": false,
            "issue_reason": "", "questions": [], "sub_points": [true],
        });
        let mock = MockCompletion::new()
            .on_structured("good", ok.to_string())
            .on_structured("wrong", wrong.to_string());
        let settings = AnalyzerSettings {
            track_sub_points: true,
            ..AnalyzerSettings::default()
        };
        let analyzer = analyzer(mock, settings);

        let j = analyzer.analyze(1, "good").await.into_judgment();
        assert_eq!(j.sub_points, Some(vec![true, false, true]));

        // Wrong length is dropped, the judgment itself stands
        let outcome = analyzer.analyze(2, "wrong").await;
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.judgment().sub_points, None);
    }

    #[test]
    fn test_response_schema() {
        let schema = response_schema(&Checklist::builtin(), false);
        let topics = schema.schema["properties"]["topic"]["enum"].as_array().unwrap();
        assert_eq!(topics.len(), 15);
        assert_eq!(topics[0], "1");
        assert_eq!(topics[14], "extra");
        assert!(schema.schema["properties"].get("sub_points").is_none());

        let with_subs = response_schema(&Checklist::builtin(), true);
        assert!(with_subs.schema["properties"].get("sub_points").is_some());
    }

    #[test]
    fn test_truncate_words() {
        assert_eq!(truncate_words("  a b  c ", 5), "a b  c");
        assert_eq!(truncate_words("a b c d", 2), "a b");
        assert_eq!(truncate_words("", 3), "");
    }
}
