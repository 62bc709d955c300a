use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::llm::Role;

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRow {
    pub id: i64,
    pub name: String,
    pub source_path: Option<String>,
    pub source_modified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChunk<'a> {
    pub key: &'a str,
    pub content: &'a str,
    /// Metadata object, already serialized to JSON.
    pub metadata: &'a str,
}

/// Processing state of one contract.
///
/// `Done`, `Failed`, and `Cancelled` are terminal. Only `Done` carries a
/// report; `Failed` and `Cancelled` carry a failure reason instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Pending,
    Extracting,
    Normalizing,
    Segmenting,
    Analyzing,
    Summarizing,
    Done,
    Failed,
    Cancelled,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Extracting => "EXTRACTING",
            Self::Normalizing => "NORMALIZING",
            Self::Segmenting => "SEGMENTING",
            Self::Analyzing => "ANALYZING",
            Self::Summarizing => "SUMMARIZING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let status = match s {
            "PENDING" => Self::Pending,
            "EXTRACTING" => Self::Extracting,
            "NORMALIZING" => Self::Normalizing,
            "SEGMENTING" => Self::Segmenting,
            "ANALYZING" => Self::Analyzing,
            "SUMMARIZING" => Self::Summarizing,
            "DONE" => Self::Done,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            _ => return None,
        };
        Some(status)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractRecord {
    pub id: String,
    pub file_name: String,
    pub file_path: String,
    pub status: ContractStatus,
    #[serde(skip_serializing)]
    pub raw_text: Option<String>,
    /// Serialized `ComplianceReport`, present only when `status` is `Done`.
    pub report: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
