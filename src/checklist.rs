//! The fixed legal checklist clauses are matched against.
//!
//! The built-in catalog covers the items an employment agreement is expected
//! to address under Indonesian Law No. 13 of 2003 on Manpower. A different
//! catalog can be loaded from JSON at startup; once loaded it is immutable.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChecklistError {
    #[error("failed to read checklist {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid checklist JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checklist is empty")]
    Empty,

    #[error("topic at position {position} has id {found}, expected {expected}")]
    IdOutOfSequence {
        position: usize,
        expected: u32,
        found: u32,
    },

    #[error("topic {0} has an empty title")]
    EmptyTitle(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistTopic {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub sub_points: Vec<String>,
}

/// Ordered, validated topic table. Ids are exactly `1..=len`.
#[derive(Debug, Clone)]
pub struct Checklist {
    topics: Vec<ChecklistTopic>,
}

impl Checklist {
    pub fn new(topics: Vec<ChecklistTopic>) -> Result<Self, ChecklistError> {
        if topics.is_empty() {
            return Err(ChecklistError::Empty);
        }
        for (position, topic) in topics.iter().enumerate() {
            let expected = position as u32 + 1;
            if topic.id != expected {
                return Err(ChecklistError::IdOutOfSequence {
                    position,
                    expected,
                    found: topic.id,
                });
            }
            if topic.title.trim().is_empty() {
                return Err(ChecklistError::EmptyTitle(topic.id));
            }
        }
        Ok(Self { topics })
    }

    pub fn from_json_str(json: &str) -> Result<Self, ChecklistError> {
        let topics: Vec<ChecklistTopic> = serde_json::from_str(json)?;
        Self::new(topics)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ChecklistError> {
        let data = std::fs::read_to_string(path).map_err(|source| ChecklistError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&data)
    }

    /// Load from `path` when given, otherwise the built-in catalog.
    pub fn load(path: Option<&str>) -> Result<Self, ChecklistError> {
        match path {
            Some(p) => Self::from_json_file(Path::new(p)),
            None => Ok(Self::builtin()),
        }
    }

    pub fn builtin() -> Self {
        let topics = BUILTIN
            .iter()
            .enumerate()
            .map(|(i, (title, subs))| ChecklistTopic {
                id: i as u32 + 1,
                title: (*title).to_string(),
                sub_points: subs.iter().map(|s| (*s).to_string()).collect(),
            })
            .collect();
        Self { topics }
    }

    pub fn topics(&self) -> &[ChecklistTopic] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&ChecklistTopic> {
        if id == 0 {
            return None;
        }
        self.topics.get(id as usize - 1)
    }

    /// Topic list as embedded in the clause analysis prompt.
    pub fn render_for_prompt(&self, with_sub_points: bool) -> String {
        let mut out = String::new();
        for topic in &self.topics {
            out.push_str(&format!("{}. {}\n", topic.id, topic.title));
            if with_sub_points {
                for (i, sub) in topic.sub_points.iter().enumerate() {
                    out.push_str(&format!("   {}.{} {}\n", topic.id, i + 1, sub));
                }
            }
        }
        out
    }
}

const BUILTIN: &[(&str, &[&str])] = &[
    (
        "Identity of the Parties",
        &[
            "Employer name, address, and type of business",
            "Employee name, gender, age, and address",
        ],
    ),
    (
        "Position and Job Description",
        &["Job title or position", "Scope of duties and responsibilities"],
    ),
    (
        "Place of Work",
        &["Work location", "Conditions for transfer or relocation"],
    ),
    (
        "Wages and Payment",
        &[
            "Amount of basic wage and fixed allowances",
            "Payment method and schedule",
            "Wage not below the applicable minimum wage",
        ],
    ),
    (
        "Working Hours and Overtime",
        &[
            "Daily and weekly working hours",
            "Overtime conditions and overtime pay",
        ],
    ),
    (
        "Contract Type and Duration",
        &[
            "Fixed-term (PKWT) or permanent (PKWTT) employment",
            "Start date and, for fixed-term contracts, end date",
            "Renewal or extension conditions",
        ],
    ),
    (
        "Probation Period",
        &[
            "Length of probation, at most three months",
            "No probation for fixed-term contracts",
        ],
    ),
    (
        "Leave and Rest Periods",
        &[
            "Weekly rest days",
            "Annual leave entitlement",
            "Sick, maternity, and other statutory leave",
        ],
    ),
    (
        "Social Security",
        &[
            "Employment social security (BPJS Ketenagakerjaan) enrolment",
            "Health insurance (BPJS Kesehatan) enrolment",
        ],
    ),
    (
        "Occupational Safety and Health",
        &[
            "Employer safety obligations",
            "Protective equipment and workplace standards",
        ],
    ),
    (
        "Rights and Obligations of the Parties",
        &[
            "Employer obligations",
            "Employee obligations and conduct rules",
        ],
    ),
    (
        "Termination and Severance",
        &[
            "Grounds and notice for termination",
            "Severance, long-service, and compensation pay",
        ],
    ),
    (
        "Dispute Resolution",
        &[
            "Bipartite negotiation procedure",
            "Mediation, conciliation, or Industrial Relations Court",
        ],
    ),
    (
        "Execution and Signatures",
        &[
            "Place and date the agreement is made",
            "Signatures of both parties",
        ],
    ),
];
