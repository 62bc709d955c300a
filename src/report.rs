//! Coverage aggregation and report assembly.
//!
//! Folding judgments into a [`CoverageMatrix`] is commutative and
//! associative, so judgments may arrive in any order and partial matrices
//! built by different workers may be merged.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analyzer::{ClauseJudgment, TopicAssignment};
use crate::checklist::Checklist;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicCoverage {
    pub covered: bool,
    /// ORed across clauses; `None` until a clause reports sub-point flags.
    pub sub_points: Option<Vec<bool>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageMatrix {
    topics: BTreeMap<u32, TopicCoverage>,
}

fn or_into(target: &mut Option<Vec<bool>>, flags: &[bool]) {
    match target {
        Some(existing) if existing.len() == flags.len() => {
            for (slot, flag) in existing.iter_mut().zip(flags) {
                *slot |= *flag;
            }
        }
        Some(_) => {}
        None => *target = Some(flags.to_vec()),
    }
}

impl CoverageMatrix {
    /// Every checklist topic, uncovered.
    pub fn new(checklist: &Checklist) -> Self {
        let topics = checklist
            .topics()
            .iter()
            .map(|t| (t.id, TopicCoverage::default()))
            .collect();
        Self { topics }
    }

    pub fn record(&mut self, judgment: &ClauseJudgment) {
        let TopicAssignment::Topic(id) = judgment.topic else {
            return;
        };
        let Some(entry) = self.topics.get_mut(&id) else {
            return;
        };
        entry.covered = true;
        if let Some(flags) = &judgment.sub_points {
            or_into(&mut entry.sub_points, flags);
        }
    }

    pub fn merge(&mut self, other: &CoverageMatrix) {
        for (id, theirs) in &other.topics {
            let entry = self.topics.entry(*id).or_default();
            entry.covered |= theirs.covered;
            if let Some(flags) = &theirs.sub_points {
                or_into(&mut entry.sub_points, flags);
            }
        }
    }

    pub fn is_covered(&self, id: u32) -> bool {
        self.topics.get(&id).is_some_and(|t| t.covered)
    }

    pub fn get(&self, id: u32) -> Option<&TopicCoverage> {
        self.topics.get(&id)
    }

    pub fn covered_ids(&self) -> Vec<u32> {
        self.topics
            .iter()
            .filter(|(_, t)| t.covered)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn uncovered_ids(&self) -> Vec<u32> {
        self.topics
            .iter()
            .filter(|(_, t)| !t.covered)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClauseEntry {
    pub clause_topic: String,
    pub clause_content: String,
    pub clause_summary: String,
    pub vague: bool,
    pub red_flag: bool,
    pub issue_reason: String,
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub file_name: String,
    pub contract_summary: String,
    pub covered_topic: Vec<String>,
    pub uncovered_topic: Vec<String>,
    pub clauses: Vec<ClauseEntry>,
}

pub const EXTRA_TOPIC_LABEL: &str = "Extra";

pub fn topic_label(checklist: &Checklist, topic: TopicAssignment) -> String {
    match topic {
        TopicAssignment::Topic(id) => checklist
            .get(id)
            .map_or_else(|| EXTRA_TOPIC_LABEL.to_string(), |t| t.title.clone()),
        TopicAssignment::Extra => EXTRA_TOPIC_LABEL.to_string(),
    }
}

/// Everything in the report except the document summary, which needs a
/// completion call. Pure: the same inputs always give the same draft.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDraft {
    pub file_name: String,
    pub matrix: CoverageMatrix,
    pub covered_topic: Vec<String>,
    pub uncovered_topic: Vec<String>,
    pub clauses: Vec<ClauseEntry>,
}

impl ReportDraft {
    /// Per-clause summaries in clause order, input for the document summary.
    pub fn clause_summaries(&self) -> Vec<String> {
        self.clauses.iter().map(|c| c.clause_summary.clone()).collect()
    }

    pub fn finish(self, contract_summary: String) -> ComplianceReport {
        ComplianceReport {
            file_name: self.file_name,
            contract_summary,
            covered_topic: self.covered_topic,
            uncovered_topic: self.uncovered_topic,
            clauses: self.clauses,
        }
    }
}

/// Folds judgments into a draft. `clauses` and `judgments` are aligned by
/// position; judgments are ordered by their clause index first.
pub fn build_draft(
    file_name: &str,
    checklist: &Checklist,
    clauses: &[String],
    judgments: &[ClauseJudgment],
) -> ReportDraft {
    let mut matrix = CoverageMatrix::new(checklist);
    for judgment in judgments {
        matrix.record(judgment);
    }

    let titles = |ids: Vec<u32>| -> Vec<String> {
        ids.into_iter()
            .filter_map(|id| checklist.get(id).map(|t| t.title.clone()))
            .collect()
    };
    let covered_topic = titles(matrix.covered_ids());
    let uncovered_topic = titles(matrix.uncovered_ids());

    let mut ordered: Vec<&ClauseJudgment> = judgments.iter().collect();
    ordered.sort_by_key(|j| j.index);

    let entries = ordered
        .into_iter()
        .map(|j| ClauseEntry {
            clause_topic: topic_label(checklist, j.topic),
            clause_content: j
                .index
                .checked_sub(1)
                .and_then(|i| clauses.get(i))
                .cloned()
                .unwrap_or_default(),
            clause_summary: j.summary.clone(),
            vague: j.vague,
            red_flag: j.red_flag,
            issue_reason: j.issue_reason.clone(),
            questions: j.questions.clone(),
        })
        .collect();

    ReportDraft {
        file_name: file_name.to_string(),
        matrix,
        covered_topic,
        uncovered_topic,
        clauses: entries,
    }
}
