//! Contract processing pipeline.
//!
//! ```text
//! PENDING → EXTRACTING → NORMALIZING → SEGMENTING → ANALYZING(i/n) → SUMMARIZING → DONE
//!                 └──────────────┴─────────────┴──────→ FAILED | CANCELLED
//! ```
//!
//! Extraction and segmentation errors are fatal and end in `FAILED` with no
//! report. Clause analyses run concurrently on a bounded pool; a failing
//! clause is degraded in place and never stops its siblings.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex as TokioMutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analyzer::{AnalyzerSettings, ClauseAnalyzer, ClauseJudgment, degraded};
use crate::checklist::Checklist;
use crate::chunking::{chunk_ids, split_into_chunks};
use crate::config::Config;
use crate::db::Db;
use crate::db::models::{ContractRecord, ContractStatus};
use crate::events::{NOTIFICATION_TOPIC, Notification, Notifier};
use crate::extract::{ExtractError, TextExtractor};
use crate::llm::{CompletionService, Message};
use crate::normalizer::normalize;
use crate::prompts;
use crate::report::{ComplianceReport, ReportDraft, build_draft};
use crate::segmenter::{SegmentError, Segmenter};
use crate::vector::{Collection, IndexError, VectorIndex};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("contract not found: {0}")]
    NotFound(String),

    #[error("text extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("processing cancelled")]
    Cancelled,
}

/// Name of the chat collection holding one contract's text.
pub fn contract_collection_name(contract_id: &str) -> String {
    format!("contract_{contract_id}")
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub analyzer: AnalyzerSettings,
    pub concurrency: usize,
    pub chat_chunk_size: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            analyzer: AnalyzerSettings::from_config(&config.analysis, &config.reference),
            concurrency: config.analysis.concurrency,
            chat_chunk_size: config.chat.chunk_size,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Pipeline {
    db: Arc<TokioMutex<Db>>,
    index: VectorIndex,
    extractor: Arc<dyn TextExtractor>,
    llm: Arc<dyn CompletionService>,
    notifier: Arc<dyn Notifier>,
    checklist: Arc<Checklist>,
    reference: Option<String>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        db: Arc<TokioMutex<Db>>,
        index: VectorIndex,
        extractor: Arc<dyn TextExtractor>,
        llm: Arc<dyn CompletionService>,
        notifier: Arc<dyn Notifier>,
        checklist: Arc<Checklist>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            db,
            index,
            extractor,
            llm,
            notifier,
            checklist,
            reference: None,
            settings,
        }
    }

    /// Statute collection used as retrieval context for clause analysis.
    /// Resolved by name for every document, so rebuilds are picked up.
    #[must_use]
    pub fn with_reference(mut self, collection_name: impl Into<String>) -> Self {
        self.reference = Some(collection_name.into());
        self
    }

    pub fn checklist(&self) -> &Checklist {
        &self.checklist
    }

    /// Registers the file as a new `PENDING` contract and returns its id.
    pub async fn submit(&self, path: &Path) -> Result<String, PipelineError> {
        let id = Uuid::new_v4().to_string();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.db
            .lock()
            .await
            .insert_contract(&id, &file_name, &path.display().to_string())?;
        info!("Submitted contract {id} ({file_name})");
        self.notify(Notification::Status {
            contract_id: id.clone(),
            status: ContractStatus::Pending,
        });
        Ok(id)
    }

    /// `submit` followed by `process`.
    pub async fn run(
        &self,
        path: &Path,
        cancel: CancellationToken,
    ) -> Result<(String, ComplianceReport), PipelineError> {
        let id = self.submit(path).await?;
        let report = self.process(&id, cancel).await?;
        Ok((id, report))
    }

    /// Runs every stage for a submitted contract. On error the contract is
    /// left in `FAILED` or `CANCELLED` with the cause recorded.
    pub async fn process(
        &self,
        contract_id: &str,
        cancel: CancellationToken,
    ) -> Result<ComplianceReport, PipelineError> {
        let record = self
            .db
            .lock()
            .await
            .get_contract(contract_id)?
            .ok_or_else(|| PipelineError::NotFound(contract_id.to_string()))?;

        match self.run_stages(&record, &cancel).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let status = match e {
                    PipelineError::Cancelled => ContractStatus::Cancelled,
                    _ => ContractStatus::Failed,
                };
                error!("Contract {contract_id} ended as {}: {e}", status.as_str());
                let reason = e.to_string();
                let recorded = self
                    .db
                    .lock()
                    .await
                    .abort_contract(contract_id, status, &reason);
                if let Err(db_err) = recorded {
                    error!("Failed to record {} for {contract_id}: {db_err}", status.as_str());
                }
                self.notify(Notification::Failed {
                    contract_id: contract_id.to_string(),
                    status,
                    reason,
                });
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        record: &ContractRecord,
        cancel: &CancellationToken,
    ) -> Result<ComplianceReport, PipelineError> {
        let id = record.id.as_str();

        self.enter(id, ContractStatus::Extracting, cancel).await?;
        let pages = self
            .extractor
            .extract(Path::new(&record.file_path))
            .await?;
        let raw_text = pages.join("\n\n");
        info!("Contract {id}: extracted {} pages", pages.len());

        self.enter(id, ContractStatus::Normalizing, cancel).await?;
        self.db.lock().await.set_contract_text(id, &raw_text)?;
        let text = normalize(&raw_text);

        self.enter(id, ContractStatus::Segmenting, cancel).await?;
        let clauses = Segmenter::new(self.llm.clone()).segment(&text).await?;

        self.enter(id, ContractStatus::Analyzing, cancel).await?;
        let judgments = self.analyze_clauses(id, &clauses, cancel).await?;

        self.enter(id, ContractStatus::Summarizing, cancel).await?;
        let draft = build_draft(&record.file_name, &self.checklist, &clauses, &judgments);
        let summary = self.summarize(&draft).await;
        let report = draft.finish(summary);

        let report_json = serde_json::to_value(&report)?;
        self.db.lock().await.complete_contract(id, &report_json)?;
        info!(
            "Contract {id} done: {} clauses, {} topics covered",
            report.clauses.len(),
            report.covered_topic.len()
        );
        self.notify(Notification::Status {
            contract_id: id.to_string(),
            status: ContractStatus::Done,
        });
        self.notify(Notification::Completed {
            contract_id: id.to_string(),
            report: report_json,
        });

        match self.index_for_chat(id, &text).await {
            Ok(count) => info!("Contract {id}: {count} chunks indexed for chat"),
            Err(e) => warn!("Contract {id}: chat indexing failed: {e}"),
        }

        Ok(report)
    }

    async fn enter(
        &self,
        contract_id: &str,
        status: ContractStatus,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.db
            .lock()
            .await
            .set_contract_status(contract_id, status)?;
        info!("Contract {contract_id}: {}", status.as_str());
        self.notify(Notification::Status {
            contract_id: contract_id.to_string(),
            status,
        });
        Ok(())
    }

    /// One judgment per clause, in clause order.
    async fn analyze_clauses(
        &self,
        contract_id: &str,
        clauses: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<ClauseJudgment>, PipelineError> {
        let total = clauses.len();
        let analyzer = Arc::new(ClauseAnalyzer::new(
            self.llm.clone(),
            self.checklist.clone(),
            self.reference_collection().await,
            self.settings.analyzer.clone(),
        ));
        let permits = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));

        let mut tasks = JoinSet::new();
        let mut slot_of = HashMap::with_capacity(total);
        for (slot, clause) in clauses.iter().enumerate() {
            let analyzer = analyzer.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            let clause = clause.clone();
            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }
                Some(analyzer.analyze(slot + 1, &clause).await)
            });
            slot_of.insert(handle.id(), slot);
        }

        let mut results: Vec<Option<ClauseJudgment>> = vec![None; total];
        let mut completed = 0;
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(PipelineError::Cancelled);
                }
                joined = tasks.join_next_with_id() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            let (slot, outcome) = match joined {
                Ok((task_id, Some(outcome))) => (slot_of.get(&task_id).copied(), outcome),
                Ok((task_id, None)) => {
                    if cancel.is_cancelled() {
                        tasks.abort_all();
                        return Err(PipelineError::Cancelled);
                    }
                    let slot = slot_of.get(&task_id).copied();
                    let index = slot.map_or(0, |s| s + 1);
                    (slot, degraded(index, "analysis task did not run"))
                }
                Err(join_err) => {
                    let slot = slot_of.get(&join_err.id()).copied();
                    let index = slot.map_or(0, |s| s + 1);
                    warn!("Clause {index} analysis task failed: {join_err}");
                    (slot, degraded(index, format!("analysis task failed: {join_err}")))
                }
            };

            let Some(slot) = slot else {
                continue;
            };
            results[slot] = Some(outcome.into_judgment());
            completed += 1;
            self.notify(Notification::ClauseAnalyzed {
                contract_id: contract_id.to_string(),
                completed,
                total,
            });
        }

        Ok(results
            .into_iter()
            .enumerate()
            .map(|(slot, judgment)| {
                judgment.unwrap_or_else(|| {
                    degraded(slot + 1, "analysis result missing").into_judgment()
                })
            })
            .collect())
    }

    async fn reference_collection(&self) -> Option<Collection> {
        let name = self.reference.as_deref()?;
        match self.index.get_collection(name).await {
            Ok(collection) => Some(collection),
            Err(e) => {
                warn!("Reference collection {name} unavailable, analysing without it: {e}");
                None
            }
        }
    }

    async fn summarize(&self, draft: &ReportDraft) -> String {
        if draft.clauses.is_empty() {
            return prompts::NO_CLAUSES_SUMMARY.to_string();
        }
        let messages = [
            Message::system(prompts::SUMMARY_SYSTEM),
            Message::user(prompts::summary_message(&draft.clause_summaries())),
        ];
        match self.llm.complete(&messages).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                warn!("Document summary failed: {e}");
                format!("Summary unavailable: {e}")
            }
        }
    }

    async fn index_for_chat(&self, contract_id: &str, text: &str) -> Result<usize, IndexError> {
        let chunks = split_into_chunks(text, self.settings.chat_chunk_size);
        if chunks.is_empty() {
            return Ok(0);
        }

        let name = contract_collection_name(contract_id);
        match self.index.delete_collection(&name).await {
            Ok(()) | Err(IndexError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let collection = self.index.create_collection(&name, None).await?;

        let ids = chunk_ids(&name, chunks.len());
        let metadatas: Vec<_> = (0..chunks.len())
            .map(|position| {
                let mut meta = serde_json::Map::new();
                meta.insert("contract_id".to_string(), json!(contract_id));
                meta.insert("position".to_string(), json!(position));
                meta
            })
            .collect();
        collection.add(&ids, &chunks, &metadatas).await
    }

    fn notify(&self, notification: Notification) {
        self.notifier
            .publish(NOTIFICATION_TOPIC, notification.to_payload());
    }
}
