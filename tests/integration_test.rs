/// End-to-end tests for the contract analysis flow.
///
/// Tests the complete flow:
///   Config → AppContext → reference build → extract → segment → analyze → report → chat
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clausecheck::app::AppContext;
use clausecheck::config::Config;
use clausecheck::db::models::ContractStatus;
use clausecheck::embedder::mock::MockEmbedder;
use clausecheck::extract::LocalExtractor;
use clausecheck::llm::mock::MockCompletion;
use clausecheck::llm::{CompletionService, LlmError, Message, ResponseSchema, Role};
use clausecheck::prompts;
use serde_json::json;
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

const REFERENCE: &str = "\
# BAB I
## KETENTUAN UMUM
### Pasal 1
Pekerja adalah setiap orang yang bekerja dengan menerima upah.

# BAB X
## PERLINDUNGAN, PENGUPAHAN, DAN KESEJAHTERAAN
### Pasal 88
Setiap pekerja berhak memperoleh penghasilan yang layak, lihat Pasal 1.
";

fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.db_path = dir.join("clausecheck.db").display().to_string();
    config.embedding.dimensions = 16;
    config.reference.source_path = dir.join("uu.md").display().to_string();
    config
}

async fn context(dir: &TempDir, llm: Arc<dyn CompletionService>) -> AppContext {
    AppContext::with_services(
        config_in(dir.path()),
        Arc::new(MockEmbedder::new(16)),
        llm,
        Arc::new(LocalExtractor),
    )
    .await
    .unwrap()
}

fn judgment(topic: &str, summary: &str) -> String {
    json!({
        "topic": topic,
        "summary": summary,
        "vague": false,
        "red_flag": false,
        "issue_reason": "",
        "questions": [],
    })
    .to_string()
}

/// Three clauses: one on a checklist topic, one extra, one whose analysis fails.
#[tokio::test]
async fn test_contract_with_failed_clause() {
    let temp_dir = tempdir().unwrap();
    std::fs::write(temp_dir.path().join("uu.md"), REFERENCE).unwrap();
    let contract = temp_dir.path().join("pkwt.md");
    std::fs::write(
        &contract,
        "PERJANJIAN KERJA\n\nPekerja menjabat sebagai staf administrasi.\n\n\n\nPekerja wajib ikut gathering tahunan.\n\nKetentuan penutup.",
    )
    .unwrap();

    let llm = Arc::new(
        MockCompletion::new()
            .on_plain(
                "PERJANJIAN KERJA",
                r#"["Pekerja menjabat sebagai staf administrasi.", "Pekerja wajib ikut gathering tahunan.", "Ketentuan penutup."]"#,
            )
            .on_structured("menjabat", judgment("2", "Sets the job title."))
            .on_structured("gathering", judgment("extra", "Requires attending a yearly event."))
            .fail_structured("penutup", "upstream timeout")
            .otherwise_plain("Position is defined; most mandatory topics are missing."),
    );
    let ctx = context(&temp_dir, llm.clone()).await;

    let (id, report) = ctx
        .pipeline
        .run(&contract, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.file_name, "pkwt.md");
    assert_eq!(report.clauses.len(), 3);
    assert_eq!(report.covered_topic, vec!["Position and Job Description"]);
    assert_eq!(report.uncovered_topic.len(), 13);
    assert_eq!(report.clauses[0].clause_topic, "Position and Job Description");
    assert_eq!(report.clauses[1].clause_topic, "Extra");

    let failed = &report.clauses[2];
    assert_eq!(failed.clause_content, "Ketentuan penutup.");
    assert_eq!(failed.clause_summary, prompts::DEGRADED_SUMMARY);
    assert!(failed.issue_reason.contains("upstream timeout"));
    assert!(!failed.questions.is_empty());

    // Statute articles reach the clause prompts as context
    let saw_reference = llm.calls().iter().any(|call| {
        call.iter()
            .any(|m| m.role == Role::System && m.content.contains("Pasal 88"))
    });
    assert!(saw_reference, "reference context should be attached");

    let record = ctx.db.lock().await.get_contract(&id).unwrap().unwrap();
    assert_eq!(record.status, ContractStatus::Done);
    let stored = record.report.unwrap();
    assert_eq!(stored["coveredTopic"][0], "Position and Job Description");
    assert_eq!(stored["clauses"].as_array().map(Vec::len), Some(3));
}

/// Replies to clause N after a delay that shrinks with N, so analyses
/// finish in reverse order, and records the peak number in flight.
struct ReverseOrderCompletion {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

fn clause_index(messages: &[Message]) -> usize {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .and_then(|m| m.content.strip_prefix("Clause "))
        .and_then(|rest| rest.split(':').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl CompletionService for ReverseOrderCompletion {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        if last.contains("KONTRAK") {
            let clauses: Vec<String> = (1..=6).map(|i| format!("Klausul nomor {i}.")).collect();
            return Ok(serde_json::to_string(&clauses)?);
        }
        Ok("Six clauses.".to_string())
    }

    async fn complete_structured(
        &self,
        messages: &[Message],
        _schema: &ResponseSchema,
    ) -> Result<serde_json::Value, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let index = clause_index(messages);
        tokio::time::sleep(Duration::from_millis(10 * (7 - index.min(6)) as u64)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let topic = if index % 2 == 0 { "4" } else { "extra" };
        Ok(serde_json::from_str(&judgment(topic, &format!("summary {index}")))?)
    }
}

#[tokio::test]
async fn test_report_keeps_clause_order_under_concurrency() {
    let temp_dir = tempdir().unwrap();
    let contract = temp_dir.path().join("kontrak.txt");
    std::fs::write(&contract, "KONTRAK KERJA WAKTU TERTENTU").unwrap();

    let llm = Arc::new(ReverseOrderCompletion {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut config = config_in(temp_dir.path());
    config.analysis.concurrency = 2;
    let ctx = AppContext::with_services(
        config,
        Arc::new(MockEmbedder::new(16)),
        llm.clone(),
        Arc::new(LocalExtractor),
    )
    .await
    .unwrap();

    let (_, report) = ctx
        .pipeline
        .run(&contract, CancellationToken::new())
        .await
        .unwrap();

    let summaries: Vec<&str> = report
        .clauses
        .iter()
        .map(|c| c.clause_summary.as_str())
        .collect();
    assert_eq!(
        summaries,
        vec!["summary 1", "summary 2", "summary 3", "summary 4", "summary 5", "summary 6"]
    );
    assert_eq!(report.clauses[3].clause_content, "Klausul nomor 4.");
    assert_eq!(report.covered_topic, vec!["Wages and Payment"]);
    assert!(llm.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_reference_build_is_idempotent_across_restarts() {
    let temp_dir = tempdir().unwrap();
    std::fs::write(temp_dir.path().join("uu.md"), REFERENCE).unwrap();

    let first = context(&temp_dir, Arc::new(MockCompletion::new())).await;
    let name = first.config.reference.collection_name.clone();
    let ids = first.index.get_collection(&name).await.unwrap().ids().await.unwrap();
    assert_eq!(ids.len(), 2);
    drop(first);

    // Same database, unchanged source: the collection is reused as is
    let second = context(&temp_dir, Arc::new(MockCompletion::new())).await;
    let collection = second
        .reference
        .ensure(&second.config.reference.source_path, &name, false)
        .await
        .unwrap();
    assert_eq!(collection.ids().await.unwrap(), ids);
    assert_eq!(second.index.list_collections().await.unwrap(), vec![name]);
}

#[tokio::test]
async fn test_missing_reference_source_is_not_fatal() {
    let temp_dir = tempdir().unwrap();
    let contract = temp_dir.path().join("pkwt.md");
    std::fs::write(&contract, "PERJANJIAN\n\nUpah dibayar setiap bulan.").unwrap();

    let llm = Arc::new(
        MockCompletion::new()
            .on_plain("PERJANJIAN", r#"["Upah dibayar setiap bulan."]"#)
            .otherwise_structured(judgment("4", "Monthly wages."))
            .otherwise_plain("Wages only."),
    );
    let ctx = context(&temp_dir, llm).await;
    assert!(ctx.index.list_collections().await.unwrap().is_empty());

    let (id, report) = ctx
        .pipeline
        .run(&contract, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.covered_topic, vec!["Wages and Payment"]);

    let reply = ctx.chat.ask(&id, "Kapan upah dibayar?").await;
    assert!(reply.is_ok());
    let history = ctx.chat.history(&id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
}
