//! Wiring of configuration, storage and services shared by the CLI and the
//! MCP server.
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chat::ChatService;
use crate::checklist::Checklist;
use crate::config::Config;
use crate::db::Db;
use crate::embedder::{Embedder, http::HttpEmbedder};
use crate::events::BroadcastNotifier;
use crate::extract::{LocalExtractor, TextExtractor};
use crate::llm::{CompletionService, openai::OpenAiClient};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::reference::ReferenceBuilder;
use crate::vector::VectorIndex;

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: Arc<TokioMutex<Db>>,
    pub index: VectorIndex,
    pub reference: ReferenceBuilder,
    pub pipeline: Arc<Pipeline>,
    pub chat: Arc<ChatService>,
    pub notifier: BroadcastNotifier,
    /// Cancelled on shutdown; background analyses use child tokens.
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Production wiring: HTTP embedder, OpenAI-compatible LLM client,
    /// local file extraction.
    pub async fn build(config: Config) -> Result<Self> {
        let embedder = HttpEmbedder::from_config(&config.embedding)
            .context("failed to initialize embedder")?;
        let llm = OpenAiClient::from_config(&config.llm).context("failed to initialize LLM client")?;
        Self::with_services(
            config,
            Arc::new(embedder),
            Arc::new(llm),
            Arc::new(LocalExtractor),
        )
        .await
    }

    pub async fn with_services(
        config: Config,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn CompletionService>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        config.validate()?;
        let checklist = Checklist::load(config.checklist_path.as_deref())
            .context("failed to load checklist")?;
        info!("Checklist loaded with {} topics", checklist.len());

        let db = Db::open(&config.db_path, embedder.dimensions())
            .with_context(|| format!("failed to open database {}", config.db_path))?;
        let db = Arc::new(TokioMutex::new(db));

        let index = VectorIndex::new(db.clone(), embedder);
        let reference = ReferenceBuilder::from_config(index.clone(), &config.reference);
        let notifier = BroadcastNotifier::default();

        ensure_reference(&reference, &config).await;
        let pipeline = Pipeline::new(
            db.clone(),
            index.clone(),
            extractor,
            llm.clone(),
            Arc::new(notifier.clone()),
            Arc::new(checklist),
            PipelineSettings::from_config(&config),
        )
        .with_reference(config.reference.collection_name.as_str());

        let chat = ChatService::new(
            db.clone(),
            index.clone(),
            llm,
            Arc::new(notifier.clone()),
            &config.chat,
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            index,
            reference,
            pipeline: Arc::new(pipeline),
            chat: Arc::new(chat),
            notifier,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Missing statute context degrades analysis quality but is not fatal.
async fn ensure_reference(reference: &ReferenceBuilder, config: &Config) {
    let cfg = &config.reference;
    match reference
        .ensure(&cfg.source_path, &cfg.collection_name, false)
        .await
    {
        Ok(collection) => info!("Reference collection {} ready", collection.name()),
        Err(e) => {
            warn!("Reference collection unavailable, analysing without statute context: {e}")
        }
    }
}
