/// Configuration module for clausecheck.
///
/// Handles loading, validating, and providing default configuration values.
/// Secrets are never stored here: the LLM and embedding sections name the
/// environment variable that holds the key.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::reference::parser::HeadingMarkers;

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./clausecheck.db".to_string()
}

fn default_reference_source() -> String {
    "media/uu_13_2003.md".to_string()
}

fn default_collection_name() -> String {
    "uu_reference".to_string()
}

fn default_document_title() -> String {
    "UNDANG-UNDANG REPUBLIK INDONESIA NOMOR 13 TAHUN 2003 TENTANG KETENAGAKERJAAN".to_string()
}

fn default_context_top_k() -> usize {
    3
}

fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_llm_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_llm_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_reasoning_effort() -> Option<String> {
    Some("medium".to_string())
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_concurrency() -> usize {
    4
}

fn default_summary_words() -> usize {
    120
}

fn default_reason_words() -> usize {
    40
}

fn default_chat_top_k() -> usize {
    3
}

fn default_history_limit() -> usize {
    20
}

fn default_chunk_size() -> usize {
    1000
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Replacement checklist catalog; the built-in one is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist_path: Option<String>,

    #[serde(default)]
    pub reference: ReferenceConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReferenceConfig {
    #[serde(default = "default_reference_source")]
    pub source_path: String,

    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    #[serde(default = "default_document_title")]
    pub document_title: String,

    #[serde(default)]
    pub markers: HeadingMarkers,

    /// Reference articles attached to each clause prompt (0 disables retrieval).
    #[serde(default = "default_context_top_k")]
    pub context_top_k: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    #[serde(
        default = "default_reasoning_effort",
        skip_serializing_if = "Option::is_none"
    )]
    pub reasoning_effort: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisConfig {
    /// Upper bound on clause analyses in flight for one document.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_summary_words")]
    pub summary_word_limit: usize,

    #[serde(default = "default_reason_words")]
    pub reason_word_limit: usize,

    #[serde(default)]
    pub track_sub_points: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_top_k")]
    pub top_k: usize,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Character budget for the contract chunks the chat retrieves from.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            checklist_path: None,
            reference: ReferenceConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            analysis: AnalysisConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            source_path: default_reference_source(),
            collection_name: default_collection_name(),
            document_title: default_document_title(),
            markers: HeadingMarkers::default(),
            context_top_k: default_context_top_k(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_key_env(),
            reasoning_effort: default_reasoning_effort(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key_env: default_embedding_key_env(),
            dimensions: default_dimensions(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            summary_word_limit: default_summary_words(),
            reason_word_limit: default_reason_words(),
            track_sub_points: false,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            top_k: default_chat_top_k(),
            history_limit: default_history_limit(),
            chunk_size: default_chunk_size(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and generates a
    /// template file for the default path.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            self.analysis.concurrency > 0,
            "analysis.concurrency must be positive"
        );
        anyhow::ensure!(
            self.analysis.summary_word_limit > 0,
            "analysis.summary_word_limit must be positive"
        );
        anyhow::ensure!(
            self.analysis.reason_word_limit > 0,
            "analysis.reason_word_limit must be positive"
        );
        anyhow::ensure!(self.chat.chunk_size > 0, "chat.chunk_size must be positive");
        anyhow::ensure!(
            !self.reference.collection_name.trim().is_empty(),
            "reference.collection_name must not be empty"
        );
        anyhow::ensure!(
            !self.llm.base_url.trim().is_empty(),
            "llm.base_url must not be empty"
        );
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
