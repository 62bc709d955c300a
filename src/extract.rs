//! Document-to-text conversion.
//!
//! The pipeline depends only on [`TextExtractor`]. [`LocalExtractor`] handles
//! the formats contracts usually arrive in without calling out to a service.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("extraction task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Ordered pages of text. Formats without pages yield one entry.
    async fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Pdf,
    Docx,
    Html,
}

impl Format {
    fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "md" | "markdown" | "txt" => Ok(Self::Text),
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "html" | "htm" => Ok(Self::Html),
            _ => Err(ExtractError::Unsupported(path.display().to_string())),
        }
    }
}

/// Reads `.md`, `.txt`, `.pdf`, `.docx` and `.html` files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExtractor;

#[async_trait]
impl TextExtractor for LocalExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let format = Format::from_path(path)?;
        let owned: PathBuf = path.to_path_buf();
        debug!("Extracting {} as {:?}", owned.display(), format);

        tokio::task::spawn_blocking(move || extract_blocking(&owned, format))
            .await
            .map_err(|e| ExtractError::Task(e.to_string()))?
    }
}

fn extract_blocking(path: &Path, format: Format) -> Result<Vec<String>, ExtractError> {
    let display = path.display().to_string();
    let io_err = |source| ExtractError::Io {
        path: display.clone(),
        source,
    };
    let parse_err = |message: String| ExtractError::Parse {
        path: display.clone(),
        message,
    };

    match format {
        Format::Text => Ok(vec![std::fs::read_to_string(path).map_err(io_err)?]),
        Format::Pdf => {
            let doc = lopdf::Document::load(path).map_err(|e| parse_err(e.to_string()))?;
            let mut pages = Vec::new();
            for page_number in doc.get_pages().keys() {
                let text = doc
                    .extract_text(&[*page_number])
                    .map_err(|e| parse_err(format!("page {page_number}: {e}")))?;
                pages.push(text);
            }
            Ok(pages)
        }
        Format::Docx => {
            let bytes = std::fs::read(path).map_err(io_err)?;
            let docx = docx_rs::read_docx(&bytes).map_err(|e| parse_err(e.to_string()))?;
            Ok(vec![docx_paragraphs(&docx).join("\n\n")])
        }
        Format::Html => {
            let html = std::fs::read_to_string(path).map_err(io_err)?;
            Ok(vec![html_text(&html)])
        }
    }
}

fn docx_paragraphs(docx: &docx_rs::Docx) -> Vec<String> {
    use docx_rs::{DocumentChild, ParagraphChild, RunChild};

    let mut paragraphs = Vec::new();
    for child in &docx.document.children {
        let DocumentChild::Paragraph(paragraph) = child else {
            continue;
        };
        let mut text = String::new();
        for p_child in &paragraph.children {
            if let ParagraphChild::Run(run) = p_child {
                for r_child in &run.children {
                    match r_child {
                        RunChild::Text(t) => text.push_str(&t.text),
                        RunChild::Tab(_) => text.push('\t'),
                        RunChild::Break(_) => text.push('\n'),
                        _ => {}
                    }
                }
            }
        }
        if !text.trim().is_empty() {
            paragraphs.push(text);
        }
    }
    paragraphs
}

/// Visible text of an HTML page, one line per text node.
pub fn html_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let mut lines = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
        let trimmed = text.trim();
        if !hidden && !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    lines.join("\n")
}
