//! Statute reference: parse a structured legal document into article chunks
//! and keep a vector collection of them in sync with the source file.
pub mod builder;
pub mod parser;

pub use builder::{ReferenceBuilder, ReferenceChunk, build_chunks};
pub use parser::{HeadingMarkers, ParsedArticle, parse_reference_document};

use thiserror::Error;

use crate::vector::IndexError;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("failed to read reference document {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid heading marker: {0}")]
    Pattern(#[from] regex::Error),

    #[error("no article chunks could be parsed from {0}")]
    NoChunks(String),

    #[error(transparent)]
    Index(#[from] IndexError),
}
