//! # clausecheck: employment-contract compliance checker
//!
//! Extracts the text of an employment contract, splits it into clauses,
//! judges every clause against a fixed checklist of topics with statute
//! articles as retrieval context, and assembles a coverage report. An MCP
//! server exposes analysis, reference search, and contract chat.
//!
//! ## Architecture
//!
//! - **[`config`]**: configuration loading and validation
//! - **[`db`]**: SQLite + sqlite-vec storage for collections, contracts and chats
//! - **[`embedder`]**, **[`llm`]**: remote embedding and completion services
//! - **[`vector`]**: named collections of embedded chunks
//! - **[`reference`]**: statute parsing and reference collection building
//! - **[`extract`]**, **[`normalizer`]**, **[`segmenter`]**: contract text to clauses
//! - **[`analyzer`]**, **[`report`]**: clause judgments and the coverage report
//! - **[`pipeline`]**: per-contract orchestration with status tracking
//! - **[`chat`]**: question answering over an analysed contract
//! - **[`mcp`]**: MCP server (stdio transport via rmcp)

pub mod analyzer;
pub mod app;
pub mod chat;
pub mod checklist;
pub mod chunking;
pub mod config;
pub mod db;
pub mod embedder;
pub mod events;
pub mod extract;
pub mod llm;
pub mod mcp;
pub mod normalizer;
pub mod pipeline;
pub mod prompts;
pub mod reference;
pub mod report;
pub mod segmenter;
pub mod vector;
