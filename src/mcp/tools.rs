/// MCP Tool handlers for clausecheck.
///
/// 1. analyze_contract  – submit a contract file and analyse it in the background
/// 2. contract_status   – status, failure reason, or report of one contract
/// 3. list_contracts    – most recent contracts
/// 4. search_reference  – similarity search over the statute collection
/// 5. rebuild_reference – force a rebuild of the statute collection
/// 6. ask_contract      – chat about an analysed contract
/// 7. chat_history      – stored conversation of one contract
use std::path::Path;

use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{
    ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use crate::app::AppContext;
use crate::chat::ChatError;
use crate::vector::IndexError;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct AnalyzeParams {
    /// Path to the contract file (pdf, docx, html, md or txt)
    filepath: String,
}

#[derive(Deserialize, JsonSchema)]
struct ContractIdParam {
    /// Contract id returned by analyze_contract
    contract_id: String,
}

#[derive(Deserialize, JsonSchema)]
struct ListParams {
    /// Max contracts (default: 20)
    limit: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct SearchParams {
    /// Search query (natural language)
    query: String,
    /// Max results (default: reference.context_top_k)
    top_k: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct RebuildParams {
    /// Reference document path (default: reference.source_path)
    source_path: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct AskParams {
    /// Contract id returned by analyze_contract
    contract_id: String,
    /// Question about the contract
    message: String,
}

#[derive(Deserialize, JsonSchema)]
struct HistoryParams {
    /// Contract id returned by analyze_contract
    contract_id: String,
    /// Max turns (default: chat.history_limit)
    limit: Option<usize>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: AppContext,
    pub tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for AppTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Employment-contract compliance checks. Submit a contract with analyze_contract, \
                 poll contract_status for the report, then ask_contract about it."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}

#[tool_router]
impl AppTools {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    // ── Tool 1: analyze_contract ────────────────────────────────────

    #[tool(
        description = "Submit an employment contract for compliance analysis. Returns the contract id immediately; poll contract_status for progress and the report."
    )]
    async fn analyze_contract(
        &self,
        params: Parameters<AnalyzeParams>,
    ) -> Result<CallToolResult, McpError> {
        let filepath = params.0.filepath;
        if filepath.is_empty() {
            return error_result("filepath is required");
        }
        let path = Path::new(&filepath);
        if !path.is_file() {
            return error_result(&format!("file not found: {filepath}"));
        }

        let contract_id = self
            .ctx
            .pipeline
            .submit(path)
            .await
            .map_err(|e| McpError::internal_error(format!("submit failed: {e}"), None))?;

        let pipeline = self.ctx.pipeline.clone();
        let cancel = self.ctx.shutdown.child_token();
        let id = contract_id.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.process(&id, cancel).await {
                warn!("Background analysis of {id} ended early: {e}");
            }
        });

        json_result(serde_json::json!({
            "success": true,
            "contract_id": contract_id,
            "status": "PENDING",
        }))
    }

    // ── Tool 2: contract_status ─────────────────────────────────────

    #[tool(
        description = "Get the processing status of a contract. Includes the compliance report once the status is DONE, or the failure reason when FAILED or CANCELLED."
    )]
    async fn contract_status(
        &self,
        params: Parameters<ContractIdParam>,
    ) -> Result<CallToolResult, McpError> {
        let contract_id = &params.0.contract_id;
        let record = self
            .ctx
            .db
            .lock()
            .await
            .get_contract(contract_id)
            .map_err(|e| McpError::internal_error(format!("lookup failed: {e}"), None))?;

        match record {
            Some(record) => json_result(serde_json::json!(record)),
            None => error_result(&format!("contract not found: {contract_id}")),
        }
    }

    // ── Tool 3: list_contracts ──────────────────────────────────────

    #[tool(description = "List the most recently submitted contracts with their status")]
    async fn list_contracts(
        &self,
        params: Parameters<ListParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.0.limit.unwrap_or(20);
        let records = self
            .ctx
            .db
            .lock()
            .await
            .list_contracts(limit)
            .map_err(|e| McpError::internal_error(format!("list failed: {e}"), None))?;

        let contracts: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "contract_id": r.id,
                    "file_name": r.file_name,
                    "status": r.status,
                    "updated_at": r.updated_at.to_rfc3339(),
                })
            })
            .collect();

        json_result(serde_json::json!({ "contracts": contracts }))
    }

    // ── Tool 4: search_reference ────────────────────────────────────

    #[tool(
        description = "Natural language search over the labour-law reference articles. Returns article text with chapter, section and cross-reference metadata."
    )]
    async fn search_reference(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().is_empty() {
            return error_result("query is required");
        }
        let reference = &self.ctx.config.reference;
        let top_k = p.top_k.unwrap_or(reference.context_top_k.max(1));

        let collection = match self.ctx.index.get_collection(&reference.collection_name).await {
            Ok(c) => c,
            Err(IndexError::NotFound(name)) => {
                return error_result(&format!(
                    "reference collection {name} has not been built; call rebuild_reference"
                ));
            }
            Err(e) => return Err(McpError::internal_error(format!("{e}"), None)),
        };

        let hits = collection
            .query(&p.query, top_k)
            .await
            .map_err(|e| McpError::internal_error(format!("search failed: {e}"), None))?;

        let results: Vec<serde_json::Value> = hits
            .iter()
            .map(|h| {
                serde_json::json!({
                    "id": h.id,
                    "content": h.text,
                    "similarity": h.similarity,
                    "metadata": h.metadata,
                })
            })
            .collect();

        json_result(serde_json::json!({ "results": results }))
    }

    // ── Tool 5: rebuild_reference ───────────────────────────────────

    #[tool(description = "Rebuild the labour-law reference collection from its source document")]
    async fn rebuild_reference(
        &self,
        params: Parameters<RebuildParams>,
    ) -> Result<CallToolResult, McpError> {
        let reference = &self.ctx.config.reference;
        let source = params
            .0
            .source_path
            .unwrap_or_else(|| reference.source_path.clone());

        let collection = match self
            .ctx
            .reference
            .ensure(&source, &reference.collection_name, true)
            .await
        {
            Ok(c) => c,
            Err(e) => return error_result(&format!("rebuild failed: {e}")),
        };
        let count = collection
            .count()
            .await
            .map_err(|e| McpError::internal_error(format!("{e}"), None))?;
        info!("Reference collection {} rebuilt with {count} articles", collection.name());

        json_result(serde_json::json!({
            "success": true,
            "collection": collection.name(),
            "articles": count,
        }))
    }

    // ── Tool 6: ask_contract ────────────────────────────────────────

    #[tool(description = "Ask a question about an analysed contract")]
    async fn ask_contract(&self, params: Parameters<AskParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        match self.ctx.chat.ask(&p.contract_id, &p.message).await {
            Ok(reply) => json_result(serde_json::json!({
                "message": reply,
                "sender": "assistant",
            })),
            Err(e @ (ChatError::UnknownContract(_) | ChatError::EmptyMessage)) => {
                error_result(&e.to_string())
            }
            Err(e) => Err(McpError::internal_error(format!("{e}"), None)),
        }
    }

    // ── Tool 7: chat_history ────────────────────────────────────────

    #[tool(description = "Get the stored conversation of a contract, oldest first")]
    async fn chat_history(
        &self,
        params: Parameters<HistoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let limit = p.limit.unwrap_or(self.ctx.config.chat.history_limit);
        let turns = self
            .ctx
            .chat
            .history(&p.contract_id, limit)
            .await
            .map_err(|e| McpError::internal_error(format!("history failed: {e}"), None))?;

        json_result(serde_json::json!({ "history": turns }))
    }
}
