//! Question answering over one analysed contract.
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info};

use crate::config::ChatConfig;
use crate::db::Db;
use crate::db::models::ChatTurn;
use crate::events::{Notifier, chat_payload, chat_topic};
use crate::llm::{CompletionService, LlmError, Message, Role};
use crate::pipeline::contract_collection_name;
use crate::prompts;
use crate::vector::{IndexError, VectorIndex};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("contract not found: {0}")]
    UnknownContract(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error("reply generation failed: {0}")]
    Completion(#[from] LlmError),

    #[error("retrieval failed: {0}")]
    Index(#[from] IndexError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub struct ChatService {
    db: Arc<TokioMutex<Db>>,
    index: VectorIndex,
    llm: Arc<dyn CompletionService>,
    notifier: Arc<dyn Notifier>,
    top_k: usize,
    history_limit: usize,
}

impl ChatService {
    pub fn new(
        db: Arc<TokioMutex<Db>>,
        index: VectorIndex,
        llm: Arc<dyn CompletionService>,
        notifier: Arc<dyn Notifier>,
        config: &ChatConfig,
    ) -> Self {
        Self {
            db,
            index,
            llm,
            notifier,
            top_k: config.top_k,
            history_limit: config.history_limit,
        }
    }

    /// Stores the question, answers it from the contract's chunks and the
    /// recent conversation, stores and publishes the answer.
    pub async fn ask(&self, contract_id: &str, message: &str) -> Result<String, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        {
            let db = self.db.lock().await;
            if db.get_contract(contract_id)?.is_none() {
                return Err(ChatError::UnknownContract(contract_id.to_string()));
            }
            db.append_chat(contract_id, Role::User, message)?;
        }

        let context = self.retrieve(contract_id, message).await?;

        let history = self
            .db
            .lock()
            .await
            .recent_chats(contract_id, self.history_limit)?;
        let mut messages = vec![Message::system(prompts::chat_system(&context))];
        messages.extend(history.into_iter().map(|turn| Message {
            role: turn.role,
            content: turn.message,
        }));

        let reply = self.llm.complete(&messages).await?;
        let reply = reply.trim().to_string();

        self.db
            .lock()
            .await
            .append_chat(contract_id, Role::Assistant, &reply)?;
        self.notifier
            .publish(&chat_topic(contract_id), chat_payload(&reply));
        info!("Answered chat message for contract {contract_id}");
        Ok(reply)
    }

    pub async fn history(&self, contract_id: &str, limit: usize) -> Result<Vec<ChatTurn>, ChatError> {
        Ok(self.db.lock().await.recent_chats(contract_id, limit)?)
    }

    async fn retrieve(&self, contract_id: &str, message: &str) -> Result<Vec<String>, ChatError> {
        let name = contract_collection_name(contract_id);
        let collection = match self.index.get_collection(&name).await {
            Ok(collection) => collection,
            Err(IndexError::NotFound(_)) => {
                debug!("No chat collection for {contract_id}, answering without context");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let hits = collection.query(message, self.top_k).await?;
        Ok(hits.into_iter().map(|h| h.text).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::events::BroadcastNotifier;
    use crate::llm::mock::MockCompletion;
    use serde_json::Map;

    struct Harness {
        chat: ChatService,
        db: Arc<TokioMutex<Db>>,
        index: VectorIndex,
        notifier: BroadcastNotifier,
        llm: Arc<MockCompletion>,
    }

    fn harness(llm: MockCompletion) -> Harness {
        let db = Arc::new(TokioMutex::new(Db::open_in_memory(16).unwrap()));
        let index = VectorIndex::new(db.clone(), Arc::new(MockEmbedder::new(16)));
        let notifier = BroadcastNotifier::new(16);
        let llm = Arc::new(llm);
        let chat = ChatService::new(
            db.clone(),
            index.clone(),
            llm.clone(),
            Arc::new(notifier.clone()),
            &ChatConfig::default(),
        );
        Harness {
            chat,
            db,
            index,
            notifier,
            llm,
        }
    }

    #[tokio::test]
    async fn test_ask_stores_and_publishes() {
        let h = harness(MockCompletion::new().on_plain("probation", "Three months."));
        h.db.lock().await.insert_contract("c1", "a.md", "a.md").unwrap();

        let coll = h
            .index
            .create_collection(&contract_collection_name("c1"), None)
            .await
            .unwrap();
        coll.add(
            &["contract_c1_chunk1".to_string()],
            &["Masa percobaan tiga bulan.".to_string()],
            &[Map::new()],
        )
        .await
        .unwrap();

        let mut rx = h.notifier.subscribe();
        let reply = h.chat.ask("c1", "How long is probation?").await.unwrap();
        assert_eq!(reply, "Three months.");

        let history = h.chat.history("c1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].message, "Three months.");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "chat_c1");
        assert_eq!(event.payload["message"], "Three months.");

        // Context and the stored question both reach the model
        let call = &h.llm.calls()[0];
        assert!(call[0].content.contains("Masa percobaan"));
        assert_eq!(call.last().map(|m| m.role), Some(Role::User));
    }

    #[tokio::test]
    async fn test_ask_without_collection() {
        let h = harness(MockCompletion::new().otherwise_plain("No context."));
        h.db.lock().await.insert_contract("c2", "b.md", "b.md").unwrap();
        assert_eq!(h.chat.ask("c2", "Hello?").await.unwrap(), "No context.");
    }

    #[tokio::test]
    async fn test_ask_unknown_contract_and_empty_message() {
        let h = harness(MockCompletion::new().otherwise_plain("x"));
        assert!(matches!(
            h.chat.ask("ghost", "hi").await,
            Err(ChatError::UnknownContract(_))
        ));
        assert!(matches!(
            h.chat.ask("ghost", "   ").await,
            Err(ChatError::EmptyMessage)
        ));
        assert_eq!(h.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_reply_keeps_question() {
        let h = harness(MockCompletion::new().fail_plain("", "down"));
        h.db.lock().await.insert_contract("c3", "c.md", "c.md").unwrap();
        assert!(matches!(
            h.chat.ask("c3", "Anyone?").await,
            Err(ChatError::Completion(_))
        ));
        let history = h.chat.history("c3", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }
}
