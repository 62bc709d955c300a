//! Named, queryable vector collections over the local SQLite store.
//!
//! Callers hand in text, never vectors: `add` and `query` embed through the
//! configured [`Embedder`].
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info};

use crate::db::Db;
use crate::db::models::{CollectionRow, NewChunk};
use crate::embedder::{Embedder, EmbedderError};

const EMBED_BATCH: usize = 64;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("collection not found: {0}")]
    NotFound(String),

    #[error("collection already exists: {0}")]
    AlreadyExists(String),

    #[error("ids, texts and metadatas differ in length ({ids}/{texts}/{metadatas})")]
    LengthMismatch {
        ids: usize,
        texts: usize,
        metadatas: usize,
    },

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("invalid chunk metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Where a collection's content came from, for freshness checks.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStamp {
    pub path: String,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct QueryHit {
    pub id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
    pub similarity: f64,
}

impl QueryHit {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

#[derive(Clone)]
pub struct VectorIndex {
    db: Arc<TokioMutex<Db>>,
    embedder: Arc<dyn Embedder>,
}

impl VectorIndex {
    pub fn new(db: Arc<TokioMutex<Db>>, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    pub async fn create_collection(
        &self,
        name: &str,
        source: Option<SourceStamp>,
    ) -> Result<Collection, IndexError> {
        let db = self.db.lock().await;
        if db.find_collection(name)?.is_some() {
            return Err(IndexError::AlreadyExists(name.to_string()));
        }
        let row = db.create_collection(
            name,
            source.as_ref().map(|s| s.path.as_str()),
            source.as_ref().map(|s| s.modified_at),
        )?;
        info!("Created collection {name}");
        Ok(self.handle(row))
    }

    pub async fn get_collection(&self, name: &str) -> Result<Collection, IndexError> {
        let row = self
            .db
            .lock()
            .await
            .find_collection(name)?
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;
        Ok(self.handle(row))
    }

    pub async fn delete_collection(&self, name: &str) -> Result<(), IndexError> {
        if self.db.lock().await.delete_collection(name)? {
            info!("Deleted collection {name}");
            Ok(())
        } else {
            Err(IndexError::NotFound(name.to_string()))
        }
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, IndexError> {
        Ok(self.db.lock().await.list_collections()?)
    }

    fn handle(&self, row: CollectionRow) -> Collection {
        let source = match (row.source_path, row.source_modified_at) {
            (Some(path), Some(modified_at)) => Some(SourceStamp { path, modified_at }),
            _ => None,
        };
        Collection {
            id: row.id,
            name: row.name,
            source,
            db: self.db.clone(),
            embedder: self.embedder.clone(),
        }
    }
}

/// Handle to one collection. Cheap to clone.
#[derive(Clone)]
pub struct Collection {
    id: i64,
    name: String,
    source: Option<SourceStamp>,
    db: Arc<TokioMutex<Db>>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&SourceStamp> {
        self.source.as_ref()
    }

    /// Embeds and stores the given triples. All-or-nothing: a duplicate id
    /// leaves the collection unchanged.
    pub async fn add(
        &self,
        ids: &[String],
        texts: &[String],
        metadatas: &[Map<String, Value>],
    ) -> Result<usize, IndexError> {
        if ids.len() != texts.len() || ids.len() != metadatas.len() {
            return Err(IndexError::LengthMismatch {
                ids: ids.len(),
                texts: texts.len(),
                metadatas: metadatas.len(),
            });
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
            embeddings.extend(self.embedder.embed_batch(&refs).await?);
        }

        let metadata_json = metadatas
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        let chunks: Vec<NewChunk<'_>> = ids
            .iter()
            .zip(texts)
            .zip(&metadata_json)
            .map(|((key, content), metadata)| NewChunk {
                key,
                content,
                metadata,
            })
            .collect();

        let inserted = self
            .db
            .lock()
            .await
            .insert_chunks(self.id, &chunks, &embeddings)?;
        debug!("Added {inserted} chunks to {}", self.name);
        Ok(inserted)
    }

    /// Nearest `k` chunks to `text`, most similar first.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(text).await?;
        let rows = self.db.lock().await.search_collection(self.id, &vector, k)?;

        rows.into_iter()
            .map(|row| {
                let metadata = match serde_json::from_str::<Value>(&row.metadata)? {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                Ok(QueryHit {
                    id: row.key,
                    text: row.content,
                    metadata,
                    similarity: row.similarity,
                })
            })
            .collect()
    }

    pub async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.db.lock().await.count_chunks(self.id)?)
    }

    pub async fn ids(&self) -> Result<Vec<String>, IndexError> {
        Ok(self.db.lock().await.chunk_keys(self.id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use serde_json::json;

    fn index() -> VectorIndex {
        let db = Db::open_in_memory(16).unwrap();
        VectorIndex::new(
            Arc::new(TokioMutex::new(db)),
            Arc::new(MockEmbedder::new(16)),
        )
    }

    fn meta(article: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("article_number".to_string(), json!(article));
        m
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let index = index();
        let stamp = SourceStamp {
            path: "uu.md".to_string(),
            modified_at: Utc::now(),
        };
        let created = index
            .create_collection("ref", Some(stamp.clone()))
            .await
            .unwrap();
        assert_eq!(created.name(), "ref");

        assert!(matches!(
            index.create_collection("ref", None).await,
            Err(IndexError::AlreadyExists(_))
        ));

        let fetched = index.get_collection("ref").await.unwrap();
        assert_eq!(fetched.source().map(|s| s.path.as_str()), Some("uu.md"));

        index.delete_collection("ref").await.unwrap();
        assert!(matches!(
            index.get_collection("ref").await,
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            index.delete_collection("ref").await,
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_and_query() {
        let index = index();
        let coll = index.create_collection("ref", None).await.unwrap();

        let ids = vec!["a".to_string(), "b".to_string()];
        let texts = vec![
            "Pasal 88 Setiap pekerja berhak memperoleh penghasilan".to_string(),
            "Pasal 79 Pengusaha wajib memberi waktu istirahat dan cuti".to_string(),
        ];
        let metas = vec![meta("88"), meta("79")];
        assert_eq!(coll.add(&ids, &texts, &metas).await.unwrap(), 2);
        assert_eq!(coll.count().await.unwrap(), 2);

        // Identical text embeds identically, so it must rank first
        let hits = coll.query(&texts[1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].meta_str("article_number"), Some("79"));
        assert!(hits[0].similarity > 0.99);

        assert!(coll.query("anything", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_add_is_rejected() {
        let index = index();
        let coll = index.create_collection("ref", None).await.unwrap();
        let ids = vec!["a".to_string()];
        let texts = vec!["x".to_string()];
        let metas = vec![Map::new()];
        coll.add(&ids, &texts, &metas).await.unwrap();
        assert!(coll.add(&ids, &texts, &metas).await.is_err());
        assert_eq!(coll.count().await.unwrap(), 1);
        assert_eq!(coll.ids().await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_length_mismatch() {
        let index = index();
        let coll = index.create_collection("ref", None).await.unwrap();
        let err = coll
            .add(&["a".to_string()], &[], &[Map::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::LengthMismatch { .. }));
    }
}
