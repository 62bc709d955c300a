/// OpenAI-compatible `/embeddings` client.
///
/// Requests vectors of the configured width through the `dimensions` field,
/// so the sqlite-vec table width and the remote model agree.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError};
use crate::config::EmbeddingConfig;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

impl HttpEmbedder {
    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedderError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| EmbedderError::MissingApiKey(config.api_key_env.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EmbedderError::RequestFailed(format!("client build failed: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedderError::MalformedResponse("empty data array".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding {} texts with {}", texts.len(), self.model);

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedderError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(EmbedderError::RequestFailed(format!(
                "status {status}: {text}"
            )));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EmbedderError::MalformedResponse(e.to_string()))?;

        order_embeddings(parsed.data, texts.len(), self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Put response items back in request order and check their shape.
fn order_embeddings(
    mut items: Vec<EmbeddingItem>,
    expected_len: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    if items.len() != expected_len {
        return Err(EmbedderError::MalformedResponse(format!(
            "expected {expected_len} embeddings, got {}",
            items.len()
        )));
    }
    items.sort_by_key(|item| item.index);

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item.embedding.len() != dimensions {
            return Err(EmbedderError::DimensionMismatch {
                expected: dimensions,
                actual: item.embedding.len(),
            });
        }
        out.push(item.embedding);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_embeddings_sorts_by_index() {
        let items = vec![
            EmbeddingItem {
                index: 1,
                embedding: vec![1.0, 1.0],
            },
            EmbeddingItem {
                index: 0,
                embedding: vec![0.0, 0.0],
            },
        ];
        let ordered = order_embeddings(items, 2, 2).unwrap();
        assert_eq!(ordered[0], vec![0.0, 0.0]);
        assert_eq!(ordered[1], vec![1.0, 1.0]);
    }

    #[test]
    fn test_order_embeddings_rejects_bad_shape() {
        let items = vec![EmbeddingItem {
            index: 0,
            embedding: vec![0.5; 3],
        }];
        assert!(matches!(
            order_embeddings(items, 1, 4),
            Err(EmbedderError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));

        assert!(matches!(
            order_embeddings(Vec::new(), 2, 4),
            Err(EmbedderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_missing_api_key() {
        let config = EmbeddingConfig {
            api_key_env: "CLAUSECHECK_TEST_UNSET_EMBED_KEY".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            HttpEmbedder::from_config(&config),
            Err(EmbedderError::MissingApiKey(_))
        ));
    }
}
