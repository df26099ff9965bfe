//! HTTP embedding client
//!
//! Talks to a BGE-M3 style embedding server (`POST /embed`, `GET /health`,
//! `GET /info`) and consults the embedding cache before going upstream.
//! Cached and freshly computed vectors are merged back into the caller's
//! original ordering.

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::memory::cache::EmbeddingCache;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Anything that can turn texts into vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed many texts, one vector per text, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>>;

    /// Readiness check against the upstream server
    async fn validate_server(&self) -> Result<()>;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    normalize: bool,
    truncate: bool,
}

#[derive(Deserialize)]
struct ModelInfo {
    model_id: String,
    #[serde(default)]
    max_input_length: Option<usize>,
}

/// Embedding client over HTTP, with read-through caching
#[derive(Clone)]
pub struct EmbeddingClient {
    http: Client,
    base_url: String,
    model_id: String,
    dimension: usize,
    cache: Arc<dyn EmbeddingCache>,
    cache_ttl: Duration,
}

impl EmbeddingClient {
    /// Create a new client against the configured embedding server
    pub fn new(config: &EmbeddingConfig, cache: Arc<dyn EmbeddingCache>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(EmbeddingClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            dimension: config.dimension,
            cache,
            cache_ttl: config.cache.ttl(),
        })
    }

    /// Expected output dimensionality
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn fetch_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .http
            .post(format!("{}/embed", self.base_url))
            .json(&EmbedRequest {
                inputs: texts,
                normalize: true,
                truncate: true,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Embedding(format!(
                "embedding service returned status {}",
                response.status()
            )));
        }

        let embeddings: Vec<Vec<f32>> = response.json().await?;
        if embeddings.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "embedding service returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Partition into cached and uncached, preserving input order
        let mut merged: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut uncached_positions = Vec::new();
        let mut uncached_texts = Vec::new();

        for (position, text) in texts.iter().enumerate() {
            match self.cache.get(text).await {
                Some(hit) => merged[position] = Some(hit),
                None => {
                    uncached_positions.push(position);
                    uncached_texts.push(text.clone());
                }
            }
        }

        // Fully cached: no network call
        if !uncached_texts.is_empty() {
            let fresh = self.fetch_embeddings(&uncached_texts).await?;

            debug!(
                cached = texts.len() - uncached_texts.len(),
                fetched = uncached_texts.len(),
                "Embedded batch"
            );

            for ((position, text), vector) in uncached_positions
                .into_iter()
                .zip(uncached_texts)
                .zip(fresh)
            {
                self.cache.set(&text, vector.clone(), self.cache_ttl).await;
                merged[position] = Some(vector);
            }
        }

        Ok(merged.into_iter().flatten().collect())
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let embeddings = self.embed(&texts).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no embedding returned".to_string()))
    }

    async fn validate_server(&self) -> Result<()> {
        // 1. Liveness
        let health = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        if !health.status().is_success() {
            return Err(Error::Embedding(format!(
                "embedding server not healthy (status {})",
                health.status()
            )));
        }

        // 2. Model identity: a mismatch is worth a warning, not a failure
        let info: ModelInfo = self
            .http
            .get(format!("{}/info", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if info.model_id != self.model_id {
            warn!(
                expected = %self.model_id,
                actual = %info.model_id,
                "Embedding server reports a different model"
            );
        }
        debug!(
            model = %info.model_id,
            max_input_length = ?info.max_input_length,
            "Embedding server info"
        );

        // 3. Smoke test: the output dimension must match, or every stored
        //    vector would be incomparable
        let probe = self.embed(&["test".to_string()]).await?;
        match probe.first() {
            Some(vector) if vector.len() == self.dimension => Ok(()),
            Some(vector) => Err(Error::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                vector.len()
            ))),
            None => Err(Error::Embedding("test embedding returned nothing".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheBackend, CacheConfig};
    use crate::memory::cache::{build_cache, DisabledCache};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: base_url.to_string(),
            model_id: "BAAI/bge-m3".to_string(),
            dimension: 1024,
            request_timeout_secs: 5,
            cache: CacheConfig {
                backend: CacheBackend::Memory,
                redis_url: String::new(),
                key_prefix: "emb:".to_string(),
                max_size: 100,
                ttl_secs: 3600,
            },
        }
    }

    fn vectors(count: usize, dimension: usize) -> Vec<Vec<f32>> {
        (0..count)
            .map(|i| (0..dimension).map(|j| (i + j) as f32 / dimension as f32).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_embed_single_returns_expected_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vectors(1, 1024)))
            .mount(&server)
            .await;

        let client = EmbeddingClient::new(&test_config(&server.uri()), Arc::new(DisabledCache)).unwrap();
        let embedding = client.embed_single("test query").await.unwrap();
        assert_eq!(embedding.len(), 1024);
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vectors(3, 1024)))
            .mount(&server)
            .await;

        let client = EmbeddingClient::new(&test_config(&server.uri()), Arc::new(DisabledCache)).unwrap();
        let texts = vec!["text1".to_string(), "text2".to_string(), "text3".to_string()];
        let embeddings = client.embed(&texts).await.unwrap();

        assert_eq!(embeddings.len(), 3);
        for embedding in &embeddings {
            assert_eq!(embedding.len(), 1024);
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_upstream_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vectors(1, 1024)))
            .expect(1) // verified on drop: the second call must be served from cache
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let cache = build_cache(&config.cache).await.unwrap();
        let client = EmbeddingClient::new(&config, cache).unwrap();

        let first = client.embed_single("test query").await.unwrap();
        let second = client.embed_single("test query").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fully_cached_batch_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vectors(2, 8)))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.dimension = 8;
        let cache = build_cache(&config.cache).await.unwrap();
        let client = EmbeddingClient::new(&config, cache).unwrap();

        let texts = vec!["a".to_string(), "b".to_string()];
        let first = client.embed(&texts).await.unwrap();
        // Same texts again, now fully cached
        let second = client.embed(&texts).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_upstream_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = EmbeddingClient::new(&test_config(&server.uri()), Arc::new(DisabledCache)).unwrap();
        let result = client.embed_single("query").await;
        assert!(matches!(result, Err(Error::Embedding(_))));
    }

    #[tokio::test]
    async fn test_validate_server_accepts_healthy_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model_id": "BAAI/bge-m3",
                "max_input_length": 8192
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vectors(1, 1024)))
            .mount(&server)
            .await;

        let client = EmbeddingClient::new(&test_config(&server.uri()), Arc::new(DisabledCache)).unwrap();
        assert!(client.validate_server().await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_server_tolerates_model_mismatch_but_not_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model_id": "some/other-model"
            })))
            .mount(&server)
            .await;
        // Wrong width: must be fatal even though the model mismatch is not
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vectors(1, 384)))
            .mount(&server)
            .await;

        let client = EmbeddingClient::new(&test_config(&server.uri()), Arc::new(DisabledCache)).unwrap();
        let result = client.validate_server().await;
        assert!(matches!(result, Err(Error::Embedding(_))));
    }
}
