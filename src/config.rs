//! Configuration management for Memvault
//!
//! Loads configuration from environment variables.

use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Backend selection for the embedding cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    /// Shared Redis cache (recommended for multi-process deployments)
    Redis,
    /// Bounded in-process cache
    #[default]
    Memory,
    /// No caching: every lookup is a miss
    Disabled,
}

impl std::str::FromStr for CacheBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" | "moka" => Ok(CacheBackend::Memory),
            "disabled" | "noop" | "none" => Ok(CacheBackend::Disabled),
            _ => Err(Error::Config(format!(
                "Invalid cache backend: {}. Valid options: redis, memory, disabled",
                s
            ))),
        }
    }
}

impl std::fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheBackend::Redis => write!(f, "redis"),
            CacheBackend::Memory => write!(f, "memory"),
            CacheBackend::Disabled => write!(f, "disabled"),
        }
    }
}

/// PostgreSQL database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: SecretString,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

/// Embedding cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Which backend to construct
    pub backend: CacheBackend,
    /// Redis URL (redis backend only)
    pub redis_url: String,
    /// Key namespace prefix (redis backend only)
    pub key_prefix: String,
    /// Maximum entries (memory backend only)
    pub max_size: u64,
    /// Per-entry time-to-live in seconds
    pub ttl_secs: u64,
}

impl CacheConfig {
    /// Per-entry TTL as a Duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Embedding service configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding server
    pub base_url: String,
    /// Model the server is expected to serve
    pub model_id: String,
    /// Expected output dimensionality
    pub dimension: usize,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Cache settings
    pub cache: CacheConfig,
}

/// Embedding batcher configuration
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Flush as soon as this many texts are queued
    pub batch_size: usize,
    /// Maximum time a queued text waits before a flush
    pub linger_ms: u64,
}

impl BatcherConfig {
    /// Linger window as a Duration
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

/// Retrieval eligibility policy
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Minimum importance for a user memory item to surface in search
    pub min_importance: i32,
    /// Minimum confidence for a project fact to surface in search
    pub min_confidence: f32,
    /// Rolling recency window for episodic events, in days
    pub episodic_window_days: i32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter
    pub level: String,
    /// Log format (pretty, json)
    pub format: String,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL database settings
    pub database: DatabaseConfig,
    /// Embedding service settings
    pub embedding: EmbeddingConfig,
    /// Embedding batcher settings
    pub batcher: BatcherConfig,
    /// Retrieval eligibility policy
    pub retrieval: RetrievalConfig,
    /// Probe the embedding server during startup
    pub validate_on_start: bool,
    /// Logging settings
    pub log: LogConfig,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Ok(Config {
            database: DatabaseConfig {
                url: SecretString::from(std::env::var("DATABASE_URL")?),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
                connect_timeout_secs: env_or("DATABASE_CONNECT_TIMEOUT", 30),
            },
            embedding: EmbeddingConfig {
                base_url: std::env::var("EMBEDDING_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:8091".to_string()),
                model_id: std::env::var("EMBEDDING_MODEL_ID")
                    .unwrap_or_else(|_| "BAAI/bge-m3".to_string()),
                dimension: env_or("EMBEDDING_DIMENSION", 1024),
                request_timeout_secs: env_or("EMBEDDING_REQUEST_TIMEOUT", 30),
                cache: CacheConfig {
                    backend: std::env::var("EMBEDDING_CACHE_TYPE")
                        .unwrap_or_else(|_| "memory".to_string())
                        .parse()?,
                    redis_url: std::env::var("EMBEDDING_CACHE_REDIS_URL")
                        .unwrap_or_else(|_| "redis://localhost:6379/3".to_string()),
                    key_prefix: std::env::var("EMBEDDING_CACHE_KEY_PREFIX")
                        .unwrap_or_else(|_| "emb:".to_string()),
                    max_size: env_or("EMBEDDING_CACHE_MAX_SIZE", 10_000),
                    ttl_secs: env_or("EMBEDDING_CACHE_TTL_SECS", 3600),
                },
            },
            batcher: BatcherConfig {
                batch_size: env_or("EMBEDDING_BATCH_SIZE", 32),
                linger_ms: env_or("EMBEDDING_BATCH_LINGER_MS", 50),
            },
            retrieval: RetrievalConfig {
                min_importance: env_or("MEMORY_MIN_IMPORTANCE", 2),
                min_confidence: env_or("MEMORY_MIN_CONFIDENCE", 0.7),
                episodic_window_days: env_or("MEMORY_EPISODIC_WINDOW_DAYS", 14),
            },
            validate_on_start: env_or("VALIDATE_EMBEDDING_ON_START", true),
            log: LogConfig {
                level: std::env::var("RUST_LOG")
                    .unwrap_or_else(|_| "info,memvault=debug".to_string()),
                format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            },
        })
    }

    /// Create a minimal config for tests and CLI commands that don't need full config
    pub fn minimal() -> Self {
        Config {
            database: DatabaseConfig {
                url: SecretString::from(""),
                max_connections: 5,
                connect_timeout_secs: 30,
            },
            embedding: EmbeddingConfig {
                base_url: "http://localhost:8091".to_string(),
                model_id: "BAAI/bge-m3".to_string(),
                dimension: 1024,
                request_timeout_secs: 30,
                cache: CacheConfig {
                    backend: CacheBackend::Disabled,
                    redis_url: String::new(),
                    key_prefix: "emb:".to_string(),
                    max_size: 100,
                    ttl_secs: 3600,
                },
            },
            batcher: BatcherConfig {
                batch_size: 32,
                linger_ms: 50,
            },
            retrieval: RetrievalConfig {
                min_importance: 2,
                min_confidence: 0.7,
                episodic_window_days: 14,
            },
            validate_on_start: false,
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    /// Validate that all required configuration is present
    pub fn validate(&self) -> Result<()> {
        if self.database.url.expose_secret().is_empty() {
            return Err(Error::Config("DATABASE_URL is required".to_string()));
        }
        url::Url::parse(&self.embedding.base_url)
            .map_err(|e| Error::Config(format!("Invalid EMBEDDING_SERVICE_URL: {}", e)))?;
        if self.embedding.dimension == 0 {
            return Err(Error::Config("EMBEDDING_DIMENSION must be positive".to_string()));
        }
        if self.batcher.batch_size == 0 {
            return Err(Error::Config("EMBEDDING_BATCH_SIZE must be positive".to_string()));
        }
        if self.embedding.cache.backend == CacheBackend::Redis
            && self.embedding.cache.redis_url.is_empty()
        {
            return Err(Error::Config(
                "EMBEDDING_CACHE_REDIS_URL is required for the redis cache backend".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_confidence) {
            return Err(Error::Config(
                "MEMORY_MIN_CONFIDENCE must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
