//! # Memvault
//!
//! A semantic memory service built with Rust.
//!
//! ## Features
//!
//! - **Embedding Cache:** Redis-shared, in-process (moka), or disabled backends
//! - **Request Batching:** Coalesces concurrent embedding calls into few upstream requests
//! - **Vector Retrieval:** PostgreSQL + pgvector similarity search with fallback policies
//! - **Rank Fusion:** One comparable score across user memory, project facts, and episodic events

pub mod config;
pub mod database;
pub mod error;
pub mod memory;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
