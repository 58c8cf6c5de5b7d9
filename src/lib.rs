//! # Connectome HTTP
//!
//! An HTTP service in front of connectomics graph databases. It answers
//! custom and named graph queries, serves skeleton and mesh blobs from
//! key-value stores, and caches daily aggregates per dataset.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use connectome_http::config::ServiceConfig;
//! use connectome_http::storage::EngineRegistry;
//! use connectome_http::web::{build_router, ServiceState};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ServiceConfig::load("config.json")?;
//! let state = ServiceState::from_config(&config, EngineRegistry::global()).await?;
//! let app = build_router(Arc::new(state), None);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:11000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod cypher;
pub mod error;
pub mod result_format;
pub mod secure;
pub mod storage;
pub mod swc;
pub mod web;

pub use error::{ServiceError, ServiceResult};
pub use storage::{QueryExecutor, QueryResult, StoreRegistry};
