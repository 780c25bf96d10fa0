//! MediaLake Core Library
//!
//! Shared functionality for MediaLake Lambda functions including:
//! - Domain models and error types
//! - Search index synchronization (batching, retries, circuit breaking, DLQ replay)
//! - Multi-store asset deletion and external providers
//! - Pipeline admission control and execution records
//! - External payload indirection for Step Functions state

pub mod backoff;
pub mod batching;
pub mod circuit_breaker;
pub mod config;
pub mod conversions;
pub mod deletion;
pub mod dlq;
pub mod dynamo;
pub mod errors;
pub mod execution;
pub mod logging;
pub mod models;
pub mod payload;
pub mod pipeline;
pub mod providers;
pub mod replay;
pub mod search;
pub mod storage;
pub mod stream;
pub mod sync;

pub use models::*;
pub use dynamo::DynamoClient;
pub use errors::{Error, Result};
pub use search::{OpenSearchIndex, SearchIndex};
pub use storage::S3Storage;
pub use sync::IndexSynchronizer;
