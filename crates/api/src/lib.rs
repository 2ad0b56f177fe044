//! HTTP clients for the file control plane and the storage backend.

mod client;
mod config;
mod error;
mod retry;
mod rewrite;
mod storage;

#[cfg(test)]
mod testing;

pub use client::ApiClient;
pub use config::{ClientConfig, DEFAULT_API_URL};
pub use error::{ApiError, StorageError};
pub use retry::{RetryPolicy, Retryable};
pub use rewrite::{HostRewrite, INTERNAL_STORAGE_HOST, ResolvedUrl};
pub use storage::{StorageClient, classify_rejection};
