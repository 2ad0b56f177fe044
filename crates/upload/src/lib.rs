//! Resumable multipart upload flow.
//!
//! This crate holds the **orchestration** of an upload: it knows nothing
//! about HTTP itself. The control plane and the part transport are reached
//! through the [`ControlPlane`] and [`PartTransport`] traits, implemented for
//! the `scoreplay-api` clients.
//!
//! # Pipeline
//!
//! 1. **Initiate**: begin a session with the whole-object checksum
//! 2. **Reconcile** (resume only): page through the parts the server holds
//! 3. **Transfer**: read, digest, authorize and send each pending part
//! 4. **Complete**: finalize with the ordered list of part tokens

pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod remote;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{Phase, UploadError};
pub use orchestrator::UploadOrchestrator;
pub use reconcile::{collect_confirmed, confirmed_pages, confirmed_parts};
pub use remote::{BoxFuture, ControlPlane, PartTransport};
pub use types::{
    DEFAULT_CONCURRENCY, DEFAULT_LIST_PAGE_SIZE, HaltAfter, ResumeTarget, UploadEvent, UploadOptions,
    UploadOutcome, UploadRequest, detect_content_type,
};
