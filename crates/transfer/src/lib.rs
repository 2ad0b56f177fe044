//! Local side of a multipart upload: splitting a file into parts, digesting
//! them, and tracking which parts the server holds.

mod chunker;
mod digest;
mod journal;
mod progress;
mod session;
mod validation;

pub use chunker::{PartData, PartLayout, PartReader};
pub use digest::{calculate_file_checksum, checksum_part};
pub use journal::SessionJournal;
pub use progress::Throughput;
pub use session::{PartRecord, PartStatus, SessionState, SessionStatus};
pub use validation::validate_completion;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("part size must be positive")]
    InvalidPartSize,

    #[error("{parts} parts needed, at most {max} allowed")]
    TooManyParts { parts: u64, max: u32 },

    #[error("part {part} is outside 1..={count}")]
    PartOutOfRange { part: u32, count: u32 },

    #[error("short read on part {part}: expected {expected} bytes, got {actual}")]
    ShortRead { part: u32, expected: u64, actual: u64 },

    #[error("part {part} cannot move from {from} to {to}")]
    InvalidTransition {
        part: u32,
        from: PartStatus,
        to: PartStatus,
    },

    #[error("session cannot move from {from} to {to}")]
    InvalidSessionTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("missing parts: {0:?}")]
    MissingParts(Vec<u32>),

    #[error("duplicate part {0} in completion set")]
    DuplicatePart(u32),

    #[error("source size changed: journal says {expected} bytes, file has {actual}")]
    SourceChanged { expected: u64, actual: u64 },
}
