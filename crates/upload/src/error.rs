//! Upload error types.

use std::fmt;

use scoreplay_api::{ApiError, StorageError};
use scoreplay_transfer::TransferError;

/// Stage of an upload run an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Inspecting the local source before contacting the server.
    Prepare,
    Initiate,
    Reconcile,
    Authorize,
    Transfer,
    Complete,
    Journal,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Prepare => "prepare",
            Phase::Initiate => "initiate",
            Phase::Reconcile => "reconcile",
            Phase::Authorize => "authorize",
            Phase::Transfer => "transfer",
            Phase::Complete => "complete",
            Phase::Journal => "journal",
        };
        f.write_str(s)
    }
}

/// Errors produced by an upload run.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("could not start upload session: {0}")]
    SessionInit(#[source] ApiError),

    #[error("authorization failed for part {part}: {source}")]
    Authorization {
        part: u32,
        #[source]
        source: ApiError,
    },

    #[error("transfer failed for part {part}: {source}")]
    Transfer {
        part: u32,
        #[source]
        source: StorageError,
    },

    /// Storage refused the part because its bytes do not match the
    /// checksum it was authorized with.
    #[error("storage rejected part {part} integrity check ({status}): {body}")]
    IntegrityRejected { part: u32, status: u16, body: String },

    #[error("could not list confirmed parts: {0}")]
    Reconciliation(#[source] ApiError),

    #[error("cannot complete, missing parts: {0:?}")]
    MissingParts(Vec<u32>),

    #[error("completion failed: {0}")]
    Completion(#[source] ApiError),

    #[error("cannot read part {part} during {phase}: {source}")]
    PartRead {
        part: u32,
        /// Reconcile when re-digesting a confirmed part, transfer otherwise.
        phase: Phase,
        #[source]
        source: TransferError,
    },

    #[error("source file error: {0}")]
    Source(#[source] TransferError),

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("cancelled during {phase}")]
    Cancelled { phase: Phase },

    #[error("journal error: {0}")]
    Journal(#[source] TransferError),
}

impl UploadError {
    /// Part the error concerns, if it is about a single part.
    pub fn part(&self) -> Option<u32> {
        match self {
            UploadError::Authorization { part, .. }
            | UploadError::Transfer { part, .. }
            | UploadError::IntegrityRejected { part, .. }
            | UploadError::PartRead { part, .. } => Some(*part),
            UploadError::MissingParts(parts) => parts.first().copied(),
            _ => None,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            UploadError::Source(_) => Phase::Prepare,
            UploadError::PartRead { phase, .. } => *phase,
            UploadError::SessionInit(_) | UploadError::InvalidSession(_) => Phase::Initiate,
            UploadError::Reconciliation(_) => Phase::Reconcile,
            UploadError::Authorization { .. } => Phase::Authorize,
            UploadError::Transfer { .. } | UploadError::IntegrityRejected { .. } => {
                Phase::Transfer
            }
            UploadError::MissingParts(_) | UploadError::Completion(_) => Phase::Complete,
            UploadError::Journal(_) => Phase::Journal,
            UploadError::Cancelled { phase } => *phase,
        }
    }

    /// Maps a storage failure for `part`, keeping integrity rejections distinct.
    pub(crate) fn from_storage(part: u32, err: StorageError) -> Self {
        match err {
            StorageError::IntegrityRejected { status, body } => {
                UploadError::IntegrityRejected { part, status, body }
            }
            source => UploadError::Transfer { part, source },
        }
    }

    /// The session is still resumable after this error.
    pub fn is_resumable(&self) -> bool {
        !matches!(
            self,
            UploadError::SessionInit(_) | UploadError::InvalidSession(_) | UploadError::Source(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_rejection_stays_distinct() {
        let err = UploadError::from_storage(
            3,
            StorageError::IntegrityRejected {
                status: 400,
                body: "BadDigest".into(),
            },
        );
        assert!(matches!(err, UploadError::IntegrityRejected { part: 3, .. }));
        assert_eq!(err.part(), Some(3));
        assert_eq!(err.phase(), Phase::Transfer);

        let err = UploadError::from_storage(2, StorageError::MissingEtag);
        assert!(matches!(err, UploadError::Transfer { part: 2, .. }));
    }

    #[test]
    fn phase_and_part() {
        let err = UploadError::MissingParts(vec![4, 7]);
        assert_eq!(err.part(), Some(4));
        assert_eq!(err.phase(), Phase::Complete);
        assert!(err.to_string().contains("[4, 7]"));

        let err = UploadError::Cancelled {
            phase: Phase::Reconcile,
        };
        assert_eq!(err.phase(), Phase::Reconcile);
        assert_eq!(err.part(), None);
        assert_eq!(err.to_string(), "cancelled during reconcile");
    }

    #[test]
    fn part_read_keeps_its_phase() {
        let err = UploadError::PartRead {
            part: 2,
            phase: Phase::Reconcile,
            source: TransferError::ShortRead {
                part: 2,
                expected: 4,
                actual: 1,
            },
        };
        assert_eq!(err.phase(), Phase::Reconcile);
        assert_eq!(err.part(), Some(2));
        assert!(err.to_string().starts_with("cannot read part 2 during reconcile"));
    }

    #[test]
    fn resumable() {
        assert!(UploadError::MissingParts(vec![1]).is_resumable());
        assert!(!UploadError::InvalidSession("zero part size".into()).is_resumable());
    }
}
