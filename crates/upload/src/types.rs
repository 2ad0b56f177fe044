//! Data types for upload runs.

use std::path::{Path, PathBuf};

/// Parts in flight at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Page size used when listing confirmed parts.
pub const DEFAULT_LIST_PAGE_SIZE: u32 = 1000;

/// A local file to upload and the metadata to register it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub filename: String,
    pub content_type: String,
    pub tags: Vec<String>,
}

impl UploadRequest {
    /// Derives the file name and content type from `path`.
    pub fn from_path(path: impl Into<PathBuf>, tags: Vec<String>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = detect_content_type(&path).to_string();
        Self {
            path,
            filename,
            content_type,
            tags,
        }
    }
}

/// Point at which a run stops early, leaving the session open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltAfter {
    /// After this many parts have been transferred.
    Parts(u32),
    /// After half of the session's parts, at least one.
    Half,
}

impl HaltAfter {
    /// Number of parts to transfer for a session of `part_count` parts.
    pub fn parts_for(self, part_count: u32) -> u32 {
        match self {
            HaltAfter::Parts(n) => n,
            HaltAfter::Half => (part_count / 2).max(1),
        }
    }
}

/// Knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Maximum parts read, authorized and transferred at once.
    pub concurrency: usize,
    /// Halt without completing once this point is reached in this run.
    pub stop_after: Option<HaltAfter>,
    /// Page size for confirmed-part listing.
    pub list_page_size: u32,
    /// Where session journals live. `None` disables journaling.
    pub journal_dir: Option<PathBuf>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            stop_after: None,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            journal_dir: None,
        }
    }
}

/// Identifies an existing session to continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeTarget {
    pub session_id: String,
    pub part_size: u64,
    /// Size the session was opened with. When known, a source of any
    /// other size is refused before anything is listed.
    pub object_size: Option<u64>,
}

impl ResumeTarget {
    pub fn new(session_id: impl Into<String>, part_size: u64) -> Self {
        Self {
            session_id: session_id.into(),
            part_size,
            object_size: None,
        }
    }

    pub fn with_object_size(mut self, size: u64) -> Self {
        self.object_size = Some(size);
        self
    }
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The object was finalized.
    Completed {
        session_id: String,
        file_id: String,
        parts: u32,
    },
    /// The run stopped early on request; the session can be resumed.
    Halted {
        session_id: String,
        part_size: u64,
        transferred: u32,
        remaining: u32,
    },
}

/// Progress event emitted during an upload run.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    SessionStarted {
        session_id: String,
        part_size: u64,
        part_count: u32,
        total_bytes: u64,
    },
    /// Server-confirmed parts were merged before transferring.
    Reconciled { session_id: String, confirmed: u32 },
    /// A confirmed part was not sent again.
    PartSkipped { part: u32, bytes: u64 },
    PartUploaded {
        part: u32,
        bytes: u64,
        /// Bytes settled so far, confirmed parts included.
        done_bytes: u64,
        total_bytes: u64,
    },
    Halted {
        session_id: String,
        transferred: u32,
        remaining: u32,
    },
    Completed { session_id: String, file_id: String },
    Failed {
        session_id: Option<String>,
        error: String,
    },
}

/// Detects a MIME type from a file extension.
pub fn detect_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("mpg" | "mpeg") => "video/mpeg",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/x-wav",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}
