use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// On-disk record that identifies an in-progress multipart session.
///
/// It only says which session belongs to which file. Which parts the
/// server holds is always asked of the server on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionJournal {
    pub session_id: String,
    pub part_size: u64,
    pub object_size: u64,
    pub file_name: String,
    /// Base64 SHA-256 of the whole object, as sent at begin time.
    pub checksum: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionJournal {
    pub fn new(
        session_id: String,
        part_size: u64,
        object_size: u64,
        file_name: String,
        checksum: String,
        tags: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            part_size,
            object_size,
            file_name,
            checksum,
            tags,
            created_at: now,
            updated_at: now,
        }
    }

    /// Journal file for `session_id` inside `dir`.
    pub fn path_in(dir: &Path, session_id: &str) -> PathBuf {
        dir.join(format!("{session_id}.json"))
    }

    /// Writes the journal as pretty JSON, readable by the owner only.
    pub fn save(&mut self, path: &Path) -> Result<(), TransferError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        set_permissions_0600(path);
        tracing::debug!(session = %self.session_id, path = %path.display(), "journal saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Deletes the journal. A journal that is already gone is not an error.
    pub fn remove(path: &Path) -> Result<(), TransferError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recently updated journal in `dir` whose file name matches.
    pub fn find_latest(dir: &Path, file_name: &str) -> Result<Option<Self>, TransferError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<Self> = None;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let journal = match Self::load(&path) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable journal");
                    continue;
                }
            };
            if journal.file_name != file_name {
                continue;
            }
            if latest
                .as_ref()
                .is_none_or(|l| journal.updated_at > l.updated_at)
            {
                latest = Some(journal);
            }
        }
        Ok(latest)
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}
