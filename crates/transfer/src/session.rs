use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use scoreplay_protocol::{CompletedPart, ListedPart};

use crate::TransferError;
use crate::chunker::PartLayout;

/// Lifecycle of one part within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStatus {
    Pending,
    Authorized,
    Transferred,
    /// The server reported the part as durably received.
    Confirmed,
    Failed,
}

impl fmt::Display for PartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PartStatus::Pending => "pending",
            PartStatus::Authorized => "authorized",
            PartStatus::Transferred => "transferred",
            PartStatus::Confirmed => "confirmed",
            PartStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle of the session as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initiated,
    InProgress,
    Reconciling,
    Completing,
    Done,
    Abandoned,
}

impl SessionStatus {
    fn can_move_to(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Initiated, InProgress)
                | (Initiated, Reconciling)
                | (Reconciling, InProgress)
                | (InProgress, Completing)
                | (Completing, Done)
        ) || (to == Abandoned && !matches!(self, Done | Abandoned))
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Initiated => "initiated",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Reconciling => "reconciling",
            SessionStatus::Completing => "completing",
            SessionStatus::Done => "done",
            SessionStatus::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// What is known locally about one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    pub part_number: u32,
    pub size: u64,
    pub status: PartStatus,
    pub etag: Option<String>,
    pub checksum: Option<String>,
}

impl PartRecord {
    /// Transferred or confirmed, with both token and checksum known.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, PartStatus::Transferred | PartStatus::Confirmed)
            && self.etag.is_some()
            && self.checksum.is_some()
    }
}

/// Per-run state of a multipart session (thread-safe).
///
/// Holds one record per part of the layout, keyed by part number.
pub struct SessionState {
    inner: RwLock<StateInner>,
}

struct StateInner {
    session_id: String,
    layout: PartLayout,
    status: SessionStatus,
    parts: BTreeMap<u32, PartRecord>,
}

impl SessionState {
    /// Creates state for a freshly initiated session with every part pending.
    pub fn new(session_id: String, layout: PartLayout) -> Self {
        let parts = layout
            .part_numbers()
            .filter_map(|n| {
                let (_, size) = layout.part_range(n)?;
                Some((
                    n,
                    PartRecord {
                        part_number: n,
                        size,
                        status: PartStatus::Pending,
                        etag: None,
                        checksum: None,
                    },
                ))
            })
            .collect();
        Self {
            inner: RwLock::new(StateInner {
                session_id,
                layout,
                status: SessionStatus::Initiated,
                parts,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StateInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StateInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_id(&self) -> String {
        self.read().session_id.clone()
    }

    pub fn layout(&self) -> PartLayout {
        self.read().layout
    }

    pub fn status(&self) -> SessionStatus {
        self.read().status
    }

    /// Moves the session to `to` if the transition is allowed.
    pub fn set_status(&self, to: SessionStatus) -> Result<(), TransferError> {
        let mut s = self.write();
        if !s.status.can_move_to(to) {
            return Err(TransferError::InvalidSessionTransition { from: s.status, to });
        }
        s.status = to;
        Ok(())
    }

    pub fn part(&self, n: u32) -> Option<PartRecord> {
        self.read().parts.get(&n).cloned()
    }

    /// Records the checksum sent with an authorization request.
    pub fn mark_authorized(&self, n: u32, checksum: String) -> Result<(), TransferError> {
        self.transition(
            n,
            PartStatus::Authorized,
            |from| from == PartStatus::Pending,
            |rec| rec.checksum = Some(checksum),
        )
    }

    /// Records the storage token for a part whose bytes were accepted.
    pub fn mark_transferred(&self, n: u32, etag: String) -> Result<(), TransferError> {
        self.transition(
            n,
            PartStatus::Transferred,
            |from| from == PartStatus::Authorized,
            |rec| rec.etag = Some(etag),
        )
    }

    /// Marks a part whose transfer was attempted and did not succeed.
    ///
    /// Any token recorded for it is discarded.
    pub fn mark_failed(&self, n: u32) -> Result<(), TransferError> {
        self.transition(
            n,
            PartStatus::Failed,
            |from| matches!(from, PartStatus::Authorized | PartStatus::Transferred),
            |rec| rec.etag = None,
        )
    }

    /// Merges a server-confirmed part. The server's token replaces any
    /// local one. Failed parts are left untouched and `false` is returned.
    pub fn merge_confirmed(&self, listed: &ListedPart) -> Result<bool, TransferError> {
        let mut s = self.write();
        let count = s.layout.part_count();
        let rec = s
            .parts
            .get_mut(&listed.part_number)
            .ok_or(TransferError::PartOutOfRange {
                part: listed.part_number,
                count,
            })?;
        if rec.status == PartStatus::Failed {
            return Ok(false);
        }
        rec.status = PartStatus::Confirmed;
        rec.etag = Some(listed.etag.clone());
        Ok(true)
    }

    /// Stores a checksum freshly computed from the source bytes.
    pub fn record_checksum(&self, n: u32, checksum: String) -> Result<(), TransferError> {
        let mut s = self.write();
        let count = s.layout.part_count();
        let rec = s
            .parts
            .get_mut(&n)
            .ok_or(TransferError::PartOutOfRange { part: n, count })?;
        rec.checksum = Some(checksum);
        Ok(())
    }

    /// Parts that still need authorization and transfer, ascending.
    pub fn pending_parts(&self) -> Vec<u32> {
        self.read()
            .parts
            .values()
            .filter(|r| r.status == PartStatus::Pending)
            .map(|r| r.part_number)
            .collect()
    }

    /// Parts the server already holds, ascending.
    pub fn confirmed_parts(&self) -> Vec<u32> {
        self.read()
            .parts
            .values()
            .filter(|r| r.status == PartStatus::Confirmed)
            .map(|r| r.part_number)
            .collect()
    }

    /// Bytes in parts that are confirmed or transferred.
    pub fn settled_bytes(&self) -> u64 {
        self.read()
            .parts
            .values()
            .filter(|r| r.is_settled())
            .map(|r| r.size)
            .sum()
    }

    /// Builds the ordered completion list, or names the parts that keep
    /// the session from completing.
    pub fn completion_payload(&self) -> Result<Vec<CompletedPart>, TransferError> {
        let s = self.read();
        let mut missing = Vec::new();
        let mut parts = Vec::with_capacity(s.parts.len());
        for rec in s.parts.values() {
            match (rec.is_settled(), &rec.etag, &rec.checksum) {
                (true, Some(etag), Some(checksum)) => parts.push(CompletedPart {
                    part_number: rec.part_number,
                    etag: etag.clone(),
                    checksum: checksum.clone(),
                }),
                _ => missing.push(rec.part_number),
            }
        }
        if !missing.is_empty() {
            return Err(TransferError::MissingParts(missing));
        }
        Ok(parts)
    }

    fn transition(
        &self,
        n: u32,
        to: PartStatus,
        allowed: impl FnOnce(PartStatus) -> bool,
        update: impl FnOnce(&mut PartRecord),
    ) -> Result<(), TransferError> {
        let mut s = self.write();
        let count = s.layout.part_count();
        let rec = s
            .parts
            .get_mut(&n)
            .ok_or(TransferError::PartOutOfRange { part: n, count })?;
        if !allowed(rec.status) {
            return Err(TransferError::InvalidTransition {
                part: n,
                from: rec.status,
                to,
            });
        }
        rec.status = to;
        update(rec);
        Ok(())
    }
}
