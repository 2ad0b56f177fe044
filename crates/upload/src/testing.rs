//! In-memory control plane and storage used by the orchestrator tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use scoreplay_api::{ApiError, StorageError};
use scoreplay_protocol::{
    BeginMultipartResponse, BeginUploadRequest, CompletedPart, ListPartsResponse, ListedPart,
    PartRequest, PartsMarker, PresignedPart,
};
use scoreplay_transfer::checksum_part;

use crate::remote::{BoxFuture, ControlPlane, PartTransport};

const CHECKSUM_HEADER: &str = "x-amz-checksum-sha256";

#[derive(Default)]
struct FakeSession {
    /// Checksum each part was last authorized with.
    authorized: HashMap<u32, String>,
    /// Stored parts: etag and checksum.
    stored: BTreeMap<u32, (String, String)>,
}

#[derive(Default)]
struct Inner {
    part_size: u64,
    next_session: u32,
    sessions: HashMap<String, FakeSession>,
    begun: Vec<BeginUploadRequest>,
    list_calls: u32,
    /// Replaces the marker of every listing response when set.
    forced_marker: Option<Option<i64>>,
    corrupt_part: Option<u32>,
    fail_put: Option<u32>,
    hang_put: Option<u32>,
    puts: Vec<u32>,
    completions: Vec<Vec<CompletedPart>>,
}

/// Behaves like the control plane plus object storage, with fault hooks.
pub(crate) struct FakeServer {
    inner: Mutex<Inner>,
}

impl FakeServer {
    pub(crate) fn new(part_size: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                part_size,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a session without a begin request. Ids are `sess-1`, `sess-2`, ...
    pub(crate) fn open_session(&self) -> String {
        let mut inner = self.lock();
        inner.next_session += 1;
        let id = format!("sess-{}", inner.next_session);
        inner.sessions.insert(id.clone(), FakeSession::default());
        id
    }

    pub(crate) fn store_part(&self, session: &str, part: u32, etag: &str, checksum: &str) {
        let mut inner = self.lock();
        if let Some(s) = inner.sessions.get_mut(session) {
            s.stored
                .insert(part, (etag.to_string(), checksum.to_string()));
        }
    }

    pub(crate) fn force_marker(&self, marker: Option<i64>) {
        self.lock().forced_marker = Some(marker);
    }

    /// Flips the last byte of `part` on its way to storage.
    pub(crate) fn corrupt_part(&self, part: u32) {
        self.lock().corrupt_part = Some(part);
    }

    /// Storage answers 500 for `part`.
    pub(crate) fn fail_put(&self, part: u32) {
        self.lock().fail_put = Some(part);
    }

    /// Storage never answers for `part`.
    pub(crate) fn hang_put(&self, part: u32) {
        self.lock().hang_put = Some(part);
    }

    pub(crate) fn clear_faults(&self) {
        let mut inner = self.lock();
        inner.corrupt_part = None;
        inner.fail_put = None;
        inner.hang_put = None;
        inner.forced_marker = None;
    }

    pub(crate) fn list_calls(&self) -> u32 {
        self.lock().list_calls
    }

    /// Part numbers in the order their bytes were accepted.
    pub(crate) fn puts(&self) -> Vec<u32> {
        self.lock().puts.clone()
    }

    pub(crate) fn begun(&self) -> Vec<BeginUploadRequest> {
        self.lock().begun.clone()
    }

    pub(crate) fn completions(&self) -> Vec<Vec<CompletedPart>> {
        self.lock().completions.clone()
    }

    pub(crate) fn stored_parts(&self, session: &str) -> Vec<u32> {
        self.lock()
            .sessions
            .get(session)
            .map(|s| s.stored.keys().copied().collect())
            .unwrap_or_default()
    }

    fn not_found(session: &str) -> ApiError {
        ApiError::Api {
            status: 404,
            body: format!("no session {session}"),
        }
    }

    fn begin(&self, req: &BeginUploadRequest) -> BeginMultipartResponse {
        let session_id = self.open_session();
        let mut inner = self.lock();
        inner.begun.push(req.clone());
        BeginMultipartResponse {
            session_id,
            part_size: inner.part_size,
            file_id: None,
        }
    }

    fn authorize(
        &self,
        session_id: &str,
        parts: &[PartRequest],
    ) -> Result<Vec<PresignedPart>, ApiError> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Self::not_found(session_id))?;
        Ok(parts
            .iter()
            .map(|p| {
                session
                    .authorized
                    .insert(p.part_number, p.checksum.clone());
                PresignedPart {
                    part_number: p.part_number,
                    presigned_url: format!("mem://{session_id}/{}", p.part_number),
                    headers: HashMap::from([(CHECKSUM_HEADER.to_string(), p.checksum.clone())]),
                    expires_at: None,
                }
            })
            .collect())
    }

    fn list(
        &self,
        session_id: &str,
        page_size: u32,
        marker: PartsMarker,
    ) -> Result<ListPartsResponse, ApiError> {
        let mut inner = self.lock();
        inner.list_calls += 1;
        let forced = inner.forced_marker;
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| Self::not_found(session_id))?;
        let after = match marker {
            PartsMarker::Start => 0,
            PartsMarker::After(n) => n,
        };
        let remaining: Vec<ListedPart> = session
            .stored
            .range(after + 1..)
            .map(|(n, (etag, _))| ListedPart {
                part_number: *n,
                etag: etag.clone(),
            })
            .collect();
        let more = remaining.len() > page_size as usize;
        let parts: Vec<ListedPart> = remaining.into_iter().take(page_size as usize).collect();
        let natural = match parts.last() {
            Some(last) if more => Some(i64::from(last.part_number)),
            _ => Some(0),
        };
        Ok(ListPartsResponse {
            parts,
            parts_marker: forced.unwrap_or(natural),
        })
    }

    fn complete(&self, session_id: &str, parts: &[CompletedPart]) -> Result<String, ApiError> {
        let mut inner = self.lock();
        inner.completions.push(parts.to_vec());
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| Self::not_found(session_id))?;
        for part in parts {
            match session.stored.get(&part.part_number) {
                Some((etag, checksum)) if *etag == part.etag && *checksum == part.checksum => {}
                _ => {
                    return Err(ApiError::Api {
                        status: 400,
                        body: format!("InvalidPart {}", part.part_number),
                    });
                }
            }
        }
        Ok(format!("file-{session_id}"))
    }

    /// Storage side of a PUT. `None` means the request never gets an answer.
    fn store(
        &self,
        destination: &PresignedPart,
        mut data: Vec<u8>,
    ) -> Option<Result<String, StorageError>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let part = destination.part_number;
        if inner.hang_put == Some(part) {
            return None;
        }
        if inner.fail_put == Some(part) {
            return Some(Err(StorageError::Rejected {
                status: 500,
                body: "InternalError".into(),
            }));
        }
        if inner.corrupt_part == Some(part) {
            if let Some(last) = data.last_mut() {
                *last = last.wrapping_add(1);
            }
        }
        let session_id = destination
            .presigned_url
            .strip_prefix("mem://")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string();
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Some(Err(StorageError::Rejected {
                status: 403,
                body: "AccessDenied".into(),
            }));
        };
        let actual = checksum_part(&data);
        let declared = destination.headers.get(CHECKSUM_HEADER);
        if declared != Some(&actual) || session.authorized.get(&part) != Some(&actual) {
            return Some(Err(StorageError::IntegrityRejected {
                status: 400,
                body: "<Error><Code>BadDigest</Code></Error>".into(),
            }));
        }
        let etag = format!("etag-{part}-{}", &actual[..8]);
        session.stored.insert(part, (etag.clone(), actual));
        inner.puts.push(part);
        Some(Ok(etag))
    }
}

impl ControlPlane for FakeServer {
    fn begin_session(
        &self,
        req: &BeginUploadRequest,
    ) -> BoxFuture<'_, Result<BeginMultipartResponse, ApiError>> {
        let resp = self.begin(req);
        Box::pin(async move { Ok(resp) })
    }

    fn authorize_parts(
        &self,
        session_id: &str,
        parts: &[PartRequest],
    ) -> BoxFuture<'_, Result<Vec<PresignedPart>, ApiError>> {
        let result = self.authorize(session_id, parts);
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }

    fn list_confirmed_parts(
        &self,
        session_id: &str,
        page_size: u32,
        marker: PartsMarker,
    ) -> BoxFuture<'_, Result<ListPartsResponse, ApiError>> {
        let result = self.list(session_id, page_size, marker);
        Box::pin(async move { result })
    }

    fn complete_session(
        &self,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> BoxFuture<'_, Result<String, ApiError>> {
        let result = self.complete(session_id, parts);
        Box::pin(async move { result })
    }
}

impl PartTransport for FakeServer {
    fn put_part(
        &self,
        destination: &PresignedPart,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<String, StorageError>> {
        let destination = destination.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            match self.store(&destination, data) {
                Some(result) => result,
                None => std::future::pending().await,
            }
        })
    }
}
