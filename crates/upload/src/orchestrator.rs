//! Upload orchestrator.
//!
//! Drives one file through a multipart session: initiate (or reconcile an
//! existing session), move the pending parts through a bounded worker pool,
//! then complete. Progress is published as [`UploadEvent`]s and the whole run
//! can be cancelled.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scoreplay_api::ApiError;
use scoreplay_protocol::{BeginUploadRequest, PartRequest};
use scoreplay_transfer::{
    PartData, PartLayout, PartReader, PartStatus, SessionJournal, SessionState, SessionStatus,
    TransferError, calculate_file_checksum, validate_completion,
};

use crate::error::{Phase, UploadError};
use crate::reconcile::collect_confirmed;
use crate::remote::{ControlPlane, PartTransport};
use crate::types::{ResumeTarget, UploadEvent, UploadOptions, UploadOutcome, UploadRequest};

/// Sent by a worker once its part is authorized, before the bytes move.
struct Authorized {
    part: u32,
    checksum: String,
}

/// A part whose bytes storage accepted.
struct Transferred {
    part: u32,
    etag: String,
    bytes: u64,
}

/// Uploads files through a control plane and a part transport.
pub struct UploadOrchestrator {
    control: Arc<dyn ControlPlane>,
    transport: Arc<dyn PartTransport>,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl UploadOrchestrator {
    pub fn new(control: Arc<dyn ControlPlane>, transport: Arc<dyn PartTransport>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            control,
            transport,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns the cancellation token for this orchestrator's runs.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Starts a new multipart session for `request` and uploads every part.
    ///
    /// With `stop_after` set the run halts at that point and returns
    /// [`UploadOutcome::Halted`]; the session can then be continued with
    /// [`resume`](Self::resume).
    pub async fn upload(
        &self,
        request: &UploadRequest,
        options: &UploadOptions,
    ) -> Result<UploadOutcome, UploadError> {
        let mut session_id = None;
        let result = self.run_upload(request, options, &mut session_id).await;
        self.report(result, session_id).await
    }

    /// Continues an existing session.
    ///
    /// The server's confirmed parts are listed first and are never sent
    /// again; their checksums are recomputed from the local file.
    pub async fn resume(
        &self,
        request: &UploadRequest,
        target: &ResumeTarget,
        options: &UploadOptions,
    ) -> Result<UploadOutcome, UploadError> {
        let result = self.run_resume(request, target, options).await;
        self.report(result, Some(target.session_id.clone())).await
    }

    async fn run_upload(
        &self,
        request: &UploadRequest,
        options: &UploadOptions,
        session_id: &mut Option<String>,
    ) -> Result<UploadOutcome, UploadError> {
        self.check_cancelled(Phase::Prepare)?;
        let (size, checksum) = inspect_source(&request.path).await?;

        self.check_cancelled(Phase::Initiate)?;
        let begin = BeginUploadRequest {
            filename: request.filename.clone(),
            content_type: request.content_type.clone(),
            size_bytes: size,
            checksum_sha256: checksum.clone(),
            tags: request.tags.clone(),
        };
        let resp = self
            .control
            .begin_session(&begin)
            .await
            .map_err(UploadError::SessionInit)?;
        *session_id = Some(resp.session_id.clone());

        let layout = session_layout(size, resp.part_size)?;
        info!(
            session = %resp.session_id,
            part_size = layout.part_size(),
            parts = layout.part_count(),
            bytes = size,
            "multipart session started"
        );

        if let Some(dir) = &options.journal_dir {
            let mut journal = SessionJournal::new(
                resp.session_id.clone(),
                layout.part_size(),
                size,
                request.filename.clone(),
                checksum,
                request.tags.clone(),
            );
            journal
                .save(&SessionJournal::path_in(dir, &resp.session_id))
                .map_err(UploadError::Journal)?;
        }

        self.emit_started(&resp.session_id, layout).await;
        let state = SessionState::new(resp.session_id, layout);
        move_to(&state, SessionStatus::InProgress)?;
        self.transfer_and_complete(request, &state, options).await
    }

    async fn run_resume(
        &self,
        request: &UploadRequest,
        target: &ResumeTarget,
        options: &UploadOptions,
    ) -> Result<UploadOutcome, UploadError> {
        self.check_cancelled(Phase::Prepare)?;
        let size = tokio::fs::metadata(&request.path)
            .await
            .map_err(|e| UploadError::Source(e.into()))?
            .len();
        if let Some(expected) = target.object_size
            && expected != size
        {
            return Err(UploadError::Source(TransferError::SourceChanged {
                expected,
                actual: size,
            }));
        }
        let layout = session_layout(size, target.part_size)?;

        info!(
            session = %target.session_id,
            part_size = layout.part_size(),
            parts = layout.part_count(),
            "resuming multipart session"
        );
        self.emit_started(&target.session_id, layout).await;

        let state = SessionState::new(target.session_id.clone(), layout);
        move_to(&state, SessionStatus::Reconciling)?;
        self.reconcile(&state, options).await?;
        self.redigest_confirmed(&request.path, &state).await?;
        move_to(&state, SessionStatus::InProgress)?;
        self.transfer_and_complete(request, &state, options).await
    }

    /// Merges every part the server already holds into `state`.
    async fn reconcile(
        &self,
        state: &SessionState,
        options: &UploadOptions,
    ) -> Result<(), UploadError> {
        let session_id = state.session_id();
        let listed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                abandon(state);
                return Err(UploadError::Cancelled { phase: Phase::Reconcile });
            }
            listed = collect_confirmed(self.control.as_ref(), &session_id, options.list_page_size) => {
                listed.map_err(UploadError::Reconciliation)?
            }
        };

        let count = state.layout().part_count();
        let mut confirmed = 0u32;
        for part in &listed {
            let merged = state.merge_confirmed(part).map_err(|_| {
                UploadError::InvalidSession(format!(
                    "server holds part {} but the file splits into {count} parts",
                    part.part_number
                ))
            })?;
            if merged {
                confirmed += 1;
            }
        }

        info!(session = %session_id, confirmed, "reconciled with server");
        self.emit(UploadEvent::Reconciled {
            session_id,
            confirmed,
        })
        .await;
        Ok(())
    }

    /// Recomputes the checksum of every confirmed part from the source bytes.
    async fn redigest_confirmed(&self, path: &Path, state: &SessionState) -> Result<(), UploadError> {
        let confirmed = state.confirmed_parts();
        if confirmed.is_empty() {
            return Ok(());
        }
        let layout = state.layout();
        let path = path.to_path_buf();

        let digests = tokio::task::spawn_blocking(move || {
            let file = File::open(&path).map_err(|e| UploadError::Source(e.into()))?;
            let mut reader = PartReader::new(file, layout.object_size(), layout.part_size())
                .map_err(UploadError::Source)?;
            confirmed
                .into_iter()
                .map(|part| {
                    let data = reader
                        .read_part(part)
                        .map_err(|source| UploadError::PartRead {
                            part,
                            phase: Phase::Reconcile,
                            source,
                        })?;
                    Ok((part, data.len(), data.checksum()))
                })
                .collect::<Result<Vec<_>, UploadError>>()
        })
        .await
        .map_err(|e| UploadError::Source(join_error(e)))??;

        for (part, bytes, checksum) in digests {
            state
                .record_checksum(part, checksum)
                .map_err(UploadError::Source)?;
            debug!(part, bytes, "confirmed part skipped");
            self.emit(UploadEvent::PartSkipped { part, bytes }).await;
        }
        Ok(())
    }

    async fn transfer_and_complete(
        &self,
        request: &UploadRequest,
        state: &SessionState,
        options: &UploadOptions,
    ) -> Result<UploadOutcome, UploadError> {
        let mut parts = state.pending_parts();
        let limit = options
            .stop_after
            .map(|halt| halt.parts_for(state.layout().part_count()) as usize);
        let held_back = match limit {
            Some(n) if n < parts.len() => parts.split_off(n),
            _ => Vec::new(),
        };

        let transferred = self
            .transfer_parts(&request.path, state, parts, options.concurrency)
            .await?;

        if !held_back.is_empty() {
            let session_id = state.session_id();
            // Bounded by the part count limit.
            let remaining = held_back.len() as u32;
            info!(session = %session_id, transferred, remaining, "halted before completion");
            self.emit(UploadEvent::Halted {
                session_id: session_id.clone(),
                transferred,
                remaining,
            })
            .await;
            return Ok(UploadOutcome::Halted {
                session_id,
                part_size: state.layout().part_size(),
                transferred,
                remaining,
            });
        }

        self.complete(state, options).await
    }

    /// Moves `parts` through the worker pool. Returns how many were transferred.
    ///
    /// The first failure stops new parts from starting. Parts already in
    /// flight are drained and recorded before that failure is returned.
    async fn transfer_parts(
        &self,
        path: &Path,
        state: &SessionState,
        parts: Vec<u32>,
        concurrency: usize,
    ) -> Result<u32, UploadError> {
        if parts.is_empty() {
            return Ok(0);
        }
        let layout = state.layout();
        let session_id = state.session_id();
        let halted = AtomicBool::new(false);
        let (auth_tx, mut auth_rx) = mpsc::unbounded_channel::<Authorized>();

        let mut pool = stream::iter(parts)
            .take_while(|_| future::ready(!halted.load(Ordering::Acquire)))
            .map(|part| self.transfer_part(path, layout, &session_id, part, auth_tx.clone()))
            .buffer_unordered(concurrency.max(1));

        let mut transferred = 0u32;
        let mut first_error: Option<UploadError> = None;
        let cancelled = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break true,
                Some(auth) = auth_rx.recv() => record_authorized(state, auth),
                next = pool.next() => {
                    let Some(outcome) = next else { break false };
                    while let Ok(auth) = auth_rx.try_recv() {
                        record_authorized(state, auth);
                    }
                    match outcome {
                        Ok(done) => {
                            transferred += 1;
                            self.record_transferred(state, done).await;
                        }
                        Err(e) => {
                            record_failed(state, &e);
                            halted.store(true, Ordering::Release);
                            if first_error.is_none() {
                                warn!(session = %session_id, part = ?e.part(), error = %e, "part failed, no new parts will start");
                                first_error = Some(e);
                            } else {
                                warn!(session = %session_id, part = ?e.part(), error = %e, "in-flight part failed");
                            }
                        }
                    }
                }
            }
        };

        // Dropping the pool aborts whatever is still in flight.
        drop(pool);
        while let Ok(auth) = auth_rx.try_recv() {
            record_authorized(state, auth);
        }

        if cancelled {
            abandon(state);
            info!(session = %session_id, transferred, "upload cancelled");
            return Err(UploadError::Cancelled {
                phase: Phase::Transfer,
            });
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(transferred),
        }
    }

    /// Read, digest, authorize and transfer one part.
    async fn transfer_part(
        &self,
        path: &Path,
        layout: PartLayout,
        session_id: &str,
        part: u32,
        auth_tx: mpsc::UnboundedSender<Authorized>,
    ) -> Result<Transferred, UploadError> {
        let (data, checksum) = read_part(path.to_path_buf(), layout, part).await?;
        let bytes = data.len();

        let request = PartRequest {
            part_number: part,
            checksum: checksum.clone(),
            content_length: bytes,
        };
        let destination = self
            .control
            .authorize_parts(session_id, std::slice::from_ref(&request))
            .await
            .map_err(|source| UploadError::Authorization { part, source })?
            .into_iter()
            .find(|d| d.part_number == part)
            .ok_or_else(|| UploadError::Authorization {
                part,
                source: ApiError::MissingAuthorization(part),
            })?;
        let _ = auth_tx.send(Authorized { part, checksum });
        debug!(session = %session_id, part, bytes, "part authorized");

        let etag = self
            .transport
            .put_part(&destination, data.data)
            .await
            .map_err(|e| UploadError::from_storage(part, e))?;
        Ok(Transferred { part, etag, bytes })
    }

    async fn record_transferred(&self, state: &SessionState, done: Transferred) {
        if let Err(e) = state.mark_transferred(done.part, done.etag) {
            warn!(part = done.part, error = %e, "transfer outcome not recorded");
            return;
        }
        let layout = state.layout();
        let done_bytes = state.settled_bytes();
        debug!(part = done.part, bytes = done.bytes, done_bytes, "part transferred");
        self.emit(UploadEvent::PartUploaded {
            part: done.part,
            bytes: done.bytes,
            done_bytes,
            total_bytes: layout.object_size(),
        })
        .await;
    }

    async fn complete(
        &self,
        state: &SessionState,
        options: &UploadOptions,
    ) -> Result<UploadOutcome, UploadError> {
        if self.cancel.is_cancelled() {
            abandon(state);
            return Err(UploadError::Cancelled {
                phase: Phase::Complete,
            });
        }
        let session_id = state.session_id();
        let part_count = state.layout().part_count();

        let parts = state.completion_payload().map_err(completion_precondition)?;
        validate_completion(&parts, part_count).map_err(completion_precondition)?;

        move_to(state, SessionStatus::Completing)?;
        info!(session = %session_id, parts = parts.len(), "completing session");
        let file_id = self
            .control
            .complete_session(&session_id, &parts)
            .await
            .map_err(UploadError::Completion)?;
        move_to(state, SessionStatus::Done)?;

        // The object is final now; a leftover journal is only logged.
        if let Some(dir) = &options.journal_dir {
            let path = SessionJournal::path_in(dir, &session_id);
            if let Err(e) = SessionJournal::remove(&path) {
                warn!(
                    session = %session_id,
                    path = %path.display(),
                    error = %e,
                    "journal not removed"
                );
            }
        }

        info!(session = %session_id, file_id = %file_id, "upload completed");
        self.emit(UploadEvent::Completed {
            session_id: session_id.clone(),
            file_id: file_id.clone(),
        })
        .await;
        Ok(UploadOutcome::Completed {
            session_id,
            file_id,
            parts: part_count,
        })
    }

    async fn report(
        &self,
        result: Result<UploadOutcome, UploadError>,
        session_id: Option<String>,
    ) -> Result<UploadOutcome, UploadError> {
        if let Err(e) = &result {
            error!(
                session = session_id.as_deref().unwrap_or("-"),
                phase = %e.phase(),
                part = ?e.part(),
                error = %e,
                "upload failed"
            );
            self.emit(UploadEvent::Failed {
                session_id,
                error: e.to_string(),
            })
            .await;
        }
        result
    }

    async fn emit_started(&self, session_id: &str, layout: PartLayout) {
        self.emit(UploadEvent::SessionStarted {
            session_id: session_id.to_string(),
            part_size: layout.part_size(),
            part_count: layout.part_count(),
            total_bytes: layout.object_size(),
        })
        .await;
    }

    /// Publishes an event, waiting for room once someone holds the receiver.
    async fn emit(&self, event: UploadEvent) {
        if self.events_rx.is_some() {
            // Nobody has taken the receiver; buffer what fits.
            if let Err(e) = self.events_tx.try_send(event) {
                debug!("upload event dropped: {e}");
            }
            return;
        }
        if self.events_tx.send(event).await.is_err() {
            debug!("event receiver closed");
        }
    }

    fn check_cancelled(&self, phase: Phase) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled { phase });
        }
        Ok(())
    }
}

fn session_layout(size: u64, part_size: u64) -> Result<PartLayout, UploadError> {
    PartLayout::new(size, part_size).map_err(|e| match e {
        TransferError::InvalidPartSize => {
            UploadError::InvalidSession("part size must be positive".into())
        }
        other => UploadError::InvalidSession(other.to_string()),
    })
}

fn move_to(state: &SessionState, to: SessionStatus) -> Result<(), UploadError> {
    state
        .set_status(to)
        .map_err(|e| UploadError::InvalidSession(e.to_string()))
}

fn abandon(state: &SessionState) {
    if let Err(e) = state.set_status(SessionStatus::Abandoned) {
        debug!(error = %e, "session not abandoned");
    }
}

fn record_authorized(state: &SessionState, auth: Authorized) {
    if let Err(e) = state.mark_authorized(auth.part, auth.checksum) {
        warn!(part = auth.part, error = %e, "authorization not recorded");
    }
}

/// Marks the failing part, if it got as far as authorization.
fn record_failed(state: &SessionState, err: &UploadError) {
    let Some(part) = err.part() else { return };
    if state.part(part).is_some_and(|r| r.status == PartStatus::Authorized)
        && let Err(e) = state.mark_failed(part)
    {
        warn!(part, error = %e, "failure not recorded");
    }
}

fn completion_precondition(err: TransferError) -> UploadError {
    match err {
        TransferError::MissingParts(missing) => UploadError::MissingParts(missing),
        other => UploadError::InvalidSession(other.to_string()),
    }
}

fn join_error(err: tokio::task::JoinError) -> TransferError {
    TransferError::Io(std::io::Error::other(err))
}

/// Size and whole-object checksum of the file at `path`.
async fn inspect_source(path: &Path) -> Result<(u64, String), UploadError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let size = std::fs::metadata(&path)?.len();
        let checksum = calculate_file_checksum(&path)?;
        Ok::<_, TransferError>((size, checksum))
    })
    .await
    .map_err(join_error)
    .and_then(|r| r)
    .map_err(UploadError::Source)
}

/// Reads part `part` on the blocking pool with its own file handle.
async fn read_part(
    path: PathBuf,
    layout: PartLayout,
    part: u32,
) -> Result<(PartData, String), UploadError> {
    tokio::task::spawn_blocking(move || {
        let file = File::open(&path)?;
        let data = PartReader::new(file, layout.object_size(), layout.part_size())?
            .read_part(part)?;
        let checksum = data.checksum();
        Ok::<_, TransferError>((data, checksum))
    })
    .await
    .map_err(join_error)
    .and_then(|r| r)
    .map_err(|source| UploadError::PartRead {
        part,
        phase: Phase::Transfer,
        source,
    })
}
