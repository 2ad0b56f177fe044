//! `file` subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, anyhow, bail};
use serde::Serialize;
use tracing::{info, warn};

use scoreplay_api::{ApiClient, StorageClient, StorageError};
use scoreplay_protocol::{BeginUploadRequest, Continuation, PartRequest, PartsMarker};
use scoreplay_transfer::{PartReader, SessionJournal, calculate_file_checksum};
use scoreplay_upload::{
    HaltAfter, ResumeTarget, UploadError, UploadOptions, UploadOrchestrator, UploadOutcome,
    UploadRequest, collect_confirmed,
};

use crate::config::Settings;
use crate::progress;

/// Clients and settings shared by every command.
pub struct Context {
    api: ApiClient,
    storage: StorageClient,
    settings: Settings,
}

impl Context {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let api = ApiClient::new(&settings.client).context("building control-plane client")?;
        let storage = StorageClient::new(&settings.client).context("building storage client")?;
        Ok(Self {
            api,
            storage,
            settings,
        })
    }

    fn options(&self, concurrency: Option<usize>, stop_after: Option<HaltAfter>) -> UploadOptions {
        UploadOptions {
            concurrency: concurrency.unwrap_or(self.settings.concurrency).max(1),
            stop_after,
            journal_dir: Some(self.settings.journal_dir.clone()),
            ..Default::default()
        }
    }

    /// Registers a single-request upload and prints the server's answer.
    pub async fn request_upload(&self, path: &Path, tags: Vec<String>) -> anyhow::Result<()> {
        let begin = begin_request(path, tags)?;
        let resp = self.api.begin_simple(&begin).await?;
        print_json(&resp)
    }

    /// Single-request upload: the whole file goes out in one PUT.
    pub async fn upload(&self, path: &Path, tags: Vec<String>) -> anyhow::Result<()> {
        let begin = begin_request(path, tags)?;
        let resp = self.api.begin_simple(&begin).await?;
        let etag = self
            .storage
            .put_file(&resp.presigned_url, &resp.headers, path)
            .await
            .with_context(|| format!("uploading {}", path.display()))?;
        info!(file_id = %resp.file_id, bytes = begin.size_bytes, "file uploaded");
        print_json(&serde_json::json!({ "file_id": resp.file_id, "etag": etag }))
    }

    /// Opens a multipart session and prints it without sending any part.
    pub async fn request_multipart(&self, path: &Path, tags: Vec<String>) -> anyhow::Result<()> {
        let begin = begin_request(path, tags)?;
        let resp = self.api.begin_multipart(&begin).await?;
        print_json(&resp)
    }

    pub async fn upload_multipart(
        &self,
        path: &Path,
        tags: Vec<String>,
        concurrency: Option<usize>,
        stop_after: Option<u32>,
    ) -> anyhow::Result<()> {
        let request = UploadRequest::from_path(path, tags);
        let options = self.options(concurrency, stop_after.map(HaltAfter::Parts));
        let outcome = self.run(&request, None, &options).await?;
        print_outcome(&outcome)
    }

    /// Continues a session named on the command line or found in the journal.
    pub async fn resume(
        &self,
        path: &Path,
        session: Option<String>,
        part_size: Option<u64>,
        concurrency: Option<usize>,
    ) -> anyhow::Result<()> {
        let request = UploadRequest::from_path(path, Vec::new());
        let target = match (session, part_size) {
            (Some(session_id), Some(part_size)) => {
                let target = ResumeTarget::new(session_id, part_size);
                match self.saved_size(&target.session_id) {
                    Some(size) => target.with_object_size(size),
                    None => target,
                }
            }
            _ => {
                let journal =
                    SessionJournal::find_latest(&self.settings.journal_dir, &request.filename)?
                        .ok_or_else(|| {
                            anyhow!(
                                "no saved session for {}; pass --session and --part-size",
                                request.filename
                            )
                        })?;
                info!(session = %journal.session_id, "resuming saved session");
                ResumeTarget::new(journal.session_id, journal.part_size)
                    .with_object_size(journal.object_size)
            }
        };

        let options = self.options(concurrency, None);
        let outcome = self.run(&request, Some(&target), &options).await?;
        print_outcome(&outcome)
    }

    /// Uploads part of a file, lists what the server holds, then resumes.
    pub async fn test_resume_flow(
        &self,
        path: &Path,
        tags: Vec<String>,
        stop_after: Option<u32>,
    ) -> anyhow::Result<()> {
        let request = UploadRequest::from_path(path, tags);
        let halt = stop_after.map_or(HaltAfter::Half, HaltAfter::Parts);

        println!("step 1: upload until {halt:?}");
        let outcome = self
            .run(&request, None, &self.options(None, Some(halt)))
            .await?;
        let (session_id, part_size) = match outcome {
            UploadOutcome::Halted {
                session_id,
                part_size,
                transferred,
                remaining,
            } => {
                println!("  halted: {transferred} parts sent, {remaining} left");
                (session_id, part_size)
            }
            completed @ UploadOutcome::Completed { .. } => {
                println!("  nothing left to resume");
                return print_outcome(&completed);
            }
        };

        println!("step 2: list parts held for {session_id}");
        let listed = collect_confirmed(&self.api, &session_id, 1000).await?;
        let numbers: Vec<u32> = listed.iter().map(|p| p.part_number).collect();
        println!("  server holds {} parts: {numbers:?}", numbers.len());

        println!("step 3: resume");
        let mut target = ResumeTarget::new(session_id, part_size);
        if let Some(size) = self.saved_size(&target.session_id) {
            target = target.with_object_size(size);
        }
        let outcome = self
            .run(&request, Some(&target), &self.options(None, None))
            .await?;
        print_outcome(&outcome)
    }

    /// Sends part 1 with its last byte altered after authorizing the true
    /// checksum, and reports whether storage caught it.
    pub async fn test_bad_checksum(&self, path: &Path, tags: Vec<String>) -> anyhow::Result<()> {
        let begin = begin_request(path, tags)?;
        let session = self.api.begin_multipart(&begin).await?;
        println!(
            "session {} opened, part size {}",
            session.session_id, session.part_size
        );

        let mut part = PartReader::open(path, session.part_size)?
            .next_part()?
            .ok_or_else(|| anyhow!("{} is empty, nothing to corrupt", path.display()))?;
        let checksum = part.checksum();
        let request = PartRequest {
            part_number: part.part_number,
            checksum: checksum.clone(),
            content_length: part.len(),
        };
        let destination = self
            .api
            .authorize_parts(&session.session_id, &[request])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no destination returned for part 1"))?;

        if let Some(last) = part.data.last_mut() {
            *last = last.wrapping_add(1);
        }
        println!("authorized part 1 with checksum {checksum}, sending altered bytes");

        match self.storage.put(&destination.presigned_url, &destination.headers, part.data).await {
            Err(StorageError::IntegrityRejected { status, body }) => {
                println!("storage rejected the corrupted part ({status}): integrity check works");
                info!(status, body = %body, "integrity rejection");
                Ok(())
            }
            Err(other) => Err(anyhow::Error::new(other)
                .context("part 1 failed for a reason other than its checksum")),
            Ok(etag) => bail!("storage accepted the corrupted part (etag {etag})"),
        }
    }

    /// Prints pages of confirmed parts, following markers with `auto`.
    pub async fn list_parts(
        &self,
        session_id: &str,
        nb_parts: u32,
        marker: Option<u32>,
        auto: bool,
    ) -> anyhow::Result<()> {
        let mut marker = marker
            .filter(|m| *m > 0)
            .map_or(PartsMarker::Start, PartsMarker::After);
        loop {
            let page = self
                .api
                .list_parts_page(session_id, nb_parts, marker)
                .await?;
            print_json(&page)?;
            if !auto {
                return Ok(());
            }
            match marker.advance(page.parts_marker, page.parts.len()) {
                Continuation::Next(next) => marker = next,
                Continuation::Exhausted => return Ok(()),
            }
        }
    }

    /// Prints file info with the download URL rewritten for this host.
    pub async fn get(&self, file_id: &str) -> anyhow::Result<()> {
        let mut info = self.api.file_info(file_id).await?;
        info.url = self.storage.resolve(&info.url)?.url.to_string();
        print_json(&info)
    }

    pub async fn download(&self, file_id: &str, output: Option<PathBuf>) -> anyhow::Result<()> {
        let info = self.api.file_info(file_id).await?;
        let dest = output.unwrap_or_else(|| default_download_path(&info.filename));
        let bytes = self
            .storage
            .download(&info.url, &dest)
            .await
            .with_context(|| format!("downloading {file_id}"))?;
        println!("downloaded {bytes} bytes to {}", dest.display());
        Ok(())
    }

    /// Object size recorded in the journal for `session_id`, if one exists.
    fn saved_size(&self, session_id: &str) -> Option<u64> {
        let path = SessionJournal::path_in(&self.settings.journal_dir, session_id);
        if !path.exists() {
            return None;
        }
        match SessionJournal::load(&path) {
            Ok(journal) => Some(journal.object_size),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable journal");
                None
            }
        }
    }

    /// Runs one orchestrated upload or resume with progress logging and
    /// Ctrl-C cancellation.
    async fn run(
        &self,
        request: &UploadRequest,
        resume: Option<&ResumeTarget>,
        options: &UploadOptions,
    ) -> Result<UploadOutcome, UploadError> {
        let mut orch = UploadOrchestrator::new(
            Arc::new(self.api.clone()),
            Arc::new(self.storage.clone()),
        );
        let watcher = orch.take_events().map(|rx| tokio::spawn(progress::watch(rx)));

        let cancel = orch.cancel_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling upload");
                cancel.cancel();
            }
        });

        let result = match resume {
            Some(target) => orch.resume(request, target, options).await,
            None => orch.upload(request, options).await,
        };

        interrupt.abort();
        drop(orch);
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }
        result
    }
}

/// Begin request for `path`: size and whole-file checksum read from disk.
fn begin_request(path: &Path, tags: Vec<String>) -> anyhow::Result<BeginUploadRequest> {
    let request = UploadRequest::from_path(path, tags);
    let size = std::fs::metadata(path)
        .with_context(|| format!("reading {}", path.display()))?
        .len();
    let checksum = calculate_file_checksum(path)?;
    Ok(BeginUploadRequest {
        filename: request.filename,
        content_type: request.content_type,
        size_bytes: size,
        checksum_sha256: checksum,
        tags: request.tags,
    })
}

/// `downloaded_<name>` in the working directory, ignoring any directories
/// the server put in the name.
fn default_download_path(filename: &str) -> PathBuf {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "file".into());
    PathBuf::from(format!("downloaded_{name}"))
}

fn print_outcome(outcome: &UploadOutcome) -> anyhow::Result<()> {
    match outcome {
        UploadOutcome::Completed {
            session_id,
            file_id,
            parts,
        } => print_json(&serde_json::json!({
            "status": "completed",
            "session_id": session_id,
            "file_id": file_id,
            "parts": parts,
        })),
        UploadOutcome::Halted {
            session_id,
            part_size,
            transferred,
            remaining,
        } => {
            print_json(&serde_json::json!({
                "status": "halted",
                "session_id": session_id,
                "part_size": part_size,
                "transferred": transferred,
                "remaining": remaining,
            }))?;
            eprintln!(
                "resume with: scoreplay file resume <path> --session {session_id} --part-size {part_size}"
            );
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
