//! Direct transfers to and from the storage backend through presigned URLs.

use std::collections::HashMap;
use std::path::Path;

use reqwest::Body;
use reqwest::header::{CONTENT_LENGTH, ETAG, HOST};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::StorageError;
use crate::rewrite::{HostRewrite, ResolvedUrl};

/// Error codes object stores use when the bytes do not match the declared
/// checksum.
const DIGEST_ERROR_CODES: &[&str] = &[
    "BadDigest",
    "InvalidDigest",
    "XAmzContentChecksumMismatch",
    "XAmzContentSHA256Mismatch",
];

/// Storage backend client.
#[derive(Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    rewrite: HostRewrite,
}

impl StorageClient {
    pub fn new(config: &ClientConfig) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(config.transfer_timeout)
            .build()?;
        Ok(Self {
            http,
            rewrite: config.host_rewrite(),
        })
    }

    /// Replaces the destination rewrite rule.
    pub fn with_rewrite(mut self, rewrite: HostRewrite) -> Self {
        self.rewrite = rewrite;
        self
    }

    /// Resolves a presigned URL through the rewrite rule.
    pub fn resolve(&self, url: &str) -> Result<ResolvedUrl, StorageError> {
        self.rewrite.resolve(url)
    }

    /// Uploads `body` to a presigned destination and returns the storage
    /// token (ETag without quotes).
    pub async fn put(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: Vec<u8>,
    ) -> Result<String, StorageError> {
        let len = body.len() as u64;
        self.send_put(url, headers, Body::from(body), len).await
    }

    /// Streams the file at `path` to a presigned destination without
    /// loading it into memory. Returns the storage token.
    pub async fn put_file(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        path: &Path,
    ) -> Result<String, StorageError> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let body = Body::wrap_stream(ReaderStream::new(file));
        self.send_put(url, headers, body, len).await
    }

    async fn send_put(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: Body,
        len: u64,
    ) -> Result<String, StorageError> {
        let target = self.resolve(url)?;

        // Presigned PUTs need an explicit length; chunked bodies are refused.
        let mut req = self
            .http
            .put(target.url.clone())
            .header(CONTENT_LENGTH, len)
            .body(body);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(host) = &target.host_header {
            req = req.header(HOST, host.as_str());
        }

        let resp = req.send().await?;
        let status = resp.status();
        debug!(url = %target.url, bytes = len, status = status.as_u16(), "storage PUT");

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_rejection(status.as_u16(), body));
        }

        resp.headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
            .ok_or(StorageError::MissingEtag)
    }

    /// Streams the object at `url` into `dest`. Returns bytes written.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, StorageError> {
        let target = self.resolve(url)?;
        let mut req = self.http.get(target.url.clone());
        if let Some(host) = &target.host_header {
            req = req.header(HOST, host.as_str());
        }

        let mut resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(url = %target.url, bytes = written, path = %dest.display(), "download complete");
        Ok(written)
    }
}

/// Maps a non-2xx storage response to an error, singling out checksum
/// mismatches.
pub fn classify_rejection(status: u16, body: String) -> StorageError {
    if status == 400 && DIGEST_ERROR_CODES.iter().any(|code| body.contains(code)) {
        StorageError::IntegrityRejected { status, body }
    } else {
        StorageError::Rejected { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockResponse, serve};
    use tempfile::TempDir;

    fn client() -> StorageClient {
        StorageClient::new(&ClientConfig::default())
            .unwrap()
            .with_rewrite(HostRewrite::None)
    }

    fn empty(status: u16) -> MockResponse {
        MockResponse {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn classify_digest_errors() {
        let body = "<Error><Code>XAmzContentChecksumMismatch</Code></Error>".to_string();
        assert!(matches!(
            classify_rejection(400, body),
            StorageError::IntegrityRejected { status: 400, .. }
        ));
        assert!(matches!(
            classify_rejection(400, "<Code>BadDigest</Code>".into()),
            StorageError::IntegrityRejected { .. }
        ));
    }

    #[test]
    fn classify_other_errors() {
        assert!(matches!(
            classify_rejection(403, "<Code>SignatureDoesNotMatch</Code>".into()),
            StorageError::Rejected { status: 403, .. }
        ));
        assert!(matches!(
            classify_rejection(400, "<Code>InvalidArgument</Code>".into()),
            StorageError::Rejected { status: 400, .. }
        ));
        // Digest code with a non-400 status is not an integrity rejection.
        assert!(matches!(
            classify_rejection(500, "BadDigest".into()),
            StorageError::Rejected { status: 500, .. }
        ));
    }

    #[tokio::test]
    async fn put_returns_unquoted_etag() {
        let (url, handle) = serve(vec![empty(200).with_header("ETag", "\"abc123\"")]).await;

        let mut headers = HashMap::new();
        headers.insert("x-amz-checksum-sha256".to_string(), "c3Vt".to_string());
        let etag = client()
            .put(&format!("{url}/bucket/key?partNumber=1"), &headers, b"DATA".to_vec())
            .await
            .unwrap();
        assert_eq!(etag, "abc123");

        let reqs = handle.await.unwrap();
        assert_eq!(reqs[0].method, "PUT");
        assert_eq!(reqs[0].target, "/bucket/key?partNumber=1");
        assert_eq!(reqs[0].body, b"DATA");
        assert_eq!(reqs[0].header("x-amz-checksum-sha256"), Some("c3Vt"));
    }

    #[tokio::test]
    async fn put_rewrites_authority_and_sends_original_host() {
        let (url, handle) = serve(vec![empty(200).with_header("ETag", "e")]).await;
        let authority = url.trim_start_matches("http://").to_string();

        let storage = client().with_rewrite(HostRewrite::Authority(authority));
        storage
            .put("http://minio:9000/bucket/key", &HashMap::new(), b"x".to_vec())
            .await
            .unwrap();

        let reqs = handle.await.unwrap();
        assert_eq!(reqs[0].header("host"), Some("minio:9000"));
    }

    #[tokio::test]
    async fn put_file_streams_with_length() {
        let (url, handle) = serve(vec![empty(200).with_header("ETag", "\"whole\"")]).await;
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.bin");
        std::fs::write(&path, &payload).unwrap();

        let etag = client()
            .put_file(&format!("{url}/bucket/clip.bin"), &HashMap::new(), &path)
            .await
            .unwrap();
        assert_eq!(etag, "whole");

        let reqs = handle.await.unwrap();
        assert_eq!(reqs[0].header("content-length"), Some("200000"));
        assert_eq!(reqs[0].header("transfer-encoding"), None);
        assert_eq!(reqs[0].body, payload);
    }

    #[tokio::test]
    async fn put_file_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = client()
            .put_file("http://127.0.0.1:9/b/k", &HashMap::new(), &dir.path().join("gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[tokio::test]
    async fn put_missing_etag_fails() {
        let (url, handle) = serve(vec![empty(200)]).await;
        let err = client()
            .put(&format!("{url}/b/k"), &HashMap::new(), b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingEtag));
        handle.abort();
    }

    #[tokio::test]
    async fn put_checksum_mismatch_is_integrity_rejection() {
        let body = "<?xml version=\"1.0\"?><Error><Code>XAmzContentChecksumMismatch</Code></Error>";
        let (url, handle) = serve(vec![MockResponse {
            status: 400,
            headers: vec![("Content-Type".into(), "application/xml".into())],
            body: body.as_bytes().to_vec(),
        }])
        .await;

        let err = client()
            .put(&format!("{url}/b/k"), &HashMap::new(), b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::IntegrityRejected { status: 400, .. }));
        handle.abort();
    }

    #[tokio::test]
    async fn put_forbidden_is_plain_rejection() {
        let (url, handle) = serve(vec![MockResponse::json(403, "denied")]).await;
        let err = client()
            .put(&format!("{url}/b/k"), &HashMap::new(), b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected { status: 403, .. }));
        handle.abort();
    }

    #[tokio::test]
    async fn download_writes_file() {
        let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 256) as u8).collect();
        let (url, handle) = serve(vec![MockResponse {
            status: 200,
            headers: Vec::new(),
            body: payload.clone(),
        }])
        .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("downloaded_clip.bin");
        let n = client().download(&format!("{url}/b/clip"), &dest).await.unwrap();
        assert_eq!(n, payload.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn download_error_status() {
        let (url, handle) = serve(vec![MockResponse::json(404, "missing")]).await;
        let dir = TempDir::new().unwrap();
        let err = client()
            .download(&format!("{url}/b/clip"), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected { status: 404, .. }));
        assert!(!dir.path().join("x").exists());
        handle.abort();
    }
}
