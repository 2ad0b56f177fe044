//! Control-plane API client.
//!
//! Async HTTP client using `reqwest` against the file service's JSON API.
//! Read-only and re-authorizing calls go through the retry policy; calls
//! that create or finalize server state are made once.

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use scoreplay_protocol::{
    AuthorizePartsRequest, AuthorizePartsResponse, BeginMultipartResponse, BeginSimpleResponse,
    BeginUploadRequest, CompleteMultipartRequest, CompleteMultipartResponse, CompletedPart,
    FileInfoResponse, ListPartsResponse, PartRequest, PartsMarker, PresignedPart,
};

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::retry::RetryPolicy;

/// Control-plane API client.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            retry: config.retry.clone(),
        })
    }

    /// Sets a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends one request and decodes a JSON success body.
    async fn send<B, R>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method.clone(), &url).query(query);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        debug!(%method, path, status = status.as_u16(), "control-plane response");

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Opens a multipart session for an object.
    pub async fn begin_multipart(
        &self,
        req: &BeginUploadRequest,
    ) -> Result<BeginMultipartResponse, ApiError> {
        self.send(Method::POST, "/file/upload/multipart", &[], Some(req))
            .await
    }

    /// Registers a single-request upload and returns its destination.
    pub async fn begin_simple(
        &self,
        req: &BeginUploadRequest,
    ) -> Result<BeginSimpleResponse, ApiError> {
        self.send(Method::POST, "/file/upload", &[], Some(req)).await
    }

    /// Requests presigned destinations for `parts`.
    ///
    /// Fails if the response omits any requested part.
    pub async fn authorize_parts(
        &self,
        session_id: &str,
        parts: &[PartRequest],
    ) -> Result<Vec<PresignedPart>, ApiError> {
        let path = format!("/file/upload/multipart/{session_id}/parts");
        let body = AuthorizePartsRequest {
            parts: parts.to_vec(),
        };
        let resp: AuthorizePartsResponse = self
            .retry
            .run("authorize_parts", || {
                self.send(Method::POST, &path, &[], Some(&body))
            })
            .await?;

        if let Some(missing) = parts.iter().find(|p| {
            !resp
                .presigned_parts
                .iter()
                .any(|a| a.part_number == p.part_number)
        }) {
            return Err(ApiError::MissingAuthorization(missing.part_number));
        }
        Ok(resp.presigned_parts)
    }

    /// Fetches one page of parts the server holds for a session.
    pub async fn list_parts_page(
        &self,
        session_id: &str,
        page_size: u32,
        marker: PartsMarker,
    ) -> Result<ListPartsResponse, ApiError> {
        let path = format!("/file/upload/multipart/{session_id}/parts");
        let mut query = vec![("nb_parts", page_size.to_string())];
        if let Some(m) = marker.query_value() {
            query.push(("marker", m.to_string()));
        }
        self.retry
            .run("list_parts", || {
                self.send::<(), _>(Method::GET, &path, &query, None)
            })
            .await
    }

    /// Finalizes a session and returns the file identifier.
    pub async fn complete(
        &self,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String, ApiError> {
        let path = format!("/file/upload/multipart/{session_id}/complete");
        let body = CompleteMultipartRequest {
            parts: parts.to_vec(),
        };
        let resp: CompleteMultipartResponse =
            self.send(Method::POST, &path, &[], Some(&body)).await?;
        Ok(resp.file_id)
    }

    /// Returns download information for a stored file.
    pub async fn file_info(&self, file_id: &str) -> Result<FileInfoResponse, ApiError> {
        let path = format!("/file/{file_id}/");
        self.retry
            .run("file_info", || {
                self.send::<(), _>(Method::GET, &path, &[], None)
            })
            .await
    }
}
