//! Seams between the orchestrator and the network.
//!
//! `ControlPlane` and `PartTransport` are implemented here for the HTTP
//! clients. Tests substitute in-memory fakes.

use std::future::Future;
use std::pin::Pin;

use scoreplay_api::{ApiClient, ApiError, StorageClient, StorageError};
use scoreplay_protocol::{
    BeginMultipartResponse, BeginUploadRequest, CompletedPart, ListPartsResponse, PartRequest,
    PartsMarker, PresignedPart,
};

/// Boxed future returned by the seam traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Session-level operations against the control plane.
pub trait ControlPlane: Send + Sync {
    fn begin_session(
        &self,
        req: &BeginUploadRequest,
    ) -> BoxFuture<'_, Result<BeginMultipartResponse, ApiError>>;

    /// Returns one destination per requested part.
    fn authorize_parts(
        &self,
        session_id: &str,
        parts: &[PartRequest],
    ) -> BoxFuture<'_, Result<Vec<PresignedPart>, ApiError>>;

    fn list_confirmed_parts(
        &self,
        session_id: &str,
        page_size: u32,
        marker: PartsMarker,
    ) -> BoxFuture<'_, Result<ListPartsResponse, ApiError>>;

    /// Finalizes the session. `parts` is ordered by part number.
    fn complete_session(
        &self,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> BoxFuture<'_, Result<String, ApiError>>;
}

/// Moves part bytes to an authorized destination.
pub trait PartTransport: Send + Sync {
    /// Returns the storage token for the accepted bytes.
    fn put_part(
        &self,
        destination: &PresignedPart,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<String, StorageError>>;
}

impl ControlPlane for ApiClient {
    fn begin_session(
        &self,
        req: &BeginUploadRequest,
    ) -> BoxFuture<'_, Result<BeginMultipartResponse, ApiError>> {
        let req = req.clone();
        Box::pin(async move { self.begin_multipart(&req).await })
    }

    fn authorize_parts(
        &self,
        session_id: &str,
        parts: &[PartRequest],
    ) -> BoxFuture<'_, Result<Vec<PresignedPart>, ApiError>> {
        let session_id = session_id.to_string();
        let parts = parts.to_vec();
        Box::pin(async move { ApiClient::authorize_parts(self, &session_id, &parts).await })
    }

    fn list_confirmed_parts(
        &self,
        session_id: &str,
        page_size: u32,
        marker: PartsMarker,
    ) -> BoxFuture<'_, Result<ListPartsResponse, ApiError>> {
        let session_id = session_id.to_string();
        Box::pin(async move { self.list_parts_page(&session_id, page_size, marker).await })
    }

    fn complete_session(
        &self,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> BoxFuture<'_, Result<String, ApiError>> {
        let session_id = session_id.to_string();
        let parts = parts.to_vec();
        Box::pin(async move { self.complete(&session_id, &parts).await })
    }
}

impl PartTransport for StorageClient {
    fn put_part(
        &self,
        destination: &PresignedPart,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<String, StorageError>> {
        let url = destination.presigned_url.clone();
        let headers = destination.headers.clone();
        Box::pin(async move { self.put(&url, &headers, data).await })
    }
}
