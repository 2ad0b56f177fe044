use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{CompletedPart, ListedPart, PartRequest, PresignedPart, null_as_default};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts an upload. Shared by the simple and multipart endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginUploadRequest {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Base64 SHA-256 of the whole object.
    pub checksum_sha256: String,
    pub tags: Vec<String>,
}

/// Requests transfer authorization for one or more parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizePartsRequest {
    pub parts: Vec<PartRequest>,
}

/// Finalizes a multipart session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMultipartRequest {
    pub parts: Vec<CompletedPart>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Acknowledges a multipart session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginMultipartResponse {
    pub session_id: String,
    pub part_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

/// Acknowledges a simple upload with its single destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginSimpleResponse {
    pub file_id: String,
    pub presigned_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Authorized destinations, one per requested part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizePartsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub presigned_parts: Vec<PresignedPart>,
}

/// One page of server-confirmed parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPartsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub parts: Vec<ListedPart>,
    /// Raw marker as sent by the server. See [`crate::PartsMarker::advance`].
    #[serde(default)]
    pub parts_marker: Option<i64>,
}

/// Identifier of the finalized object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMultipartResponse {
    pub file_id: String,
}

/// Download information for a stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfoResponse {
    pub filename: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}
