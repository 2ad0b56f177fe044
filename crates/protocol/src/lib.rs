//! Wire types for the file control-plane API.
//!
//! Field names follow the server's snake_case JSON. Anything the server may
//! send as `null` is accepted and mapped to an empty value.

pub mod messages;
pub mod types;

pub use messages::{
    AuthorizePartsRequest, AuthorizePartsResponse, BeginMultipartResponse, BeginSimpleResponse,
    BeginUploadRequest, CompleteMultipartRequest, CompleteMultipartResponse, FileInfoResponse,
    ListPartsResponse,
};
pub use types::{
    CompletedPart, Continuation, ListedPart, MAX_PART_NUMBER, PartRequest, PartsMarker,
    PresignedPart,
};
