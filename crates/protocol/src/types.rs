use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Highest part number an object store accepts in one multipart upload.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// One part the client asks to be authorized for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRequest {
    pub part_number: u32,
    /// Base64 SHA-256 of the part bytes.
    pub checksum: String,
    pub content_length: u64,
}

/// Transfer authorization for one part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignedPart {
    pub part_number: u32,
    pub presigned_url: String,
    /// Headers the storage backend expects on the PUT (signed with the URL).
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A part the server reports as durably received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedPart {
    pub part_number: u32,
    pub etag: String,
}

/// One entry of the completion payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
    pub checksum: String,
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Position sent with a part-listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartsMarker {
    /// First page; no marker is sent.
    #[default]
    Start,
    /// List parts strictly after this part number.
    After(u32),
}

/// What a listing response says about the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Next(PartsMarker),
    Exhausted,
}

impl PartsMarker {
    /// Value of the `marker` query parameter, if any.
    pub fn query_value(self) -> Option<u32> {
        match self {
            PartsMarker::Start => None,
            PartsMarker::After(n) => Some(n),
        }
    }

    /// Interprets the marker a server returned for a page requested at `self`.
    ///
    /// Absent, zero and negative markers all end the listing, since part
    /// numbers start at 1. A marker that does not move past the one we sent
    /// also ends it, as does an empty page.
    pub fn advance(self, returned: Option<i64>, page_len: usize) -> Continuation {
        if page_len == 0 {
            return Continuation::Exhausted;
        }
        let Some(raw) = returned else {
            return Continuation::Exhausted;
        };
        let Ok(next) = u32::try_from(raw) else {
            return Continuation::Exhausted;
        };
        if next == 0 || next > MAX_PART_NUMBER {
            return Continuation::Exhausted;
        }
        if let PartsMarker::After(prev) = self
            && next <= prev
        {
            return Continuation::Exhausted;
        }
        Continuation::Next(PartsMarker::After(next))
    }
}

/// Accepts `null` where an empty list or map is expected.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
