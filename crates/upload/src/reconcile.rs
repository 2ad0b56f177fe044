//! Paging through the parts a server already holds for a session.

use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use tracing::debug;

use scoreplay_api::ApiError;
use scoreplay_protocol::{Continuation, ListPartsResponse, ListedPart, PartsMarker};

use crate::remote::ControlPlane;

/// Lazily fetches listing pages until the server's marker says to stop.
///
/// A request error is yielded once and ends the stream.
pub fn confirmed_pages<'a>(
    control: &'a dyn ControlPlane,
    session_id: &'a str,
    page_size: u32,
) -> impl Stream<Item = Result<ListPartsResponse, ApiError>> + Send + 'a {
    stream::unfold(Some(PartsMarker::Start), move |marker| async move {
        let marker = marker?;
        match control
            .list_confirmed_parts(session_id, page_size, marker)
            .await
        {
            Ok(page) => {
                let next = match marker.advance(page.parts_marker, page.parts.len()) {
                    Continuation::Next(m) => Some(m),
                    Continuation::Exhausted => None,
                };
                debug!(
                    session = %session_id,
                    parts = page.parts.len(),
                    marker = ?page.parts_marker,
                    more = next.is_some(),
                    "listed confirmed parts"
                );
                Some((Ok(page), next))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Every confirmed part across all pages, in server order.
pub fn confirmed_parts<'a>(
    control: &'a dyn ControlPlane,
    session_id: &'a str,
    page_size: u32,
) -> impl Stream<Item = Result<ListedPart, ApiError>> + Send + 'a {
    confirmed_pages(control, session_id, page_size).flat_map(|page| {
        let items: Vec<Result<ListedPart, ApiError>> = match page {
            Ok(page) => page.parts.into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        stream::iter(items)
    })
}

/// Drains [`confirmed_parts`] into a list.
pub async fn collect_confirmed(
    control: &dyn ControlPlane,
    session_id: &str,
    page_size: u32,
) -> Result<Vec<ListedPart>, ApiError> {
    confirmed_parts(control, session_id, page_size)
        .try_collect()
        .await
}
