//! Server-Sent Events for live attendance dashboards

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use ua_common::sse::event_bus_sse_stream;

/// GET /api/events
///
/// Streams `ScanRecorded`, `WarningEscalated` and `AbsencesMarked`.
pub async fn event_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_bus_sse_stream(&state.event_bus, "ua-at")
}
