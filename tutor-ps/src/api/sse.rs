//! Server-Sent Events (SSE) stream
//!
//! Streams per-session tutoring events to the connected client. A new
//! subscription for a session preempts any previous one: the tutoring
//! UI is single-client per session, and the freshest connection wins.

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::api::server::AppContext;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    session_id: String,
}

/// GET /api/events?session_id= - SSE event stream for one session
pub async fn event_stream(
    State(ctx): State<AppContext>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(session_id = %query.session_id, "New SSE client connected");

    let rx = ctx.deps.channel.subscribe(&query.session_id);

    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.event_name()).data(json))),
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                // Lagged receiver: oldest events were dropped, keep going
                warn!("SSE stream error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
