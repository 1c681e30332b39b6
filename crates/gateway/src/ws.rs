//! WebSocket event streaming.

use std::sync::Arc;

use {
    axum::{
        extract::{
            Query, State,
            ws::{Message, WebSocket, WebSocketUpgrade},
        },
        response::Response,
    },
    serde::Deserialize,
    tokio::sync::broadcast,
    tracing::{debug, warn},
};

use courier_events::resolve_event_names;

use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Comma-separated event names, `*` for everything. Defaults to
    /// everything.
    events: Option<String>,
}

/// Upgrade handler for `GET /ws`.
pub async fn events_ws(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state, query))
}

async fn stream_events(mut socket: WebSocket, state: Arc<AppState>, query: EventsQuery) {
    let requested: Vec<String> = query
        .events
        .map(|list| list.split(',').map(|s| s.trim().to_owned()).collect())
        .unwrap_or_else(|| vec!["*".into()]);

    let resolved = match resolve_event_names(&requested) {
        Ok(resolved) => resolved,
        Err(e) => {
            let _ = socket
                .send(Message::Text(
                    serde_json::json!({ "error": e.to_string() }).to_string().into(),
                ))
                .await;
            return;
        },
    };

    let mut events = state.manager.subscribe_events();
    debug!(filters = resolved.len(), "event stream client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                // Clients only ever close or ping; either way nothing to do.
                Some(Ok(_)) => {},
                Some(Err(_)) | None => break,
            },
            event = events.recv() => match event {
                Ok(event) if resolved.contains(&event.event_type) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                },
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream client lagged");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("event stream client disconnected");
}
