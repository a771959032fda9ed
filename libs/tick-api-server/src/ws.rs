use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::SinkExt;
use tokio::sync::mpsc;

use tick_api::Payload;
use tick_engine::{Engine, Subscription};

use super::AppState;

/// Upper bound on frames fed before a flush.
const MAX_FLUSH_BATCH: usize = 256;

// ═══════════════════════════════════════════════════════════════
//  WebSocket: /ws
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(socket, state.engine))
}

async fn ws_connection(mut socket: WebSocket, engine: Engine) {
    let Subscription { id, mut rx } = engine.subscribe();

    loop {
        tokio::select! {
            biased;

            msg = socket.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = id, error = %e, "ws read failed");
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => engine.handle_client_message(id, text.as_str()),
                    Message::Close(_) => break,
                    _ => continue,
                }
            }

            payload = rx.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = forward(&mut socket, &mut rx, payload).await {
                    tracing::debug!(connection_id = id, error = %e, "ws write failed");
                    break;
                }
            }
        }
    }

    engine.unsubscribe(id);
}

/// Write `first` plus whatever is already queued, then flush once.
async fn forward(
    socket: &mut WebSocket,
    rx: &mut mpsc::UnboundedReceiver<Payload>,
    first: Payload,
) -> Result<(), axum::Error> {
    let mut next = Some(first);
    let mut fed = 0;
    while let Some(payload) = next.take() {
        if let Some(frame) = to_frame(payload) {
            socket.feed(frame).await?;
        }
        fed += 1;
        if fed < MAX_FLUSH_BATCH {
            next = rx.try_recv().ok();
        }
    }
    socket.flush().await
}

fn to_frame(payload: Payload) -> Option<Message> {
    match payload {
        Payload::Binary(bytes) => Some(Message::Binary(bytes)),
        Payload::Text(bytes) => match Utf8Bytes::try_from(bytes) {
            Ok(text) => Some(Message::Text(text)),
            Err(e) => {
                tracing::warn!(error = %e, "dropping non-utf8 text payload");
                None
            }
        },
    }
}
