//! Per-connection read and write pumps.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use common::EventMethod;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::protocol::{Action, ErrorFrame, FrameAction, InboundFrame, OutboundFrame};
use super::{Outbound, Registration, store};
use crate::error::AppError;
use crate::state::AppState;

/// Whether a WebSocket upgrade from `origin` may proceed.
///
/// Non-browser clients send no `Origin` and are accepted; `*` accepts any.
pub fn origin_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    match origin {
        None => true,
        Some(origin) => allowed
            .iter()
            .any(|a| a == "*" || a.trim_end_matches('/').eq_ignore_ascii_case(origin)),
    }
}

struct Session {
    state: AppState,
    room: String,
    user_id: String,
    id: Uuid,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

impl Session {
    /// Best-effort push to this session only.
    fn push(&self, text: String) -> bool {
        self.tx.try_send(Outbound::Frame(text.into())).is_ok()
    }

    fn push_error(&self, err: &AppError) {
        if let Ok(text) = serde_json::to_string(&ErrorFrame::from(err)) {
            self.push(text);
        }
    }
}

/// Drive one upgraded connection until either side ends it.
#[instrument(skip(socket, state), fields(session))]
pub async fn run(socket: WebSocket, state: AppState, room: String, user_id: String) {
    let chat = state.config.chat.clone();
    let (tx, rx) = mpsc::channel(chat.send_buffer);
    let cancel = CancellationToken::new();
    let session_id = Uuid::now_v7();
    tracing::Span::current().record("session", tracing::field::display(session_id));

    let (sink, stream) = socket.split();

    let session = Session {
        state,
        room,
        user_id,
        id: session_id,
        tx,
        cancel: cancel.clone(),
    };

    // History is queued before the session joins the room so live frames
    // always follow it.
    if !session.state.hub.is_stopped() {
        push_history(&session, chat.history_limit, Duration::from_secs(chat.history_timeout_secs)).await;
    }

    let registered = session.state.hub.register(Registration {
        room: session.room.clone(),
        session_id,
        user_id: session.user_id.clone(),
        tx: session.tx.clone(),
        cancel: cancel.clone(),
    });
    if registered.is_err() {
        warn!("Hub stopped, refusing session");
        let _ = session.tx.try_send(Outbound::Close);
        drop(session);
        write_pump(sink, rx, cancel, Duration::from_secs(chat.write_timeout_secs)).await;
        return;
    }
    info!(room = %session.room, user = %session.user_id, "Chat session opened");

    let writer = tokio::spawn(write_pump(
        sink,
        rx,
        cancel.clone(),
        Duration::from_secs(chat.write_timeout_secs),
    ));
    read_pump(&session, stream, Duration::from_secs(chat.read_timeout_secs)).await;

    session.cancel.cancel();
    session.state.hub.unregister(&session.room, session.id);
    let _ = writer.await;
    info!(room = %session.room, "Chat session closed");
}

/// Replay recent messages oldest-first. Items that do not fit are dropped.
async fn push_history(session: &Session, limit: u64, deadline: Duration) {
    let db = &session.state.db;
    let messages = match tokio::time::timeout(
        deadline,
        store::recent_messages(db, &session.room, limit),
    )
    .await
    {
        Ok(Ok(messages)) => messages,
        Ok(Err(e)) => {
            warn!(error = %e, "History query failed");
            return;
        }
        Err(_) => {
            warn!("History query timed out");
            return;
        }
    };

    let mut dropped = 0usize;
    for model in &messages {
        let frame = OutboundFrame::from_message(FrameAction::History, model);
        match frame.to_text() {
            Ok(text) => {
                if !session.push(text) {
                    dropped += 1;
                }
            }
            Err(_) => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, "History items dropped");
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    write_timeout: Duration,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = rx.recv() => item,
        };

        match next {
            Some(Outbound::Frame(text)) => {
                match tokio::time::timeout(write_timeout, sink.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "Write failed");
                        break;
                    }
                    Err(_) => {
                        warn!("Write deadline exceeded");
                        break;
                    }
                }
            }
            Some(Outbound::Close) => {
                send_close(&mut sink, write_timeout).await;
                break;
            }
            None => {
                // Cancelled: a pending Close from shutdown still goes out.
                while let Ok(item) = rx.try_recv() {
                    if matches!(item, Outbound::Close) {
                        send_close(&mut sink, write_timeout).await;
                        break;
                    }
                }
                break;
            }
        }
    }
    cancel.cancel();
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
}

async fn send_close(sink: &mut SplitSink<WebSocket, Message>, write_timeout: Duration) {
    let frame = CloseFrame {
        code: close_code::NORMAL,
        reason: "server shutting down".into(),
    };
    let _ = tokio::time::timeout(write_timeout, sink.send(Message::Close(Some(frame)))).await;
}

async fn read_pump(session: &Session, mut stream: SplitStream<WebSocket>, idle: Duration) {
    loop {
        let next = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => break,
            next = tokio::time::timeout(idle, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                debug!("Read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "Read failed");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => handle_inbound(session, text.as_str()).await,
            Message::Close(_) => break,
            // Pings are answered by the protocol layer.
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

/// Persist an inbound action, then broadcast it. Failures go back to the
/// sender only.
async fn handle_inbound(session: &Session, raw: &str) {
    let frame: InboundFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            session.push_error(&AppError::Validation(format!("Malformed frame: {e}")));
            return;
        }
    };

    let method = match frame.action {
        Action::Chat => EventMethod::Post,
        Action::Edit => EventMethod::Put,
        Action::Delete => EventMethod::Delete,
    };
    match apply(session, frame).await {
        Ok(out) => {
            session.state.events.chat_message(method, &out.room, &out.id);
            match out.to_text() {
                Ok(text) => session.state.hub.broadcast(&out.room, text),
                Err(e) => session.push_error(&e),
            }
        }
        Err(e) => {
            debug!(error = %e, "Inbound action rejected");
            session.push_error(&e);
        }
    }
}

async fn apply(session: &Session, frame: InboundFrame) -> Result<OutboundFrame, AppError> {
    let db = &session.state.db;
    let action = FrameAction::from(frame.action);
    let model = match frame.action {
        Action::Chat => {
            store::insert_message(
                db,
                &session.room,
                &session.user_id,
                frame.content.unwrap_or_default(),
                Vec::new(),
                frame.reply_to.as_deref(),
            )
            .await?
        }
        Action::Edit => {
            let id = required(frame.id, "id")?;
            let content = required(frame.content, "content")?;
            store::edit_message(db, &id, &session.user_id, content).await?
        }
        Action::Delete => {
            let id = required(frame.id, "id")?;
            store::delete_message(db, &id, &session.user_id).await?
        }
    };
    Ok(OutboundFrame::from_message(action, &model))
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Validation(format!("Field '{name}' is required")))
}
