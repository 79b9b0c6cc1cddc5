//! Real-time chat hub.
//!
//! A single [`Scheduler`] task owns the `room -> sessions` map. Everything
//! else talks to it through the [`Hub`] handle, whose register, unregister
//! and broadcast streams are unbounded so callers never block on the
//! scheduler. Per-session delivery is a non-blocking push into the session's
//! bounded buffer; a full buffer evicts the session.

pub mod protocol;
pub mod session;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::Cache;

/// Item in a session's send buffer.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Utf8Bytes),
    /// Send a normal-closure frame and end the write pump.
    Close,
}

/// A live session joining a room.
#[derive(Debug)]
pub struct Registration {
    pub room: String,
    pub session_id: Uuid,
    pub user_id: String,
    pub tx: mpsc::Sender<Outbound>,
    pub cancel: CancellationToken,
}

struct Unregistration {
    room: String,
    session_id: Uuid,
}

struct Broadcast {
    room: String,
    frame: Utf8Bytes,
}

#[derive(Debug, thiserror::Error)]
#[error("chat hub is stopped")]
pub struct HubStopped;

/// Cloneable handle to the scheduler.
#[derive(Clone)]
pub struct Hub {
    register_tx: UnboundedSender<Registration>,
    unregister_tx: UnboundedSender<Unregistration>,
    broadcast_tx: UnboundedSender<Broadcast>,
    stop: CancellationToken,
}

impl Hub {
    pub fn new(cache: Arc<Cache>) -> (Hub, Scheduler) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let hub = Hub {
            register_tx,
            unregister_tx,
            broadcast_tx,
            stop: stop.clone(),
        };
        let scheduler = Scheduler {
            register_rx,
            unregister_rx,
            broadcast_rx,
            stop,
            rooms: HashMap::new(),
            cache,
        };
        (hub, scheduler)
    }

    pub fn register(&self, registration: Registration) -> Result<(), HubStopped> {
        if self.stop.is_cancelled() {
            return Err(HubStopped);
        }
        self.register_tx.send(registration).map_err(|_| HubStopped)
    }

    pub fn unregister(&self, room: &str, session_id: Uuid) {
        let _ = self.unregister_tx.send(Unregistration {
            room: room.to_string(),
            session_id,
        });
    }

    /// Queue `frame` for every session in `room`. Dropped once stopped.
    pub fn broadcast(&self, room: &str, frame: impl Into<Utf8Bytes>) {
        let _ = self.broadcast_tx.send(Broadcast {
            room: room.to_string(),
            frame: frame.into(),
        });
    }

    /// Close every session and end the scheduler. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

struct SessionHandle {
    user_id: String,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

/// Owner of the rooms map. Drive it with [`Scheduler::run`].
pub struct Scheduler {
    register_rx: UnboundedReceiver<Registration>,
    unregister_rx: UnboundedReceiver<Unregistration>,
    broadcast_rx: UnboundedReceiver<Broadcast>,
    stop: CancellationToken,
    rooms: HashMap<String, HashMap<Uuid, SessionHandle>>,
    cache: Arc<Cache>,
}

impl Scheduler {
    pub async fn run(mut self) {
        info!("Chat hub started");
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                Some(reg) = self.register_rx.recv() => self.on_register(reg),
                Some(unreg) = self.unregister_rx.recv() => {
                    self.on_unregister(&unreg.room, unreg.session_id);
                }
                Some(msg) = self.broadcast_rx.recv() => self.on_broadcast(msg),
            }
        }
        self.shutdown();
    }

    fn on_register(&mut self, reg: Registration) {
        debug!(room = %reg.room, session = %reg.session_id, user = %reg.user_id, "Session registered");
        self.cache.mark_online(&reg.user_id);
        self.rooms.entry(reg.room).or_default().insert(
            reg.session_id,
            SessionHandle {
                user_id: reg.user_id,
                tx: reg.tx,
                cancel: reg.cancel,
            },
        );
    }

    /// Remove a session; no-op when it was already evicted.
    fn on_unregister(&mut self, room: &str, session_id: Uuid) -> Option<SessionHandle> {
        let sessions = self.rooms.get_mut(room)?;
        let handle = sessions.remove(&session_id)?;
        if sessions.is_empty() {
            self.rooms.remove(room);
        }
        self.cache.mark_offline(&handle.user_id);
        handle.cancel.cancel();
        debug!(room, session = %session_id, "Session unregistered");
        Some(handle)
    }

    #[instrument(skip(self, msg), fields(room = %msg.room))]
    fn on_broadcast(&mut self, msg: Broadcast) {
        let Some(sessions) = self.rooms.get(&msg.room) else {
            return;
        };

        let mut dead = Vec::new();
        for (id, handle) in sessions {
            match handle.tx.try_send(Outbound::Frame(msg.frame.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(session = %id, user = %handle.user_id, "Send buffer full, evicting slow session");
                    dead.push(*id);
                }
                Err(TrySendError::Closed(_)) => dead.push(*id),
            }
        }
        for id in dead {
            self.on_unregister(&msg.room, id);
        }
    }

    fn shutdown(&mut self) {
        let rooms = std::mem::take(&mut self.rooms);
        let mut closed = 0usize;
        for (_, sessions) in rooms {
            for (_, handle) in sessions {
                let _ = handle.tx.try_send(Outbound::Close);
                handle.cancel.cancel();
                self.cache.mark_offline(&handle.user_id);
                closed += 1;
            }
        }
        self.register_rx.close();
        self.unregister_rx.close();
        self.broadcast_rx.close();
        info!(closed, "Chat hub stopped");
    }

    #[cfg(test)]
    fn session_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, HashMap::len)
    }
}
