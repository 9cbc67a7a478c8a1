//! The single current client connection and the messages pushed to it.
//!
//! Each attached socket gets its own unbounded channel. Attaching a new socket
//! swaps the current slot, dropping the previous sender; the previous socket
//! stays open but receives nothing further.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// `{"command":"start"}`, sent once on connect.
    Command { command: String },
    Event(RelayEvent),
}

impl ServerMessage {
    pub fn start() -> Self {
        ServerMessage::Command {
            command: "start".to_string(),
        }
    }
}

impl From<RelayEvent> for ServerMessage {
    fn from(event: RelayEvent) -> Self {
        ServerMessage::Event(event)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayEvent {
    Log {
        data: String,
    },
    Analysis {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screenshot: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decision: Option<serde_json::Value>,
    },
    Error {
        data: String,
    },
}

impl RelayEvent {
    pub fn log(data: impl Into<String>) -> Self {
        RelayEvent::Log { data: data.into() }
    }

    pub fn error(data: impl Into<String>) -> Self {
        RelayEvent::Error { data: data.into() }
    }

    pub fn screenshot(filename: impl Into<String>) -> Self {
        RelayEvent::Analysis {
            screenshot: Some(filename.into()),
            decision: None,
        }
    }

    pub fn decision(decision: serde_json::Value) -> Self {
        RelayEvent::Analysis {
            screenshot: None,
            decision: Some(decision),
        }
    }
}

/// Identifies one attached socket.
pub type ConnectionId = u64;

struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Clone, Default)]
pub struct RelayBridge {
    current: Arc<Mutex<Option<Connection>>>,
    next_id: Arc<AtomicU64>,
}

impl RelayBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a new connection current and queue the start command to it.
    pub fn attach(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(json) = encode(&ServerMessage::start()) {
            let _ = tx.send(json);
        }

        let replaced = match self.current.lock() {
            Ok(mut slot) => slot.replace(Connection { id, tx }).map(|c| c.id),
            Err(e) => {
                tracing::error!(error = %e, "Relay slot poisoned");
                None
            }
        };
        match replaced {
            Some(old) => tracing::info!(connection = id, replaced = old, "Client connected, replacing previous"),
            None => tracing::info!(connection = id, "Client connected"),
        }
        (id, rx)
    }

    /// Clear the current connection if it is still `id`. Returns whether it was.
    pub fn detach(&self, id: ConnectionId) -> bool {
        let Ok(mut slot) = self.current.lock() else {
            return false;
        };
        match slot.as_ref() {
            Some(conn) if conn.id == id => {
                *slot = None;
                tracing::info!(connection = id, "Client disconnected");
                true
            }
            _ => {
                tracing::debug!(connection = id, "Stale client disconnected");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Forward an event to the current connection. Returns false when dropped.
    pub fn deliver(&self, event: RelayEvent) -> bool {
        self.send(&ServerMessage::Event(event))
    }

    fn send(&self, msg: &ServerMessage) -> bool {
        let Some(json) = encode(msg) else {
            return false;
        };
        let Ok(slot) = self.current.lock() else {
            return false;
        };
        match slot.as_ref() {
            Some(conn) => conn.tx.send(json).is_ok(),
            None => {
                tracing::trace!("No client attached, dropping event");
                false
            }
        }
    }

    /// React to a text frame from a client (`{"command": ...}`): echo the
    /// command as a log event. Any valid JSON is echoed; a missing `command`
    /// is shown as `undefined`. Only unparsable text is dropped.
    pub fn handle_client_text(&self, text: &str) {
        let value = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed client message");
                return;
            }
        };
        let command = match value.get("command") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "undefined".to_string(),
        };
        tracing::info!(%command, "Client command");
        self.deliver(RelayEvent::log(format!("收到命令: {}", command)));
    }
}

fn encode(msg: &ServerMessage) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize relay message");
            None
        }
    }
}
