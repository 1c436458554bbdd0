use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// A frame received on a user's websocket connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketRequest {
    pub seq: i64,
    pub action: String,
    pub session_id: String,
}

/// Maps host session ids to the websocket connection that last spoke for them.
#[derive(Debug, Default)]
pub struct SessionTracker {
    connections: RwLock<HashMap<String, String>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `conn_id` for `session_id`. Requests without a session are ignored.
    pub fn track(&self, session_id: &str, conn_id: &str) {
        if session_id.is_empty() {
            return;
        }
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_owned(), conn_id.to_owned());
    }

    /// Forgets every session bound to `conn_id` and returns how many were removed.
    pub fn disconnect(&self, conn_id: &str) -> usize {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        let before = connections.len();
        connections.retain(|_, bound| bound != conn_id);
        before - connections.len()
    }

    pub fn connection_for(&self, session_id: &str) -> Option<String> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner).get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
