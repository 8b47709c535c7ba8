//! Streaming turns.
//!
//! A turn resolves its chat, stores the user message, relays assistant output
//! as chunks, and finishes with exactly one `status` chunk. See [`StreamEmitter`].

mod emitter;
mod registry;

pub use emitter::{PreparedTurn, StreamEmitter, TurnError, TurnOutcome};
pub use registry::{TurnGuard, TurnRegistry};

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Longest a single chunk may wait on a slow reader before the reader is dropped.
    pub send_timeout_ms: u64,
    /// Longest the assistant may stay silent before the turn fails.
    pub assistant_idle_timeout_ms: u64,
    /// Interval of SSE keep-alive comments.
    pub keep_alive_secs: u64,
    /// Chunks buffered between the turn task and the HTTP response.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 10_000,
            assistant_idle_timeout_ms: 60_000,
            keep_alive_secs: 15,
            channel_capacity: 64,
        }
    }
}

impl StreamConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn assistant_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.assistant_idle_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}
