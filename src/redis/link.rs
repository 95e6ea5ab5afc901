//! State of the link between the counter store and Redis

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

use parking_lot::Mutex;

use super::current_time_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    /// No connection has been opened yet
    Pending = 0,
    Up = 1,
    /// The cached connection was dropped; the next call reconnects
    Lost = 2,
    /// The circuit breaker is rejecting calls
    Suppressed = 3,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Pending => "pending",
            LinkState::Up => "up",
            LinkState::Lost => "lost",
            LinkState::Suppressed => "suppressed",
        }
    }
}

impl From<u8> for LinkState {
    fn from(value: u8) -> Self {
        match value {
            1 => LinkState::Up,
            2 => LinkState::Lost,
            3 => LinkState::Suppressed,
            _ => LinkState::Pending,
        }
    }
}

/// Counters behind the `store.redis` block of `/health`
pub struct RedisLink {
    state: AtomicU8,
    connects: AtomicU64,
    timeouts: AtomicU64,
    last_connected_ms: AtomicI64,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct LinkStats {
    pub state: LinkState,
    pub connects: u64,
    pub timeouts: u64,
    pub last_connected_ms: i64,
    pub last_error: Option<String>,
}

impl RedisLink {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LinkState::Pending as u8),
            connects: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            last_connected_ms: AtomicI64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn connected(&self) {
        self.state.store(LinkState::Up as u8, Ordering::Release);
        self.connects.fetch_add(1, Ordering::Relaxed);
        self.last_connected_ms.store(current_time_ms(), Ordering::Release);
    }

    pub fn lost(&self, reason: impl Into<String>) {
        self.state.store(LinkState::Lost as u8, Ordering::Release);
        *self.last_error.lock() = Some(reason.into());
    }

    /// A store call ran into its deadline. The connection is treated as lost.
    pub fn timed_out(&self, after_ms: u64) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.lost(format!("timed out after {}ms", after_ms));
    }

    pub fn suppressed(&self) {
        self.state.store(LinkState::Suppressed as u8, Ordering::Release);
    }

    pub fn state(&self) -> LinkState {
        LinkState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_up(&self) -> bool {
        self.state() == LinkState::Up
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            state: self.state(),
            connects: self.connects.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            last_connected_ms: self.last_connected_ms.load(Ordering::Acquire),
            last_error: self.last_error.lock().clone(),
        }
    }
}

impl Default for RedisLink {
    fn default() -> Self {
        Self::new()
    }
}
