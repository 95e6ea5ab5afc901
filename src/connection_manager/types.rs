//! Connection handle and related types

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::websocket::{OutboundMessage, ServerMessage};

/// Handle for a single WebSocket connection
pub struct ConnectionHandle {
    pub id: Uuid,
    pub sender: mpsc::Sender<OutboundMessage>,
    /// Last activity (ms since epoch), updated lock-free by the connection task
    last_activity: AtomicI64,
    /// When the writer last sent a transport ping (ms since epoch, 0 = never)
    last_ping: AtomicI64,
    /// Set once a join or observe event arrived
    identified: AtomicBool,
    closed: AtomicBool,
    close_signal: Notify,
    grace_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            last_activity: AtomicI64::new(Utc::now().timestamp_millis()),
            last_ping: AtomicI64::new(0),
            identified: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            grace_timer: Mutex::new(None),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn mark_ping_sent(&self) {
        self.mark_ping_sent_at(Utc::now().timestamp_millis());
    }

    pub(crate) fn mark_ping_sent_at(&self, now_ms: i64) {
        self.last_ping.store(now_ms, Ordering::Relaxed);
    }

    /// A ping went out and nothing has arrived since
    pub fn is_unresponsive(&self) -> bool {
        self.last_ping.load(Ordering::Relaxed) > self.last_activity_ms()
    }

    /// Idle time relative to `now_ms`, never negative
    pub fn idle_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.last_activity_ms()).max(0)
    }

    /// Whether the writer side of the transport is gone
    pub fn is_transport_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn is_identified(&self) -> bool {
        self.identified.load(Ordering::Acquire)
    }

    /// Mark the connection identified and cancel its grace timer.
    pub(crate) fn mark_identified(&self) {
        self.identified.store(true, Ordering::Release);
        self.cancel_grace_timer();
    }

    pub(crate) fn set_grace_timer(&self, timer: JoinHandle<()>) {
        let mut slot = self.grace_timer.lock();
        if self.is_identified() || self.is_closed() {
            timer.abort();
        } else {
            *slot = Some(timer);
        }
    }

    pub(crate) fn cancel_grace_timer(&self) {
        if let Some(timer) = self.grace_timer.lock().take() {
            timer.abort();
        }
    }

    /// Ask the connection task to shut its transport down.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // notify_one keeps a permit if the task is not waiting yet
            self.close_signal.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_signal.notified().await;
    }

    /// Queue a message without waiting for space
    pub fn try_send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::TrySendError<OutboundMessage>> {
        self.sender.try_send(OutboundMessage::Raw(message))
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("last_activity_ms", &self.last_activity_ms())
            .field("identified", &self.is_identified())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Error returned when a connection cannot be registered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection limit reached ({current}/{max})")]
    CapacityReached { current: usize, max: usize },

    #[error("Server is shutting down")]
    ShuttingDown,
}

impl ConnectionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapacityReached { .. } => "CONNECTION_LIMIT",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Label for the rejection metric
    pub fn reason(&self) -> &'static str {
        match self {
            Self::CapacityReached { .. } => "capacity",
            Self::ShuttingDown => "shutdown",
        }
    }
}
