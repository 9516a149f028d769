//! Process context and lifecycle action notifier
//!
//! One `ProcessContext` is built at startup. It carries the replica
//! directory, the process start time and the sending half of a bounded
//! action queue; the receiving half goes to whichever monitor drains it.

use crate::common::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Queue depth. A full queue blocks `ReplicaCoordinator::start`.
pub const ACTION_QUEUE_CAPACITY: usize = 5;

/// Startup-scoped state injected into the coordinator
#[derive(Debug, Clone)]
pub struct ProcessContext {
    dir: PathBuf,
    started_at: DateTime<Utc>,
    actions: mpsc::Sender<String>,
}

impl ProcessContext {
    /// Create the context and the monitor end of its action queue
    pub fn new(dir: impl Into<PathBuf>) -> (Self, ActionMonitor) {
        let (tx, rx) = mpsc::channel(ACTION_QUEUE_CAPACITY);
        let ctx = Self {
            dir: dir.into(),
            started_at: Utc::now(),
            actions: tx,
        };
        (ctx, ActionMonitor { rx })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    /// Publish an action, blocking the thread while the queue is full.
    ///
    /// Must not be called from inside an async task.
    pub(crate) fn publish(&self, action: &str) -> Result<()> {
        self.actions
            .blocking_send(action.to_string())
            .map_err(|_| Error::NotifierClosed)
    }
}

/// Consumer end of the action queue
#[derive(Debug)]
pub struct ActionMonitor {
    rx: mpsc::Receiver<String>,
}

impl ActionMonitor {
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Blocking receive for monitors running on a plain thread
    pub fn blocking_recv(&mut self) -> Option<String> {
        self.rx.blocking_recv()
    }

    /// Next queued action, if one is waiting
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}
