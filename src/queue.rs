//! Bounded, durable FIFO between the feed watchers and the delivery worker.
//!
//! Producers block when the queue is full instead of dropping anything.  The
//! queue lives in memory while the process runs and is written to a snapshot
//! file at shutdown; the snapshot is removed again once it has been restored,
//! so exactly one of the two is authoritative at any time.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::Path;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};
use crate::notification::Notification;
use crate::store::write_atomically;

pub struct NotificationQueue {
    state: Mutex<State>,
    capacity: usize,
    /// Signalled when an entry is pushed.
    filled: Notify,
    /// Signalled when an entry is taken, or the queue closes.
    drained: Notify,
}

struct State {
    entries: VecDeque<Notification>,
    closed: bool,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.max(1),
            filled: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Append `notification`, waiting while the queue is full.
    ///
    /// Fails only with [`Error::QueueClosed`]; the notification is then not
    /// in the queue and the caller still owns the item it came from.
    #[cfg(test)]
    pub async fn enqueue(&self, notification: Notification) -> Result<()> {
        self.enqueue_all(vec![notification]).await
    }

    /// Append every entry of `batch` at once, or none of them.
    ///
    /// Waits until the whole batch fits. A batch larger than the capacity is
    /// let in once the queue is empty, so it cannot wait forever.
    pub async fn enqueue_all(&self, batch: Vec<Notification>) -> Result<()> {
        let count = batch.len();
        loop {
            let drained = self.drained.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(Error::QueueClosed);
                }
                let len = state.entries.len();
                if len == 0 || len + count <= self.capacity {
                    state.entries.extend(batch);
                    drop(state);
                    self.filled.notify_one();
                    return Ok(());
                }
            }
            debug!(capacity = self.capacity, count, "notification queue full, waiting");
            drained.await;
        }
    }

    /// Take the oldest entry, waiting until there is one.
    pub async fn dequeue(&self) -> Notification {
        loop {
            let filled = self.filled.notified();
            if let Some(notification) = self.try_dequeue() {
                return notification;
            }
            filled.await;
        }
    }

    pub fn try_dequeue(&self) -> Option<Notification> {
        let notification = self.state.lock().entries.pop_front();
        if notification.is_some() {
            self.drained.notify_one();
        }
        notification
    }

    /// Put a notification the consumer could not deliver at the back.
    ///
    /// Ignores capacity: the consumer freed this slot itself and must never
    /// wait on its own producers.
    pub fn requeue(&self, notification: Notification) {
        self.state.lock().entries.push_back(notification);
        self.filled.notify_one();
    }

    /// Refill the queue from a snapshot, keeping its order.
    pub fn restore(&self, notifications: Vec<Notification>) {
        let count = notifications.len();
        if count == 0 {
            return;
        }
        self.state.lock().entries.extend(notifications);
        self.filled.notify_one();
        debug!(count, "restored notifications");
    }

    /// Remove and return everything currently buffered, oldest first.
    pub fn drain(&self) -> Vec<Notification> {
        let entries: Vec<_> = self.state.lock().entries.drain(..).collect();
        self.drained.notify_waiters();
        entries
    }

    /// Reject further [`enqueue`](Self::enqueue) calls and release producers
    /// waiting for space.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.drained.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read the queue snapshot at `path` and delete it.
///
/// A missing file is an empty queue.
pub async fn load_snapshot(path: &Path) -> Result<Vec<Notification>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io("Failed to read queue snapshot", path, e)),
    };
    let notifications: Vec<Notification> = serde_json::from_slice(&bytes)?;
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| Error::io("Failed to remove queue snapshot", path, e))?;
    Ok(notifications)
}

/// Write `notifications` to `path`, replacing any previous snapshot.
pub async fn save_snapshot(path: &Path, notifications: &[Notification]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io("Failed to create queue folder", parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(notifications)?;
    write_atomically(path, &bytes).await
}
