//! Hand-off of locally originated policy mutations to the gossip loop.
//!
//! Any number of producers append; the gossip loop is the single consumer.
//! Both pending lists live under one mutex so a drain never splits a batch.
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::messages::ChangedObject;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangedBatch {
    pub updates: Vec<ChangedObject>,
    pub deletes: Vec<ChangedObject>,
}

impl ChangedBatch {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len() + self.deletes.len()
    }
}

#[derive(Debug, Default)]
pub struct ChangedObjectQueue {
    pending: Mutex<ChangedBatch>,
    wakeup: Notify,
}

impl ChangedObjectQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_updated(&self, obj: ChangedObject) {
        self.pending.lock().updates.push(obj);
        self.wakeup.notify_one();
    }

    pub fn put_deleted(&self, obj: ChangedObject) {
        self.pending.lock().deletes.push(obj);
        self.wakeup.notify_one();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drain without waiting
    pub fn drain(&self) -> ChangedBatch {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Waits up to `timeout` for something to be queued, then drains everything.
    ///
    /// Returns an empty batch when the timeout elapses with nothing queued.
    pub async fn poll(&self, timeout: Duration) -> ChangedBatch {
        let notified = self.wakeup.notified();
        tokio::pin!(notified);
        // register before checking so a put between the check and the wait is not lost
        notified.as_mut().enable();
        if self.pending.lock().is_empty() {
            let _ = tokio::time::timeout(timeout, notified).await;
        }
        self.drain()
    }
}
