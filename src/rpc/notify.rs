//! Ordered notification dispatch.
//!
//! The read loop decodes a notification's arguments and pushes the bound
//! invocation onto a [`NotifyQueue`]. A single worker thread drains the queue
//! and runs invocations one at a time, so handlers observe notifications in
//! arrival order no matter how long each one takes.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use tracing::{debug, warn};

use super::handler::{run_invocation, Invocation};

pub(crate) struct Notification {
    pub method: String,
    pub invocation: Invocation,
}

/// FIFO of pending notifications. `None` tells the worker to exit.
#[derive(Default)]
pub(crate) struct NotifyQueue {
    items: Mutex<VecDeque<Option<Notification>>>,
    ready: Condvar,
}

impl NotifyQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, notification: Notification) {
        self.enqueue(Some(notification));
    }

    /// Ask the worker to exit once everything queued before now has run.
    pub fn shutdown(&self) {
        self.enqueue(None);
    }

    fn enqueue(&self, item: Option<Notification>) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
        self.ready.notify_one();
    }

    /// Block until at least one item is queued, then take all of them.
    fn take_all(&self) -> VecDeque<Option<Notification>> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        while items.is_empty() {
            items = self
                .ready
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
        std::mem::take(&mut *items)
    }
}

/// Start the worker thread for `queue`.
pub(crate) fn spawn_worker(
    queue: Arc<NotifyQueue>,
    name: String,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(name)
        .spawn(move || worker_loop(&queue))
}

fn worker_loop(queue: &NotifyQueue) {
    loop {
        for item in queue.take_all() {
            let Some(notification) = item else {
                debug!("notification worker received shutdown signal, exiting");
                return;
            };
            let Notification { method, invocation } = notification;
            if let Err(err) = run_invocation(&method, invocation) {
                warn!(method = %method, "notification handler failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgpack::{Raw, Value};
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use std::time::Duration;

    fn notification(
        method: &str,
        f: impl FnOnce() -> Result<Raw, Value> + Send + 'static,
    ) -> Notification {
        Notification {
            method: method.to_string(),
            invocation: Box::new(f),
        }
    }

    #[test]
    fn test_worker_runs_in_order_and_exits() {
        let queue = NotifyQueue::new();
        let handle = spawn_worker(Arc::clone(&queue), "test-notify".into()).unwrap();
        let (tx, rx) = mpsc::channel();

        for i in 0..10 {
            let tx = tx.clone();
            queue.push(notification("n", move || {
                tx.send(i).unwrap();
                Ok(Raw::default())
            }));
        }
        queue.shutdown();
        handle.join().unwrap();

        let seen: Vec<i32> = rx.try_iter().collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_survives_failures() {
        let queue = NotifyQueue::new();
        let handle = spawn_worker(Arc::clone(&queue), "test-notify-fail".into()).unwrap();
        let (tx, rx) = mpsc::channel();

        queue.push(notification("bad", || Err(Value::String("nope".into()))));
        queue.push(notification("panics", || panic!("handler bug")));
        queue.push(notification("good", move || {
            tx.send("ran").unwrap();
            Ok(Raw::default())
        }));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "ran");
        queue.shutdown();
        handle.join().unwrap();
    }
}
