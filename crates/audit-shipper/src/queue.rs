// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded event queue between request handlers and the shipper worker.
//!
//! Producers hold a cloneable [`EventQueue`] and never wait: when the buffer
//! is full the event is dropped and a warning names it. The single
//! [`EventReceiver`] belongs to the worker, which blocks on it until an event
//! arrives or shutdown is signalled.

use crate::event::LogEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Creates a queue holding at most `capacity` events. A capacity of zero is
/// treated as one.
#[must_use]
pub fn event_queue(capacity: usize) -> (EventQueue, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let queue = EventQueue {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (queue, EventReceiver { rx })
}

/// Producer side of the queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventQueue {
    tx: mpsc::Sender<LogEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventQueue {
    /// Places `event` in the queue without waiting. A full or closed queue
    /// drops the event.
    pub fn enqueue(&self, event: LogEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Audit queue is full, dropping event: {event}");
            }
            Err(TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Audit shipper is stopped, dropping event: {event}");
            }
        }
    }

    /// Number of events dropped so far because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// What the worker got back from [`EventReceiver::dequeue`].
#[derive(Debug, PartialEq)]
pub enum Dequeued {
    Event(LogEvent),
    Shutdown,
}

/// Consumer side of the queue. There is exactly one per queue.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<LogEvent>,
}

impl EventReceiver {
    /// Waits for the next event or for `shutdown`. Losing every producer is
    /// reported as shutdown too.
    pub async fn dequeue(&mut self, shutdown: &CancellationToken) -> Dequeued {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => Dequeued::Shutdown,
            event = self.rx.recv() => match event {
                Some(event) => Dequeued::Event(event),
                None => Dequeued::Shutdown,
            },
        }
    }

    /// Closes the queue to producers and returns what was already buffered,
    /// oldest first.
    pub fn drain(&mut self) -> Vec<LogEvent> {
        self.rx.close();
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
