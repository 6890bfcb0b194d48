// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of the audit shipper and its background worker.
//!
//! A [`Shipper`] owns the producer side of the queue and the handle of a single
//! worker task. The worker waits on three things at once: the next event, the
//! flush interval, and the shutdown signal. A size-triggered flush restarts the
//! interval. On shutdown the worker drains whatever is buffered, flushes it in
//! batches no larger than the threshold, and exits.
//!
//! Delivery runs inline in the worker, so a slow collector slows the flush
//! cadence and lets the queue fill up instead of piling up concurrent flushes.

use crate::accumulator::{BatchAccumulator, FlushTrigger};
use crate::audit::AuditLogger;
use crate::config::ShipperConfig;
use crate::delivery::{BatchSink, DeliveryClient};
use crate::errors::ShipperError;
use crate::event::LogEvent;
use crate::http::get_client;
use crate::queue::{event_queue, Dequeued, EventQueue, EventReceiver};
use crate::token::TokenProvider;
use std::future::Future;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MIN_BATCH_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a running audit shipper.
#[derive(Debug)]
pub struct Shipper {
    queue: EventQueue,
    cancel_token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Shipper {
    /// Spawns the worker on the current Tokio runtime and returns immediately.
    pub fn start(config: &ShipperConfig, sink: Arc<dyn BatchSink>) -> Self {
        let (queue, receiver) = event_queue(config.queue_capacity);
        let cancel_token = CancellationToken::new();

        let worker = ShipperWorker {
            receiver,
            accumulator: BatchAccumulator::new(config.batch_size),
            batch_interval: config.batch_interval.max(MIN_BATCH_INTERVAL),
            sink,
            cancel_token: cancel_token.clone(),
        };
        let handle = tokio::spawn(worker.run());

        info!(
            "Audit shipper started (capacity {}, batch size {}, interval {:?})",
            config.queue_capacity, config.batch_size, config.batch_interval
        );

        Shipper {
            queue,
            cancel_token,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Validates `config`, builds the HTTP delivery client and starts the
    /// shipper with it.
    pub fn from_config(
        config: &ShipperConfig,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Result<Self, ShipperError> {
        config.validate()?;
        let client = get_client(config)?;
        let sink = DeliveryClient::new(client, config, token_provider);
        Ok(Self::start(config, Arc::new(sink)))
    }

    /// A submission handle for request handlers.
    pub fn audit_logger(&self) -> AuditLogger {
        AuditLogger::new(self.queue.clone())
    }

    /// Events dropped because the queue was full or the shipper stopped.
    pub fn dropped_events(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Signals shutdown and waits until buffered events have been flushed.
    ///
    /// Safe to call more than once, also concurrently: every caller returns
    /// after the worker has exited.
    pub async fn stop(&self) {
        self.cancel_token.cancel();

        let mut worker = self.worker.lock().await;
        // the handle stays in the slot until joined, so a cancelled stop
        // leaves it for the next caller to wait on
        let result = match worker.as_mut() {
            Some(handle) => handle.await,
            None => return,
        };
        *worker = None;

        if let Err(e) = result {
            error!("Audit shipper worker did not exit cleanly: {e}");
        }
        info!("Audit shipper stopped");
    }
}

impl Drop for Shipper {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct ShipperWorker {
    receiver: EventReceiver,
    accumulator: BatchAccumulator,
    batch_interval: Duration,
    sink: Arc<dyn BatchSink>,
    cancel_token: CancellationToken,
}

impl ShipperWorker {
    async fn run(mut self) {
        let mut ticker = interval_at(Instant::now() + self.batch_interval, self.batch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                dequeued = self.receiver.dequeue(&self.cancel_token) => match dequeued {
                    Dequeued::Event(event) => {
                        if let Some(batch) = self.accumulator.push(event) {
                            self.flush(batch, FlushTrigger::Size).await;
                            ticker.reset();
                        }
                    }
                    Dequeued::Shutdown => break,
                },
                _ = ticker.tick() => {
                    let batch = self.accumulator.take();
                    self.flush(batch, FlushTrigger::Interval).await;
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        let mut pending = self.accumulator.take();
        pending.extend(self.receiver.drain());
        debug!("Audit shipper shutting down with {} pending events", pending.len());

        let threshold = self.accumulator.threshold();
        while !pending.is_empty() {
            let rest = pending.split_off(pending.len().min(threshold));
            let batch = mem::replace(&mut pending, rest);
            self.flush(batch, FlushTrigger::Shutdown).await;
        }
    }

    async fn flush(&self, batch: Vec<LogEvent>, trigger: FlushTrigger) {
        if batch.is_empty() {
            return;
        }
        debug!("Flushing {} audit events ({trigger})", batch.len());

        let report = self.sink.deliver(batch).await;
        let lost = report.failed + report.skipped + report.aborted;
        if lost > 0 {
            warn!(
                "Audit flush ({trigger}) lost {lost} events: {} failed, {} skipped, {} aborted",
                report.failed, report.skipped, report.aborted
            );
        }
    }
}

/// Process-wide slot for a lazily started [`Shipper`].
///
/// Concurrent first callers race to start it; exactly one start function runs
/// and every caller receives the same instance.
#[derive(Debug, Default)]
pub struct ShipperCell {
    cell: OnceCell<Arc<Shipper>>,
}

impl ShipperCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shipper, running `start` if none has been started yet. A
    /// failed start leaves the slot empty so a later call can retry.
    pub async fn get_or_try_start<F, Fut, E>(&self, start: F) -> Result<Arc<Shipper>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Shipper, E>>,
    {
        self.cell
            .get_or_try_init(|| async move { start().await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn get(&self) -> Option<Arc<Shipper>> {
        self.cell.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryReport;
    use crate::token::StaticTokenProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    struct RecordingSink {
        batches: mpsc::UnboundedSender<Vec<LogEvent>>,
        delay: Duration,
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn deliver(&self, batch: Vec<LogEvent>) -> DeliveryReport {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let delivered = batch.len();
            let _ = self.batches.send(batch);
            DeliveryReport {
                delivered,
                ..Default::default()
            }
        }
    }

    fn recording_sink(delay: Duration) -> (Arc<RecordingSink>, mpsc::UnboundedReceiver<Vec<LogEvent>>) {
        let (batches, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingSink { batches, delay }), rx)
    }

    fn config(batch_size: usize, batch_interval: Duration) -> ShipperConfig {
        let mut config = ShipperConfig::new("http://collector/api/logs/create");
        config.batch_size = batch_size;
        config.batch_interval = batch_interval;
        config
    }

    fn event(n: usize) -> LogEvent {
        LogEvent::new(Some(n.to_string()), "/api/auth/login", None, None, "LOGIN_SUCCESS")
    }

    fn collected(rx: &mut mpsc::UnboundedReceiver<Vec<LogEvent>>) -> Vec<Vec<LogEvent>> {
        let mut batches = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            batches.push(batch);
        }
        batches
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_size_threshold_flushes_immediately() {
        let (sink, mut rx) = recording_sink(Duration::ZERO);
        let shipper = Shipper::start(&config(3, HOUR), sink);
        let logger = shipper.audit_logger();

        let started = Instant::now();
        for n in 0..3 {
            logger.submit_event(event(n));
        }

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch, vec![event(0), event(1), event(2)]);
        assert!(started.elapsed() < HOUR);

        shipper.stop().await;
        assert!(collected(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flushes_partial_batch() {
        let interval = Duration::from_secs(2);
        let (sink, mut rx) = recording_sink(Duration::ZERO);
        let shipper = Shipper::start(&config(10, interval), sink);
        let logger = shipper.audit_logger();

        let started = Instant::now();
        logger.submit_event(event(0));
        logger.submit_event(event(1));

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch, vec![event(0), event(1)]);
        assert!(started.elapsed() >= interval);

        shipper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_intervals_deliver_nothing() {
        let (sink, mut rx) = recording_sink(Duration::ZERO);
        let shipper = Shipper::start(&config(10, Duration::from_secs(2)), sink);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(collected(&mut rx).is_empty());

        shipper.stop().await;
        assert!(collected(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_flush_restarts_interval() {
        let interval = Duration::from_secs(2);
        let (sink, mut rx) = recording_sink(Duration::ZERO);
        let shipper = Shipper::start(&config(2, interval), sink);
        let logger = shipper.audit_logger();
        let started = Instant::now();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        logger.submit_event(event(0));
        logger.submit_event(event(1));
        assert_eq!(rx.recv().await.unwrap().len(), 2);

        logger.submit_event(event(2));
        assert_eq!(rx.recv().await.unwrap(), vec![event(2)]);
        assert!(started.elapsed() >= Duration::from_millis(3500));

        shipper.stop().await;
    }

    #[tokio::test]
    async fn test_stop_flushes_pending_events() {
        let (sink, mut rx) = recording_sink(Duration::ZERO);
        let shipper = Shipper::start(&config(10, HOUR), sink);
        let logger = shipper.audit_logger();

        for n in 0..4 {
            logger.submit_event(event(n));
        }
        shipper.stop().await;

        let delivered: Vec<LogEvent> = collected(&mut rx).into_iter().flatten().collect();
        assert_eq!(delivered, (0..4).map(event).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_shutdown_drain_respects_batch_size() {
        let (sink, mut rx) = recording_sink(Duration::ZERO);
        let shipper = Shipper::start(&config(3, HOUR), sink);
        let logger = shipper.audit_logger();

        for n in 0..7 {
            logger.submit_event(event(n));
        }
        shipper.stop().await;

        let batches = collected(&mut rx);
        assert!(batches.iter().all(|batch| !batch.is_empty() && batch.len() <= 3));
        let delivered: Vec<LogEvent> = batches.into_iter().flatten().collect();
        assert_eq!(delivered, (0..7).map(event).collect::<Vec<_>>());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_full_queue_drops_without_blocking() {
        let mut config = config(10, HOUR);
        config.queue_capacity = 2;
        let (sink, mut rx) = recording_sink(Duration::ZERO);
        let shipper = Shipper::start(&config, sink);
        let logger = shipper.audit_logger();

        // the worker cannot run before the next await on this runtime
        for n in 0..3 {
            logger.submit_event(event(n));
        }
        assert_eq!(shipper.dropped_events(), 1);
        assert!(logs_contain("Audit queue is full, dropping event"));

        shipper.stop().await;
        let delivered: Vec<LogEvent> = collected(&mut rx).into_iter().flatten().collect();
        assert_eq!(delivered, vec![event(0), event(1)]);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (sink, _rx) = recording_sink(Duration::ZERO);
        let shipper = Shipper::start(&config(10, HOUR), sink);

        tokio::join!(shipper.stop(), shipper.stop());
        shipper.stop().await;

        assert!(shipper.is_stopped());
        assert!(shipper.worker.lock().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_abandoned_stop_still_waits_for_flush() {
        let (sink, mut rx) = recording_sink(Duration::from_millis(300));
        let shipper = Shipper::start(&config(10, HOUR), sink);
        let logger = shipper.audit_logger();

        for n in 0..3 {
            logger.submit_event(event(n));
        }

        let abandoned = tokio::time::timeout(Duration::from_millis(50), shipper.stop()).await;
        assert!(abandoned.is_err());

        shipper.stop().await;
        let delivered: Vec<LogEvent> = collected(&mut rx).into_iter().flatten().collect();
        assert_eq!(delivered, (0..3).map(event).collect::<Vec<_>>());
        assert!(shipper.worker.lock().await.is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_submit_after_stop_is_dropped() {
        let (sink, mut rx) = recording_sink(Duration::ZERO);
        let shipper = Shipper::start(&config(10, HOUR), sink);
        let logger = shipper.audit_logger();

        shipper.stop().await;
        logger.submit_event(event(0));

        assert_eq!(shipper.dropped_events(), 1);
        assert!(logs_contain("Audit shipper is stopped, dropping event"));
        assert!(collected(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sink_serializes_flushes() {
        let delay = Duration::from_secs(5);
        let (sink, mut rx) = recording_sink(delay);
        let shipper = Shipper::start(&config(1, HOUR), sink);
        let logger = shipper.audit_logger();

        let started = Instant::now();
        for n in 0..3 {
            logger.submit_event(event(n));
        }
        for n in 0..3 {
            assert_eq!(rx.recv().await.unwrap(), vec![event(n)]);
        }
        assert!(started.elapsed() >= delay * 3);

        shipper.stop().await;
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_config() {
        let config = ShipperConfig::new("not a url");
        let result = Shipper::from_config(&config, Arc::new(StaticTokenProvider::new("token")));
        assert!(matches!(result, Err(ShipperError::Config(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cell_starts_exactly_once_under_contention() {
        let cell = Arc::new(ShipperCell::new());
        let starts = Arc::new(AtomicUsize::new(0));
        let (sink, _rx) = recording_sink(Duration::ZERO);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cell = cell.clone();
            let starts = starts.clone();
            let sink = sink.clone();
            tasks.push(tokio::spawn(async move {
                cell.get_or_try_start(|| async move {
                    starts.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ShipperError>(Shipper::start(&config(10, HOUR), sink))
                })
                .await
                .unwrap()
            }));
        }

        let mut shippers = Vec::new();
        for task in tasks {
            shippers.push(task.await.unwrap());
        }

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(shippers.iter().all(|s| Arc::ptr_eq(s, &shippers[0])));
        shippers[0].stop().await;
    }

    #[tokio::test]
    async fn test_cell_failed_start_can_be_retried() {
        let cell = ShipperCell::new();

        let failed = cell
            .get_or_try_start(|| async { Err::<Shipper, _>("collector unreachable") })
            .await;
        assert!(failed.is_err());
        assert!(cell.get().is_none());

        let (sink, _rx) = recording_sink(Duration::ZERO);
        let shipper = cell
            .get_or_try_start(|| async move { Ok::<_, &str>(Shipper::start(&config(10, HOUR), sink)) })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&shipper, &cell.get().unwrap()));
        shipper.stop().await;
    }
}
