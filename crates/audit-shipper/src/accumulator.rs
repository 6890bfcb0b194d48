// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Groups dequeued events into batches for the delivery client.
//!
//! # Batching Strategy
//!
//! Events are accumulated until one of two triggers fires:
//! 1. **Size**: the batch reaches the configured threshold. [`BatchAccumulator::push`]
//!    hands the full batch back at once.
//! 2. **Time**: the worker's interval ticks and takes whatever is pending.
//!
//! The accumulator itself has no clock; the worker owns the timer and resets
//! it after a size-triggered flush.

use crate::event::LogEvent;
use std::fmt;
use std::mem;

/// Why a batch left the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Interval,
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size => write!(f, "size threshold"),
            Self::Interval => write!(f, "interval"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The in-progress batch. Owned by the shipper worker alone.
#[derive(Debug)]
pub struct BatchAccumulator {
    batch: Vec<LogEvent>,
    threshold: usize,
}

impl BatchAccumulator {
    /// Creates an accumulator that flushes at `threshold` events. A threshold
    /// of zero is treated as one.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            batch: Vec::with_capacity(threshold),
            threshold,
        }
    }

    /// Appends `event` and returns the batch if it reached the threshold.
    pub fn push(&mut self, event: LogEvent) -> Option<Vec<LogEvent>> {
        self.batch.push(event);
        if self.batch.len() >= self.threshold {
            Some(self.take())
        } else {
            None
        }
    }

    /// Takes the pending events, leaving the accumulator empty.
    pub fn take(&mut self) -> Vec<LogEvent> {
        mem::replace(&mut self.batch, Vec::with_capacity(self.threshold))
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
