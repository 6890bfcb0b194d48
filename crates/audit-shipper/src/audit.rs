// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::event::LogEvent;
use crate::queue::EventQueue;
use serde_json::Value;

/// Fire-and-forget submission of audit events from request handlers.
///
/// Submitting never waits and never fails from the caller's point of view;
/// an event that cannot be queued is dropped and logged.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    queue: EventQueue,
}

impl AuditLogger {
    #[must_use]
    pub fn new(queue: EventQueue) -> Self {
        Self { queue }
    }

    /// Records that `action` happened on `route`, optionally on behalf of
    /// `actor_id`.
    pub fn submit(
        &self,
        actor_id: Option<&str>,
        route: &str,
        request_payload: Option<Value>,
        response_payload: Option<Value>,
        action: &str,
    ) {
        self.submit_event(LogEvent::new(
            actor_id.map(str::to_string),
            route,
            request_payload,
            response_payload,
            action,
        ));
    }

    pub fn submit_event(&self, event: LogEvent) {
        self.queue.enqueue(event);
    }
}
