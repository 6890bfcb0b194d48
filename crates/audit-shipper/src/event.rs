// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The audit record and its wire encoding.
//!
//! Each event is posted to the collector as its own JSON object:
//!
//! ```json
//! {"user_id": "42", "url": "/api/auth/login", "payload": null,
//!  "response": {"message": "Login successful"}, "action": "LOGIN_SUCCESS"}
//! ```

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// One audit record. Immutable once built; ownership moves from the queue to
/// the in-flight batch to the delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    #[serde(rename = "user_id")]
    actor_id: Option<String>,
    #[serde(rename = "url")]
    route: String,
    #[serde(rename = "payload")]
    request_payload: Option<Value>,
    #[serde(rename = "response")]
    response_payload: Option<Value>,
    action: String,
}

impl LogEvent {
    #[must_use]
    pub fn new(
        actor_id: Option<String>,
        route: impl Into<String>,
        request_payload: Option<Value>,
        response_payload: Option<Value>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            actor_id,
            route: route.into(),
            request_payload,
            response_payload,
            action: action.into(),
        }
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn request_payload(&self) -> Option<&Value> {
        self.request_payload.as_ref()
    }

    pub fn response_payload(&self) -> Option<&Value> {
        self.response_payload.as_ref()
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Encodes the event as the JSON body posted to the collector.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

// Payloads are left out so diagnostics never echo request bodies.
impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (actor: {})",
            self.action,
            self.route,
            self.actor_id.as_deref().unwrap_or("anonymous")
        )
    }
}
