// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Posting flushed batches to the collection API.
//!
//! Every event in a batch is sent as its own request, in batch order, with no
//! transactionality across events: a batch can partially succeed. One bearer
//! token is fetched per batch and reused for every attempt in it. A failed
//! attempt is retried after a fixed delay, up to `max_retries` extra attempts;
//! after that the event is logged and discarded.

use crate::config::ShipperConfig;
use crate::errors::DeliveryError;
use crate::event::LogEvent;
use crate::token::{Claims, TokenProvider, SHIPPER_TOKEN_TTL};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Per-flush tally of what happened to each event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Accepted by the collector
    pub delivered: usize,
    /// Dropped after exhausting retries
    pub failed: usize,
    /// Dropped because they could not be encoded
    pub skipped: usize,
    /// Dropped because no credential could be obtained
    pub aborted: usize,
}

/// Destination of flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn deliver(&self, batch: Vec<LogEvent>) -> DeliveryReport;
}

#[derive(Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    destination_url: String,
    max_retries: u32,
    retry_delay: Duration,
    token_provider: Arc<dyn TokenProvider>,
    token_claims: Claims,
}

impl DeliveryClient {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        config: &ShipperConfig,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        let mut token_claims = Claims::new();
        token_claims.insert(
            "sub".to_string(),
            Value::from(config.token_subject.as_str()),
        );

        DeliveryClient {
            client,
            destination_url: config.destination_url.clone(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            token_provider,
            token_claims,
        }
    }

    /// Sends one encoded event, retrying failures. Returns the number of
    /// attempts made, alongside the last error on failure.
    async fn send_with_retry(&self, body: &[u8], token: &str) -> Result<u32, (u32, DeliveryError)> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let resp = self
                .client
                .post(&self.destination_url)
                .header(CONTENT_TYPE, "application/json")
                .bearer_auth(token)
                .body(body.to_vec())
                .send()
                .await;

            let err = match resp {
                Ok(resp) if resp.status().is_success() => return Ok(attempts),
                Ok(resp) => DeliveryError::Status(resp.status()),
                Err(e) => DeliveryError::Transport(e),
            };

            if attempts > self.max_retries {
                return Err((attempts, err));
            }
            warn!(
                "Error sending audit event (attempt {attempts}): {err}. Retrying in {:?}",
                self.retry_delay
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

#[async_trait]
impl BatchSink for DeliveryClient {
    async fn deliver(&self, batch: Vec<LogEvent>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if batch.is_empty() {
            return report;
        }

        let token = match self
            .token_provider
            .issue(&self.token_claims, SHIPPER_TOKEN_TTL)
            .await
        {
            Ok(issued) => issued.token,
            Err(e) => {
                error!(
                    "Failed to obtain collector credential, dropping {} audit events: {e}",
                    batch.len()
                );
                report.aborted = batch.len();
                return report;
            }
        };

        for event in batch {
            let body = match event.to_wire() {
                Ok(body) => body,
                Err(e) => {
                    error!("Failed to encode audit event {event}, skipping: {e}");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.send_with_retry(&body, &token).await {
                Ok(attempts) => {
                    debug!("Delivered audit event {event} after {attempts} attempt(s)");
                    report.delivered += 1;
                }
                Err((attempts, e)) => {
                    error!("Failed to deliver audit event after {attempts} attempts ({e}): {event}");
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Finished delivering audit batch: {} delivered, {} failed, {} skipped",
            report.delivered, report.failed, report.skipped
        );
        report
    }
}
