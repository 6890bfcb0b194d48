// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the audit shipper.

use reqwest::StatusCode;

/// Errors raised while reading or validating shipper configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Errors raised by a token provider.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Invalid signing key: {0}")]
    Key(String),

    #[error("Failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("Token provider unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a single failed delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("collector responded with {0}")]
    Status(StatusCode),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors raised while building or starting a shipper.
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error(transparent)]
    Token(#[from] TokenError),
}
