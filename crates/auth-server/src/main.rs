// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, fs, sync::Arc};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use audit_shipper::{
    config::ShipperConfig,
    errors::TokenError,
    shipper::Shipper,
    token::{JwtTokenProvider, StaticTokenProvider, TokenProvider},
};

#[tokio::main]
pub async fn main() {
    // a missing .env file is normal outside local development
    let dotenv = dotenvy::dotenv();

    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");
    if let Ok(path) = dotenv {
        debug!("Loaded environment from {}", path.display());
    }

    let config = match ShipperConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error creating audit shipper config on startup: {e}");
            return;
        }
    };

    let token_provider = match token_provider_from_env() {
        Ok(provider) => provider,
        Err(e) => {
            error!("Unable to set up credentials for the audit collector: {e}");
            return;
        }
    };

    let shipper = match Shipper::from_config(&config, token_provider) {
        Ok(shipper) => shipper,
        Err(e) => {
            error!("Error starting audit shipper: {e}");
            return;
        }
    };
    info!("Shipping audit events to {}", config.destination_url);

    shutdown_signal().await;

    info!("Shutdown requested, flushing audit events");
    shipper.stop().await;
    let dropped = shipper.dropped_events();
    if dropped > 0 {
        info!("{dropped} audit events were dropped during this run");
    }
}

/// Picks the credential source for collector calls, first match wins:
/// `LOG_API_TOKEN`, `JWT_PRIVATE_KEY`, `JWT_PRIVATE_KEY_PATH`, `JWT_SECRET`.
fn token_provider_from_env() -> Result<Arc<dyn TokenProvider>, TokenError> {
    if let Ok(token) = env::var("LOG_API_TOKEN") {
        debug!("Using pre-issued token for audit collector calls");
        return Ok(Arc::new(StaticTokenProvider::new(&token)));
    }
    if let Ok(pem) = env::var("JWT_PRIVATE_KEY") {
        debug!("Signing audit collector tokens with RS256");
        return Ok(Arc::new(JwtTokenProvider::from_rsa_pem(&pem)?));
    }
    if let Ok(path) = env::var("JWT_PRIVATE_KEY_PATH") {
        let pem = fs::read_to_string(&path)
            .map_err(|e| TokenError::Key(format!("unable to read {path}: {e}")))?;
        debug!("Signing audit collector tokens with RS256 key from {path}");
        return Ok(Arc::new(JwtTokenProvider::from_rsa_pem(&pem)?));
    }
    if let Ok(secret) = env::var("JWT_SECRET") {
        debug!("Signing audit collector tokens with HS256");
        return Ok(Arc::new(JwtTokenProvider::from_secret(secret.as_bytes())?));
    }
    Err(TokenError::Key(
        "one of LOG_API_TOKEN, JWT_PRIVATE_KEY, JWT_PRIVATE_KEY_PATH or JWT_SECRET must be set"
            .to_string(),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
