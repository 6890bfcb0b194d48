// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction for the delivery client.

use crate::config::ShipperConfig;
use crate::errors::ShipperError;
use core::time::Duration;
use tracing::error;

/// Builds the client used to post events to the collector.
///
/// An unusable proxy setting is logged and the client falls back to a direct
/// connection rather than failing start-up.
pub fn get_client(config: &ShipperConfig) -> Result<reqwest::Client, ShipperError> {
    match build_client(config, true) {
        Ok(client) => Ok(client),
        Err(e) if config.https_proxy.is_some() => {
            error!("Unable to parse proxy configuration: {e}, falling back to direct connection");
            build_client(config, false)
        }
        Err(e) => Err(e),
    }
}

fn build_client(config: &ShipperConfig, allow_proxy: bool) -> Result<reqwest::Client, ShipperError> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.request_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(https_uri.as_str())
                .map_err(|e| ShipperError::HttpClient(e.to_string()))?;
            client = client.proxy(proxy);
        }
    }

    client
        .build()
        .map_err(|e| ShipperError::HttpClient(e.to_string()))
}
