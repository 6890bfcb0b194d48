// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous audit-log shipping for the authentication service.
//!
//! Request handlers submit [`event::LogEvent`]s through an [`audit::AuditLogger`].
//! Events land in a bounded [`queue::EventQueue`] that never blocks the caller,
//! are grouped by a single background worker owned by [`shipper::Shipper`], and
//! are posted one by one to the collector by [`delivery::DeliveryClient`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod audit;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod event;
pub mod http;
pub mod queue;
pub mod shipper;
pub mod token;
