/*
 * Copyright 2025 Carver Automation Corporation.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Device inventory service for ServiceRadar.
//!
//! Ingests device facts from agents, webhook-style events and a polled
//! inventory API, stitches them into one canonical identity per physical
//! device, tracks attribute drift, and derives a live topology graph from
//! neighbor-discovery facts.
//!
//! # Example
//!
//! ```rust
//! use device_inventory::{models::TelemetryIngestRequest, store::Store};
//!
//! let store = Store::in_memory();
//! let outcome = store
//!     .ingest(TelemetryIngestRequest {
//!         device_id: "gw-1".to_string(),
//!         mac: "aa:bb:cc:00:00:01".to_string(),
//!         ..Default::default()
//!     })
//!     .expect("device id present");
//! assert!(outcome.identity.is_some());
//! ```

pub mod config;
pub mod error;
pub mod keys;
pub mod models;
pub mod pagination;
pub mod persist;
pub mod server;
pub mod source;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod topology;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the inventory service using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config)?.run().await
}
