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

//! External inventory sources.
//!
//! A connector turns a remote device list into ingest requests, emitting
//! only online/offline transitions and suppressing repeats within a rolling
//! window.

mod parse;
mod poller;
mod uisp;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::PollError;
use crate::models::{SourcePollRequest, SourcePollResponse, SourceStatus, TelemetryIngestRequest};
use crate::store::Store;

pub use parse::{parse_device_payload, DeviceRecord};
pub use poller::run_source_poller;
pub use uisp::{demo_records, UispConnector, SOURCE_NAME as UISP_SOURCE_NAME};

/// Result of one poll: counters plus the normalized events to ingest.
#[derive(Debug, Clone, Default)]
pub struct PollBatch {
    pub response: SourcePollResponse,
    pub events: Vec<TelemetryIngestRequest>,
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn name(&self) -> &str;

    /// Metadata about the most recent poll.
    fn status(&self) -> SourceStatus;

    /// On failure the error carries a best-effort response and the status
    /// records the error.
    async fn poll(
        &self,
        request: SourcePollRequest,
        cancel: &CancellationToken,
    ) -> Result<PollBatch, PollError>;
}

/// Feeds events into the store. Returns (ingested, incidents opened).
pub fn ingest_source_events(store: &Store, events: Vec<TelemetryIngestRequest>) -> (usize, usize) {
    let mut ingested = 0;
    let mut incidents = 0;
    for event in events {
        let Ok(outcome) = store.ingest(event) else {
            continue;
        };
        ingested += 1;
        if outcome.incident.is_some() {
            incidents += 1;
        }
    }
    (ingested, incidents)
}
