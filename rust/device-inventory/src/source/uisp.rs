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

//! Connector for a UISP-style network management API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{header, Client};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::parse::{parse_device_payload, DeviceRecord};
use super::{PollBatch, SourceConnector};
use crate::config::{SourceConfig, DEFAULT_DEVICES_PATH};
use crate::error::{PollError, SourceError};
use crate::models::{SourcePollRequest, SourcePollResponse, SourceStatus, TelemetryIngestRequest};

pub const SOURCE_NAME: &str = "uisp";

const DEFAULT_POLL_LIMIT: usize = 200;
const MAX_POLL_LIMIT: usize = 500;
const DEDUP_WINDOW_MS: i64 = 60 * 60 * 1000;
const RETRY_BACKOFF_STEP: Duration = Duration::from_millis(500);
const DEMO_FLIP_SECS: i64 = 30;

#[derive(Debug, Default)]
struct ConnectorState {
    status: SourceStatus,
    /// External device id -> last reported online flag.
    last_known: HashMap<String, bool>,
    /// "id|event|cursor" -> first emission time in ms.
    seen: HashMap<String, i64>,
}

/// Polls the remote inventory (or a synthetic demo set) and turns online
/// state transitions into ingest requests.
#[derive(Debug)]
pub struct UispConnector {
    base_url: String,
    token: String,
    devices_path: String,
    client: Client,
    state: Mutex<ConnectorState>,
}

impl UispConnector {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let devices_path = match config.devices_path.trim() {
            "" => DEFAULT_DEVICES_PATH.to_string(),
            path if path.starts_with('/') => path.to_string(),
            path => format!("/{path}"),
        };
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(SourceError::Client)?;

        Ok(Self {
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            token: config.token.trim().to_string(),
            devices_path,
            client,
            state: Mutex::new(ConnectorState {
                status: SourceStatus {
                    source: SOURCE_NAME.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            }),
        })
    }

    /// Live polling needs both a base URL and a token, and placeholder
    /// hosts are never contacted.
    pub fn is_live(&self) -> bool {
        !self.base_url.is_empty()
            && !self.token.is_empty()
            && !self.base_url.to_lowercase().contains("example")
    }

    /// Runs one poll as of `now`.
    pub async fn poll_at(
        &self,
        request: SourcePollRequest,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<PollBatch, PollError> {
        let started = Instant::now();
        let limit = match request.limit {
            0 => DEFAULT_POLL_LIMIT,
            n if n > MAX_POLL_LIMIT => DEFAULT_POLL_LIMIT,
            n => n,
        };
        let requested_cursor = request.cursor.trim();
        let backfill = !requested_cursor.is_empty();
        let cursor = if backfill {
            requested_cursor.to_string()
        } else {
            now.timestamp_millis().to_string()
        };
        let demo = request.demo || !self.is_live();

        let mut records = if demo {
            demo_records(now)
        } else {
            match self.fetch_records(request.retries, cancel).await {
                Ok(records) => records,
                Err(error) => {
                    let message = error.to_string();
                    self.state.lock().status = SourceStatus {
                        source: SOURCE_NAME.to_string(),
                        last_poll_at: Some(Utc::now()),
                        last_cursor: cursor.clone(),
                        last_error: Some(message.clone()),
                        ..Default::default()
                    };
                    return Err(PollError {
                        source_name: SOURCE_NAME.to_string(),
                        response: SourcePollResponse {
                            source: SOURCE_NAME.to_string(),
                            cursor,
                            backfill,
                            demo: false,
                            duration_ms: elapsed_ms(started),
                            error: Some(message),
                            ..Default::default()
                        },
                        error,
                    });
                }
            }
        };
        records.truncate(limit);

        let now_ms = now.timestamp_millis();
        let mut events = Vec::new();
        let mut normalized = 0;
        let mut deduped = 0;
        {
            let mut state = self.state.lock();
            state
                .seen
                .retain(|_, first_seen| now_ms - *first_seen <= DEDUP_WINDOW_MS);

            for record in &records {
                if record.id.is_empty() {
                    continue;
                }
                normalized += 1;

                let previous = state.last_known.insert(record.id.clone(), record.online);
                let event_type = match previous {
                    None if !record.online => "device_down",
                    Some(prev) if prev != record.online => {
                        if record.online {
                            "device_up"
                        } else {
                            "device_down"
                        }
                    }
                    _ => continue,
                };

                let key = format!("{}|{event_type}|{cursor}", record.id);
                if state.seen.contains_key(&key) {
                    deduped += 1;
                    continue;
                }
                state.seen.insert(key, now_ms);
                events.push(to_ingest_request(record, event_type));
            }

            state.status = SourceStatus {
                source: SOURCE_NAME.to_string(),
                last_poll_at: Some(Utc::now()),
                last_cursor: cursor.clone(),
                last_error: None,
                last_fetched: records.len(),
                last_normalized: normalized,
                last_emitted: events.len(),
                demo,
            };
        }

        debug!(
            source = SOURCE_NAME,
            cursor = %cursor,
            fetched = records.len(),
            emitted = events.len(),
            deduped,
            demo,
            "source poll complete"
        );

        Ok(PollBatch {
            response: SourcePollResponse {
                source: SOURCE_NAME.to_string(),
                cursor,
                fetched: records.len(),
                normalized,
                emitted: events.len(),
                deduped,
                ingested: 0,
                incidents_created: 0,
                backfill,
                demo,
                duration_ms: elapsed_ms(started),
                error: None,
            },
            events,
        })
    }

    /// GETs the devices endpoint, retrying `retries` extra times with a
    /// linearly growing pause. Cancellation aborts immediately.
    async fn fetch_records(
        &self,
        retries: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<DeviceRecord>, SourceError> {
        let url = format!("{}{}", self.base_url, self.devices_path);
        let mut last_error = SourceError::Unreachable("poll failed".to_string());

        for attempt in 0..=retries {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                result = self.fetch_once(&url) => result,
            };
            match result {
                Ok(records) => return Ok(records),
                Err(err) => {
                    warn!(
                        source = SOURCE_NAME,
                        attempt = attempt + 1,
                        error = %err,
                        "inventory fetch attempt failed"
                    );
                    last_error = err;
                }
            }

            if attempt < retries {
                let backoff = RETRY_BACKOFF_STEP * (attempt + 1);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
        Err(last_error)
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<DeviceRecord>, SourceError> {
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .header("X-Auth-Token", self.token.as_str())
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| SourceError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unreachable(format!(
                "{SOURCE_NAME} status {}",
                status.as_u16()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| SourceError::Unreachable(err.to_string()))?;
        parse_device_payload(&body)
    }
}

#[async_trait]
impl SourceConnector for UispConnector {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn status(&self) -> SourceStatus {
        self.state.lock().status.clone()
    }

    async fn poll(
        &self,
        request: SourcePollRequest,
        cancel: &CancellationToken,
    ) -> Result<PollBatch, PollError> {
        self.poll_at(request, cancel, Utc::now()).await
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn to_ingest_request(record: &DeviceRecord, event_type: &str) -> TelemetryIngestRequest {
    TelemetryIngestRequest {
        source: SOURCE_NAME.to_string(),
        event_type: event_type.to_string(),
        device_id: record.id.clone(),
        device: record.name.clone(),
        hostname: record.hostname.clone(),
        mac: record.mac.clone(),
        serial: record.serial.clone(),
        model: record.model.clone(),
        vendor: record.vendor.clone(),
        role: record.role.clone(),
        site_id: record.site_id.clone(),
        online: Some(record.online),
        latency_ms: record.latency_ms,
        message: format!("UISP poll state={}", record.online),
        ..Default::default()
    }
}

/// Synthetic inventory: a gateway and switch that stay up and an access
/// point whose state flips every 30 seconds.
pub fn demo_records(now: DateTime<Utc>) -> Vec<DeviceRecord> {
    let ap_online = (now.timestamp() / DEMO_FLIP_SECS) % 2 == 0;
    let record = |id: &str, name: &str, role: &str, online: bool, latency: f64| DeviceRecord {
        id: id.to_string(),
        name: name.to_string(),
        role: role.to_string(),
        site_id: "site-demo".to_string(),
        online,
        latency_ms: Some(latency),
        ..Default::default()
    };
    vec![
        record("uisp-gw-1", "UISP Gateway 1", "gateway", true, 3.0),
        record("uisp-ap-1", "UISP AP 1", "ap", ap_online, 180.0),
        record("uisp-sw-1", "UISP Switch 1", "switch", true, 3.0),
    ]
}
