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

//! Data model for devices, identities, derived fact tables and topology.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_blank(value: &str) -> bool {
    value.is_empty()
}

/// Flat per-device row keyed by the raw device id reported by a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub site_id: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub ack_until: Option<i64>,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub source: String,
    #[serde(default)]
    pub last_seen: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub device_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ack_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub message: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub site_id: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    pub last_seen: i64,
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentRegisterRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub site_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Observation-shaped ingestion request, shared by agents, the events
/// endpoint and the source connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryIngestRequest {
    #[serde(skip_serializing_if = "is_blank")]
    pub source: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub agent_id: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub event_type: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub device: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub hostname: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub mac: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub serial: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub model: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub vendor: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub role: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub site_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "is_blank")]
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<TelemetryInterfaceFact>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub neighbors: Vec<TelemetryNeighborFact>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryInterfaceFact {
    pub name: String,
    pub admin_up: Option<bool>,
    pub oper_up: Option<bool>,
    pub rx_bps: Option<f64>,
    pub tx_bps: Option<f64>,
    pub error_rate: Option<f64>,
}

impl TelemetryInterfaceFact {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryNeighborFact {
    pub local_interface: String,
    pub neighbor_identity_hint: String,
    pub neighbor_device_name: String,
    pub neighbor_interface: String,
    pub protocol: String,
}

/// Webhook-style state event (`device_up`, `device_down`, ...).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventIngestRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub device_id: String,
    pub device: String,
    pub site: String,
    pub message: String,
}

/// Canonical device record unifying observations from every source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub identity_id: String,
    #[serde(default)]
    pub primary_device_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub site_id: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub mac_address: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub serial_number: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub vendor: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_refs: Vec<String>,
    #[serde(default)]
    pub last_seen: i64,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInterface {
    pub id: String,
    pub identity_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oper_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx_bps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_bps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub source: String,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeighborLink {
    pub id: String,
    pub identity_id: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub local_interface: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub neighbor_identity_hint: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub neighbor_device_name: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub neighbor_interface_hint: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub source: String,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub identity_id: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub vendor: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub model: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub firmware_version: String,
    #[serde(default, rename = "hardware_revision", skip_serializing_if = "is_blank")]
    pub hardware_rev: String,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

/// One source's report about one device at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceObservation {
    #[serde(default)]
    pub observation_id: String,
    #[serde(default)]
    pub identity_id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub name: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub role: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub site_id: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub mac_address: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub serial_number: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub vendor: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub observed_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftSnapshot {
    pub snapshot_id: String,
    pub identity_id: String,
    pub fingerprint: String,
    pub changed: bool,
    pub observed_at: i64,
    #[serde(default)]
    pub observed_at_iso: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleScore {
    pub identity_id: String,
    pub score: i32,
    pub level: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

/// Ordered so that listings sort `external` before `managed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    External,
    Managed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub identity_id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub role: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub site_id: String,
    #[serde(default)]
    pub last_seen: i64,
    pub kind: NodeKind,
    #[serde(default)]
    pub source_refs_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub edge_id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub source_identity_id: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub target_identity_hint: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub local_interface: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub neighbor_interface: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyHealth {
    pub node_count: usize,
    pub managed_node_count: usize,
    pub edge_count: usize,
    pub unknown_neighbor_edges: usize,
    pub isolated_managed_nodes: usize,
    pub stale_managed_nodes_24h: usize,
    pub connected_components: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityMergeRequest {
    pub primary_id: String,
    pub secondary_id: String,
    pub secondary_ids: Vec<String>,
}

impl IdentityMergeRequest {
    /// Single and list forms combined, single id first.
    pub fn secondaries(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.secondary_ids.len() + 1);
        if !self.secondary_id.trim().is_empty() {
            ids.push(self.secondary_id.clone());
        }
        ids.extend(self.secondary_ids.iter().cloned());
        ids
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePollRequest {
    #[serde(skip_serializing_if = "is_blank")]
    pub cursor: String,
    pub limit: usize,
    pub demo: bool,
    pub retries: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePollResponse {
    pub source: String,
    pub cursor: String,
    pub fetched: usize,
    pub normalized: usize,
    pub emitted: usize,
    pub deduped: usize,
    pub ingested: usize,
    pub incidents_created: usize,
    pub backfill: bool,
    pub demo: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_poll_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub last_cursor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_fetched: usize,
    pub last_normalized: usize,
    pub last_emitted: usize,
    pub demo: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventorySchema {
    pub version: u32,
    pub device_identity_fields: Vec<&'static str>,
    pub device_interface_fields: Vec<&'static str>,
    pub neighbor_link_fields: Vec<&'static str>,
    pub hardware_profile_fields: Vec<&'static str>,
    pub source_observation_fields: Vec<&'static str>,
    pub notes: BTreeMap<&'static str, &'static str>,
}

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub device: Device,
    pub identity: Option<DeviceIdentity>,
    /// Set only when this ingest opened a new incident.
    pub incident: Option<Incident>,
}
