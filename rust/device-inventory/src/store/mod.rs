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

//! In-memory fact store guarded by a single reader/writer lock.
//!
//! Reads take the shared lock and hand back owned copies. Mutations take the
//! exclusive lock for their full duration (index rebuilds included) and
//! persist a copied snapshot only after the lock is released.

mod drift;
mod facts;
mod ingest;
mod resolver;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PersistError, StoreError};
use crate::models::{
    Agent, AgentRegisterRequest, Device, DeviceIdentity, DeviceInterface, DriftSnapshot,
    EventIngestRequest, HardwareProfile, Incident, IngestOutcome, InventorySchema,
    LifecycleScore, NeighborLink, RiskLevel, SourceObservation, TelemetryIngestRequest,
    TopologyEdge, TopologyHealth, TopologyNode,
};
use crate::pagination::{Page, FACT_LIMITS, TOPOLOGY_LIMITS};
use crate::persist::{self, StoreSnapshot, SCHEMA_VERSION};
use crate::topology::{self, PathQuery, TopologyPath};

pub use drift::fingerprint;

pub const MAX_SOURCE_OBSERVATIONS: usize = 10_000;
pub const MAX_DRIFT_SNAPSHOTS: usize = 4_000;
pub const MAX_DEVICE_INTERFACES: usize = 20_000;
pub const MAX_NEIGHBOR_LINKS: usize = 20_000;
/// Per-ingest cap on interface and neighbor facts.
pub const MAX_FACTS_PER_BATCH: usize = 512;

const IDENTITY_BACKFILL_SOURCE: &str = "store_migration";
const DEFAULT_ACK_MINUTES: i64 = 30;

pub(crate) fn new_id(prefix: &str) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &raw[..16])
}

/// Drops the oldest rows so at most `max` remain.
pub(crate) fn trim_oldest<T>(rows: &mut Vec<T>, max: usize) {
    if rows.len() > max {
        let excess = rows.len() - max;
        rows.drain(..excess);
    }
}

/// Tables owned by the store. Everything except `identity_index` is
/// authoritative and persisted.
#[derive(Debug, Default)]
pub(crate) struct Inventory {
    pub(crate) version: u32,
    pub(crate) devices: Vec<Device>,
    pub(crate) incidents: Vec<Incident>,
    pub(crate) agents: Vec<Agent>,
    pub(crate) identities: Vec<DeviceIdentity>,
    pub(crate) interfaces: Vec<DeviceInterface>,
    pub(crate) neighbors: Vec<NeighborLink>,
    pub(crate) hardware: Vec<HardwareProfile>,
    pub(crate) observations: Vec<SourceObservation>,
    pub(crate) drift: Vec<DriftSnapshot>,
    /// Normalized match key -> identity id. Derived; rebuilt from identities.
    pub(crate) identity_index: HashMap<String, String>,
}

impl Inventory {
    pub(crate) fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            version: snapshot.version,
            devices: snapshot.devices,
            incidents: snapshot.incidents,
            agents: snapshot.agents,
            identities: snapshot.device_identities,
            interfaces: snapshot.device_interfaces,
            neighbors: snapshot.neighbor_links,
            hardware: snapshot.hardware_profiles,
            observations: snapshot.source_observations,
            drift: snapshot.drift_snapshots,
            identity_index: HashMap::new(),
        }
    }

    pub(crate) fn to_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: self.version,
            devices: self.devices.clone(),
            incidents: self.incidents.clone(),
            agents: self.agents.clone(),
            device_identities: self.identities.clone(),
            device_interfaces: self.interfaces.clone(),
            neighbor_links: self.neighbors.clone(),
            hardware_profiles: self.hardware.clone(),
            source_observations: self.observations.clone(),
            drift_snapshots: self.drift.clone(),
        }
    }

    /// Brings a loaded snapshot up to the current schema: backfills
    /// identities from raw devices, repairs duplicate identity ids, seeds
    /// baseline drift and rebuilds the identity index.
    pub(crate) fn migrate(&mut self, now: DateTime<Utc>) {
        if self.version == 0 {
            self.version = 1;
        }

        if self.identities.is_empty() && !self.devices.is_empty() {
            self.backfill_from_devices(now);
        }
        if self.has_invalid_identity_ids() {
            warn!(
                identities = self.identities.len(),
                "duplicate or empty identity ids in snapshot; re-deriving from devices"
            );
            self.identities.clear();
            self.interfaces.clear();
            self.neighbors.clear();
            self.hardware.clear();
            self.observations.clear();
            self.backfill_from_devices(now);
        }
        if self.drift.is_empty() && !self.identities.is_empty() {
            let now_ms = now.timestamp_millis();
            let identities = self.identities.clone();
            for identity in &identities {
                let observed_at = if identity.last_seen > 0 {
                    identity.last_seen
                } else {
                    now_ms
                };
                self.record_drift_snapshot(identity, observed_at);
            }
        }
        self.rebuild_identity_index();

        trim_oldest(&mut self.observations, MAX_SOURCE_OBSERVATIONS);
        trim_oldest(&mut self.drift, MAX_DRIFT_SNAPSHOTS);
        if self.version < SCHEMA_VERSION {
            self.version = SCHEMA_VERSION;
        }
    }

    fn has_invalid_identity_ids(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.identities.len());
        self.identities.iter().any(|identity| {
            let id = identity.identity_id.trim();
            id.is_empty() || !seen.insert(id)
        })
    }

    fn backfill_from_devices(&mut self, now: DateTime<Utc>) {
        let devices = self.devices.clone();
        for device in devices {
            let request = TelemetryIngestRequest {
                source: IDENTITY_BACKFILL_SOURCE.to_string(),
                device_id: device.id.clone(),
                device: device.name.clone(),
                role: device.role.clone(),
                site_id: device.site_id.clone(),
                online: Some(device.online),
                latency_ms: device.latency_ms,
                ..Default::default()
            };
            let fields = ingest::ObservedFields {
                source: IDENTITY_BACKFILL_SOURCE,
                name: &device.name,
                role: &device.role,
                site_id: &device.site_id,
                online: device.online,
            };
            self.upsert_identity(&request, &fields, now);
        }
    }

    pub(crate) fn find_identity(&self, identity_id: &str) -> Option<usize> {
        self.identities
            .iter()
            .position(|identity| identity.identity_id == identity_id)
    }
}

/// Thread-safe handle to the inventory.
#[derive(Debug)]
pub struct Store {
    inner: RwLock<Inventory>,
    path: Option<PathBuf>,
    /// Serializes saves so the last rename always carries the newest state.
    save_lock: Mutex<()>,
}

impl Store {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        let mut inventory = Inventory {
            version: SCHEMA_VERSION,
            ..Default::default()
        };
        inventory.migrate(Utc::now());
        Self {
            inner: RwLock::new(inventory),
            path: None,
            save_lock: Mutex::new(()),
        }
    }

    /// Loads the snapshot at `path` (if it exists), migrates it and writes
    /// the migrated form back.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = persist::read_snapshot(&path)?.unwrap_or_else(StoreSnapshot::empty);
        let mut inventory = Inventory::from_snapshot(snapshot);
        inventory.migrate(Utc::now());

        let store = Self {
            inner: RwLock::new(inventory),
            path: Some(path),
            save_lock: Mutex::new(()),
        };
        store.try_persist()?;
        if let Some(path) = store.path.as_deref() {
            info!(
                path = %path.display(),
                identities = store.inner.read().identities.len(),
                "inventory store loaded"
            );
        }
        Ok(store)
    }

    pub fn schema_version(&self) -> u32 {
        self.inner.read().version
    }

    /// Copy of every persisted table.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.read().to_snapshot()
    }

    fn try_persist(&self) -> Result<(), PersistError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        // Snapshot under the save lock: a later save never sees older state.
        let _guard = self.save_lock.lock();
        let snapshot = self.snapshot();
        persist::write_snapshot(path, &snapshot)
    }

    fn persist(&self) {
        if let Err(err) = self.try_persist() {
            warn!(error = %err, "failed to persist inventory snapshot");
        }
    }

    /// Resolves the observation to an identity (creating or merging as
    /// needed), refreshes derived facts and opens/resolves incidents.
    pub fn ingest(&self, request: TelemetryIngestRequest) -> Result<IngestOutcome, StoreError> {
        let outcome = self.inner.write().ingest(&request, Utc::now())?;
        self.persist();
        Ok(outcome)
    }

    /// Translates a state event into an ingest from `events_endpoint`.
    pub fn ingest_event(&self, event: EventIngestRequest) -> Result<IngestOutcome, StoreError> {
        let kind = event.kind.trim().to_lowercase();
        if kind.is_empty() {
            return Err(StoreError::MissingEventType);
        }
        let online = !ingest::is_down_event(&kind);
        self.ingest(TelemetryIngestRequest {
            source: "events_endpoint".to_string(),
            event_type: kind,
            device_id: event.device_id,
            device: event.device,
            site_id: event.site,
            online: Some(online),
            message: event.message,
            ..Default::default()
        })
    }

    /// Operator-triggered consolidation. Unknown secondaries are skipped.
    pub fn merge_identities(
        &self,
        primary_id: &str,
        secondary_ids: &[String],
    ) -> Result<(DeviceIdentity, Vec<String>), StoreError> {
        let primary_id = primary_id.trim();
        if primary_id.is_empty() {
            return Err(StoreError::InvalidPrimaryIdentity);
        }

        let mut secondaries: Vec<&str> = Vec::with_capacity(secondary_ids.len());
        for id in secondary_ids {
            let id = id.trim();
            if id.is_empty() || id == primary_id || secondaries.contains(&id) {
                continue;
            }
            secondaries.push(id);
        }
        if secondaries.is_empty() {
            return Err(StoreError::NoSecondaryIdentities);
        }

        let result = {
            let mut inv = self.inner.write();
            if inv.find_identity(primary_id).is_none() {
                return Err(StoreError::PrimaryIdentityNotFound);
            }

            let now = Utc::now();
            let mut survivor = primary_id.to_string();
            let mut merged = Vec::with_capacity(secondaries.len());
            for secondary in secondaries {
                if inv.find_identity(secondary).is_none() {
                    continue;
                }
                survivor = inv.merge_identities(&survivor, secondary, now);
                merged.push(secondary.to_string());
            }

            let identity = inv
                .find_identity(&survivor)
                .map(|idx| inv.identities[idx].clone())
                .ok_or(StoreError::PrimaryIdentityNotFound)?;
            (identity, merged)
        };

        info!(
            primary = %result.0.identity_id,
            merged = ?result.1,
            "identities merged by operator"
        );
        self.persist();
        Ok(result)
    }

    pub fn ack_incident(&self, incident_id: &str, minutes: i64) -> Result<Incident, StoreError> {
        let minutes = if minutes <= 0 {
            DEFAULT_ACK_MINUTES
        } else {
            minutes
        };
        let incident = {
            let mut inv = self.inner.write();
            let incident = inv
                .incidents
                .iter_mut()
                .find(|incident| incident.id == incident_id)
                .ok_or(StoreError::IncidentNotFound)?;
            let until = Duration::try_minutes(minutes)
                .and_then(|span| Utc::now().checked_add_signed(span))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            incident.ack_until = Some(until);
            incident.clone()
        };
        self.persist();
        Ok(incident)
    }

    pub fn register_agent(&self, request: AgentRegisterRequest) -> Agent {
        let id = match request.id.trim() {
            "" => new_id("agent"),
            id => id.to_string(),
        };
        let name = match request.name.trim() {
            "" => id.clone(),
            name => name.to_string(),
        };
        let agent = Agent {
            id,
            name,
            site_id: request.site_id.trim().to_string(),
            version: request.version.trim().to_string(),
            capabilities: request.capabilities,
            last_seen: Utc::now().timestamp_millis(),
            status: "online".to_string(),
        };

        {
            let mut inv = self.inner.write();
            match inv.agents.iter_mut().find(|existing| existing.id == agent.id) {
                Some(existing) => *existing = agent.clone(),
                None => inv.agents.push(agent.clone()),
            }
        }
        self.persist();
        agent
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.inner.read().devices.clone()
    }

    pub fn list_incidents(&self) -> Vec<Incident> {
        self.inner.read().incidents.clone()
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        self.inner.read().agents.clone()
    }

    /// Identities in creation order.
    pub fn list_identities(&self, limit: usize) -> Page<DeviceIdentity> {
        let inv = self.inner.read();
        Page::collect(inv.identities.iter(), FACT_LIMITS.normalize(limit), |_| true)
    }

    pub fn get_identity(&self, identity_id: &str) -> Option<DeviceIdentity> {
        let inv = self.inner.read();
        inv.find_identity(identity_id.trim())
            .map(|idx| inv.identities[idx].clone())
    }

    /// Newest first.
    pub fn list_observations(&self, limit: usize, identity_id: &str) -> Page<SourceObservation> {
        let filter = identity_id.trim();
        let inv = self.inner.read();
        Page::collect(
            inv.observations.iter().rev(),
            FACT_LIMITS.normalize(limit),
            |row| filter.is_empty() || row.identity_id == filter,
        )
    }

    /// Newest first.
    pub fn list_drift(&self, limit: usize, identity_id: &str) -> Page<DriftSnapshot> {
        let filter = identity_id.trim();
        let inv = self.inner.read();
        Page::collect(
            inv.drift.iter().rev(),
            FACT_LIMITS.normalize(limit),
            |row| filter.is_empty() || row.identity_id == filter,
        )
    }

    /// Newest first.
    pub fn list_interfaces(&self, limit: usize, identity_id: &str) -> Page<DeviceInterface> {
        let filter = identity_id.trim();
        let inv = self.inner.read();
        Page::collect(
            inv.interfaces.iter().rev(),
            FACT_LIMITS.normalize(limit),
            |row| filter.is_empty() || row.identity_id == filter,
        )
    }

    /// Newest first.
    pub fn list_neighbors(&self, limit: usize, identity_id: &str) -> Page<NeighborLink> {
        let filter = identity_id.trim();
        let inv = self.inner.read();
        Page::collect(
            inv.neighbors.iter().rev(),
            FACT_LIMITS.normalize(limit),
            |row| filter.is_empty() || row.identity_id == filter,
        )
    }

    pub fn list_hardware_profiles(&self) -> Vec<HardwareProfile> {
        self.inner.read().hardware.clone()
    }

    pub fn list_lifecycle_scores(&self, limit: usize, identity_id: &str) -> Page<LifecycleScore> {
        let filter = identity_id.trim();
        let now_ms = Utc::now().timestamp_millis();
        let inv = self.inner.read();
        let scores: Vec<LifecycleScore> = inv
            .identities
            .iter()
            .filter(|identity| filter.is_empty() || identity.identity_id == filter)
            .map(|identity| lifecycle_score(identity, now_ms))
            .collect();
        Page::collect(scores.iter(), FACT_LIMITS.normalize(limit), |_| true)
    }

    /// Topology nodes sorted by (kind, label, id). The site filter keeps only
    /// managed nodes at that site.
    pub fn list_topology_nodes(&self, limit: usize, site_id: &str) -> Page<TopologyNode> {
        let site = crate::keys::normalize_key_token(site_id);
        let graph = {
            let inv = self.inner.read();
            topology::build_graph(&inv.identities, &inv.neighbors, Utc::now())
        };
        Page::collect(graph.nodes.iter(), TOPOLOGY_LIMITS.normalize(limit), |node| {
            site.is_empty()
                || (node.kind == crate::models::NodeKind::Managed
                    && crate::keys::normalize_key_token(&node.site_id) == site)
        })
    }

    /// Topology edges sorted by (from, to, id), optionally restricted to the
    /// owning identity.
    pub fn list_topology_edges(&self, limit: usize, identity_id: &str) -> Page<TopologyEdge> {
        let filter = identity_id.trim();
        let graph = {
            let inv = self.inner.read();
            topology::build_graph(&inv.identities, &inv.neighbors, Utc::now())
        };
        Page::collect(graph.edges.iter(), TOPOLOGY_LIMITS.normalize(limit), |edge| {
            filter.is_empty() || edge.source_identity_id == filter
        })
    }

    pub fn topology_health(&self) -> TopologyHealth {
        let inv = self.inner.read();
        topology::build_graph(&inv.identities, &inv.neighbors, Utc::now()).health
    }

    pub fn trace_path(&self, query: &PathQuery) -> TopologyPath {
        let inv = self.inner.read();
        let graph = topology::build_graph(&inv.identities, &inv.neighbors, Utc::now());
        graph.trace_path(query)
    }

    pub fn inventory_schema(&self) -> InventorySchema {
        persist::inventory_schema()
    }
}

fn lifecycle_score(identity: &DeviceIdentity, now_ms: i64) -> LifecycleScore {
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    let mut score = 100;
    let mut reasons = Vec::new();
    if identity.vendor.is_empty() {
        score -= 20;
        reasons.push("missing_vendor".to_string());
    }
    if identity.model.is_empty() {
        score -= 20;
        reasons.push("missing_model".to_string());
    }
    let age = now_ms - identity.last_seen;
    if age > DAY_MS {
        score -= 25;
        reasons.push("stale_last_seen_24h".to_string());
    }
    if age > 7 * DAY_MS {
        score -= 20;
        reasons.push("stale_last_seen_7d".to_string());
    }

    let score = score.max(0);
    let level = if score < 60 {
        RiskLevel::High
    } else if score < 80 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    LifecycleScore {
        identity_id: identity.identity_id.clone(),
        score,
        level,
        reasons,
    }
}
