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

use chrono::{DateTime, Utc};

use super::{new_id, trim_oldest, Inventory, MAX_SOURCE_OBSERVATIONS};
use crate::error::StoreError;
use crate::keys::{append_unique, identity_keys, normalize_key_token};
use crate::models::{
    Device, DeviceIdentity, Incident, IngestOutcome, SourceObservation, TelemetryIngestRequest,
};

const DEFAULT_SOURCE: &str = "ingest";
const DEFAULT_ROLE: &str = "device";
const DEFAULT_SITE: &str = "default";

pub(crate) fn is_down_event(kind: &str) -> bool {
    matches!(kind, "device_down" | "offline")
}

fn is_up_event(kind: &str) -> bool {
    matches!(kind, "device_up" | "online")
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    match value.trim() {
        "" => fallback,
        trimmed => trimmed,
    }
}

/// Request fields after defaults have been applied.
pub(super) struct ObservedFields<'a> {
    pub source: &'a str,
    pub name: &'a str,
    pub role: &'a str,
    pub site_id: &'a str,
    pub online: bool,
}

impl Inventory {
    pub(crate) fn ingest(
        &mut self,
        request: &TelemetryIngestRequest,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, StoreError> {
        let device_id = request.device_id.trim();
        if device_id.is_empty() {
            return Err(StoreError::MissingDeviceIdentifier);
        }

        let now_ms = now.timestamp_millis();
        let event_type = request.event_type.trim().to_lowercase();
        let fields = ObservedFields {
            source: or_default(&request.source, DEFAULT_SOURCE),
            name: or_default(&request.device, device_id),
            role: or_default(&request.role, DEFAULT_ROLE),
            site_id: or_default(&request.site_id, DEFAULT_SITE),
            online: request.online.unwrap_or(!is_down_event(&event_type)),
        };

        let idx = match self.devices.iter().position(|device| device.id == device_id) {
            Some(idx) => idx,
            None => {
                self.devices.push(Device {
                    id: device_id.to_string(),
                    ..Default::default()
                });
                self.devices.len() - 1
            }
        };
        let device = &mut self.devices[idx];
        device.name = fields.name.to_string();
        device.role = fields.role.to_string();
        device.site_id = fields.site_id.to_string();
        device.online = fields.online;
        device.latency_ms = request.latency_ms;
        device.source = fields.source.to_string();
        device.last_seen = now_ms;
        let device = device.clone();

        let identity = self.upsert_identity(request, &fields, now);

        let mut created = None;
        if !fields.online || is_down_event(&event_type) {
            let active = self
                .incidents
                .iter()
                .any(|incident| incident.device_id == device_id && incident.resolved_at.is_none());
            if !active {
                let incident = Incident {
                    id: new_id("inc"),
                    device_id: device_id.to_string(),
                    kind: "offline".to_string(),
                    severity: "critical".to_string(),
                    started_at: now,
                    resolved_at: None,
                    ack_until: None,
                    message: request.message.trim().to_string(),
                    source: fields.source.to_string(),
                };
                self.incidents.push(incident.clone());
                created = Some(incident);
            }
        }
        if fields.online || is_up_event(&event_type) {
            for incident in self
                .incidents
                .iter_mut()
                .filter(|incident| incident.device_id == device_id && incident.resolved_at.is_none())
            {
                incident.resolved_at = Some(now);
            }
        }

        Ok(IngestOutcome {
            device,
            identity,
            incident: created,
        })
    }

    /// Records the observation, resolves (or creates) its identity and
    /// refreshes every fact derived from it.
    pub(super) fn upsert_identity(
        &mut self,
        request: &TelemetryIngestRequest,
        fields: &ObservedFields<'_>,
        now: DateTime<Utc>,
    ) -> Option<DeviceIdentity> {
        let now_ms = now.timestamp_millis();
        let device_id = request.device_id.trim();
        let mut obs = SourceObservation {
            observation_id: new_id("obs"),
            identity_id: String::new(),
            source: fields.source.to_string(),
            device_id: device_id.to_string(),
            name: or_default(fields.name, device_id).to_string(),
            role: fields.role.trim().to_string(),
            site_id: fields.site_id.trim().to_string(),
            hostname: normalize_key_token(&request.hostname),
            mac_address: normalize_key_token(&request.mac),
            serial_number: normalize_key_token(&request.serial),
            vendor: request.vendor.trim().to_string(),
            model: request.model.trim().to_string(),
            online: Some(fields.online),
            latency_ms: request.latency_ms,
            observed_at: now_ms,
        };

        let identity_id = match self.resolve_identity(&obs, now) {
            Some(id) => id,
            None => {
                let id = new_id("ident");
                self.identities.push(DeviceIdentity {
                    identity_id: id.clone(),
                    primary_device_id: obs.device_id.clone(),
                    name: obs.name.clone(),
                    role: obs.role.clone(),
                    site_id: obs.site_id.clone(),
                    hostname: obs.hostname.clone(),
                    mac_address: obs.mac_address.clone(),
                    serial_number: obs.serial_number.clone(),
                    vendor: obs.vendor.clone(),
                    model: obs.model.clone(),
                    source_refs: vec![fields.source.to_string()],
                    last_seen: now_ms,
                    created_at: now,
                    updated_at: now,
                });
                id
            }
        };

        let idx = self.find_identity(&identity_id)?;
        let identity = &mut self.identities[idx];
        identity.last_seen = now_ms;
        identity.updated_at = now;
        if identity.primary_device_id.is_empty() {
            identity.primary_device_id = obs.device_id.clone();
        }
        refresh(&mut identity.name, &obs.name);
        refresh(&mut identity.role, &obs.role);
        refresh(&mut identity.site_id, &obs.site_id);
        refresh(&mut identity.hostname, &obs.hostname);
        refresh(&mut identity.mac_address, &obs.mac_address);
        refresh(&mut identity.serial_number, &obs.serial_number);
        refresh(&mut identity.vendor, &obs.vendor);
        refresh(&mut identity.model, &obs.model);
        append_unique(&mut identity.source_refs, [fields.source]);
        let identity = identity.clone();
        obs.identity_id = identity.identity_id.clone();

        self.record_drift_snapshot(&identity, now_ms);
        self.upsert_hardware_profile(&identity.identity_id, &obs.vendor, &obs.model, now);
        self.upsert_interface_facts(&identity.identity_id, fields.source, &request.interfaces, now);
        self.upsert_neighbor_facts(&identity.identity_id, fields.source, &request.neighbors, now);

        for key in identity_keys(&obs) {
            self.identity_index.insert(key, identity.identity_id.clone());
        }
        self.observations.push(obs);
        trim_oldest(&mut self.observations, MAX_SOURCE_OBSERVATIONS);

        Some(identity)
    }
}

/// Overwrites `field` when the observation carries a different non-empty value.
fn refresh(field: &mut String, observed: &str) {
    if !observed.is_empty() && field != observed {
        *field = observed.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(device_id: &str) -> TelemetryIngestRequest {
        TelemetryIngestRequest {
            device_id: device_id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_device_id_is_rejected_without_mutation() {
        let mut inv = Inventory::default();
        let err = inv.ingest(&request("  "), Utc::now()).unwrap_err();
        assert_eq!(err, StoreError::MissingDeviceIdentifier);
        assert!(inv.devices.is_empty());
        assert!(inv.identities.is_empty());
        assert!(inv.observations.is_empty());
    }

    #[test]
    fn defaults_are_applied_to_bare_requests() {
        let mut inv = Inventory::default();
        let outcome = inv.ingest(&request("sw-9"), Utc::now()).unwrap();

        assert_eq!(outcome.device.name, "sw-9");
        assert_eq!(outcome.device.role, "device");
        assert_eq!(outcome.device.site_id, "default");
        assert_eq!(outcome.device.source, "ingest");
        assert!(outcome.device.online);
        let identity = outcome.identity.unwrap();
        assert_eq!(identity.source_refs, vec!["ingest"]);
        assert_eq!(identity.primary_device_id, "sw-9");
    }

    #[test]
    fn offline_opens_one_incident_and_online_resolves_it() {
        let mut inv = Inventory::default();
        let now = Utc::now();
        let down = TelemetryIngestRequest {
            event_type: "DEVICE_DOWN".into(),
            message: "lost link".into(),
            ..request("ap-1")
        };

        let first = inv.ingest(&down, now).unwrap();
        let incident = first.incident.unwrap();
        assert_eq!(incident.kind, "offline");
        assert_eq!(incident.severity, "critical");
        assert!(!first.device.online);

        let second = inv.ingest(&down, now + Duration::seconds(5)).unwrap();
        assert!(second.incident.is_none());
        assert_eq!(inv.incidents.len(), 1);

        let up = inv.ingest(&request("ap-1"), now + Duration::seconds(10)).unwrap();
        assert!(up.device.online);
        assert!(inv.incidents[0].resolved_at.is_some());
    }

    #[test]
    fn identity_fields_refresh_but_primary_device_id_sticks() {
        let mut inv = Inventory::default();
        let now = Utc::now();
        inv.ingest(
            &TelemetryIngestRequest {
                source: "agent".into(),
                mac: "AA BB CC 00 11 22".into(),
                vendor: "Mikrotik".into(),
                ..request("rb-1")
            },
            now,
        )
        .unwrap();
        let outcome = inv
            .ingest(
                &TelemetryIngestRequest {
                    source: "uisp".into(),
                    device: "Core Router".into(),
                    mac: "aabbcc001122".into(),
                    vendor: String::new(),
                    ..request("uisp-77")
                },
                now + Duration::seconds(1),
            )
            .unwrap();

        assert_eq!(inv.identities.len(), 1);
        let identity = outcome.identity.unwrap();
        assert_eq!(identity.primary_device_id, "rb-1");
        assert_eq!(identity.name, "Core Router");
        assert_eq!(identity.vendor, "Mikrotik");
        assert_eq!(identity.mac_address, "aabbcc001122");
        assert_eq!(identity.source_refs, vec!["agent", "uisp"]);
        assert_eq!(inv.observations.len(), 2);
        assert!(inv.observations.iter().all(|obs| obs.identity_id == identity.identity_id));
    }
}
