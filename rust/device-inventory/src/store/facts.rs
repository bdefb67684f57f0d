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
use std::collections::HashSet;

use super::{
    trim_oldest, Inventory, MAX_DEVICE_INTERFACES, MAX_FACTS_PER_BATCH, MAX_NEIGHBOR_LINKS,
};
use crate::keys::normalize_key_token;
use crate::models::{
    DeviceInterface, HardwareProfile, NeighborLink, TelemetryInterfaceFact, TelemetryNeighborFact,
};

/// Row types that are replaced wholesale per (identity, source).
trait SourceScoped {
    fn identity_id(&self) -> &str;
    fn source(&self) -> &str;
}

impl SourceScoped for DeviceInterface {
    fn identity_id(&self) -> &str {
        &self.identity_id
    }
    fn source(&self) -> &str {
        &self.source
    }
}

impl SourceScoped for NeighborLink {
    fn identity_id(&self) -> &str {
        &self.identity_id
    }
    fn source(&self) -> &str {
        &self.source
    }
}

/// Drops every row owned by (identity, source), appends `incoming` and
/// evicts the oldest rows beyond `max`.
fn replace_source_rows<T: SourceScoped>(
    rows: &mut Vec<T>,
    identity_id: &str,
    source: &str,
    incoming: Vec<T>,
    max: usize,
) {
    rows.retain(|row| !(row.identity_id() == identity_id && row.source() == source));
    rows.extend(incoming);
    trim_oldest(rows, max);
}

impl Inventory {
    /// Vendor and model only fill empty slots; `updated_at` always moves.
    pub(crate) fn upsert_hardware_profile(
        &mut self,
        identity_id: &str,
        vendor: &str,
        model: &str,
        now: DateTime<Utc>,
    ) {
        let vendor = vendor.trim();
        let model = model.trim();
        if identity_id.is_empty() || (vendor.is_empty() && model.is_empty()) {
            return;
        }

        if let Some(profile) = self
            .hardware
            .iter_mut()
            .find(|profile| profile.identity_id == identity_id)
        {
            if profile.vendor.is_empty() {
                profile.vendor = vendor.to_string();
            }
            if profile.model.is_empty() {
                profile.model = model.to_string();
            }
            profile.updated_at = now;
            return;
        }

        self.hardware.push(HardwareProfile {
            identity_id: identity_id.to_string(),
            vendor: vendor.to_string(),
            model: model.to_string(),
            updated_at: now,
            ..Default::default()
        });
    }

    /// Keeps one profile per identity after a merge: the primary's profile
    /// absorbs empty fields from the secondary's, or the secondary's profile
    /// is retargeted when the primary has none.
    pub(crate) fn merge_hardware_profiles(
        &mut self,
        primary_id: &str,
        secondary_id: &str,
        now: DateTime<Utc>,
    ) {
        let Some(secondary_idx) = self
            .hardware
            .iter()
            .position(|profile| profile.identity_id == secondary_id)
        else {
            return;
        };

        match self
            .hardware
            .iter()
            .position(|profile| profile.identity_id == primary_id)
        {
            Some(primary_idx) => {
                let secondary = self.hardware.remove(secondary_idx);
                let primary_idx = if secondary_idx < primary_idx {
                    primary_idx - 1
                } else {
                    primary_idx
                };
                let primary = &mut self.hardware[primary_idx];
                for (field, fallback) in [
                    (&mut primary.vendor, secondary.vendor),
                    (&mut primary.model, secondary.model),
                    (&mut primary.firmware_version, secondary.firmware_version),
                    (&mut primary.hardware_rev, secondary.hardware_rev),
                ] {
                    if field.is_empty() {
                        *field = fallback;
                    }
                }
                primary.updated_at = now;
            }
            None => {
                self.hardware[secondary_idx].identity_id = primary_id.to_string();
            }
        }
    }

    pub(crate) fn upsert_interface_facts(
        &mut self,
        identity_id: &str,
        source: &str,
        facts: &[TelemetryInterfaceFact],
        now: DateTime<Utc>,
    ) {
        let identity_id = identity_id.trim();
        let source = source.trim();
        if identity_id.is_empty() || source.is_empty() || facts.is_empty() {
            return;
        }

        let mut seen = HashSet::new();
        let mut incoming = Vec::with_capacity(facts.len().min(MAX_FACTS_PER_BATCH));
        for fact in facts {
            let name = fact.name.trim();
            if name.is_empty() {
                continue;
            }
            let id = format!(
                "if-{}",
                normalize_key_token(&format!("{identity_id}|{source}|{name}"))
            );
            if !seen.insert(id.clone()) {
                continue;
            }
            incoming.push(DeviceInterface {
                id,
                identity_id: identity_id.to_string(),
                name: name.to_string(),
                admin_up: fact.admin_up,
                oper_up: fact.oper_up,
                rx_bps: fact.rx_bps,
                tx_bps: fact.tx_bps,
                error_rate: fact.error_rate,
                source: source.to_string(),
                updated_at: now,
            });
            if incoming.len() >= MAX_FACTS_PER_BATCH {
                break;
            }
        }
        if incoming.is_empty() {
            return;
        }

        replace_source_rows(
            &mut self.interfaces,
            identity_id,
            source,
            incoming,
            MAX_DEVICE_INTERFACES,
        );
    }

    pub(crate) fn upsert_neighbor_facts(
        &mut self,
        identity_id: &str,
        source: &str,
        facts: &[TelemetryNeighborFact],
        now: DateTime<Utc>,
    ) {
        let identity_id = identity_id.trim();
        let source = source.trim();
        if identity_id.is_empty() || source.is_empty() || facts.is_empty() {
            return;
        }

        let mut seen = HashSet::new();
        let mut incoming = Vec::with_capacity(facts.len().min(MAX_FACTS_PER_BATCH));
        for fact in facts {
            let local_interface = fact.local_interface.trim();
            let hint = fact.neighbor_identity_hint.trim();
            let neighbor_name = fact.neighbor_device_name.trim();
            let neighbor_interface = fact.neighbor_interface.trim();
            let protocol = fact.protocol.trim();
            if local_interface.is_empty()
                && hint.is_empty()
                && neighbor_name.is_empty()
                && neighbor_interface.is_empty()
            {
                continue;
            }

            let key = normalize_key_token(&format!(
                "{identity_id}|{source}|{local_interface}|{hint}|{neighbor_name}|{neighbor_interface}|{protocol}"
            ));
            let id = format!("nbr-{key}");
            if !seen.insert(id.clone()) {
                continue;
            }
            incoming.push(NeighborLink {
                id,
                identity_id: identity_id.to_string(),
                local_interface: local_interface.to_string(),
                neighbor_identity_hint: hint.to_string(),
                neighbor_device_name: neighbor_name.to_string(),
                neighbor_interface_hint: neighbor_interface.to_string(),
                protocol: protocol.to_string(),
                source: source.to_string(),
                updated_at: now,
            });
            if incoming.len() >= MAX_FACTS_PER_BATCH {
                break;
            }
        }
        if incoming.is_empty() {
            return;
        }

        replace_source_rows(
            &mut self.neighbors,
            identity_id,
            source,
            incoming,
            MAX_NEIGHBOR_LINKS,
        );
    }
}
