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

//! Identity resolution and merging.

use chrono::{DateTime, Utc};
use tracing::info;

use super::Inventory;
use crate::keys::{append_unique, identity_keys};
use crate::models::SourceObservation;

fn fill_if_empty(field: &mut String, fallback: &str) {
    if field.is_empty() {
        *field = fallback.to_string();
    }
}

impl Inventory {
    /// Looks up every match key of `obs`. Multiple hits are folded into the
    /// identity created first.
    pub(crate) fn resolve_identity(
        &mut self,
        obs: &SourceObservation,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let mut matches: Vec<(usize, String)> = Vec::new();
        for key in identity_keys(obs) {
            let Some(id) = self.identity_index.get(&key) else {
                continue;
            };
            if id.is_empty() || matches.iter().any(|(_, existing)| existing == id) {
                continue;
            }
            let position = self.find_identity(id).unwrap_or(usize::MAX);
            matches.push((position, id.clone()));
        }
        matches.sort();

        let mut ids = matches.into_iter().map(|(_, id)| id);
        let mut survivor = ids.next()?;
        for secondary in ids {
            let merged = self.merge_identities(&survivor, &secondary, now);
            info!(
                identity_id = %merged,
                absorbed = %secondary,
                device_id = %obs.device_id,
                source = %obs.source,
                "observation unified two identities"
            );
            survivor = merged;
        }
        Some(survivor)
    }

    /// Folds `secondary` into `primary` and returns the surviving id.
    ///
    /// Empty fields on the primary are filled from the secondary, every fact
    /// row is retargeted and the secondary row is removed. Merging an id into
    /// itself, or merging an unknown id, changes nothing.
    pub(crate) fn merge_identities(
        &mut self,
        primary_id: &str,
        secondary_id: &str,
        now: DateTime<Utc>,
    ) -> String {
        if primary_id.is_empty() {
            return secondary_id.to_string();
        }
        if secondary_id.is_empty() || secondary_id == primary_id {
            return primary_id.to_string();
        }
        let Some(primary_idx) = self.find_identity(primary_id) else {
            return secondary_id.to_string();
        };
        let Some(secondary_idx) = self.find_identity(secondary_id) else {
            return primary_id.to_string();
        };

        let secondary = self.identities[secondary_idx].clone();
        let primary = &mut self.identities[primary_idx];
        fill_if_empty(&mut primary.primary_device_id, &secondary.primary_device_id);
        fill_if_empty(&mut primary.name, &secondary.name);
        fill_if_empty(&mut primary.role, &secondary.role);
        fill_if_empty(&mut primary.site_id, &secondary.site_id);
        fill_if_empty(&mut primary.hostname, &secondary.hostname);
        fill_if_empty(&mut primary.mac_address, &secondary.mac_address);
        fill_if_empty(&mut primary.serial_number, &secondary.serial_number);
        fill_if_empty(&mut primary.vendor, &secondary.vendor);
        fill_if_empty(&mut primary.model, &secondary.model);
        primary.last_seen = primary.last_seen.max(secondary.last_seen);
        append_unique(
            &mut primary.source_refs,
            secondary.source_refs.iter().map(String::as_str),
        );
        primary.updated_at = now;

        for obs in self
            .observations
            .iter_mut()
            .filter(|row| row.identity_id == secondary_id)
        {
            obs.identity_id = primary_id.to_string();
        }
        for row in self
            .interfaces
            .iter_mut()
            .filter(|row| row.identity_id == secondary_id)
        {
            row.identity_id = primary_id.to_string();
        }
        for row in self
            .neighbors
            .iter_mut()
            .filter(|row| row.identity_id == secondary_id)
        {
            row.identity_id = primary_id.to_string();
        }
        self.merge_hardware_profiles(primary_id, secondary_id, now);

        self.identities.remove(secondary_idx);
        self.rebuild_identity_index();
        primary_id.to_string()
    }

    /// Derives the index from identity rows alone. Source-scoped keys are
    /// only added by ingestion.
    pub(crate) fn rebuild_identity_index(&mut self) {
        self.identity_index.clear();
        for identity in &self.identities {
            let obs = SourceObservation {
                identity_id: identity.identity_id.clone(),
                device_id: identity.primary_device_id.clone(),
                name: identity.name.clone(),
                role: identity.role.clone(),
                site_id: identity.site_id.clone(),
                hostname: identity.hostname.clone(),
                mac_address: identity.mac_address.clone(),
                serial_number: identity.serial_number.clone(),
                ..Default::default()
            };
            for key in identity_keys(&obs) {
                self.identity_index
                    .insert(key, identity.identity_id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceIdentity, DeviceInterface, HardwareProfile, NeighborLink};

    fn identity(id: &str, device_id: &str) -> DeviceIdentity {
        DeviceIdentity {
            identity_id: id.to_string(),
            primary_device_id: device_id.to_string(),
            site_id: "site-1".into(),
            source_refs: vec!["agent".into()],
            ..Default::default()
        }
    }

    fn two_identities() -> Inventory {
        let mut inv = Inventory::default();
        let mut a = identity("ident-a", "dev-a");
        a.last_seen = 100;
        let mut b = identity("ident-b", "dev-b");
        b.serial_number = "sn-42".into();
        b.vendor = "Ubiquiti".into();
        b.last_seen = 500;
        b.source_refs = vec!["uisp".into()];
        inv.identities = vec![a, b];
        inv.interfaces.push(DeviceInterface {
            id: "if-b".into(),
            identity_id: "ident-b".into(),
            name: "eth0".into(),
            ..Default::default()
        });
        inv.neighbors.push(NeighborLink {
            id: "nbr-b".into(),
            identity_id: "ident-b".into(),
            local_interface: "eth0".into(),
            ..Default::default()
        });
        inv.hardware.push(HardwareProfile {
            identity_id: "ident-b".into(),
            vendor: "Ubiquiti".into(),
            ..Default::default()
        });
        inv.observations.push(SourceObservation {
            identity_id: "ident-b".into(),
            ..Default::default()
        });
        inv.rebuild_identity_index();
        inv
    }

    #[test]
    fn merge_moves_facts_and_fills_empty_fields() {
        let mut inv = two_identities();
        let survivor = inv.merge_identities("ident-a", "ident-b", Utc::now());

        assert_eq!(survivor, "ident-a");
        assert_eq!(inv.identities.len(), 1);
        let merged = &inv.identities[0];
        assert_eq!(merged.primary_device_id, "dev-a");
        assert_eq!(merged.serial_number, "sn-42");
        assert_eq!(merged.vendor, "Ubiquiti");
        assert_eq!(merged.last_seen, 500);
        assert_eq!(merged.source_refs, vec!["agent", "uisp"]);
        assert_eq!(inv.interfaces[0].identity_id, "ident-a");
        assert_eq!(inv.neighbors[0].identity_id, "ident-a");
        assert_eq!(inv.hardware[0].identity_id, "ident-a");
        assert_eq!(inv.observations[0].identity_id, "ident-a");
        assert_eq!(inv.identity_index.get("serial:sn-42").map(String::as_str), Some("ident-a"));
        assert!(!inv.identity_index.values().any(|id| id == "ident-b"));
    }

    #[test]
    fn merge_edge_cases_are_no_ops() {
        let mut inv = two_identities();
        let now = Utc::now();
        assert_eq!(inv.merge_identities("ident-a", "ident-a", now), "ident-a");
        assert_eq!(inv.merge_identities("", "ident-b", now), "ident-b");
        assert_eq!(inv.merge_identities("ident-a", "", now), "ident-a");
        assert_eq!(inv.merge_identities("missing", "ident-b", now), "ident-b");
        assert_eq!(inv.merge_identities("ident-a", "missing", now), "ident-a");
        assert_eq!(inv.identities.len(), 2);
    }

    #[test]
    fn multi_match_keeps_earliest_identity() {
        let mut inv = two_identities();
        let obs = SourceObservation {
            source: "lldp".into(),
            device_id: "dev-b".into(),
            serial_number: "sn-42".into(),
            mac_address: String::new(),
            ..Default::default()
        };
        // Point a second key at ident-a so the observation straddles both.
        inv.identity_index
            .insert("device:dev-b".into(), "ident-b".into());
        inv.identity_index
            .insert("source_device:lldp|dev-b".into(), "ident-a".into());

        let resolved = inv.resolve_identity(&obs, Utc::now());
        assert_eq!(resolved.as_deref(), Some("ident-a"));
        assert_eq!(inv.identities.len(), 1);
    }

    #[test]
    fn unmatched_observation_resolves_to_none() {
        let mut inv = two_identities();
        let obs = SourceObservation {
            device_id: "dev-z".into(),
            mac_address: "ffff".into(),
            ..Default::default()
        };
        assert!(inv.resolve_identity(&obs, Utc::now()).is_none());
        assert_eq!(inv.identities.len(), 2);
    }
}
