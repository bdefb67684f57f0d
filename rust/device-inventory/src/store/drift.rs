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

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::{new_id, trim_oldest, Inventory, MAX_DRIFT_SNAPSHOTS};
use crate::models::{DeviceIdentity, DriftSnapshot};

/// Hashes the tracked identity attributes in a fixed order and returns the
/// hex digest together with the attributes that went into it.
pub fn fingerprint(identity: &DeviceIdentity) -> (String, BTreeMap<String, String>) {
    let parts: [(&str, &str); 9] = [
        ("primary_device_id", identity.primary_device_id.as_str()),
        ("name", identity.name.as_str()),
        ("role", identity.role.as_str()),
        ("site_id", identity.site_id.as_str()),
        ("hostname", identity.hostname.as_str()),
        ("mac_address", identity.mac_address.as_str()),
        ("serial_number", identity.serial_number.as_str()),
        ("vendor", identity.vendor.as_str()),
        ("model", identity.model.as_str()),
    ];

    let joined = parts
        .iter()
        .map(|(_, value)| *value)
        .collect::<Vec<_>>()
        .join("|");
    let digest = Sha256::digest(joined.as_bytes());

    let attributes = parts
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    (hex::encode(digest), attributes)
}

impl Inventory {
    /// Appends a snapshot unless the fingerprint matches the latest one for
    /// this identity. Only the first snapshot of an identity is unchanged.
    pub(crate) fn record_drift_snapshot(&mut self, identity: &DeviceIdentity, observed_at: i64) {
        let (fingerprint, attributes) = fingerprint(identity);
        let last = self
            .drift
            .iter()
            .rev()
            .find(|snapshot| snapshot.identity_id == identity.identity_id)
            .map(|snapshot| snapshot.fingerprint.as_str());
        if last == Some(fingerprint.as_str()) {
            return;
        }

        let changed = last.is_some();
        let observed_at_iso = DateTime::<Utc>::from_timestamp_millis(observed_at)
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        self.drift.push(DriftSnapshot {
            snapshot_id: new_id("drift"),
            identity_id: identity.identity_id.clone(),
            fingerprint,
            changed,
            observed_at,
            observed_at_iso,
            attributes,
        });
        trim_oldest(&mut self.drift, MAX_DRIFT_SNAPSHOTS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            identity_id: "ident-1".into(),
            primary_device_id: "sw-1".into(),
            name: "Switch".into(),
            ..Default::default()
        }
    }

    #[test]
    fn fingerprint_is_stable_and_attribute_sensitive() {
        let base = identity();
        let (first, attrs) = fingerprint(&base);
        let (again, _) = fingerprint(&base);
        assert_eq!(first, again);
        assert_eq!(first.len(), 64);
        assert_eq!(attrs.len(), 9);
        assert_eq!(attrs["name"], "Switch");

        let mut renamed = base.clone();
        renamed.name = "Switch 2".into();
        assert_ne!(fingerprint(&renamed).0, first);

        let mut refreshed = base;
        refreshed.last_seen = 999;
        assert_eq!(fingerprint(&refreshed).0, first);
    }

    #[test]
    fn baseline_then_changed_then_skipped() {
        let mut inv = Inventory::default();
        let mut ident = identity();
        inv.record_drift_snapshot(&ident, 1_700_000_000_000);
        inv.record_drift_snapshot(&ident, 1_700_000_001_000);
        assert_eq!(inv.drift.len(), 1);
        assert!(!inv.drift[0].changed);
        assert_eq!(inv.drift[0].observed_at_iso, "2023-11-14T22:13:20Z");

        ident.model = "USW-Pro".into();
        inv.record_drift_snapshot(&ident, 1_700_000_002_000);
        assert_eq!(inv.drift.len(), 2);
        assert!(inv.drift[1].changed);
    }
}
