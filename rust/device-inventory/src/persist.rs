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

//! On-disk snapshot of the inventory tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::PersistError;
use crate::models::{
    Agent, Device, DeviceIdentity, DeviceInterface, DriftSnapshot, HardwareProfile, Incident,
    InventorySchema, NeighborLink, SourceObservation,
};

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub version: u32,
    pub devices: Vec<Device>,
    pub incidents: Vec<Incident>,
    pub agents: Vec<Agent>,
    pub device_identities: Vec<DeviceIdentity>,
    pub device_interfaces: Vec<DeviceInterface>,
    pub neighbor_links: Vec<NeighborLink>,
    pub hardware_profiles: Vec<HardwareProfile>,
    pub source_observations: Vec<SourceObservation>,
    pub drift_snapshots: Vec<DriftSnapshot>,
}

impl StoreSnapshot {
    pub fn empty() -> Self {
        Self {
            version: SCHEMA_VERSION,
            ..Default::default()
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// `Ok(None)` when the file does not exist or is empty.
pub fn read_snapshot(path: &Path) -> Result<Option<StoreSnapshot>, PersistError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(path, err)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Writes to a uniquely named sibling temp file and renames it over `path`.
pub fn write_snapshot(path: &Path, snapshot: &StoreSnapshot) -> Result<(), PersistError> {
    let dir = match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
            parent
        }
        None => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| io_error(dir, err))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.flush().map_err(|err| io_error(path, err))?;
    }
    tmp.persist(path).map_err(|err| io_error(path, err.error))?;
    Ok(())
}

pub fn inventory_schema() -> InventorySchema {
    InventorySchema {
        version: SCHEMA_VERSION,
        device_identity_fields: vec![
            "identity_id",
            "primary_device_id",
            "name",
            "role",
            "site_id",
            "hostname",
            "mac_address",
            "serial_number",
            "vendor",
            "model",
            "source_refs",
            "last_seen",
            "created_at",
            "updated_at",
        ],
        device_interface_fields: vec![
            "id",
            "identity_id",
            "name",
            "admin_up",
            "oper_up",
            "rx_bps",
            "tx_bps",
            "error_rate",
            "source",
            "updated_at",
        ],
        neighbor_link_fields: vec![
            "id",
            "identity_id",
            "local_interface",
            "neighbor_identity_hint",
            "neighbor_device_name",
            "neighbor_interface_hint",
            "protocol",
            "source",
            "updated_at",
        ],
        hardware_profile_fields: vec![
            "identity_id",
            "vendor",
            "model",
            "firmware_version",
            "hardware_revision",
            "updated_at",
        ],
        source_observation_fields: vec![
            "observation_id",
            "identity_id",
            "source",
            "device_id",
            "name",
            "role",
            "site_id",
            "hostname",
            "mac_address",
            "serial_number",
            "vendor",
            "model",
            "online",
            "latency_ms",
            "observed_at",
        ],
        notes: BTreeMap::from([
            (
                "stitching",
                "identities match on mac, serial, hostname+site, name+site and source+device_id",
            ),
            (
                "drift",
                "drift snapshots hash identity attributes and record only fingerprint changes",
            ),
        ]),
    }
}
