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

//! Tolerant parsing of remote device inventory payloads.

use serde_json::{Map, Value};

use crate::error::SourceError;

const ONLINE_STATUSES: [&str; 6] = ["ok", "online", "active", "connected", "reachable", "enabled"];

/// One device as reported by the remote inventory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    pub role: String,
    pub site_id: String,
    pub hostname: String,
    pub mac: String,
    pub serial: String,
    pub model: String,
    pub vendor: String,
    pub online: bool,
    pub latency_ms: Option<f64>,
}

pub(crate) fn nested_value<'a>(item: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(item.get(*first)?, |current, key| current.as_object()?.get(*key))
}

/// First non-blank string found along `paths`.
pub(crate) fn pick_string(item: &Map<String, Value>, paths: &[&[&str]]) -> String {
    paths
        .iter()
        .filter_map(|path| nested_value(item, path)?.as_str())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// First number, or numeric string, found along `paths`.
pub(crate) fn pick_float(item: &Map<String, Value>, paths: &[&[&str]]) -> Option<f64> {
    paths.iter().find_map(|path| match nested_value(item, path)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

fn or_else(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn parse_record(item: &Map<String, Value>) -> Option<DeviceRecord> {
    let id = pick_string(
        item,
        &[&["identification", "id"], &["identification", "mac"], &["id"]],
    );
    if id.is_empty() {
        return None;
    }

    let name = pick_string(
        item,
        &[
            &["identification", "name"],
            &["identification", "displayName"],
            &["name"],
        ],
    );
    let status = pick_string(item, &[&["overview", "status"], &["status"]]).to_lowercase();

    Some(DeviceRecord {
        name: or_else(name, &id),
        role: or_else(
            pick_string(item, &[&["identification", "role"], &["role"]]),
            "device",
        ),
        site_id: or_else(pick_string(item, &[&["site", "id"], &["siteId"]]), "uisp"),
        hostname: pick_string(item, &[&["identification", "hostname"], &["hostname"]]),
        mac: pick_string(item, &[&["identification", "mac"], &["mac"]]),
        serial: pick_string(
            item,
            &[
                &["identification", "serialNumber"],
                &["identification", "serial"],
                &["serialNumber"],
                &["serial"],
            ],
        ),
        model: pick_string(item, &[&["identification", "model"], &["model"]]),
        vendor: pick_string(item, &[&["identification", "vendor"], &["vendor"]]),
        online: ONLINE_STATUSES.contains(&status.as_str()),
        latency_ms: pick_float(item, &[&["overview", "latency"], &["overview", "ping"]]),
        id,
    })
}

/// Accepts either a bare array of devices or `{"devices": [...]}`. Items
/// without an identifier are skipped; a payload yielding no records fails.
pub fn parse_device_payload(body: &[u8]) -> Result<Vec<DeviceRecord>, SourceError> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|err| SourceError::MalformedPayload(err.to_string()))?;

    let items: Vec<&Map<String, Value>> = match &payload {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(object) => object
            .get("devices")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    if items.is_empty() {
        return Err(SourceError::EmptyPayload);
    }

    let records: Vec<DeviceRecord> = items.into_iter().filter_map(parse_record).collect();
    if records.is_empty() {
        return Err(SourceError::MalformedPayload(
            "response had no valid records".to_string(),
        ));
    }
    Ok(records)
}
