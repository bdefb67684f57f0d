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

//! Key normalization shared by identity stitching and topology resolution.

use crate::models::SourceObservation;

/// Lower-cases and strips all spaces so `"AA:BB "` and `"aa:bb"` collide.
pub fn normalize_key_token(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "")
}

/// Returns the first value that is non-empty after trimming.
pub fn first_non_empty<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Appends trimmed, non-empty values not already present, keeping order.
pub fn append_unique<'a, I>(values: &mut Vec<String>, incoming: I)
where
    I: IntoIterator<Item = &'a str>,
{
    for value in incoming {
        let value = value.trim();
        if value.is_empty() || values.iter().any(|existing| existing == value) {
            continue;
        }
        values.push(value.to_string());
    }
}

/// Match keys an observation contributes to the identity index. Keys are
/// only produced when every input they combine is non-empty.
pub fn identity_keys(obs: &SourceObservation) -> Vec<String> {
    let device_id = normalize_key_token(&obs.device_id);
    let source = normalize_key_token(&obs.source);
    let mac = normalize_key_token(&obs.mac_address);
    let serial = normalize_key_token(&obs.serial_number);
    let hostname = normalize_key_token(&obs.hostname);
    let site = normalize_key_token(&obs.site_id);
    let name = normalize_key_token(&obs.name);

    let mut keys = Vec::with_capacity(6);
    if !source.is_empty() && !device_id.is_empty() {
        keys.push(format!("source_device:{source}|{device_id}"));
    }
    if !device_id.is_empty() {
        keys.push(format!("device:{device_id}"));
    }
    if !mac.is_empty() {
        keys.push(format!("mac:{mac}"));
    }
    if !serial.is_empty() {
        keys.push(format!("serial:{serial}"));
    }
    if !hostname.is_empty() && !site.is_empty() {
        keys.push(format!("host_site:{site}|{hostname}"));
    }
    if !name.is_empty() && !site.is_empty() {
        keys.push(format!("name_site:{site}|{name}"));
    }
    keys
}
