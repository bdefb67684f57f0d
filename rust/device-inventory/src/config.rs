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

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_DEVICES_PATH: &str = "/nms/api/v2.1/devices";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub data_file: Option<PathBuf>,
    pub source: SourceConfig,
}

/// Settings for the polled inventory source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub token: String,
    pub devices_path: String,
    /// Background poll interval; `None` disables the poller.
    pub poll_interval: Option<Duration>,
    pub poll_retries: u32,
    pub request_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            devices_path: DEFAULT_DEVICES_PATH.to_string(),
            poll_interval: None,
            poll_retries: default_poll_retries(),
            request_timeout: Duration::from_secs(default_request_timeout_secs()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    inventory_listen_addr: Option<String>,
    #[serde(default)]
    inventory_listen_host: Option<String>,
    #[serde(default)]
    inventory_listen_port: Option<u16>,
    #[serde(default)]
    inventory_data_file: Option<String>,
    #[serde(default)]
    uisp_url: Option<String>,
    #[serde(default)]
    uisp_token: Option<String>,
    #[serde(default)]
    uisp_devices_path: Option<String>,
    #[serde(default)]
    uisp_poll_interval_secs: u64,
    #[serde(default = "default_poll_retries")]
    uisp_poll_retries: u32,
    #[serde(default = "default_request_timeout_secs")]
    uisp_request_timeout_secs: u64,
}

const fn default_poll_retries() -> u32 {
    1
}

const fn default_request_timeout_secs() -> u64 {
    12
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse INVENTORY_*/UISP_* environment variables")?;

        let listen_addr = resolve_addr(
            raw.inventory_listen_addr,
            raw.inventory_listen_host,
            raw.inventory_listen_port,
        )?;

        let data_file = raw
            .inventory_data_file
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let poll_interval = match raw.uisp_poll_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            listen_addr,
            data_file,
            source: SourceConfig {
                base_url: raw.uisp_url.unwrap_or_default(),
                token: raw.uisp_token.unwrap_or_default(),
                devices_path: raw
                    .uisp_devices_path
                    .filter(|path| !path.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_DEVICES_PATH.to_string()),
                poll_interval,
                poll_retries: raw.uisp_poll_retries,
                request_timeout: Duration::from_secs(raw.uisp_request_timeout_secs.max(1)),
            },
        })
    }
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid INVENTORY_LISTEN_ADDR value")?
            .next()
            .context("INVENTORY_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(8080);
    format!("{host}:{port}")
        .to_socket_addrs()
        .context("invalid inventory listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_and_port_combine_into_listen_addr() {
        let addr = resolve_addr(None, Some("127.0.0.1".into()), Some(9090)).unwrap();
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 9090)));
    }

    #[test]
    fn explicit_addr_wins_over_host_and_port() {
        let addr = resolve_addr(
            Some("127.0.0.1:7000".into()),
            Some("0.0.0.0".into()),
            Some(9090),
        )
        .unwrap();
        assert_eq!(addr.port(), 7000);
    }

    #[test]
    fn source_defaults_leave_poller_disabled() {
        let source = SourceConfig::default();
        assert!(source.poll_interval.is_none());
        assert_eq!(source.devices_path, DEFAULT_DEVICES_PATH);
        assert_eq!(source.poll_retries, 1);
    }
}
