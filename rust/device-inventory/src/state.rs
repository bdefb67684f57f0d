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

use crate::{config::AppConfig, source::SourceConnector, store::Store};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<Store>,
    pub connector: Arc<dyn SourceConnector>,
    /// Cancelled on shutdown; in-flight manual polls observe it too.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<Store>,
        connector: Arc<dyn SourceConnector>,
    ) -> Self {
        Self {
            config,
            store,
            connector,
            shutdown: CancellationToken::new(),
        }
    }
}
