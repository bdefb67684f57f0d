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

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ingest_source_events, SourceConnector};
use crate::models::SourcePollRequest;
use crate::store::Store;

/// Polls `connector` immediately and then every `interval` until `cancel`
/// fires. A failed poll is logged and the loop carries on.
pub async fn run_source_poller(
    connector: Arc<dyn SourceConnector>,
    store: Arc<Store>,
    interval: Duration,
    retries: u32,
    cancel: CancellationToken,
) {
    if interval.is_zero() {
        return;
    }
    info!(
        source = connector.name(),
        interval_secs = interval.as_secs(),
        retries,
        "source poller started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(source = connector.name(), "source poller stopped");
                break;
            }
            _ = ticker.tick() => {
                poll_once(connector.as_ref(), &store, retries, &cancel).await;
            }
        }
    }
}

async fn poll_once(
    connector: &dyn SourceConnector,
    store: &Arc<Store>,
    retries: u32,
    cancel: &CancellationToken,
) {
    let request = SourcePollRequest {
        retries,
        ..Default::default()
    };
    match connector.poll(request, cancel).await {
        Ok(batch) => {
            let events = batch.events;
            let store = Arc::clone(store);
            let counts =
                tokio::task::spawn_blocking(move || ingest_source_events(&store, events)).await;
            let (ingested, incidents) = match counts {
                Ok(counts) => counts,
                Err(err) => {
                    warn!(source = connector.name(), error = %err, "source ingest task failed");
                    return;
                }
            };
            info!(
                source = connector.name(),
                fetched = batch.response.fetched,
                normalized = batch.response.normalized,
                emitted = batch.response.emitted,
                ingested,
                incidents,
                demo = batch.response.demo,
                "source poll ok"
            );
        }
        Err(err) => {
            warn!(source = connector.name(), error = %err.error, "source poll failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::source::UispConnector;

    #[tokio::test(start_paused = true)]
    async fn poller_runs_immediately_and_stops_on_cancel() {
        let connector: Arc<dyn SourceConnector> =
            Arc::new(UispConnector::new(&SourceConfig::default()).unwrap());
        let store = Arc::new(Store::in_memory());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_source_poller(
            connector.clone(),
            store.clone(),
            Duration::from_secs(60),
            0,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(connector.status().last_poll_at.is_some());
        assert!(connector.status().demo);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_interval_returns_immediately() {
        let connector: Arc<dyn SourceConnector> =
            Arc::new(UispConnector::new(&SourceConfig::default()).unwrap());
        run_source_poller(
            connector.clone(),
            Arc::new(Store::in_memory()),
            Duration::ZERO,
            0,
            CancellationToken::new(),
        )
        .await;
        assert!(connector.status().last_poll_at.is_none());
    }
}
