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

use crate::{
    config::AppConfig,
    error::Result,
    models::{
        AgentRegisterRequest, EventIngestRequest, IdentityMergeRequest, IngestOutcome,
        SourcePollRequest, TelemetryIngestRequest,
    },
    pagination::Page,
    source::{ingest_source_events, run_source_poller, SourceConnector, UispConnector},
    state::AppState,
    store::Store,
    topology::PathQuery,
};
use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListQuery {
    limit: usize,
    identity_id: String,
    site_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AckRequest {
    duration_minutes: i64,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    accepted: bool,
    device: crate::models::Device,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    incident: Option<crate::models::Incident>,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        Self {
            accepted: true,
            device: outcome.device,
            identity_id: outcome.identity.map(|identity| identity.identity_id),
            incident: outcome.incident,
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Runs a store mutation on the blocking pool; mutations save the snapshot
/// synchronously.
async fn with_store<T, F>(store: &Arc<Store>, op: F) -> Result<T>
where
    F: FnOnce(&Store) -> T + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    let value = tokio::task::spawn_blocking(move || op(&store))
        .await
        .context("store task failed")?;
    Ok(value)
}

/// Wraps a page under `key` with the shared listing metadata.
fn listing<T: Serialize>(key: &str, page: Page<T>) -> Result<Json<Value>> {
    let items = serde_json::to_value(&page.items).context("failed to encode listing")?;
    let mut body = json!({
        "last_updated": now_ms(),
        "count": page.items.len(),
        "truncated": page.truncated,
        "limit": page.limit,
    });
    body[key] = items;
    Ok(Json(body))
}

impl Server {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store = match &config.data_file {
            Some(path) => Store::open(path)
                .with_context(|| format!("failed to open inventory snapshot {}", path.display()))?,
            None => Store::in_memory(),
        };
        let connector =
            UispConnector::new(&config.source).context("failed to build source connector")?;
        Ok(Self::from_parts(config, Arc::new(store), Arc::new(connector)))
    }

    pub fn from_parts(
        config: AppConfig,
        store: Arc<Store>,
        connector: Arc<dyn SourceConnector>,
    ) -> Self {
        let config = Arc::new(config);
        let state = AppState::new(Arc::clone(&config), store, connector);
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(Self::health))
            .route("/telemetry/ingest", post(Self::ingest_telemetry))
            .route("/events/ingest", post(Self::ingest_event))
            .route("/devices", get(Self::devices))
            .route("/incidents", get(Self::incidents))
            .route("/incidents/:id/ack", post(Self::ack_incident))
            .route("/agents", get(Self::agents))
            .route("/agents/register", post(Self::register_agent))
            .route("/inventory/schema", get(Self::schema))
            .route("/inventory/identities", get(Self::identities))
            .route("/inventory/identities/merge", post(Self::merge_identities))
            .route("/inventory/observations", get(Self::observations))
            .route("/inventory/drift", get(Self::drift))
            .route("/inventory/interfaces", get(Self::interfaces))
            .route("/inventory/neighbors", get(Self::neighbors))
            .route("/inventory/lifecycle", get(Self::lifecycle))
            .route("/topology/nodes", get(Self::topology_nodes))
            .route("/topology/edges", get(Self::topology_edges))
            .route("/topology/health", get(Self::topology_health))
            .route("/topology/path", get(Self::topology_path))
            .route("/sources/uisp/status", get(Self::source_status))
            .route("/sources/uisp/poll", post(Self::source_poll))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = self.state.shutdown.clone();
        let poller = self.config.source.poll_interval.map(|interval| {
            tokio::spawn(run_source_poller(
                Arc::clone(&self.state.connector),
                Arc::clone(&self.state.store),
                interval,
                self.config.source.poll_retries,
                shutdown.clone(),
            ))
        });

        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "device inventory listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
            .await?;

        shutdown.cancel();
        if let Some(handle) = poller {
            if let Err(err) = handle.await {
                warn!(error = %err, "source poller task ended abnormally");
            }
        }
        Ok(())
    }

    async fn health() -> Json<Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn ingest_telemetry(
        State(state): State<AppState>,
        Json(request): Json<TelemetryIngestRequest>,
    ) -> Result<Json<IngestResponse>> {
        let event_type = request.event_type.clone();
        let outcome = with_store(&state.store, move |store| store.ingest(request)).await??;
        info!(
            device_id = %outcome.device.id,
            event_type = %event_type,
            source = %outcome.device.source,
            online = outcome.device.online,
            "telemetry ingested"
        );
        Ok(Json(outcome.into()))
    }

    async fn ingest_event(
        State(state): State<AppState>,
        Json(request): Json<EventIngestRequest>,
    ) -> Result<Json<IngestResponse>> {
        let outcome = with_store(&state.store, move |store| store.ingest_event(request)).await??;
        info!(
            device_id = %outcome.device.id,
            online = outcome.device.online,
            "event ingested"
        );
        Ok(Json(outcome.into()))
    }

    async fn devices(State(state): State<AppState>) -> Json<Value> {
        Json(json!({
            "last_updated": now_ms(),
            "devices": state.store.list_devices(),
        }))
    }

    async fn incidents(State(state): State<AppState>) -> Json<Value> {
        Json(json!({ "incidents": state.store.list_incidents() }))
    }

    async fn ack_incident(
        State(state): State<AppState>,
        Path(id): Path<String>,
        body: Option<Json<AckRequest>>,
    ) -> Result<Json<crate::models::Incident>> {
        let minutes = body.map(|Json(req)| req.duration_minutes).unwrap_or_default();
        let incident =
            with_store(&state.store, move |store| store.ack_incident(&id, minutes)).await??;
        Ok(Json(incident))
    }

    async fn agents(State(state): State<AppState>) -> Json<Value> {
        Json(json!({ "agents": state.store.list_agents() }))
    }

    async fn register_agent(
        State(state): State<AppState>,
        Json(request): Json<AgentRegisterRequest>,
    ) -> Result<Json<Value>> {
        let agent = with_store(&state.store, move |store| store.register_agent(request)).await?;
        info!(agent_id = %agent.id, site_id = %agent.site_id, version = %agent.version, "agent registered");
        Ok(Json(json!({ "agent": agent })))
    }

    async fn schema(State(state): State<AppState>) -> Json<crate::models::InventorySchema> {
        Json(state.store.inventory_schema())
    }

    async fn identities(
        State(state): State<AppState>,
        Query(query): Query<ListQuery>,
    ) -> Result<Json<Value>> {
        listing("identities", state.store.list_identities(query.limit))
    }

    async fn merge_identities(
        State(state): State<AppState>,
        Json(request): Json<IdentityMergeRequest>,
    ) -> Result<Json<Value>> {
        let (identity, merged) = with_store(&state.store, move |store| {
            store.merge_identities(&request.primary_id, &request.secondaries())
        })
        .await??;
        Ok(Json(json!({
            "identity": identity,
            "merged_ids": merged,
        })))
    }

    async fn observations(
        State(state): State<AppState>,
        Query(query): Query<ListQuery>,
    ) -> Result<Json<Value>> {
        listing(
            "observations",
            state.store.list_observations(query.limit, &query.identity_id),
        )
    }

    async fn drift(
        State(state): State<AppState>,
        Query(query): Query<ListQuery>,
    ) -> Result<Json<Value>> {
        listing(
            "snapshots",
            state.store.list_drift(query.limit, &query.identity_id),
        )
    }

    async fn interfaces(
        State(state): State<AppState>,
        Query(query): Query<ListQuery>,
    ) -> Result<Json<Value>> {
        listing(
            "interfaces",
            state.store.list_interfaces(query.limit, &query.identity_id),
        )
    }

    async fn neighbors(
        State(state): State<AppState>,
        Query(query): Query<ListQuery>,
    ) -> Result<Json<Value>> {
        listing(
            "neighbors",
            state.store.list_neighbors(query.limit, &query.identity_id),
        )
    }

    async fn lifecycle(
        State(state): State<AppState>,
        Query(query): Query<ListQuery>,
    ) -> Result<Json<Value>> {
        listing(
            "scores",
            state
                .store
                .list_lifecycle_scores(query.limit, &query.identity_id),
        )
    }

    async fn topology_nodes(
        State(state): State<AppState>,
        Query(query): Query<ListQuery>,
    ) -> Result<Json<Value>> {
        listing(
            "nodes",
            state.store.list_topology_nodes(query.limit, &query.site_id),
        )
    }

    async fn topology_edges(
        State(state): State<AppState>,
        Query(query): Query<ListQuery>,
    ) -> Result<Json<Value>> {
        listing(
            "edges",
            state.store.list_topology_edges(query.limit, &query.identity_id),
        )
    }

    async fn topology_health(State(state): State<AppState>) -> Json<crate::models::TopologyHealth> {
        Json(state.store.topology_health())
    }

    async fn topology_path(
        State(state): State<AppState>,
        Query(query): Query<PathQuery>,
    ) -> Json<crate::topology::TopologyPath> {
        Json(state.store.trace_path(&query))
    }

    async fn source_status(State(state): State<AppState>) -> Json<crate::models::SourceStatus> {
        Json(state.connector.status())
    }

    async fn source_poll(
        State(state): State<AppState>,
        body: Option<Json<SourcePollRequest>>,
    ) -> Response {
        let request = body.map(|Json(req)| req).unwrap_or_default();
        let mut batch = match state.connector.poll(request, &state.shutdown).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(source = %err.source_name, error = %err.error, "manual source poll failed");
                return (StatusCode::BAD_GATEWAY, Json(err.response)).into_response();
            }
        };

        let events = std::mem::take(&mut batch.events);
        let (ingested, incidents) =
            match with_store(&state.store, move |store| ingest_source_events(store, events)).await {
                Ok(counts) => counts,
                Err(err) => return err.into_response(),
            };
        batch.response.ingested = ingested;
        batch.response.incidents_created = incidents;
        info!(
            source = %batch.response.source,
            fetched = batch.response.fetched,
            normalized = batch.response.normalized,
            emitted = batch.response.emitted,
            ingested,
            incidents,
            demo = batch.response.demo,
            "manual source poll"
        );
        Json(batch.response).into_response()
    }
}

/// Resolves on Ctrl+C, SIGTERM or an external cancel of `token`.
async fn shutdown_signal(token: tokio_util::sync::CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
        _ = token.cancelled() => {}
    }
}
