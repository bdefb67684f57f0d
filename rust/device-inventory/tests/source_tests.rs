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

use axum::{
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use device_inventory::{
    config::SourceConfig,
    error::SourceError,
    models::SourcePollRequest,
    source::{ingest_source_events, SourceConnector, UispConnector},
    store::Store,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "s3cret";

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn demo() -> UispConnector {
    UispConnector::new(&SourceConfig::default()).unwrap()
}

fn with_cursor(cursor: &str) -> SourcePollRequest {
    SourcePollRequest {
        cursor: cursor.to_string(),
        ..Default::default()
    }
}

async fn spawn_remote(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn live(base_url: String) -> UispConnector {
    UispConnector::new(&SourceConfig {
        base_url,
        token: TOKEN.to_string(),
        devices_path: "/devices".into(),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn unconfigured_connector_polls_demo_and_dedups_per_cursor() {
    let connector = demo();
    let cancel = CancellationToken::new();

    // AP offline on the first tick, online on the next, offline again after.
    let down = connector
        .poll_at(with_cursor("c-1"), &cancel, at(1_700_000_010))
        .await
        .unwrap();
    assert!(down.response.demo);
    assert!(down.response.backfill);
    assert_eq!(down.response.cursor, "c-1");
    assert_eq!(down.response.emitted, 1);
    assert_eq!(down.events[0].event_type, "device_down");

    let up = connector
        .poll_at(with_cursor("c-1"), &cancel, at(1_700_000_040))
        .await
        .unwrap();
    assert_eq!(up.response.emitted, 1);
    assert_eq!(up.events[0].event_type, "device_up");

    let repeat = connector
        .poll_at(with_cursor("c-1"), &cancel, at(1_700_000_070))
        .await
        .unwrap();
    assert_eq!(repeat.response.emitted, 0);
    assert_eq!(repeat.response.deduped, 1);

    let status = connector.status();
    assert_eq!(status.last_cursor, "c-1");
    assert_eq!(status.last_fetched, 3);
    assert_eq!(status.last_emitted, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn dedup_window_expires_after_an_hour() {
    let connector = demo();
    let cancel = CancellationToken::new();
    for secs in [1_700_000_010, 1_700_000_040] {
        connector
            .poll_at(with_cursor("c-9"), &cancel, at(secs))
            .await
            .unwrap();
    }

    // Same transition and cursor, but past the window.
    let later = connector
        .poll_at(with_cursor("c-9"), &cancel, at(1_700_000_010 + 2 * 3600))
        .await
        .unwrap();
    assert_eq!(later.response.emitted, 1);
    assert_eq!(later.response.deduped, 0);
}

#[tokio::test]
async fn demo_events_feed_the_store() {
    let store = Store::in_memory();
    let batch = demo()
        .poll_at(SourcePollRequest::default(), &CancellationToken::new(), at(1_700_000_010))
        .await
        .unwrap();

    let (ingested, incidents) = ingest_source_events(&store, batch.events);
    assert_eq!((ingested, incidents), (1, 1));
    let devices = store.list_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "uisp-ap-1");
    assert_eq!(devices[0].source, "uisp");
    assert!(!devices[0].online);
}

#[tokio::test]
async fn live_fetch_sends_credentials_and_parses_devices() {
    let router = Router::new().route(
        "/devices",
        get(|headers: HeaderMap| async move {
            let bearer = headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let api_key = headers
                .get("x-auth-token")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if bearer != format!("Bearer {TOKEN}") || api_key != TOKEN {
                return (StatusCode::UNAUTHORIZED, Json(json!({"error": "denied"})));
            }
            let body: Value = json!({
                "devices": [
                    {
                        "identification": {"id": "dev-1", "name": "Tower 1", "mac": "AA:00:00:00:00:01"},
                        "overview": {"status": "active"}
                    },
                    {
                        "identification": {"id": "dev-2", "name": "Tower 2"},
                        "overview": {"status": "disconnected", "latency": 42}
                    },
                    {"name": "no id"}
                ]
            });
            (StatusCode::OK, Json(body))
        }),
    );
    let connector = live(spawn_remote(router).await);
    assert!(connector.is_live());

    let batch = connector
        .poll(SourcePollRequest::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!batch.response.demo);
    assert_eq!(batch.response.fetched, 2);
    assert_eq!(batch.response.normalized, 2);
    assert_eq!(batch.response.emitted, 1);
    assert_eq!(batch.events[0].device_id, "dev-2");
    assert_eq!(batch.events[0].latency_ms, Some(42.0));
}

#[tokio::test]
async fn failed_fetch_returns_partial_response_and_records_status() {
    let router = Router::new().route(
        "/devices",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let connector = live(spawn_remote(router).await);

    let err = connector
        .poll(
            SourcePollRequest {
                retries: 1,
                ..with_cursor("c-err")
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.error, SourceError::Unreachable(_)));
    assert_eq!(err.response.cursor, "c-err");
    assert!(err.response.backfill);
    assert!(!err.response.demo);
    assert!(err.response.error.as_deref().unwrap().contains("500"));

    let status = connector.status();
    assert_eq!(status.last_cursor, "c-err");
    assert!(status.last_error.is_some());
    assert_eq!(status.last_fetched, 0);
}

#[tokio::test]
async fn empty_remote_payload_is_an_error() {
    let router = Router::new().route("/devices", get(|| async { Json(json!({"devices": []})) }));
    let connector = live(spawn_remote(router).await);
    let err = connector
        .poll(SourcePollRequest::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.error, SourceError::EmptyPayload));
}

#[tokio::test]
async fn cancelled_poll_stops_before_fetching() {
    let connector = live("http://127.0.0.1:9".to_string());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = connector
        .poll(SourcePollRequest { retries: 5, ..Default::default() }, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err.error, SourceError::Cancelled));
}
