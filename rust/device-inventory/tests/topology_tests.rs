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

use device_inventory::{
    models::{NodeKind, TelemetryIngestRequest, TelemetryNeighborFact},
    store::Store,
    topology::{PathFailure, PathQuery},
};
use pretty_assertions::assert_eq;

fn device(store: &Store, device_id: &str, neighbors: Vec<TelemetryNeighborFact>) -> String {
    store
        .ingest(TelemetryIngestRequest {
            source: "agent".into(),
            device_id: device_id.to_string(),
            device: device_id.to_uppercase(),
            site_id: "lab".into(),
            neighbors,
            ..Default::default()
        })
        .expect("ingest accepted")
        .identity
        .expect("identity")
        .identity_id
}

fn neighbor(local: &str, name: &str) -> TelemetryNeighborFact {
    TelemetryNeighborFact {
        local_interface: local.to_string(),
        neighbor_device_name: name.to_string(),
        protocol: "lldp".into(),
        ..Default::default()
    }
}

#[test]
fn known_and_unknown_neighbors() {
    let store = Store::in_memory();
    let core = device(&store, "core", vec![]);
    let edge = device(
        &store,
        "edge",
        vec![neighbor("eth0", "CORE"), neighbor("eth1", "mystery-box")],
    );

    let edges = store.list_topology_edges(0, &edge).items;
    assert_eq!(edges.len(), 2);

    let resolved: Vec<_> = edges.iter().filter(|e| e.resolved).collect();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].to_node_id, format!("ident:{core}"));

    let unresolved: Vec<_> = edges.iter().filter(|e| !e.resolved).collect();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].to_node_id, "unresolved:mystery-box");

    let health = store.topology_health();
    assert_eq!(health.unknown_neighbor_edges, unresolved.len());
    assert_eq!(health.managed_node_count, 2);
    assert_eq!(health.node_count, 3);
    assert_eq!(health.edge_count, 2);
    assert_eq!(health.isolated_managed_nodes, 0);
    assert_eq!(health.connected_components, 1);

    let external = store
        .list_topology_nodes(0, "")
        .items
        .into_iter()
        .find(|node| node.kind == NodeKind::External)
        .expect("external node");
    assert_eq!(external.label, "mystery-box");
}

#[test]
fn reingesting_neighbors_does_not_duplicate_edges() {
    let store = Store::in_memory();
    device(&store, "core", vec![]);
    for _ in 0..3 {
        device(&store, "edge", vec![neighbor("eth0", "CORE")]);
    }
    assert_eq!(store.topology_health().edge_count, 1);
}

#[test]
fn site_filter_only_returns_managed_nodes() {
    let store = Store::in_memory();
    device(&store, "edge", vec![neighbor("eth0", "isp-modem")]);
    store
        .ingest(TelemetryIngestRequest {
            device_id: "remote".into(),
            site_id: "branch".into(),
            ..Default::default()
        })
        .unwrap();

    let lab = store.list_topology_nodes(0, " LAB ").items;
    assert_eq!(lab.len(), 1);
    assert_eq!(lab[0].label, "EDGE");
    assert_eq!(store.list_topology_nodes(0, "").items.len(), 3);

    let page = store.list_topology_nodes(1, "");
    assert!(page.truncated);
}

#[test]
fn shortest_path_over_chain() {
    let store = Store::in_memory();
    let a = device(&store, "a", vec![neighbor("eth0", "B")]);
    let b = device(&store, "b", vec![]);
    let c = device(&store, "c", vec![neighbor("eth0", "B")]);

    let path = store.trace_path(&PathQuery::between_identities(&a, &c));
    assert!(path.found);
    let hops: Vec<_> = path.nodes.iter().map(|node| node.identity_id.clone()).collect();
    assert_eq!(hops, vec![a.clone(), b, c]);
    assert_eq!(path.edges.len(), 2);

    let missing = store.trace_path(&PathQuery {
        source_node_id: format!("ident:{a}"),
        target_node_id: "ident:does-not-exist".into(),
        ..Default::default()
    });
    assert!(!missing.found);
    assert_eq!(missing.failure, Some(PathFailure::TargetNotFound));
    assert!(missing.nodes.is_empty());
}

#[test]
fn listings_are_stable_between_reads() {
    let store = Store::in_memory();
    device(&store, "x", vec![neighbor("eth0", "Y"), neighbor("eth1", "unknown-1")]);
    device(&store, "y", vec![neighbor("eth0", "X")]);

    let first = store.list_topology_nodes(0, "").items;
    let second = store.list_topology_nodes(0, "").items;
    assert_eq!(first, second);
    assert_eq!(
        store.list_topology_edges(0, "").items,
        store.list_topology_edges(0, "").items
    );
}
