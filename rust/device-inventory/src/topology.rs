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

//! Topology graph derived from identities and neighbor links.
//!
//! Nothing here is cached: every read rebuilds the graph so it always
//! reflects the latest committed store state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::keys::{first_non_empty, normalize_key_token};
use crate::models::{
    DeviceIdentity, NeighborLink, NodeKind, TopologyEdge, TopologyHealth, TopologyNode,
};

const STALE_AFTER_MS: i64 = 24 * 60 * 60 * 1000;

pub fn node_id_for_identity(identity_id: &str) -> String {
    match identity_id.trim() {
        "" => String::new(),
        id => format!("ident:{id}"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    /// Sorted by (kind, label, node id).
    pub nodes: Vec<TopologyNode>,
    /// Sorted by (from, to, edge id).
    pub edges: Vec<TopologyEdge>,
    pub health: TopologyHealth,
}

/// Tokens under which an identity can be referenced by a neighbor hint.
fn identity_tokens(identity: &DeviceIdentity) -> Vec<String> {
    let mut tokens = Vec::with_capacity(7);
    for raw in [
        identity.identity_id.clone(),
        format!("identity:{}", identity.identity_id),
        identity.primary_device_id.clone(),
        identity.name.clone(),
        identity.hostname.clone(),
        identity.mac_address.clone(),
        identity.serial_number.clone(),
    ] {
        let token = normalize_key_token(&raw);
        if !token.is_empty() && !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

fn resolve_neighbor(link: &NeighborLink, token_to_node: &HashMap<String, String>) -> Option<String> {
    let hint = link.neighbor_identity_hint.trim();
    let mut candidates = Vec::with_capacity(3);
    if !hint.is_empty() {
        candidates.push(normalize_key_token(hint));
        candidates.push(normalize_key_token(&format!("identity:{hint}")));
    }
    candidates.push(normalize_key_token(&link.neighbor_device_name));

    candidates
        .into_iter()
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| token_to_node.get(&candidate).cloned())
}

fn undirected_adjacency<'a>(
    edges: &'a [TopologyEdge],
) -> HashMap<&'a str, Vec<&'a str>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        if edge.from_node_id.is_empty() || edge.to_node_id.is_empty() {
            continue;
        }
        adjacency
            .entry(edge.from_node_id.as_str())
            .or_default()
            .push(edge.to_node_id.as_str());
        adjacency
            .entry(edge.to_node_id.as_str())
            .or_default()
            .push(edge.from_node_id.as_str());
    }
    adjacency
}

fn connected_components(nodes: &[TopologyNode], edges: &[TopologyEdge]) -> usize {
    let adjacency = undirected_adjacency(edges);
    let mut visited: HashSet<&str> = HashSet::with_capacity(nodes.len());
    let mut queue = VecDeque::new();
    let mut components = 0;

    for start in nodes.iter().map(|node| node.node_id.as_str()) {
        if start.is_empty() || !visited.insert(start) {
            continue;
        }
        components += 1;
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            for &next in adjacency.get(current).into_iter().flatten() {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
    }
    components
}

/// Builds nodes, edges and health counters.
///
/// Every identity yields a managed node. Each neighbor link yields at most
/// one edge from its owning identity's node; the far end is the managed node
/// matching one of the link's hints, or a synthesized external node.
pub fn build_graph(
    identities: &[DeviceIdentity],
    neighbors: &[NeighborLink],
    now: DateTime<Utc>,
) -> TopologyGraph {
    let mut nodes_by_id: HashMap<String, TopologyNode> = HashMap::with_capacity(identities.len());
    let mut token_to_node: HashMap<String, String> = HashMap::with_capacity(identities.len() * 5);
    let mut managed: Vec<String> = Vec::with_capacity(identities.len());

    for identity in identities {
        let identity_id = identity.identity_id.trim();
        if identity_id.is_empty() {
            continue;
        }
        let node_id = node_id_for_identity(identity_id);
        nodes_by_id.insert(
            node_id.clone(),
            TopologyNode {
                node_id: node_id.clone(),
                identity_id: identity_id.to_string(),
                label: first_non_empty([
                    identity.name.as_str(),
                    identity.primary_device_id.as_str(),
                    identity_id,
                ]),
                role: identity.role.trim().to_string(),
                site_id: identity.site_id.trim().to_string(),
                last_seen: identity.last_seen,
                kind: NodeKind::Managed,
                source_refs_count: identity.source_refs.len(),
            },
        );
        for token in identity_tokens(identity) {
            token_to_node.entry(token).or_insert_with(|| node_id.clone());
        }
        managed.push(node_id);
    }

    let mut edges_by_key: HashMap<String, TopologyEdge> = HashMap::with_capacity(neighbors.len());
    let mut degree: HashMap<String, usize> = HashMap::new();
    let mut unresolved = 0;

    for link in neighbors {
        let source_identity = link.identity_id.trim();
        if source_identity.is_empty() {
            continue;
        }
        let from = node_id_for_identity(source_identity);
        if !nodes_by_id.contains_key(&from) {
            nodes_by_id.insert(
                from.clone(),
                TopologyNode {
                    node_id: from.clone(),
                    identity_id: source_identity.to_string(),
                    label: source_identity.to_string(),
                    role: String::new(),
                    site_id: String::new(),
                    last_seen: 0,
                    kind: NodeKind::Managed,
                    source_refs_count: 0,
                },
            );
            managed.push(from.clone());
        }

        let (to, resolved) = match resolve_neighbor(link, &token_to_node) {
            Some(node_id) => (node_id, true),
            None => {
                let token = normalize_key_token(&first_non_empty([
                    link.neighbor_identity_hint.as_str(),
                    link.neighbor_device_name.as_str(),
                    link.neighbor_interface_hint.as_str(),
                    link.id.as_str(),
                ]));
                let token = if token.is_empty() {
                    "unknown".to_string()
                } else {
                    token
                };
                (format!("unresolved:{token}"), false)
            }
        };
        nodes_by_id.entry(to.clone()).or_insert_with(|| TopologyNode {
            node_id: to.clone(),
            identity_id: String::new(),
            label: first_non_empty([
                link.neighbor_device_name.as_str(),
                link.neighbor_identity_hint.as_str(),
                to.as_str(),
            ]),
            role: String::new(),
            site_id: String::new(),
            last_seen: 0,
            kind: if to.starts_with("ident:") {
                NodeKind::Managed
            } else {
                NodeKind::External
            },
            source_refs_count: 0,
        });

        let local_interface = link.local_interface.trim();
        let neighbor_interface = link.neighbor_interface_hint.trim();
        let protocol = link.protocol.trim();
        let key = normalize_key_token(
            &[from.as_str(), to.as_str(), local_interface, neighbor_interface, protocol].join("|"),
        );
        if edges_by_key.contains_key(&key) {
            continue;
        }

        *degree.entry(from.clone()).or_default() += 1;
        *degree.entry(to.clone()).or_default() += 1;
        if !resolved {
            unresolved += 1;
        }
        edges_by_key.insert(
            key.clone(),
            TopologyEdge {
                edge_id: format!("edge-{key}"),
                from_node_id: from,
                to_node_id: to,
                source_identity_id: source_identity.to_string(),
                target_identity_hint: link.neighbor_identity_hint.trim().to_string(),
                local_interface: local_interface.to_string(),
                neighbor_interface: neighbor_interface.to_string(),
                protocol: protocol.to_string(),
                source: link.source.trim().to_string(),
                updated_at: Some(link.updated_at),
                resolved,
            },
        );
    }

    let mut isolated = 0;
    let mut stale = 0;
    let mut managed_seen: HashSet<&str> = HashSet::with_capacity(managed.len());
    let now_ms = now.timestamp_millis();
    for node_id in &managed {
        if !managed_seen.insert(node_id.as_str()) {
            continue;
        }
        let Some(node) = nodes_by_id.get(node_id) else {
            continue;
        };
        if degree.get(node_id).copied().unwrap_or(0) == 0 {
            isolated += 1;
        }
        if node.last_seen > 0 && now_ms - node.last_seen > STALE_AFTER_MS {
            stale += 1;
        }
    }
    let managed_count = managed_seen.len();

    let mut nodes: Vec<TopologyNode> = nodes_by_id.into_values().collect();
    nodes.sort_by(|a, b| {
        (a.kind, &a.label, &a.node_id).cmp(&(b.kind, &b.label, &b.node_id))
    });
    let mut edges: Vec<TopologyEdge> = edges_by_key.into_values().collect();
    edges.sort_by(|a, b| {
        (&a.from_node_id, &a.to_node_id, &a.edge_id).cmp(&(&b.from_node_id, &b.to_node_id, &b.edge_id))
    });

    let health = TopologyHealth {
        node_count: nodes.len(),
        managed_node_count: managed_count,
        edge_count: edges.len(),
        unknown_neighbor_edges: unresolved,
        isolated_managed_nodes: isolated,
        stale_managed_nodes_24h: stale,
        connected_components: connected_components(&nodes, &edges),
    };

    TopologyGraph {
        nodes,
        edges,
        health,
    }
}

/// Endpoints for a path trace. Node ids win over identity ids.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathQuery {
    pub source_identity_id: String,
    pub target_identity_id: String,
    pub source_node_id: String,
    pub target_node_id: String,
}

impl PathQuery {
    pub fn between_identities(source: &str, target: &str) -> Self {
        Self {
            source_identity_id: source.to_string(),
            target_identity_id: target.to_string(),
            ..Default::default()
        }
    }

    fn endpoints(&self) -> (String, String) {
        let pick = |node_id: &str, identity_id: &str| match node_id.trim() {
            "" => node_id_for_identity(identity_id),
            node_id => node_id.to_string(),
        };
        (
            pick(&self.source_node_id, &self.source_identity_id),
            pick(&self.target_node_id, &self.target_identity_id),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathFailure {
    MissingEndpoints,
    SourceNotFound,
    TargetNotFound,
    NoPath,
}

impl PathFailure {
    pub fn message(&self) -> &'static str {
        match self {
            PathFailure::MissingEndpoints => "source and target are required",
            PathFailure::SourceNotFound => "source node not found",
            PathFailure::TargetNotFound => "target node not found",
            PathFailure::NoPath => "no path found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyPath {
    pub found: bool,
    pub source_node_id: String,
    pub target_node_id: String,
    pub hop_count: usize,
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PathFailure>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl TopologyPath {
    fn failed(source: String, target: String, failure: PathFailure) -> Self {
        Self {
            found: false,
            source_node_id: source,
            target_node_id: target,
            hop_count: 0,
            nodes: Vec::new(),
            edges: Vec::new(),
            failure: Some(failure),
            message: failure.message().to_string(),
        }
    }
}

impl TopologyGraph {
    /// Breadth-first shortest path over the undirected graph.
    pub fn trace_path(&self, query: &PathQuery) -> TopologyPath {
        let (source, target) = query.endpoints();
        match self.shortest_path(&source, &target) {
            Ok((nodes, edges)) => TopologyPath {
                found: true,
                hop_count: edges.len(),
                message: if source == target {
                    "source equals target".to_string()
                } else {
                    String::new()
                },
                source_node_id: source,
                target_node_id: target,
                nodes,
                edges,
                failure: None,
            },
            Err(failure) => TopologyPath::failed(source, target, failure),
        }
    }

    fn shortest_path(
        &self,
        source: &str,
        target: &str,
    ) -> Result<(Vec<TopologyNode>, Vec<TopologyEdge>), PathFailure> {
        if source.is_empty() || target.is_empty() {
            return Err(PathFailure::MissingEndpoints);
        }

        let node_by_id: HashMap<&str, &TopologyNode> = self
            .nodes
            .iter()
            .map(|node| (node.node_id.as_str(), node))
            .collect();
        let source_node = node_by_id
            .get(source)
            .ok_or(PathFailure::SourceNotFound)?;
        if !node_by_id.contains_key(target) {
            return Err(PathFailure::TargetNotFound);
        }
        if source == target {
            return Ok((vec![(*source_node).clone()], Vec::new()));
        }

        let adjacency = undirected_adjacency(&self.edges);
        let mut edge_by_pair: HashMap<(&str, &str), &TopologyEdge> =
            HashMap::with_capacity(self.edges.len() * 2);
        for edge in &self.edges {
            let (from, to) = (edge.from_node_id.as_str(), edge.to_node_id.as_str());
            edge_by_pair.insert((from, to), edge);
            edge_by_pair.insert((to, from), edge);
        }

        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([source]);
        let mut queue = VecDeque::from([source]);
        let mut found = false;
        'search: while let Some(current) = queue.pop_front() {
            for &next in adjacency.get(current).into_iter().flatten() {
                if !visited.insert(next) {
                    continue;
                }
                parent.insert(next, current);
                if next == target {
                    found = true;
                    break 'search;
                }
                queue.push_back(next);
            }
        }
        if !found {
            return Err(PathFailure::NoPath);
        }

        let mut hops = vec![target];
        let mut cursor = target;
        while let Some(&previous) = parent.get(cursor) {
            hops.push(previous);
            cursor = previous;
        }
        hops.reverse();

        let nodes = hops
            .iter()
            .filter_map(|id| node_by_id.get(id).map(|node| (*node).clone()))
            .collect();
        let edges = hops
            .windows(2)
            .filter_map(|pair| edge_by_pair.get(&(pair[0], pair[1])).map(|edge| (*edge).clone()))
            .collect();
        Ok((nodes, edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn identity(id: &str, name: &str) -> DeviceIdentity {
        DeviceIdentity {
            identity_id: id.to_string(),
            primary_device_id: format!("{id}-dev"),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn link(owner: &str, local: &str, hint: &str, name: &str) -> NeighborLink {
        NeighborLink {
            id: format!("nbr-{owner}-{local}"),
            identity_id: owner.to_string(),
            local_interface: local.to_string(),
            neighbor_identity_hint: hint.to_string(),
            neighbor_device_name: name.to_string(),
            protocol: "lldp".into(),
            source: "agent".into(),
            ..Default::default()
        }
    }

    #[test]
    fn hints_resolve_by_identity_prefix_and_name() {
        let identities = vec![identity("a", "Edge"), identity("b", "Core Switch")];
        let neighbors = vec![
            link("a", "eth0", "identity:b", ""),
            link("a", "eth1", "", "core switch"),
        ];
        let graph = build_graph(&identities, &neighbors, Utc::now());
        assert_eq!(graph.edges.len(), 2);
        assert!(graph.edges.iter().all(|edge| edge.resolved && edge.to_node_id == "ident:b"));
        assert_eq!(graph.health.unknown_neighbor_edges, 0);
        assert_eq!(graph.health.connected_components, 1);
    }

    #[test]
    fn unresolved_links_create_external_nodes() {
        let identities = vec![identity("a", "Edge")];
        let neighbors = vec![
            link("a", "eth0", "", "ISP Router"),
            link("a", "eth1", "", ""),
        ];
        let graph = build_graph(&identities, &neighbors, Utc::now());

        let external: Vec<_> = graph
            .nodes
            .iter()
            .filter(|node| node.kind == NodeKind::External)
            .map(|node| (node.node_id.as_str(), node.label.as_str()))
            .collect();
        assert_eq!(
            external,
            vec![
                ("unresolved:isprouter", "ISP Router"),
                ("unresolved:nbr-a-eth1", "unresolved:nbr-a-eth1"),
            ]
        );
        assert_eq!(graph.health.unknown_neighbor_edges, 2);
        assert_eq!(graph.health.node_count, 3);
        assert_eq!(graph.health.isolated_managed_nodes, 0);
    }

    #[test]
    fn duplicate_links_yield_one_edge() {
        let identities = vec![identity("a", "A"), identity("b", "B")];
        let mut second = link("a", "eth0", "b", "");
        second.id = "nbr-other".into();
        second.source = "snmp".into();
        let neighbors = vec![link("a", "eth0", "b", ""), second];
        let graph = build_graph(&identities, &neighbors, Utc::now());
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].edge_id, "edge-ident:a|ident:b|eth0||lldp");
    }

    #[test]
    fn missing_owner_is_synthesized_as_managed() {
        let graph = build_graph(&[], &[link("ghost", "eth0", "", "peer")], Utc::now());
        let ghost = graph
            .nodes
            .iter()
            .find(|node| node.node_id == "ident:ghost")
            .expect("owner node");
        assert_eq!(ghost.kind, NodeKind::Managed);
        assert_eq!(ghost.label, "ghost");
        assert_eq!(graph.health.managed_node_count, 1);
    }

    #[test]
    fn health_counts_isolated_and_stale_nodes() {
        let now = Utc::now();
        let mut stale = identity("old", "Old AP");
        stale.last_seen = (now - Duration::hours(30)).timestamp_millis();
        let mut fresh = identity("new", "New AP");
        fresh.last_seen = now.timestamp_millis();
        let never = identity("never", "Never Seen");

        let graph = build_graph(&[stale, fresh, never], &[], now);
        assert_eq!(graph.health.managed_node_count, 3);
        assert_eq!(graph.health.isolated_managed_nodes, 3);
        assert_eq!(graph.health.stale_managed_nodes_24h, 1);
        assert_eq!(graph.health.connected_components, 3);
    }

    #[test]
    fn nodes_sort_external_before_managed_then_by_label() {
        let identities = vec![identity("z", "Alpha"), identity("y", "Beta")];
        let graph = build_graph(&identities, &[link("y", "eth0", "", "Zulu")], Utc::now());
        let labels: Vec<_> = graph.nodes.iter().map(|node| node.label.as_str()).collect();
        assert_eq!(labels, vec!["Zulu", "Alpha", "Beta"]);
    }

    #[test]
    fn path_over_chain_and_failures() {
        let identities = vec![identity("a", "A"), identity("b", "B"), identity("c", "C")];
        let neighbors = vec![link("a", "eth0", "b", ""), link("c", "eth0", "b", "")];
        let graph = build_graph(&identities, &neighbors, Utc::now());

        let path = graph.trace_path(&PathQuery::between_identities("a", "c"));
        assert!(path.found);
        assert_eq!(path.nodes.len(), 3);
        assert_eq!(path.edges.len(), 2);
        assert_eq!(path.hop_count, 2);
        assert_eq!(path.nodes[1].node_id, "ident:b");

        let same = graph.trace_path(&PathQuery::between_identities("b", "b"));
        assert!(same.found);
        assert_eq!(same.nodes.len(), 1);
        assert!(same.edges.is_empty());

        let missing = graph.trace_path(&PathQuery::between_identities("a", "zz"));
        assert!(!missing.found);
        assert_eq!(missing.failure, Some(PathFailure::TargetNotFound));

        let empty = graph.trace_path(&PathQuery::default());
        assert_eq!(empty.failure, Some(PathFailure::MissingEndpoints));
    }

    #[test]
    fn disconnected_nodes_report_no_path() {
        let identities = vec![identity("a", "A"), identity("b", "B")];
        let graph = build_graph(&identities, &[], Utc::now());
        let path = graph.trace_path(&PathQuery {
            source_node_id: "ident:a".into(),
            target_node_id: "ident:b".into(),
            ..Default::default()
        });
        assert!(!path.found);
        assert_eq!(path.failure, Some(PathFailure::NoPath));
        assert_eq!(path.message, "no path found");
    }
}
