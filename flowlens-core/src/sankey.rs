// Sankey diagram: source -> application -> destination volume flow

use crate::classify::strip_prefix;
use crate::model::{FlowRecord, NodeKind, SankeyLink, SankeyNode};
use crate::resolve::HostLabels;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label used for flows the firewall could not attribute to an application.
pub const UNKNOWN_APPLICATION: &str = "unknown";

/// How endpoint addresses turn into node names.
pub trait NodeLabels {
    /// Name for a source endpoint (device name when known).
    fn source_label(&self, ip: &str) -> String;
    /// Resolved hostname for a destination, if any.
    fn destination_host(&self, ip: &str) -> Option<String>;
}

/// Plain addresses everywhere.
pub struct RawLabels;

impl NodeLabels for RawLabels {
    fn source_label(&self, ip: &str) -> String {
        ip.to_string()
    }

    fn destination_host(&self, _ip: &str) -> Option<String> {
        None
    }
}

impl NodeLabels for HostLabels {
    fn source_label(&self, ip: &str) -> String {
        self.device(ip).unwrap_or(ip).to_string()
    }

    fn destination_host(&self, ip: &str) -> Option<String> {
        self.hostname(ip).map(str::to_string)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SankeyGraph {
    pub nodes: Vec<SankeyNode>,
    pub links: Vec<SankeyLink>,
}

impl SankeyGraph {
    /// Build the three-layer graph. Zero-byte flows are dropped; links
    /// between the same pair of nodes are merged by summing their values.
    pub fn build(flows: &[FlowRecord], labels: &impl NodeLabels) -> Self {
        let mut graph: DiGraph<SankeyNode, u64> = DiGraph::new();
        let mut index: HashMap<(NodeKind, String), NodeIndex> = HashMap::new();

        let mut node = |graph: &mut DiGraph<SankeyNode, u64>,
                        kind: NodeKind,
                        name: String,
                        original_ip: Option<String>| {
            *index.entry((kind, name.clone())).or_insert_with(|| {
                graph.add_node(SankeyNode {
                    name,
                    kind,
                    original_ip,
                })
            })
        };

        for flow in flows.iter().filter(|f| f.bytes > 0) {
            let source_ip = strip_prefix(&flow.source);
            let source_name = labels.source_label(source_ip);
            let source_original = (source_name != source_ip).then(|| source_ip.to_string());

            let application = flow
                .application
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .unwrap_or(UNKNOWN_APPLICATION)
                .to_string();

            let dest_ip = strip_prefix(&flow.target);
            let (dest_name, dest_original) = match labels.destination_host(dest_ip) {
                Some(host) => (with_port(&host, flow.dest_port), Some(dest_ip.to_string())),
                None => (with_port(dest_ip, flow.dest_port), None),
            };

            let s = node(&mut graph, NodeKind::Source, source_name, source_original);
            let a = node(&mut graph, NodeKind::Application, application, None);
            let d = node(&mut graph, NodeKind::Destination, dest_name, dest_original);

            add_volume(&mut graph, s, a, flow.bytes);
            add_volume(&mut graph, a, d, flow.bytes);
        }

        let links = graph
            .edge_references()
            .map(|edge| SankeyLink {
                source: edge.source().index(),
                target: edge.target().index(),
                value: *edge.weight(),
            })
            .collect();
        let (nodes, _) = graph.into_nodes_edges();

        Self {
            nodes: nodes.into_iter().map(|n| n.weight).collect(),
            links,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = (usize, &SankeyNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.kind == kind)
    }

    /// Bytes entering the application layer, i.e. the traffic drawn.
    pub fn total_value(&self) -> u64 {
        self.links
            .iter()
            .filter(|link| self.nodes[link.source].kind == NodeKind::Source)
            .map(|link| link.value)
            .fold(0u64, u64::saturating_add)
    }
}

fn with_port(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn add_volume(graph: &mut DiGraph<SankeyNode, u64>, from: NodeIndex, to: NodeIndex, bytes: u64) {
    match graph.find_edge(from, to) {
        Some(edge) => graph[edge] = graph[edge].saturating_add(bytes),
        None => {
            graph.add_edge(from, to, bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(source: &str, target: &str, application: &str, bytes: u64) -> FlowRecord {
        FlowRecord::new(source, target, bytes).with_application(application)
    }

    fn node(name: &str, kind: NodeKind) -> SankeyNode {
        SankeyNode {
            name: name.to_string(),
            kind,
            original_ip: None,
        }
    }

    #[test]
    fn test_identical_flows_collapse_into_single_links() {
        let flows = vec![
            flow("10.0.0.5", "1.2.3.4", "https", 1000),
            flow("10.0.0.5", "1.2.3.4", "https", 500),
        ];
        let graph = SankeyGraph::build(&flows, &RawLabels);

        assert_eq!(
            graph.nodes,
            vec![
                node("10.0.0.5", NodeKind::Source),
                node("https", NodeKind::Application),
                node("1.2.3.4", NodeKind::Destination),
            ]
        );
        assert_eq!(
            graph.links,
            vec![
                SankeyLink { source: 0, target: 1, value: 1500 },
                SankeyLink { source: 1, target: 2, value: 1500 },
            ]
        );
        assert_eq!(graph.total_value(), 1500);
    }

    #[test]
    fn test_extreme_byte_counts_saturate() {
        let flows = vec![
            flow("10.0.0.5", "1.2.3.4", "https", u64::MAX),
            flow("10.0.0.5", "1.2.3.4", "https", 1),
        ];
        let graph = SankeyGraph::build(&flows, &RawLabels);
        assert!(graph.links.iter().all(|link| link.value == u64::MAX));
        assert_eq!(graph.total_value(), u64::MAX);
    }

    #[test]
    fn test_zero_byte_flows_are_dropped() {
        let graph = SankeyGraph::build(&[flow("a", "b", "dns", 0)], &RawLabels);
        assert!(graph.is_empty());
        assert!(graph.links.is_empty());
    }

    #[test]
    fn test_missing_application_uses_sentinel() {
        let flows = vec![FlowRecord::new("10.0.0.5", "8.8.8.8", 10), flow("10.0.0.5", "8.8.8.8", " ", 5)];
        let graph = SankeyGraph::build(&flows, &RawLabels);

        let apps: Vec<&str> = graph
            .nodes_of(NodeKind::Application)
            .map(|(_, n)| n.name.as_str())
            .collect();
        assert_eq!(apps, vec![UNKNOWN_APPLICATION]);
        assert_eq!(graph.links.len(), 2);
        assert_eq!(graph.links[0].value, 15);
    }

    #[test]
    fn test_same_name_in_different_layers_stays_distinct() {
        let graph = SankeyGraph::build(&[flow("dns", "10.0.0.1", "dns", 3)], &RawLabels);
        assert_eq!(graph.nodes.len(), 3);
    }

    #[test]
    fn test_destination_label_uses_port() {
        let flows = vec![FlowRecord::new("10.0.0.5", "8.8.8.8", 10).with_port(53)];
        let graph = SankeyGraph::build(&flows, &RawLabels);
        assert_eq!(graph.nodes[2].name, "8.8.8.8:53");
        assert_eq!(graph.nodes[2].original_ip, None);
    }

    #[test]
    fn test_resolved_labels_keep_original_ip() {
        let mut labels = HostLabels::default();
        labels.hostnames.insert("8.8.8.8".to_string(), "dns.google".to_string());
        labels.devices.insert("10.0.0.5".to_string(), "laptop".to_string());

        let flows = vec![FlowRecord::new("10.0.0.5", "8.8.8.8/32", 10).with_port(53)];
        let graph = SankeyGraph::build(&flows, &labels);

        assert_eq!(graph.nodes[0].name, "laptop");
        assert_eq!(graph.nodes[0].original_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(graph.nodes[2].name, "dns.google:53");
        assert_eq!(graph.nodes[2].original_ip.as_deref(), Some("8.8.8.8"));
    }

    #[test]
    fn test_fan_out_shares_application_node() {
        let flows = vec![
            flow("10.0.0.5", "1.1.1.1", "https", 10),
            flow("10.0.0.6", "1.1.1.1", "https", 20),
        ];
        let graph = SankeyGraph::build(&flows, &RawLabels);

        // 2 sources, 1 app, 1 destination
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.links.len(), 3);
        let app_to_dest = graph
            .links
            .iter()
            .find(|l| graph.nodes[l.source].kind == NodeKind::Application)
            .unwrap();
        assert_eq!(app_to_dest.value, 30);
    }
}
