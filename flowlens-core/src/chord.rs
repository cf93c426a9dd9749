// Chord diagram: pairwise endpoint traffic as an N x N matrix

use crate::model::{Direction, FlowRecord};
use crate::resolve::HostLabels;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordMatrix {
    pub nodes: Vec<String>,
    /// `matrix[i][j]` is the byte total sent from `nodes[i]` to `nodes[j]`.
    pub matrix: Vec<Vec<u64>>,
    /// Keyed by `"source->target"`. Only used for coloring; when several
    /// records share a pair the last one carrying a direction wins. Records
    /// without a direction never clear an earlier entry.
    pub directions: HashMap<String, Direction>,
    /// Records dropped because an endpoint was missing from `nodes`.
    #[serde(default)]
    pub skipped: usize,
}

fn pair_key(source: &str, target: &str) -> String {
    format!("{}->{}", source, target)
}

impl ChordMatrix {
    pub fn build(nodes: &[String], flows: &[FlowRecord]) -> Self {
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.as_str(), i))
            .collect();

        let n = nodes.len();
        let mut matrix = vec![vec![0u64; n]; n];
        let mut directions = HashMap::new();
        let mut skipped = 0;

        for flow in flows {
            let (Some(&i), Some(&j)) = (index.get(flow.source.as_str()), index.get(flow.target.as_str()))
            else {
                debug!("Flow {} -> {} references an unknown node", flow.source, flow.target);
                skipped += 1;
                continue;
            };

            matrix[i][j] = matrix[i][j].saturating_add(flow.bytes);
            if let Some(direction) = flow.direction {
                directions.insert(pair_key(&flow.source, &flow.target), direction);
            }
        }

        Self {
            nodes: nodes.to_vec(),
            matrix,
            directions,
            skipped,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn direction_of(&self, i: usize, j: usize) -> Option<Direction> {
        let source = self.nodes.get(i)?;
        let target = self.nodes.get(j)?;
        self.directions.get(&pair_key(source, target)).copied()
    }

    pub fn total(&self) -> u64 {
        self.matrix.iter().flatten().fold(0u64, |acc, b| acc.saturating_add(*b))
    }

    /// Traffic touching each node (sent plus received), which is the arc size.
    pub fn node_totals(&self) -> Vec<u64> {
        (0..self.len())
            .map(|i| {
                let sent = self.matrix[i].iter().fold(0u64, |acc, b| acc.saturating_add(*b));
                let received = self.matrix.iter().fold(0u64, |acc, row| acc.saturating_add(row[i]));
                sent.saturating_add(received).saturating_sub(self.matrix[i][i])
            })
            .collect()
    }

    /// Non-zero cells as `(i, j, bytes)`, largest first.
    pub fn pairs(&self) -> Vec<(usize, usize, u64)> {
        let mut pairs: Vec<(usize, usize, u64)> = self
            .matrix
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .filter(|(_, bytes)| **bytes > 0)
                    .map(move |(j, bytes)| (i, j, *bytes))
            })
            .collect();
        pairs.sort_by(|a, b| b.2.cmp(&a.2));
        pairs
    }

    pub fn labels(&self, labels: &HostLabels) -> Vec<String> {
        self.nodes.iter().map(|node| labels.display(node)).collect()
    }
}

/// Nodes that take part in at least one of `flows`, in sorted order.
pub fn sorted_nodes(nodes: &[String], flows: &[FlowRecord]) -> Vec<String> {
    let used: BTreeSet<&str> = flows
        .iter()
        .flat_map(|f| [f.source.as_str(), f.target.as_str()])
        .collect();
    let mut kept: Vec<String> = nodes
        .iter()
        .filter(|n| used.contains(n.as_str()))
        .cloned()
        .collect();
    kept.sort();
    kept.dedup();
    kept
}

/// Whether a surface is large enough for the chord ring.
pub fn fits_surface(width: f64, height: f64, min_radius: f64) -> bool {
    width.min(height) / 2.0 >= min_radius
}
