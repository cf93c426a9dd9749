// Merging categorized flow groups into one graph per filter selection

use crate::model::{FlowGroup, FlowRecord};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Categories the backend partitions flows into.
pub const KNOWN_CATEGORIES: [&str; 5] = ["rfc1918", "all", "outbound", "inbound", "transit"];

pub fn is_known_category(category: &str) -> bool {
    KNOWN_CATEGORIES.contains(&category)
}

/// Merge every active category's group into one.
///
/// Nodes are deduplicated keeping first-seen order; flows are appended
/// verbatim (pairs are summed later by the graph builders) and then ordered
/// largest first. An empty selection yields an empty group.
pub fn filter_and_merge(
    groups: &BTreeMap<String, FlowGroup>,
    active: &HashSet<String>,
) -> FlowGroup {
    let mut merged = FlowGroup::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for (category, group) in groups.iter().filter(|(c, _)| active.contains(*c)) {
        debug!(
            "Merging category '{}': {} nodes, {} flows",
            category,
            group.nodes.len(),
            group.flows.len()
        );
        for node in &group.nodes {
            if seen.insert(node.as_str()) {
                merged.nodes.push(node.clone());
            }
        }
        merged.flows.extend(group.flows.iter().cloned());
    }

    sort_by_volume(&mut merged.flows);
    merged
}

/// Largest flows first; ties keep their relative order.
pub fn sort_by_volume(flows: &mut [FlowRecord]) {
    flows.sort_by(|a, b| b.bytes.cmp(&a.bytes));
}
