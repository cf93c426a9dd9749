use crate::aggregate::sort_by_volume;
use crate::model::FlowRecord;
use serde::{Deserialize, Serialize};

/// The largest flows plus how much of the traffic they account for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Truncation {
    pub shown: Vec<FlowRecord>,
    pub total_count: usize,
    pub total_bytes: u64,
    pub shown_bytes: u64,
    pub coverage_pct: f64,
}

impl Truncation {
    pub fn summary(&self) -> String {
        format!(
            "top {} of {} ({:.1}% of traffic)",
            self.shown.len(),
            self.total_count,
            self.coverage_pct
        )
    }

    pub fn is_complete(&self) -> bool {
        self.shown.len() == self.total_count
    }
}

/// Keep the `limit` largest flows. Must run before graph construction so
/// node counts stay bounded.
pub fn truncate(flows: &[FlowRecord], limit: usize) -> Truncation {
    let mut ranked = flows.to_vec();
    sort_by_volume(&mut ranked);

    let total_bytes = ranked.iter().map(|f| f.bytes).fold(0u64, u64::saturating_add);
    ranked.truncate(limit);
    let shown_bytes = ranked.iter().map(|f| f.bytes).fold(0u64, u64::saturating_add);

    let coverage_pct = if total_bytes == 0 {
        0.0
    } else {
        shown_bytes as f64 / total_bytes as f64 * 100.0
    };

    Truncation {
        shown: ranked,
        total_count: flows.len(),
        total_bytes,
        shown_bytes,
        coverage_pct,
    }
}
