// Diagram loading: fetch -> filter -> truncate -> resolve -> build

use crate::aggregate::filter_and_merge;
use crate::cache::{DEFAULT_RESULT_TTL, ResultCache};
use crate::chord::{ChordMatrix, sorted_nodes};
use crate::classify::{is_private, strip_prefix};
use crate::error::Result;
use crate::model::{FlowGroup, FlowRecord};
use crate::resolve::{HostnameCache, ReverseDns};
use crate::sankey::SankeyGraph;
use crate::truncate::{Truncation, truncate};
use flowlens_client::{ApiClient, ClientError, ConnectedDevice, RawFlowGroup};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Flow groups keyed by category name.
pub type CategorizedFlows = BTreeMap<String, FlowGroup>;

/// Where flows and device metadata come from.
pub trait FlowSource: Send + Sync {
    fn categorized_flows(
        &self,
        selection: &Selection,
    ) -> impl Future<Output = std::result::Result<CategorizedFlows, ClientError>> + Send;

    fn devices(
        &self,
        selection: &Selection,
    ) -> impl Future<Output = std::result::Result<Vec<ConnectedDevice>, ClientError>> + Send;
}

impl FlowSource for ApiClient {
    async fn categorized_flows(
        &self,
        selection: &Selection,
    ) -> std::result::Result<CategorizedFlows, ClientError> {
        let device_id = selection.device_id.as_str();
        let client_ip = selection.client_ip.as_deref();
        let groups = match self.fetch_categorized_flows(device_id, client_ip).await {
            Ok(response) => response.groups,
            Err(ClientError::Status(404)) => {
                info!("Backend has no categorized flows, falling back to the flat flow list");
                let flat = self.fetch_flows(device_id, client_ip).await?;
                categorize_flat(flat.into_group())
            }
            Err(e) => return Err(e),
        };
        Ok(groups
            .into_iter()
            .map(|(category, group)| (category, FlowGroup::from_raw(group)))
            .collect())
    }

    async fn devices(&self, selection: &Selection) -> std::result::Result<Vec<ConnectedDevice>, ClientError> {
        self.connected_devices(&selection.device_id).await
    }
}

/// Split an uncategorized flow list into `all` plus the private-to-private
/// `rfc1918` subset.
fn categorize_flat(group: RawFlowGroup) -> BTreeMap<String, RawFlowGroup> {
    let internal = |ip: &Option<String>| ip.as_deref().is_some_and(is_private);
    let private = RawFlowGroup {
        nodes: group.nodes.iter().filter(|n| is_private(n)).cloned().collect(),
        flows: group
            .flows
            .iter()
            .filter(|f| internal(&f.source) && internal(&f.target))
            .cloned()
            .collect(),
    };

    BTreeMap::from([
        (INTERNAL_CATEGORY.to_string(), private),
        (INTERNET_CATEGORY.to_string(), group),
    ])
}

/// Which firewall and (optionally) which client the diagram is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub device_id: String,
    pub client_ip: Option<String>,
}

impl Selection {
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            client_ip: None,
        }
    }

    pub fn with_client(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    pub fn cache_key(&self) -> String {
        ResultCache::flow_key(&self.device_id, self.client_ip.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub categories: HashSet<String>,
    pub limit: usize,
    pub result_ttl: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            categories: HashSet::from(["all".to_string()]),
            limit: 50,
            result_ttl: DEFAULT_RESULT_TTL,
        }
    }
}

/// Generation counter guarding one on-screen diagram.
///
/// Each load takes a ticket; once a newer load starts, older tickets are
/// stale and their results must not replace what is displayed.
#[derive(Debug, Default)]
pub struct RenderGuard {
    generation: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

impl RenderGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> Ticket {
        Ticket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }
}

/// Renderer-ready chord diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordView {
    pub labels: Vec<String>,
    pub chord: ChordMatrix,
    pub truncation: Coverage,
}

/// Renderer-ready sankey diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SankeyView {
    pub graph: SankeyGraph,
    pub truncation: Coverage,
}

/// The counts behind the "top N of M" indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub shown_count: usize,
    pub total_count: usize,
    pub total_bytes: u64,
    pub shown_bytes: u64,
    pub coverage_pct: f64,
    pub summary: String,
}

impl From<&Truncation> for Coverage {
    fn from(t: &Truncation) -> Self {
        Self {
            shown_count: t.shown.len(),
            total_count: t.total_count,
            total_bytes: t.total_bytes,
            shown_bytes: t.shown_bytes,
            coverage_pct: t.coverage_pct,
            summary: t.summary(),
        }
    }
}

/// Internal and internet chord diagrams loaded side by side.
#[derive(Debug)]
pub struct Overview {
    pub internal: Result<Option<ChordView>>,
    pub internet: Result<Option<ChordView>>,
}

pub const INTERNAL_CATEGORY: &str = "rfc1918";
pub const INTERNET_CATEGORY: &str = "all";

pub struct FlowPipeline<S, R> {
    source: Arc<S>,
    hostnames: Arc<HostnameCache<R>>,
    results: ResultCache,
    options: PipelineOptions,
    internal_guard: RenderGuard,
    internet_guard: RenderGuard,
}

impl<S: FlowSource, R: ReverseDns> FlowPipeline<S, R> {
    pub fn new(
        source: Arc<S>,
        hostnames: Arc<HostnameCache<R>>,
        results: ResultCache,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            hostnames,
            results,
            options,
            internal_guard: RenderGuard::new(),
            internet_guard: RenderGuard::new(),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn hostnames(&self) -> &Arc<HostnameCache<R>> {
        &self.hostnames
    }

    /// Seed source-side labels from the connected-devices endpoint. A failure
    /// only costs friendly names.
    pub async fn seed_devices(&self, selection: &Selection) -> usize {
        match self.source.devices(selection).await {
            Ok(devices) => {
                let seeded = self.hostnames.seed_devices(&devices);
                debug!("Seeded {} device names", seeded);
                seeded
            }
            Err(e) => {
                warn!("Could not load connected devices: {}", e);
                0
            }
        }
    }

    async fn fetch(&self, selection: &Selection) -> Result<CategorizedFlows> {
        let source = self.source.clone();
        let flows = self
            .results
            .get_or_fetch_within(
                &selection.cache_key(),
                || async move { source.categorized_flows(selection).await },
                self.options.result_ttl,
            )
            .await;

        match flows {
            Ok(flows) => Ok(flows),
            Err(e) => {
                if e.is_transient() {
                    warn!("Flow fetch for {} failed, backend may be busy: {}", selection.device_id, e);
                } else {
                    warn!("Flow fetch for {} failed: {}", selection.device_id, e);
                }
                Err(e.into())
            }
        }
    }

    /// Fetch, merge the chosen categories and keep the top flows.
    pub async fn prepare(
        &self,
        selection: &Selection,
        categories: &HashSet<String>,
    ) -> Result<(FlowGroup, Truncation)> {
        let groups = self.fetch(selection).await?;
        let merged = filter_and_merge(&groups, categories);
        let truncation = truncate(&merged.flows, self.options.limit);
        debug!(
            "Prepared {} for {}: {}",
            categories.iter().cloned().collect::<Vec<_>>().join(","),
            selection.device_id,
            truncation.summary()
        );
        Ok((merged, truncation))
    }

    /// Load a chord diagram. `Ok(None)` means a newer load on `guard`
    /// started meanwhile and this result should not be shown.
    pub async fn load_chord(
        &self,
        selection: &Selection,
        categories: &HashSet<String>,
        guard: &RenderGuard,
    ) -> Result<Option<ChordView>> {
        let ticket = guard.begin();
        let (merged, truncation) = self.prepare(selection, categories).await?;

        let nodes = sorted_nodes(&merged.nodes, &truncation.shown);
        let resolved = self.hostnames.lookup(&nodes).await;
        let labels = self.hostnames.labels(resolved);

        let chord = ChordMatrix::build(&nodes, &truncation.shown);
        if chord.skipped > 0 {
            debug!("{} flows referenced nodes outside the node list", chord.skipped);
        }

        if !guard.is_current(ticket) {
            info!("Discarding stale chord diagram for {}", selection.device_id);
            return Ok(None);
        }

        Ok(Some(ChordView {
            labels: chord.labels(&labels),
            truncation: Coverage::from(&truncation),
            chord,
        }))
    }

    /// Load a sankey diagram, see [`FlowPipeline::load_chord`] for `None`.
    pub async fn load_sankey(
        &self,
        selection: &Selection,
        categories: &HashSet<String>,
        guard: &RenderGuard,
    ) -> Result<Option<SankeyView>> {
        let ticket = guard.begin();
        let (_, truncation) = self.prepare(selection, categories).await?;

        let destinations = destination_ips(&truncation.shown);
        let resolved = self.hostnames.lookup(&destinations).await;
        let labels = self.hostnames.labels(resolved);

        let graph = SankeyGraph::build(&truncation.shown, &labels);

        if !guard.is_current(ticket) {
            info!("Discarding stale sankey diagram for {}", selection.device_id);
            return Ok(None);
        }

        Ok(Some(SankeyView {
            graph,
            truncation: Coverage::from(&truncation),
        }))
    }

    /// Load the internal and internet chord diagrams concurrently. Each side
    /// fails independently.
    pub async fn load_overview(&self, selection: &Selection) -> Overview {
        let internal_categories = HashSet::from([INTERNAL_CATEGORY.to_string()]);
        let internet_categories = HashSet::from([INTERNET_CATEGORY.to_string()]);

        let (internal, internet) = futures::join!(
            self.load_chord(selection, &internal_categories, &self.internal_guard),
            self.load_chord(selection, &internet_categories, &self.internet_guard),
        );

        Overview { internal, internet }
    }
}

fn destination_ips(flows: &[FlowRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    flows
        .iter()
        .map(|f| strip_prefix(&f.target))
        .filter(|ip| seen.insert(*ip))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_guard_invalidates_older_tickets() {
        let guard = RenderGuard::new();
        let first = guard.begin();
        assert!(guard.is_current(first));

        let second = guard.begin();
        assert!(!guard.is_current(first));
        assert!(guard.is_current(second));
    }

    #[test]
    fn test_destination_ips_dedupes_and_strips() {
        let flows = vec![
            FlowRecord::new("10.0.0.5", "8.8.8.8/32", 1),
            FlowRecord::new("10.0.0.6", "8.8.8.8", 1),
            FlowRecord::new("10.0.0.6", "1.1.1.1", 1),
        ];
        assert_eq!(destination_ips(&flows), vec!["8.8.8.8", "1.1.1.1"]);
    }

    #[test]
    fn test_categorize_flat_splits_private_traffic() {
        let record = |source: &str, target: &str| flowlens_client::RawFlowRecord {
            source: Some(source.to_string()),
            target: Some(target.to_string()),
            bytes: Some(1.0),
            ..Default::default()
        };
        let groups = categorize_flat(RawFlowGroup {
            nodes: vec!["10.0.0.5".into(), "10.0.0.6".into(), "8.8.8.8".into()],
            flows: vec![record("10.0.0.5", "10.0.0.6"), record("10.0.0.5", "8.8.8.8")],
        });

        assert_eq!(groups[INTERNET_CATEGORY].flows.len(), 2);
        assert_eq!(groups[INTERNAL_CATEGORY].nodes, vec!["10.0.0.5", "10.0.0.6"]);
        assert_eq!(groups[INTERNAL_CATEGORY].flows.len(), 1);
        assert_eq!(groups[INTERNAL_CATEGORY].flows[0].target.as_deref(), Some("10.0.0.6"));
    }

    #[test]
    fn test_selection_cache_key() {
        let selection = Selection::device("fw-1").with_client("10.0.0.5");
        assert_eq!(selection.cache_key(), "flowlens:flows:fw-1:10.0.0.5");
    }
}
