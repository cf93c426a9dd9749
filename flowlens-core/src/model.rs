use flowlens_client::{RawFlowGroup, RawFlowRecord, ResolvedHost};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// Traffic direction as classified by the firewall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
    Transit,
    Internal,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "outbound" => Some(Direction::Outbound),
            "inbound" => Some(Direction::Inbound),
            "transit" => Some(Direction::Transit),
            "internal" => Some(Direction::Internal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
            Direction::Transit => "transit",
            Direction::Internal => "internal",
        }
    }
}

/// One observed traffic tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

impl FlowRecord {
    pub fn new(source: impl Into<String>, target: impl Into<String>, bytes: u64) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            dest_port: None,
            application: None,
            bytes,
            direction: None,
        }
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.dest_port = Some(port);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }
}

/// Why a wire record could not become a [`FlowRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedRecord {
    MissingSource,
    MissingTarget,
    InvalidBytes(f64),
}

impl TryFrom<RawFlowRecord> for FlowRecord {
    type Error = MalformedRecord;

    fn try_from(raw: RawFlowRecord) -> Result<Self, Self::Error> {
        let source = raw
            .source
            .filter(|s| !s.trim().is_empty())
            .ok_or(MalformedRecord::MissingSource)?;
        let target = raw
            .target
            .filter(|t| !t.trim().is_empty())
            .ok_or(MalformedRecord::MissingTarget)?;

        let bytes = match raw.bytes {
            None => 0,
            Some(b) if b.is_finite() && b >= 0.0 => b.round() as u64,
            Some(b) => return Err(MalformedRecord::InvalidBytes(b)),
        };

        Ok(FlowRecord {
            source,
            target,
            dest_port: raw.dest_port,
            application: raw.application,
            bytes,
            direction: raw.direction.as_deref().and_then(Direction::parse),
        })
    }
}

/// A node list plus the flows observed between those nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGroup {
    pub nodes: Vec<String>,
    pub flows: Vec<FlowRecord>,
}

impl FlowGroup {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.flows.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.flows.iter().map(|f| f.bytes).fold(0u64, u64::saturating_add)
    }

    /// Convert a wire group, dropping malformed records one at a time.
    pub fn from_raw(raw: RawFlowGroup) -> Self {
        let mut seen = HashSet::new();
        let nodes = raw
            .nodes
            .into_iter()
            .filter(|n| seen.insert(n.clone()))
            .collect();

        let flows = raw
            .flows
            .into_iter()
            .filter_map(|record| match FlowRecord::try_from(record) {
                Ok(flow) => Some(flow),
                Err(reason) => {
                    debug!("Skipping malformed flow record: {:?}", reason);
                    None
                }
            })
            .collect();

        Self { nodes, flows }
    }
}

/// Sankey layer a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Source,
    Application,
    Destination,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Source => "source",
            NodeKind::Application => "application",
            NodeKind::Destination => "destination",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SankeyNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(rename = "originalIp", default, skip_serializing_if = "Option::is_none")]
    pub original_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SankeyLink {
    pub source: usize,
    pub target: usize,
    pub value: u64,
}

/// A cached reverse-DNS answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl HostRecord {
    pub fn named(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ttl: None,
            extra: Map::new(),
        }
    }

    /// `None` when the answer carries no usable hostname.
    pub fn from_resolved(host: ResolvedHost) -> Option<Self> {
        let record = match host {
            ResolvedHost::Name(name) => HostRecord::named(name),
            ResolvedHost::Enriched(enriched) => HostRecord {
                hostname: enriched.hostname?,
                ttl: enriched.ttl,
                extra: enriched.extra,
            },
        };
        if record.hostname.trim().is_empty() {
            None
        } else {
            Some(record)
        }
    }
}
