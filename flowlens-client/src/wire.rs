use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A flow record exactly as the backend sends it.
///
/// Every field is optional on the wire; validation happens when the core
/// converts it into a typed record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFlowRecord {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, alias = "dest_ip")]
    pub target: Option<String>,
    #[serde(default)]
    pub dest_port: Option<u16>,
    #[serde(default)]
    pub application: Option<String>,
    #[serde(default)]
    pub bytes: Option<f64>,
    #[serde(default)]
    pub direction: Option<String>,
}

/// Decode a flow list one record at a time, dropping records whose fields
/// have the wrong type instead of failing the whole response.
fn skip_invalid_records<'de, D>(deserializer: D) -> Result<Vec<RawFlowRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    let total = values.len();
    let records: Vec<RawFlowRecord> = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping undecodable flow record: {}", e);
                None
            }
        })
        .collect();

    if records.len() < total {
        debug!("Decoded {} of {} flow records", records.len(), total);
    }
    Ok(records)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFlowGroup {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default, deserialize_with = "skip_invalid_records")]
    pub flows: Vec<RawFlowRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResponse {
    pub status: String,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default, deserialize_with = "skip_invalid_records")]
    pub flows: Vec<RawFlowRecord>,
}

impl FlowResponse {
    pub fn into_group(self) -> RawFlowGroup {
        RawFlowGroup {
            nodes: self.nodes,
            flows: self.flows,
        }
    }
}

/// Flows partitioned by category (`rfc1918`, `all`, `outbound`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizedFlowResponse {
    pub status: String,
    #[serde(default)]
    pub groups: BTreeMap<String, RawFlowGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseDnsRequest {
    pub ip_addresses: Vec<String>,
    /// Seconds the backend may spend resolving the whole batch.
    pub timeout: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseDnsResponse {
    pub status: String,
    #[serde(default)]
    pub results: HashMap<String, Option<ResolvedHost>>,
}

/// The backend answers either with a bare hostname or with an enriched record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedHost {
    Name(String),
    Enriched(EnrichedHost),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedHost {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResolvedHost {
    pub fn hostname(&self) -> Option<&str> {
        match self {
            ResolvedHost::Name(name) => Some(name.as_str()),
            ResolvedHost::Enriched(host) => host.hostname.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    pub ip: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub custom_name: Option<String>,
}

impl ConnectedDevice {
    /// Custom name wins over the reported hostname; blank values are ignored.
    pub fn display_name(&self) -> Option<&str> {
        self.custom_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| {
                self.hostname
                    .as_deref()
                    .filter(|name| !name.trim().is_empty())
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub status: String,
    #[serde(default)]
    pub devices: Vec<ConnectedDevice>,
}

/// Persisted dashboard settings relevant to the flow diagrams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowSettings {
    #[serde(default)]
    pub dns_resolution_enabled: bool,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub status: String,
    #[serde(default)]
    pub settings: FlowSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dest_ip_alias() {
        let raw: RawFlowRecord = serde_json::from_str(
            r#"{"source":"10.0.0.5","dest_ip":"1.2.3.4","dest_port":443,"bytes":10}"#,
        )
        .unwrap();
        assert_eq!(raw.target.as_deref(), Some("1.2.3.4"));
        assert_eq!(raw.dest_port, Some(443));
    }

    #[test]
    fn test_mistyped_records_are_skipped() {
        let response: CategorizedFlowResponse = serde_json::from_str(
            r#"{"status":"success","groups":{"all":{"nodes":["10.0.0.5","1.2.3.4"],"flows":[
                {"source":"10.0.0.5","target":"1.2.3.4","dest_port":"443","bytes":10},
                {"source":"10.0.0.5","target":"1.2.3.4","dest_port":70000,"bytes":10},
                {"source":"10.0.0.5","target":"1.2.3.4","bytes":"12"},
                {"source":"10.0.0.5","target":"1.2.3.4","dest_port":443,"bytes":25}
            ]}}}"#,
        )
        .unwrap();

        let flows = &response.groups["all"].flows;
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].dest_port, Some(443));
        assert_eq!(flows[0].bytes, Some(25.0));
    }

    #[test]
    fn test_resolved_host_variants() {
        let response: ReverseDnsResponse = serde_json::from_str(
            r#"{"status":"success","results":{
                "8.8.8.8":"dns.google",
                "1.1.1.1":{"hostname":"one.one.one.one","ttl":300,"asn":"AS13335"},
                "9.9.9.9":null
            }}"#,
        )
        .unwrap();

        assert_eq!(
            response.results["8.8.8.8"].as_ref().unwrap().hostname(),
            Some("dns.google")
        );
        let enriched = response.results["1.1.1.1"].as_ref().unwrap();
        assert_eq!(enriched.hostname(), Some("one.one.one.one"));
        match enriched {
            ResolvedHost::Enriched(host) => {
                assert_eq!(host.ttl, Some(300));
                assert_eq!(host.extra.get("asn"), Some(&Value::from("AS13335")));
            }
            ResolvedHost::Name(_) => panic!("expected enriched record"),
        }
        assert!(response.results["9.9.9.9"].is_none());
    }

    #[test]
    fn test_device_display_name() {
        let device = ConnectedDevice {
            ip: "10.0.0.5".to_string(),
            hostname: Some("laptop".to_string()),
            custom_name: Some("  ".to_string()),
        };
        assert_eq!(device.display_name(), Some("laptop"));

        let named = ConnectedDevice {
            custom_name: Some("Office NAS".to_string()),
            ..device.clone()
        };
        assert_eq!(named.display_name(), Some("Office NAS"));
    }
}
