use crate::error::{ClientError, Result};
use crate::wire::{
    CategorizedFlowResponse, ConnectedDevice, DevicesResponse, FlowResponse, FlowSettings,
    ResolvedHost, ReverseDnsRequest, ReverseDnsResponse, SettingsResponse, StatusResponse,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const FLOWS_PATH: &str = "api/flows";
const CATEGORIZED_FLOWS_PATH: &str = "api/flows/categorized";
const REVERSE_DNS_PATH: &str = "api/dns/reverse";
const DEVICES_PATH: &str = "api/devices/connected";
const SETTINGS_PATH: &str = "api/settings/flows";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Kept short so slow resolvers never hold up a diagram.
    pub dns_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout: Duration::from_secs(10),
            dns_timeout: Duration::from_secs(2),
        }
    }
}

/// Typed access to the dashboard backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    dns_timeout: Duration,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        // Url::join drops the last path segment unless it ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(concat!("Flowlens/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .connect_timeout(config.timeout / 2)
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url,
            dns_timeout: config.dns_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn fetch_flows(&self, device_id: &str, client_ip: Option<&str>) -> Result<FlowResponse> {
        let request = self
            .client
            .get(self.endpoint(FLOWS_PATH)?)
            .query(&selection_query(device_id, client_ip));
        let response: FlowResponse = Self::send_json(request).await?;
        ensure_success(&response.status)?;

        debug!(
            "Fetched {} flows across {} nodes for device {}",
            response.flows.len(),
            response.nodes.len(),
            device_id
        );
        Ok(response)
    }

    pub async fn fetch_categorized_flows(
        &self,
        device_id: &str,
        client_ip: Option<&str>,
    ) -> Result<CategorizedFlowResponse> {
        let request = self
            .client
            .get(self.endpoint(CATEGORIZED_FLOWS_PATH)?)
            .query(&selection_query(device_id, client_ip));
        let response: CategorizedFlowResponse = Self::send_json(request).await?;
        ensure_success(&response.status)?;

        debug!(
            "Fetched {} flow categories for device {}",
            response.groups.len(),
            device_id
        );
        Ok(response)
    }

    /// Resolve a batch of addresses in one request. Addresses the backend
    /// could not resolve are absent from the returned map.
    pub async fn reverse_dns(&self, ips: &[String]) -> Result<HashMap<String, ResolvedHost>> {
        if ips.is_empty() {
            return Ok(HashMap::new());
        }

        let body = ReverseDnsRequest {
            ip_addresses: ips.to_vec(),
            timeout: self.dns_timeout.as_secs_f64(),
        };
        // Allow the backend its full resolver budget plus transport overhead
        let request = self
            .client
            .post(self.endpoint(REVERSE_DNS_PATH)?)
            .timeout(self.dns_timeout + Duration::from_secs(1))
            .json(&body);
        let response: ReverseDnsResponse = Self::send_json(request).await?;
        ensure_success(&response.status)?;

        let resolved: HashMap<String, ResolvedHost> = response
            .results
            .into_iter()
            .filter_map(|(ip, host)| host.map(|h| (ip, h)))
            .collect();
        info!("Resolved {} of {} addresses", resolved.len(), ips.len());
        Ok(resolved)
    }

    pub async fn connected_devices(&self, device_id: &str) -> Result<Vec<ConnectedDevice>> {
        let request = self
            .client
            .get(self.endpoint(DEVICES_PATH)?)
            .query(&[("device_id", device_id)]);
        let response: DevicesResponse = Self::send_json(request).await?;
        ensure_success(&response.status)?;
        Ok(response.devices)
    }

    pub async fn settings(&self) -> Result<FlowSettings> {
        let request = self.client.get(self.endpoint(SETTINGS_PATH)?);
        let response: SettingsResponse = Self::send_json(request).await?;
        ensure_success(&response.status)?;
        Ok(response.settings)
    }

    pub async fn update_settings(&self, settings: &FlowSettings) -> Result<()> {
        let request = self.client.post(self.endpoint(SETTINGS_PATH)?).json(settings);
        let response: StatusResponse = Self::send_json(request).await?;
        ensure_success(&response.status)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(format!("{}{}: {}", self.base_url, path, e)))
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        Ok(response.json::<T>().await?)
    }
}

fn selection_query<'a>(device_id: &'a str, client_ip: Option<&'a str>) -> Vec<(&'static str, &'a str)> {
    let mut query = vec![("device_id", device_id)];
    if let Some(ip) = client_ip {
        query.push(("client_ip", ip));
    }
    query
}

fn ensure_success(status: &str) -> Result<()> {
    if status.eq_ignore_ascii_case("success") {
        Ok(())
    } else {
        Err(ClientError::Api(status.to_string()))
    }
}
