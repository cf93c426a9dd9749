// Hostname resolution cache shared by every diagram.

use crate::classify::{is_public, strip_prefix};
use crate::model::HostRecord;
use flowlens_client::{ApiClient, ClientError, ConnectedDevice};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Batched reverse lookup backend.
pub trait ReverseDns: Send + Sync {
    fn reverse_lookup(
        &self,
        ips: &[String],
    ) -> impl Future<Output = Result<HashMap<String, HostRecord>, ClientError>> + Send;
}

impl ReverseDns for ApiClient {
    async fn reverse_lookup(&self, ips: &[String]) -> Result<HashMap<String, HostRecord>, ClientError> {
        let resolved = self.reverse_dns(ips).await?;
        Ok(resolved
            .into_iter()
            .filter_map(|(ip, host)| HostRecord::from_resolved(host).map(|record| (ip, record)))
            .collect())
    }
}

/// Process-wide cache of public IP -> hostname answers.
///
/// Writes only ever add or refresh entries; the only way to drop entries is
/// [`HostnameCache::clear`] (also triggered by re-enabling resolution).
/// Addresses a successful batch returned no name for are remembered too, so
/// they are not requested again until the next clear. The
/// lock is released while a batch is in flight, so two diagrams loading at
/// once may both request the same address. Both answers merge harmlessly.
pub struct HostnameCache<R> {
    resolver: R,
    entries: RwLock<HashMap<String, HostRecord>>,
    unresolved: RwLock<HashSet<String>>,
    devices: RwLock<HashMap<String, String>>,
    enabled: AtomicBool,
    epoch: AtomicU64,
}

impl<R: ReverseDns> HostnameCache<R> {
    pub fn new(resolver: R, enabled: bool) -> Self {
        Self {
            resolver,
            entries: RwLock::new(HashMap::new()),
            unresolved: RwLock::new(HashSet::new()),
            devices: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(enabled),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Resolve whatever public, not-yet-cached addresses appear in
    /// `candidates`, then return the whole cache as `ip -> hostname`.
    ///
    /// Never fails: a failed batch is logged and the previous cache contents
    /// are returned. With resolution disabled the result is empty.
    pub async fn lookup(&self, candidates: &[String]) -> HashMap<String, String> {
        if !self.is_enabled() {
            debug!("Hostname resolution disabled, skipping {} candidates", candidates.len());
            return HashMap::new();
        }

        let pending = self.uncached_public(candidates);
        if pending.is_empty() {
            debug!("All {} candidates already resolved or private", candidates.len());
            return self.hostnames();
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        debug!("Resolving {} uncached public addresses", pending.len());

        match self.resolver.reverse_lookup(&pending).await {
            Ok(results) => {
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    // Cleared while the batch was in flight: the answers belong to the old session
                    info!("Discarding {} hostnames resolved before cache reset", results.len());
                } else {
                    let added = self.merge(results);
                    let missed = self.mark_unresolved(&pending);
                    info!(
                        "Cached {} new hostnames, {} without a name ({} requested)",
                        added,
                        missed,
                        pending.len()
                    );
                }
            }
            Err(e) => {
                warn!("Reverse DNS lookup for {} addresses failed: {}", pending.len(), e);
            }
        }

        self.hostnames()
    }

    /// Additively merge resolved records, keyed by stripped address.
    /// Returns how many records were written.
    pub fn merge(&self, results: HashMap<String, HostRecord>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut written = 0;
        for (ip, record) in results {
            let ip = strip_prefix(ip.trim());
            if record.hostname.trim().is_empty() || record.hostname == ip {
                continue;
            }
            entries.insert(ip.to_string(), record);
            written += 1;
        }
        written
    }

    /// Remember requested addresses that came back without a hostname.
    fn mark_unresolved(&self, requested: &[String]) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut unresolved = self.unresolved.write().unwrap_or_else(PoisonError::into_inner);
        requested
            .iter()
            .filter(|ip| !entries.contains_key(ip.as_str()))
            .filter(|ip| unresolved.insert(ip.to_string()))
            .count()
    }

    fn uncached_public(&self, candidates: &[String]) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let unresolved = self.unresolved.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen = HashSet::new();
        candidates
            .iter()
            .map(|ip| strip_prefix(ip.trim()))
            .filter(|ip| is_public(ip) && !entries.contains_key(*ip) && !unresolved.contains(*ip))
            .filter(|ip| seen.insert(*ip))
            .map(str::to_string)
            .collect()
    }

    pub fn hostnames(&self) -> HashMap<String, String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(ip, record)| (ip.clone(), record.hostname.clone()))
            .collect()
    }

    pub fn record(&self, ip: &str) -> Option<HostRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(strip_prefix(ip))
            .cloned()
    }

    pub fn hostname(&self, ip: &str) -> Option<String> {
        self.record(ip).map(|r| r.hostname)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the resolution toggle. Turning it back on starts from an empty
    /// cache so names from an earlier session never reappear.
    /// Returns the previous value.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if !previous && enabled {
            self.clear();
        }
        previous
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = entries.len();
        entries.clear();
        self.unresolved.write().unwrap_or_else(PoisonError::into_inner).clear();
        debug!("Cleared {} cached hostnames", dropped);
    }

    /// Record names for local devices so source labels need no lookup.
    pub fn seed_devices<'a>(&self, devices: impl IntoIterator<Item = &'a ConnectedDevice>) -> usize {
        let mut known = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let mut seeded = 0;
        for device in devices {
            if let Some(name) = device.display_name() {
                known.insert(strip_prefix(device.ip.trim()).to_string(), name.to_string());
                seeded += 1;
            }
        }
        seeded
    }

    pub fn device_name(&self, ip: &str) -> Option<String> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(strip_prefix(ip))
            .cloned()
    }

    /// Snapshot of everything known right now, for label rendering.
    pub fn labels(&self, hostnames: HashMap<String, String>) -> HostLabels {
        HostLabels {
            devices: self.devices.read().unwrap_or_else(PoisonError::into_inner).clone(),
            hostnames,
        }
    }
}

/// Immutable label lookup handed to the graph builders.
#[derive(Debug, Clone, Default)]
pub struct HostLabels {
    pub devices: HashMap<String, String>,
    pub hostnames: HashMap<String, String>,
}

impl HostLabels {
    pub fn device(&self, ip: &str) -> Option<&str> {
        self.devices.get(strip_prefix(ip)).map(String::as_str)
    }

    pub fn hostname(&self, ip: &str) -> Option<&str> {
        self.hostnames.get(strip_prefix(ip)).map(String::as_str)
    }

    /// Best display name for an endpoint: device name, then DNS name, then the address.
    pub fn display(&self, ip: &str) -> String {
        self.device(ip)
            .or_else(|| self.hostname(ip))
            .unwrap_or(ip)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeDns {
        calls: AtomicUsize,
        requested: Mutex<Vec<Vec<String>>>,
        fail: AtomicBool,
        /// Addresses with no PTR record.
        nameless: HashSet<String>,
    }

    impl FakeDns {
        fn without_names(ips: &[&str]) -> Self {
            Self {
                nameless: ips.iter().map(|ip| ip.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl ReverseDns for FakeDns {
        async fn reverse_lookup(&self, ips: &[String]) -> Result<HashMap<String, HostRecord>, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push(ips.to_vec());
            // Suspend like a real request so concurrent lookups interleave
            tokio::task::yield_now().await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Status(502));
            }
            Ok(ips
                .iter()
                .filter(|ip| !self.nameless.contains(*ip))
                .map(|ip| (ip.clone(), HostRecord::named(format!("host-{}", ip.replace('.', "-")))))
                .collect())
        }
    }

    fn ips(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_only_public_uncached_addresses_are_requested() {
        let cache = HostnameCache::new(FakeDns::default(), true);

        let names = cache
            .lookup(&ips(&["10.0.0.5", "8.8.8.8/32", "8.8.8.8", "192.168.1.1", "junk", "1.1.1.1"]))
            .await;

        assert_eq!(cache.resolver().calls.load(Ordering::SeqCst), 1);
        let requested = cache.resolver().requested.lock().unwrap().clone();
        assert_eq!(requested, vec![ips(&["8.8.8.8", "1.1.1.1"])]);
        assert_eq!(names.get("8.8.8.8").map(String::as_str), Some("host-8-8-8-8"));
        assert!(!names.contains_key("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_repeat_lookup_is_idempotent() {
        let cache = HostnameCache::new(FakeDns::default(), true);
        let candidates = ips(&["8.8.8.8", "1.1.1.1"]);

        let first = cache.lookup(&candidates).await;
        let second = cache.lookup(&candidates).await;

        assert_eq!(first, second);
        assert_eq!(cache.resolver().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nameless_addresses_are_not_requested_again() {
        let cache = HostnameCache::new(FakeDns::without_names(&["203.0.113.9"]), true);
        let candidates = ips(&["8.8.8.8", "203.0.113.9"]);

        let first = cache.lookup(&candidates).await;
        let second = cache.lookup(&candidates).await;
        let third = cache.lookup(&candidates).await;

        assert_eq!(cache.resolver().calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(first.len(), 1);
        assert!(!first.contains_key("203.0.113.9"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_forgets_nameless_addresses() {
        let cache = HostnameCache::new(FakeDns::without_names(&["203.0.113.9"]), true);
        cache.lookup(&ips(&["203.0.113.9"])).await;
        cache.clear();
        cache.lookup(&ips(&["203.0.113.9"])).await;

        assert_eq!(cache.resolver().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_is_retried() {
        let cache = HostnameCache::new(FakeDns::default(), true);
        cache.resolver().fail.store(true, Ordering::SeqCst);
        assert!(cache.lookup(&ips(&["1.1.1.1"])).await.is_empty());

        cache.resolver().fail.store(false, Ordering::SeqCst);
        let names = cache.lookup(&ips(&["1.1.1.1"])).await;

        assert_eq!(names.get("1.1.1.1").map(String::as_str), Some("host-1-1-1-1"));
        assert_eq!(cache.resolver().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_private_only_candidates_issue_no_request() {
        let cache = HostnameCache::new(FakeDns::default(), true);
        let names = cache.lookup(&ips(&["10.0.0.1", "172.16.4.4"])).await;

        assert!(names.is_empty());
        assert_eq!(cache.resolver().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_previous_entries() {
        let cache = HostnameCache::new(FakeDns::default(), true);
        cache.lookup(&ips(&["8.8.8.8"])).await;

        cache.resolver().fail.store(true, Ordering::SeqCst);
        let names = cache.lookup(&ips(&["8.8.8.8", "1.1.1.1"])).await;

        assert_eq!(names.len(), 1);
        assert_eq!(names.get("8.8.8.8").map(String::as_str), Some("host-8-8-8-8"));
        assert_eq!(cache.resolver().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_skips_lookups() {
        let cache = HostnameCache::new(FakeDns::default(), false);
        let names = cache.lookup(&ips(&["8.8.8.8"])).await;

        assert!(names.is_empty());
        assert_eq!(cache.resolver().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reenabling_clears_cache() {
        let cache = HostnameCache::new(FakeDns::default(), true);
        cache.lookup(&ips(&["8.8.8.8"])).await;
        assert_eq!(cache.len(), 1);

        assert!(cache.set_enabled(false));
        assert_eq!(cache.len(), 1);

        assert!(!cache.set_enabled(true));
        assert!(cache.is_empty());

        cache.lookup(&ips(&["8.8.8.8"])).await;
        assert_eq!(cache.resolver().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_merge_safely() {
        let cache = Arc::new(HostnameCache::new(FakeDns::default(), true));
        let internal = ips(&["8.8.8.8", "10.0.0.5"]);
        let internet = ips(&["8.8.8.8", "1.1.1.1"]);

        let (a, b) = futures::join!(cache.lookup(&internal), cache.lookup(&internet));

        // Neither batch had landed when the other started, so both ask for 8.8.8.8
        assert_eq!(cache.resolver().calls.load(Ordering::SeqCst), 2);
        let requested = cache.resolver().requested.lock().unwrap().clone();
        assert_eq!(requested.len(), 2);
        assert!(requested.iter().all(|batch| batch.contains(&"8.8.8.8".to_string())));
        assert!(a.contains_key("8.8.8.8"));
        assert!(b.contains_key("1.1.1.1"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_merge_skips_echoed_addresses() {
        let cache = HostnameCache::new(FakeDns::default(), true);
        let mut results = HashMap::new();
        results.insert("8.8.8.8".to_string(), HostRecord::named("8.8.8.8"));
        results.insert("1.1.1.1/32".to_string(), HostRecord::named("one.one.one.one"));

        assert_eq!(cache.merge(results), 1);
        assert_eq!(cache.hostname("1.1.1.1").as_deref(), Some("one.one.one.one"));
        assert_eq!(cache.hostname("8.8.8.8"), None);
    }

    #[test]
    fn test_seeded_devices_label_sources() {
        let cache = HostnameCache::new(FakeDns::default(), true);
        let devices = vec![
            ConnectedDevice {
                ip: "10.0.0.5".to_string(),
                hostname: Some("laptop".to_string()),
                custom_name: Some("Alice's laptop".to_string()),
            },
            ConnectedDevice {
                ip: "10.0.0.6".to_string(),
                hostname: None,
                custom_name: None,
            },
        ];

        assert_eq!(cache.seed_devices(&devices), 1);
        assert_eq!(cache.device_name("10.0.0.5").as_deref(), Some("Alice's laptop"));

        let labels = cache.labels(HashMap::new());
        assert_eq!(labels.display("10.0.0.5"), "Alice's laptop");
        assert_eq!(labels.display("10.0.0.6"), "10.0.0.6");
    }
}
