// swarm-autoscaler: Peer discovery and distributed stats collection
//
// A container runs on exactly one node, so a stats query is broadcast to
// every peer and the first non-empty answer wins. Peers are found through a
// DNS name that resolves to one A record per autoscaler instance.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::labels::Metric;

const DISCOVERY_CACHE_KEY: &str = "discovery_hosts";
const PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Answer of the `/api/container/stats` endpoint, shared between the HTTP
/// surface that produces it and the fan-out client that consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatsReply {
    #[serde(rename = "ContainerId")]
    pub container_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
}

impl ContainerStatsReply {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Cpu => self.cpu,
            Metric::Memory => self.memory,
        }
    }
}

/// Source of per-container utilization samples. The production
/// implementation fans out over the cluster; a central collector could be
/// substituted as long as this contract holds.
#[async_trait]
pub trait MetricProvider: Send + Sync {
    /// One utilization sample, or `None` when no node could answer.
    async fn container_metric(
        &self,
        container_id: &str,
        metric: Metric,
        cpu_quota: f64,
    ) -> Option<f64>;
}

/// DNS-based peer fan-out (the `tasks.<service>` convention: one A record
/// per running autoscaler task).
pub struct NodeDiscovery {
    http: reqwest::Client,
    dns_name: String,
    port: u16,
    workers: usize,
    hosts_cache: TtlCache<Vec<String>>,
    cache_ttl: Duration,
}

impl NodeDiscovery {
    pub fn new(dns_name: String, port: u16, workers: usize, check_interval: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(PEER_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            dns_name,
            port,
            workers: workers.max(1),
            hosts_cache: TtlCache::new(),
            cache_ttl: check_interval / 2,
        }
    }

    /// Test constructor with a fixed peer set instead of DNS resolution.
    #[doc(hidden)]
    pub fn with_static_hosts(hosts: Vec<String>, workers: usize) -> Self {
        let discovery = Self::new(String::new(), 0, workers, Duration::from_secs(600));
        discovery
            .hosts_cache
            .set(DISCOVERY_CACHE_KEY, hosts, Duration::from_secs(3600));
        discovery
    }

    /// Peer authorities (`host:port`), resolved through DNS and cached for
    /// half the control interval.
    async fn cluster_hosts(&self) -> Vec<String> {
        if let Some(hosts) = self.hosts_cache.get(DISCOVERY_CACHE_KEY) {
            return hosts;
        }

        let hosts = match tokio::net::lookup_host((self.dns_name.as_str(), self.port)).await {
            Ok(addrs) => addrs
                .filter(|addr| addr.is_ipv4())
                .map(|addr| addr.to_string())
                .collect::<Vec<_>>(),
            Err(err) => {
                warn!(dns_name = %self.dns_name, error = %err, "Peer DNS resolution failed");
                return Vec::new();
            }
        };

        self.hosts_cache
            .set(DISCOVERY_CACHE_KEY, hosts, self.cache_ttl)
    }

    async fn query_peer(&self, url: String) -> Option<ContainerStatsReply> {
        let response = self.http.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }
}

#[async_trait]
impl MetricProvider for NodeDiscovery {
    async fn container_metric(
        &self,
        container_id: &str,
        metric: Metric,
        cpu_quota: f64,
    ) -> Option<f64> {
        let mut query = format!("/api/container/stats?id={container_id}");
        if metric == Metric::Cpu {
            query.push_str(&format!("&cpuLimit={cpu_quota}"));
        }
        query.push_str(&format!("&metric={}", metric.as_str()));

        let hosts = self.cluster_hosts().await;
        if hosts.is_empty() {
            debug!(container_id, "No peers resolved for stats fan-out");
            return None;
        }

        let urls = hosts
            .into_iter()
            .map(|host| format!("http://{host}{query}"))
            .collect::<Vec<_>>();

        // Unordered race: exactly one peer hosts the container, everyone
        // else answers 404 and maps to None.
        let mut responses = stream::iter(urls)
            .map(|url| self.query_peer(url))
            .buffer_unordered(self.workers);
        while let Some(reply) = responses.next().await {
            if let Some(reply) = reply {
                return reply.value(metric);
            }
        }
        None
    }
}
