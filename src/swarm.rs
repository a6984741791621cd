// swarm-autoscaler: Docker Swarm orchestrator adapter
//
// Read side: autoscale-labeled services, running tasks, local container
// stats, node membership. Write side: replica count updates, serialized by
// the scale worker and retried on transient swarm conflicts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::models::{ContainerStatsResponse, EventMessage, Service};
use bollard::query_parameters::{
    EventsOptionsBuilder, InspectServiceOptions, ListContainersOptionsBuilder, ListNodesOptions,
    ListNodesOptionsBuilder, ListServicesOptionsBuilder, ListTasksOptionsBuilder, StatsOptions,
    UpdateServiceOptionsBuilder,
};
use bollard::Docker;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::error::{AutoscalerError, Result};
use crate::labels::LABEL_AUTOSCALE;
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::stats;

const NODES_COUNT_CACHE_KEY: &str = "nodes_count";
const NODE_COUNT_TTL: Duration = Duration::from_secs(30);

/// One swarm service as seen by the scaling engine, materialized from a
/// fresh orchestrator listing each tick and never persisted.
#[derive(Debug, Clone)]
pub struct ServiceState {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    /// Only replicated-mode services can be scaled
    pub replicated: bool,
    pub replicas: u64,
    /// CPU limit in fractional CPUs; negative when the service has none
    pub cpu_quota: f64,
    pub max_replicas_per_node: Option<u64>,
}

impl ServiceState {
    pub fn from_service(service: &Service) -> Option<Self> {
        let id = service.id.clone()?;
        let spec = service.spec.as_ref()?;
        let replicated = spec.mode.as_ref().and_then(|m| m.replicated.as_ref());

        let cpu_quota = spec
            .task_template
            .as_ref()
            .and_then(|t| t.resources.as_ref())
            .and_then(|r| r.limits.as_ref())
            .and_then(|l| l.nano_cpus)
            .map(stats::cpu_quota_fraction)
            .unwrap_or(-1.0);

        let max_replicas_per_node = spec
            .task_template
            .as_ref()
            .and_then(|t| t.placement.as_ref())
            .and_then(|p| p.max_replicas)
            .filter(|&n| n > 0)
            .map(|n| n as u64);

        Some(Self {
            name: spec.name.clone().unwrap_or_else(|| id.clone()),
            id,
            labels: spec.labels.clone().unwrap_or_default(),
            replicated: replicated.is_some(),
            replicas: replicated
                .and_then(|r| r.replicas)
                .unwrap_or_default()
                .max(0) as u64,
            cpu_quota,
            max_replicas_per_node,
        })
    }
}

/// Stats reads for containers running on this node. The HTTP surface
/// answers peer queries through this seam; a container that is not local
/// reads as `None`, never as an error.
#[async_trait]
pub trait LocalStatsProvider: Send + Sync {
    async fn local_cpu_percent(&self, container_id: &str, cpu_quota: f64) -> Option<f64>;
    async fn local_memory_percent(&self, container_id: &str) -> Option<f64>;
}

/// Contract between the decision engine / scale worker and the swarm.
///
/// The single production implementation is [`SwarmClient`]; tests stand in
/// their own implementations to drive the engine without a daemon.
#[async_trait]
pub trait SwarmOrchestrator: Send + Sync {
    /// Services carrying the autoscale label. Fails soft: an adapter error
    /// yields an empty list ("no work this tick"), never a scale-down.
    async fn list_autoscale_services(&self) -> Vec<ServiceState>;

    /// Container ids of tasks with desired-state running.
    async fn running_container_ids(&self, service_id: &str) -> Result<Vec<String>>;

    /// Fresh fetch of one service, used before every write.
    async fn service(&self, service_id: &str) -> Result<ServiceState>;

    /// Set the replica count. Retries transient update conflicts.
    async fn set_replicas(&self, service_id: &str, replicas: u64) -> Result<()>;

    /// Number of nodes in the cluster (cached for 30s).
    async fn node_count(&self) -> Result<u64>;

    /// Whether this process runs on the swarm's current leader manager.
    async fn is_leader(&self) -> bool;
}

/// Bollard-backed swarm adapter. The underlying connection handle is cheap
/// to clone and safe to share across tasks.
pub struct SwarmClient {
    docker: Docker,
    node_addr: String,
    node_cache: TtlCache<u64>,
    retry: RetryConfig,
}

impl SwarmClient {
    /// Connects to the local daemon socket and records this node's swarm
    /// address for the leader comparison.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_socket_defaults()?;
        let info = docker.info().await?;
        let node_addr = info.swarm.and_then(|s| s.node_addr).unwrap_or_default();
        Ok(Self {
            docker,
            node_addr,
            node_cache: TtlCache::new(),
            retry: RetryConfig::default(),
        })
    }

    /// One stats snapshot for a local container, `None` when the container
    /// is not running on this node.
    async fn stats_snapshot(&self, container_id: &str) -> Result<Option<ContainerStatsResponse>> {
        let filters = HashMap::from([("id".to_string(), vec![container_id.to_string()])]);
        let opts = ListContainersOptionsBuilder::default().filters(&filters).build();
        let containers = self.docker.list_containers(Some(opts)).await?;
        if containers.is_empty() {
            return Ok(None);
        }

        let mut stream = self
            .docker
            .stats(
                container_id,
                Some(StatsOptions {
                    stream: false,
                    one_shot: false,
                }),
            )
            .take(1);
        match stream.next().await {
            Some(Ok(snapshot)) => Ok(Some(snapshot)),
            Some(Err(err)) => Err(err.into()),
            None => Ok(None),
        }
    }

    /// Orchestrator event stream limited to service events.
    pub fn service_events(
        &self,
    ) -> impl Stream<Item = std::result::Result<EventMessage, bollard::errors::Error>> + '_ {
        let filters = HashMap::from([("type".to_string(), vec!["service".to_string()])]);
        let opts = EventsOptionsBuilder::default().filters(&filters).build();
        self.docker.events(Some(opts))
    }

    async fn try_set_replicas(&self, service_id: &str, replicas: u64) -> Result<()> {
        // Always re-inspect: the spec version must be current or the swarm
        // rejects the update.
        let service = self
            .docker
            .inspect_service(service_id, None::<InspectServiceOptions>)
            .await?;
        let version = service.version.as_ref().and_then(|v| v.index).unwrap_or(0);
        let mut spec = service.spec.unwrap_or_default();
        match spec.mode.as_mut().and_then(|m| m.replicated.as_mut()) {
            Some(replicated) => replicated.replicas = Some(replicas as i64),
            None => return Err(AutoscalerError::NotReplicated(service_id.to_string())),
        }

        let opts = UpdateServiceOptionsBuilder::default()
            .version(version as i32)
            .build();
        self.docker
            .update_service(service_id, spec, opts, None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStatsProvider for SwarmClient {
    async fn local_cpu_percent(&self, container_id: &str, cpu_quota: f64) -> Option<f64> {
        match self.stats_snapshot(container_id).await {
            Ok(Some(snapshot)) => Some(stats::cpu_percent(&snapshot, cpu_quota)),
            Ok(None) => None,
            Err(err) => {
                warn!(container_id, error = %err, "Failed to read container CPU stats");
                None
            }
        }
    }

    async fn local_memory_percent(&self, container_id: &str) -> Option<f64> {
        match self.stats_snapshot(container_id).await {
            Ok(Some(snapshot)) => Some(stats::memory_percent(&snapshot)),
            Ok(None) => None,
            Err(err) => {
                warn!(container_id, error = %err, "Failed to read container memory stats");
                None
            }
        }
    }
}

#[async_trait]
impl SwarmOrchestrator for SwarmClient {
    async fn list_autoscale_services(&self) -> Vec<ServiceState> {
        let filters = HashMap::from([("label".to_string(), vec![LABEL_AUTOSCALE.to_string()])]);
        let opts = ListServicesOptionsBuilder::default().filters(&filters).build();
        match self.docker.list_services(Some(opts)).await {
            Ok(services) => services.iter().filter_map(ServiceState::from_service).collect(),
            Err(err) => {
                warn!(error = %err, "Failed to list autoscale services, treating tick as empty");
                Vec::new()
            }
        }
    }

    async fn running_container_ids(&self, service_id: &str) -> Result<Vec<String>> {
        let filters = HashMap::from([
            ("service".to_string(), vec![service_id.to_string()]),
            ("desired-state".to_string(), vec!["running".to_string()]),
        ]);
        let opts = ListTasksOptionsBuilder::default().filters(&filters).build();
        let tasks = self.docker.list_tasks(Some(opts)).await?;
        Ok(tasks
            .into_iter()
            .filter_map(|task| {
                task.status
                    .and_then(|s| s.container_status)
                    .and_then(|c| c.container_id)
            })
            .filter(|id| !id.is_empty())
            .collect())
    }

    async fn service(&self, service_id: &str) -> Result<ServiceState> {
        let service = self
            .docker
            .inspect_service(service_id, None::<InspectServiceOptions>)
            .await?;
        ServiceState::from_service(&service).ok_or_else(|| {
            AutoscalerError::Config(format!("service {service_id} has no usable spec"))
        })
    }

    async fn set_replicas(&self, service_id: &str, replicas: u64) -> Result<()> {
        retry_on_conflict(&self.retry, service_id, || {
            self.try_set_replicas(service_id, replicas)
        })
        .await
    }

    async fn node_count(&self) -> Result<u64> {
        if let Some(count) = self.node_cache.get(NODES_COUNT_CACHE_KEY) {
            return Ok(count);
        }
        let nodes = self.docker.list_nodes(None::<ListNodesOptions>).await?;
        Ok(self
            .node_cache
            .set(NODES_COUNT_CACHE_KEY, nodes.len() as u64, NODE_COUNT_TTL))
    }

    async fn is_leader(&self) -> bool {
        let filters = HashMap::from([("role".to_string(), vec!["manager".to_string()])]);
        let opts = ListNodesOptionsBuilder::default().filters(&filters).build();
        let nodes = match self.docker.list_nodes(Some(opts)).await {
            Ok(nodes) => nodes,
            Err(err) => {
                // Workers cannot list nodes at all; they are never leaders.
                debug!(error = %err, "Node listing failed, not running on a manager");
                return false;
            }
        };

        let leader_addr = nodes.iter().find_map(|node| {
            let status = node.manager_status.as_ref()?;
            if status.leader.unwrap_or(false) {
                status.addr.clone()
            } else {
                None
            }
        });

        match leader_addr {
            Some(addr) if !self.node_addr.is_empty() => addr.starts_with(&self.node_addr),
            _ => false,
        }
    }
}
