// swarm-autoscaler: Control loop and scaling decision engine
//
// One tick: leader gate, fresh service listing, per-service evaluation with
// bounded concurrency, decisions pushed into the scale queue. A slow
// service never blocks the others; a failing one is skipped.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::actions::{Direction, ScaleQueue};
use crate::discovery::MetricProvider;
use crate::labels::{DecreaseMode, Metric, ScalingProfile};
use crate::settings::Settings;
use crate::swarm::{ServiceState, SwarmOrchestrator};

/// Services evaluated concurrently per tick
const EVAL_WORKERS: usize = 8;

/// Idle time for instances that are not the swarm leader
const NOT_LEADER_BACKOFF: Duration = Duration::from_secs(60 * 10);

pub struct AutoscalerLoop {
    swarm: Arc<dyn SwarmOrchestrator>,
    metrics: Arc<dyn MetricProvider>,
    queue: Arc<ScaleQueue>,
    settings: Arc<Settings>,
    shutdown: watch::Receiver<bool>,
}

impl AutoscalerLoop {
    pub fn new(
        swarm: Arc<dyn SwarmOrchestrator>,
        metrics: Arc<dyn MetricProvider>,
        queue: Arc<ScaleQueue>,
        settings: Arc<Settings>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            swarm,
            metrics,
            queue,
            settings,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            interval = ?self.settings.check_interval,
            "Autoscaler control loop started"
        );
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let delay = if self.run_once().await {
                self.settings.check_interval
            } else {
                NOT_LEADER_BACKOFF
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }
        info!("Autoscaler control loop stopped");
    }

    /// One control tick. Returns false when this instance is not the
    /// leader, so the caller backs off instead of busy-looping.
    pub async fn run_once(&self) -> bool {
        if !self.swarm.is_leader().await {
            warn!("Instance running not on manager or not on leader");
            return false;
        }

        let services = self.swarm.list_autoscale_services().await;
        debug!(count = services.len(), "Evaluating autoscale services");
        stream::iter(services)
            .for_each_concurrent(EVAL_WORKERS, |service| self.evaluate(service))
            .await;
        true
    }

    async fn evaluate(&self, service: ServiceState) {
        let profile = ScalingProfile::from_labels(&service.labels, &self.settings);
        if let Err(err) = profile.validate(&service.name) {
            error!(service = %service.name, error = %err, "Skipping service");
            return;
        }
        if !service.replicated {
            error!(
                service = %service.name,
                "Cannot scale service because it is not in replicated mode"
            );
            return;
        }

        let containers = match self.swarm.running_container_ids(&service.id).await {
            Ok(containers) => containers,
            Err(err) => {
                warn!(service = %service.name, error = %err, "Failed to list running tasks");
                return;
            }
        };
        if containers.is_empty() {
            warn!(service = %service.name, "No running tasks in service found");
            return;
        }

        let cpu_quota = if profile.metric == Metric::Cpu {
            service.cpu_quota
        } else {
            -1.0
        };
        let mut samples = Vec::with_capacity(containers.len());
        for container_id in &containers {
            if let Some(value) = self
                .metrics
                .container_metric(container_id, profile.metric, cpu_quota)
                .await
            {
                samples.push(value);
            }
        }
        if samples.is_empty() {
            debug!(service = %service.name, "No metric samples collected, skipping");
            return;
        }

        let median = median(&samples);
        let peak = samples.iter().copied().fold(f64::MIN, f64::max);
        debug!(service = %service.name, median, peak, "Aggregated replica metrics");

        let Some((direction, reason)) = decide(&profile, service.replicas, median, peak) else {
            debug!(service = %service.name, "Service not needed to scale");
            return;
        };

        if !profile.enabled {
            warn!(
                service = %service.name,
                direction = direction.as_str(),
                reason = %reason,
                "Autoscale is disabled, would scale"
            );
            return;
        }

        let target = match direction {
            Direction::Up => service.replicas + 1,
            Direction::Down => service.replicas.saturating_sub(1),
        };
        if let Some(per_node) = service.max_replicas_per_node {
            match self.swarm.node_count().await {
                Ok(nodes) if nodes * per_node < target => {
                    warn!(
                        service = %service.name,
                        nodes,
                        max_replicas_per_node = per_node,
                        "There is no required number of nodes to host service instances"
                    );
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(service = %service.name, error = %err, "Failed to count nodes");
                    return;
                }
            }
        }

        self.queue
            .enqueue(&service.id, direction, reason, profile.metric);
    }
}

/// Scale decision for one service: up when the median crossed the high
/// watermark, down when the decrease-mode aggregate fell below the low
/// watermark, both strict and both bounded by the replica limits.
pub fn decide(
    profile: &ScalingProfile,
    current_replicas: u64,
    median: f64,
    peak: f64,
) -> Option<(Direction, String)> {
    if median > profile.high_percentage && current_replicas < profile.max_replicas {
        let reason = format!(
            "{} median {:.2}% above high watermark {}%",
            profile.metric.as_str(),
            median,
            profile.high_percentage
        );
        return Some((Direction::Up, reason));
    }

    let (basis_name, basis) = match profile.decrease_mode {
        DecreaseMode::Median => ("median", median),
        DecreaseMode::Max => ("max", peak),
    };
    if basis < profile.low_percentage && current_replicas > profile.min_replicas {
        let reason = format!(
            "{} {} {:.2}% below low watermark {}%",
            profile.metric.as_str(),
            basis_name,
            basis,
            profile.low_percentage
        );
        return Some((Direction::Down, reason));
    }

    None
}

/// Statistical median. `samples` must be non-empty.
pub fn median(samples: &[f64]) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
