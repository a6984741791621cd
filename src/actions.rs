// swarm-autoscaler: Pending-action queue and scale worker
//
// Every replica write goes through the single worker draining this queue,
// so two writes for the same service never overlap and conflicts stay rare.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::EventStore;
use crate::labels::{Metric, ScalingProfile};
use crate::settings::Settings;
use crate::swarm::SwarmOrchestrator;

/// Bounded queue capacity; overflowing actions are dropped and retried on a
/// later tick.
pub const QUEUE_CAPACITY: usize = 1000;

const POP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// A queued but not yet executed scale request for one service.
#[derive(Debug, Clone)]
pub struct ScaleAction {
    pub service_id: String,
    pub direction: Direction,
    pub reason: String,
    pub metric: Metric,
}

/// Producer side of the scale pipeline. At most one action per service is
/// pending at any instant; the map always holds the latest decision, which
/// the worker claims when its message is popped.
pub struct ScaleQueue {
    tx: mpsc::Sender<ScaleAction>,
    pending: Mutex<HashMap<String, ScaleAction>>,
    last_scaled: Mutex<HashMap<String, Instant>>,
    cooldown: Duration,
}

impl ScaleQueue {
    pub fn new(capacity: usize, cooldown: Duration) -> (Arc<Self>, mpsc::Receiver<ScaleAction>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Arc::new(Self {
                tx,
                pending: Mutex::new(HashMap::new()),
                last_scaled: Mutex::new(HashMap::new()),
                cooldown,
            }),
            rx,
        )
    }

    /// Queues an action unless the same direction is already pending or the
    /// service scaled within the cooldown. An opposite-direction decision
    /// replaces the queued one in place, without a second message: the one
    /// already in flight executes whatever decision is current when it is
    /// popped. A full queue drops the action and clears the pending entry
    /// so a later tick can retry.
    pub fn enqueue(&self, service_id: &str, direction: Direction, reason: String, metric: Metric) {
        if let Some(scaled_at) = self.last_scaled.lock().get(service_id) {
            if scaled_at.elapsed() < self.cooldown {
                debug!(service_id, "Scale action suppressed by cooldown");
                return;
            }
        }

        let action = ScaleAction {
            service_id: service_id.to_string(),
            direction,
            reason,
            metric,
        };
        {
            let mut pending = self.pending.lock();
            match pending.get(service_id) {
                Some(queued) if queued.direction == direction => {
                    debug!(
                        service_id,
                        direction = direction.as_str(),
                        "Action already pending, dropping duplicate"
                    );
                    return;
                }
                Some(_) => {
                    debug!(
                        service_id,
                        direction = direction.as_str(),
                        "Replacing queued action with opposite direction"
                    );
                    pending.insert(service_id.to_string(), action);
                    return;
                }
                None => {
                    pending.insert(service_id.to_string(), action.clone());
                }
            }
        }

        if self.tx.try_send(action).is_err() {
            warn!(service_id, "Scale queue full, dropping action");
            self.pending.lock().remove(service_id);
        }
    }

    /// Claims the current decision for a service, clearing the pending
    /// entry. `None` means the decision was already claimed or dropped.
    pub fn take_pending(&self, service_id: &str) -> Option<ScaleAction> {
        self.pending.lock().remove(service_id)
    }

    pub fn pending_direction(&self, service_id: &str) -> Option<Direction> {
        self.pending
            .lock()
            .get(service_id)
            .map(|action| action.direction)
    }

    fn mark_scaled(&self, service_id: &str) {
        self.last_scaled
            .lock()
            .insert(service_id.to_string(), Instant::now());
    }
}

/// Single consumer executing queued actions against the orchestrator.
pub struct ScaleWorker {
    swarm: Arc<dyn SwarmOrchestrator>,
    events: Arc<EventStore>,
    queue: Arc<ScaleQueue>,
    rx: mpsc::Receiver<ScaleAction>,
    settings: Arc<Settings>,
    shutdown: watch::Receiver<bool>,
}

impl ScaleWorker {
    pub fn new(
        swarm: Arc<dyn SwarmOrchestrator>,
        events: Arc<EventStore>,
        queue: Arc<ScaleQueue>,
        rx: mpsc::Receiver<ScaleAction>,
        settings: Arc<Settings>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            swarm,
            events,
            queue,
            rx,
            settings,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("Scale worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let action = match timeout(POP_TIMEOUT, self.rx.recv()).await {
                Ok(Some(action)) => action,
                Ok(None) => break,
                Err(_) => continue,
            };
            self.execute(action).await;
        }
        info!("Scale worker stopped");
    }

    /// Executes the live decision for the popped message's service. The
    /// message may have been superseded by an opposite decision after it
    /// was pushed, so the popped direction is checked against the pending
    /// entry and the entry wins. Claiming it also clears it, so at most
    /// one action stays pending per service on every path.
    pub async fn execute(&self, action: ScaleAction) {
        let Some(current) = self.queue.take_pending(&action.service_id) else {
            debug!(
                service_id = %action.service_id,
                "Queued action no longer pending, skipping"
            );
            return;
        };
        if current.direction != action.direction {
            debug!(
                service_id = %current.service_id,
                queued = action.direction.as_str(),
                direction = current.direction.as_str(),
                "Queued action was superseded, executing the replacement"
            );
        }
        if let Err(err) = self.apply(&current).await {
            error!(
                service_id = %current.service_id,
                error = %err,
                "Scale action failed"
            );
        }
    }

    async fn apply(&self, action: &ScaleAction) -> Result<()> {
        // The replica count may have moved since the decision was made.
        let service = self.swarm.service(&action.service_id).await?;
        let profile = ScalingProfile::from_labels(&service.labels, &self.settings);
        let current = service.replicas;

        let step = match action.direction {
            Direction::Up => current + 1,
            Direction::Down => current.saturating_sub(1),
        };
        let target = if profile.disable_manual_replicas {
            // Out-of-band manual edits are pulled back into bounds.
            step.clamp(profile.min_replicas, profile.max_replicas)
        } else if step < profile.min_replicas || step > profile.max_replicas {
            debug!(
                service = %service.name,
                min = profile.min_replicas,
                max = profile.max_replicas,
                step,
                "Replica limit reached, nothing to do"
            );
            return Ok(());
        } else {
            step
        };

        if target == current {
            debug!(service = %service.name, "Replicas count not changed for the service");
            self.events.add_scale_event(
                &service.id,
                &service.name,
                current,
                target,
                &action.reason,
                action.metric,
                self.settings.dry_run,
            );
            return Ok(());
        }

        info!(
            service = %service.name,
            from = current,
            to = target,
            reason = %action.reason,
            dry_run = self.settings.dry_run,
            "Scale service"
        );
        if !self.settings.dry_run {
            self.swarm.set_replicas(&service.id, target).await?;
        }
        self.queue.mark_scaled(&service.id);
        self.events.add_scale_event(
            &service.id,
            &service.name,
            current,
            target,
            &action.reason,
            action.metric,
            self.settings.dry_run,
        );
        Ok(())
    }
}
