// swarm-autoscaler: Orchestrator event watcher
//
// Tails the swarm's service event stream for the lifetime of the process,
// reconnecting after errors. Only shutdown stops it.

use std::sync::Arc;
use std::time::Duration;

use bollard::models::EventMessage;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::swarm::SwarmClient;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
    Created,
    Updated,
    Removed,
}

#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub service: String,
}

type EventCallback = dyn Fn(ServiceEvent) + Send + Sync;

pub struct EventWatcher {
    swarm: Arc<SwarmClient>,
    callback: Box<EventCallback>,
    shutdown: watch::Receiver<bool>,
}

impl EventWatcher {
    pub fn new(
        swarm: Arc<SwarmClient>,
        callback: impl Fn(ServiceEvent) + Send + Sync + 'static,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            swarm,
            callback: Box::new(callback),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("Orchestrator event watcher started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let mut stream = self.swarm.service_events();
            loop {
                tokio::select! {
                    _ = self.shutdown.changed() => {
                        info!("Orchestrator event watcher stopped");
                        return;
                    }
                    item = stream.next() => match item {
                        Some(Ok(message)) => {
                            if let Some(event) = convert(&message) {
                                (self.callback)(event);
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "Event stream error, reconnecting");
                            break;
                        }
                        None => {
                            warn!("Event stream ended, reconnecting");
                            break;
                        }
                    }
                }
            }
            drop(stream);
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = self.shutdown.changed() => break,
            }
        }
        info!("Orchestrator event watcher stopped");
    }
}

fn convert(message: &EventMessage) -> Option<ServiceEvent> {
    let kind = match message.action.as_deref()? {
        "create" => ServiceEventKind::Created,
        "update" => ServiceEventKind::Updated,
        "remove" => ServiceEventKind::Removed,
        _ => return None,
    };
    let actor = message.actor.as_ref();
    let service = actor
        .and_then(|a| a.attributes.as_ref())
        .and_then(|attrs| attrs.get("name").cloned())
        .or_else(|| actor.and_then(|a| a.id.clone()))
        .unwrap_or_default();
    Some(ServiceEvent { kind, service })
}
