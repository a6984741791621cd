// swarm-autoscaler: Audit trail of scale actions
//
// Append-only store over sled, written by a dedicated task draining a
// bounded channel so the scale worker never waits on disk. Oldest rows are
// evicted once the configured cap is exceeded.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::labels::Metric;

/// Writer channel capacity before synchronous fallback writes kick in
const WRITE_QUEUE_CAPACITY: usize = 10_000;

/// Events persisted per write batch
const BATCH_SIZE: usize = 64;

/// Grace window granted to the writer on shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(1500);

/// Immutable record of one scale decision's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleEvent {
    /// Seconds since the Unix epoch
    pub ts: f64,
    #[serde(rename = "serviceId")]
    pub service_id: String,
    pub service: String,
    pub old: u64,
    pub new: u64,
    pub delta: i64,
    /// "up", "down" or "same"
    pub direction: String,
    pub reason: String,
    pub metric: String,
    #[serde(rename = "dryRun")]
    pub dry_run: bool,
}

impl ScaleEvent {
    pub fn new(
        service_id: &str,
        service_name: &str,
        old_replicas: u64,
        new_replicas: u64,
        reason: &str,
        metric: Metric,
        dry_run: bool,
    ) -> Self {
        let delta = new_replicas as i64 - old_replicas as i64;
        let direction = match delta {
            d if d > 0 => "up",
            d if d < 0 => "down",
            _ => "same",
        };
        Self {
            ts: chrono::Utc::now().timestamp_micros() as f64 / 1e6,
            service_id: service_id.to_string(),
            service: service_name.to_string(),
            old: old_replicas,
            new: new_replicas,
            delta,
            direction: direction.to_string(),
            reason: reason.to_string(),
            metric: metric.as_str().to_string(),
            dry_run,
        }
    }
}

/// Persistent event store. Cheap to share; all sled operations are
/// thread-safe.
pub struct EventStore {
    db: sled::Db,
    max_rows: usize,
    tx: mpsc::Sender<ScaleEvent>,
}

impl EventStore {
    pub fn open(
        path: &Path,
        max_rows: usize,
    ) -> Result<(Arc<Self>, mpsc::Receiver<ScaleEvent>)> {
        let db = sled::open(path)?;
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        Ok((Arc::new(Self { db, max_rows, tx }), rx))
    }

    /// Queues an event for async persistence. When the writer channel is
    /// saturated or gone, falls back to a synchronous write rather than
    /// losing audit data.
    pub fn add_scale_event(
        &self,
        service_id: &str,
        service_name: &str,
        old_replicas: u64,
        new_replicas: u64,
        reason: &str,
        metric: Metric,
        dry_run: bool,
    ) {
        let event = ScaleEvent::new(
            service_id,
            service_name,
            old_replicas,
            new_replicas,
            reason,
            metric,
            dry_run,
        );
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event))
            | Err(mpsc::error::TrySendError::Closed(event)) => {
                if let Err(err) = self.insert_batch(&[event]) {
                    warn!(error = %err, "Failed to persist audit event synchronously");
                }
            }
        }
    }

    pub fn insert_batch(&self, events: &[ScaleEvent]) -> Result<()> {
        for event in events {
            let key = self.db.generate_id()?.to_be_bytes();
            self.db.insert(key, serde_json::to_vec(event)?)?;
        }
        self.enforce_retention()?;
        Ok(())
    }

    /// Newest-first event listing with optional filters.
    pub fn list_events(
        &self,
        limit: usize,
        service: Option<&str>,
        since: Option<f64>,
        until: Option<f64>,
        offset: usize,
    ) -> Vec<ScaleEvent> {
        self.matching(service, since, until)
            .skip(offset)
            .take(limit)
            .collect()
    }

    pub fn count_events(
        &self,
        service: Option<&str>,
        since: Option<f64>,
        until: Option<f64>,
    ) -> usize {
        self.matching(service, since, until).count()
    }

    /// Removes events, optionally only for one service. Returns how many
    /// rows were deleted.
    pub fn clear(&self, service: Option<&str>) -> Result<usize> {
        match service {
            None => {
                let removed = self.db.len();
                self.db.clear()?;
                Ok(removed)
            }
            Some(name) => {
                let keys: Vec<_> = self
                    .db
                    .iter()
                    .filter_map(|item| item.ok())
                    .filter(|(_, value)| {
                        serde_json::from_slice::<ScaleEvent>(value)
                            .map(|event| event.service == name)
                            .unwrap_or(false)
                    })
                    .map(|(key, _)| key)
                    .collect();
                for key in &keys {
                    self.db.remove(key)?;
                }
                Ok(keys.len())
            }
        }
    }

    /// Distinct service names present in the store, sorted.
    pub fn list_services(&self) -> Vec<String> {
        self.db
            .iter()
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice::<ScaleEvent>(&value).ok())
            .map(|event| event.service)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn matching<'a>(
        &'a self,
        service: Option<&'a str>,
        since: Option<f64>,
        until: Option<f64>,
    ) -> impl Iterator<Item = ScaleEvent> + 'a {
        self.db
            .iter()
            .rev()
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice::<ScaleEvent>(&value).ok())
            .filter(move |event| service.map_or(true, |s| event.service == s))
            .filter(move |event| since.map_or(true, |t| event.ts >= t))
            .filter(move |event| until.map_or(true, |t| event.ts <= t))
    }

    fn enforce_retention(&self) -> Result<()> {
        while self.db.len() > self.max_rows {
            if self.db.pop_min()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

/// Background task persisting queued events in batches.
pub struct EventWriter {
    store: Arc<EventStore>,
    rx: mpsc::Receiver<ScaleEvent>,
    shutdown: watch::Receiver<bool>,
}

impl EventWriter {
    pub fn new(
        store: Arc<EventStore>,
        rx: mpsc::Receiver<ScaleEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            rx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        debug!("Audit event writer started");
        loop {
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(first) => {
                        let mut batch = Vec::with_capacity(BATCH_SIZE);
                        batch.push(first);
                        while batch.len() < BATCH_SIZE {
                            match self.rx.try_recv() {
                                Ok(event) => batch.push(event),
                                Err(_) => break,
                            }
                        }
                        if let Err(err) = self.store.insert_batch(&batch) {
                            warn!(error = %err, "Failed to persist audit event batch");
                        }
                    }
                    None => break,
                },
                _ = self.shutdown.changed() => break,
            }
        }
        self.flush_remaining();
        debug!("Audit event writer stopped");
    }

    /// Final drain of anything still sitting in the channel.
    fn flush_remaining(&mut self) {
        let mut batch = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            batch.push(event);
        }
        if batch.is_empty() {
            return;
        }
        if let Err(err) = self.store.insert_batch(&batch) {
            warn!(error = %err, "Failed to flush remaining audit events on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(max_rows: usize) -> (Arc<EventStore>, mpsc::Receiver<ScaleEvent>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, rx) = EventStore::open(&dir.path().join("events.db"), max_rows).expect("open");
        (store, rx, dir)
    }

    fn event(service: &str, old: u64, new: u64) -> ScaleEvent {
        ScaleEvent::new("id1", service, old, new, "test", Metric::Cpu, false)
    }

    #[test]
    fn direction_follows_delta() {
        assert_eq!(event("web", 3, 4).direction, "up");
        assert_eq!(event("web", 4, 3).direction, "down");
        assert_eq!(event("web", 3, 3).direction, "same");
        assert_eq!(event("web", 3, 4).delta, 1);
    }

    #[test]
    fn list_is_newest_first_and_limited() {
        let (store, _rx, _dir) = open_store(100);
        store.insert_batch(&[event("web", 2, 3)]).unwrap();
        store.insert_batch(&[event("web", 3, 4)]).unwrap();
        store.insert_batch(&[event("api", 5, 4)]).unwrap();

        let events = store.list_events(10, None, None, None, 0);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].service, "api");
        assert_eq!(events[2].old, 2);

        let events = store.list_events(1, None, None, None, 0);
        assert_eq!(events.len(), 1);

        let events = store.list_events(10, Some("web"), None, None, 0);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.service == "web"));

        let events = store.list_events(10, None, None, None, 2);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn retention_evicts_oldest_rows() {
        let (store, _rx, _dir) = open_store(3);
        for n in 0..5 {
            store.insert_batch(&[event("web", n, n + 1)]).unwrap();
        }
        let events = store.list_events(10, None, None, None, 0);
        assert_eq!(events.len(), 3);
        // The two oldest writes (old=0 and old=1) are gone.
        assert!(events.iter().all(|e| e.old >= 2));
    }

    #[test]
    fn clear_by_service_and_clear_all() {
        let (store, _rx, _dir) = open_store(100);
        store
            .insert_batch(&[event("web", 2, 3), event("api", 5, 4), event("web", 3, 4)])
            .unwrap();

        assert_eq!(store.clear(Some("web")).unwrap(), 2);
        assert_eq!(store.count_events(None, None, None), 1);
        assert_eq!(store.list_services(), vec!["api".to_string()]);

        assert_eq!(store.clear(None).unwrap(), 1);
        assert_eq!(store.count_events(None, None, None), 0);
    }

    #[tokio::test]
    async fn add_scale_event_reaches_the_writer_channel() {
        let (store, mut rx, _dir) = open_store(100);
        store.add_scale_event("id1", "web", 3, 4, "r", Metric::Cpu, true);
        let event = rx.recv().await.expect("event");
        assert_eq!(event.service, "web");
        assert_eq!(event.direction, "up");
        assert!(event.dry_run);
    }

    #[test]
    fn time_window_filters() {
        let (store, _rx, _dir) = open_store(100);
        let mut early = event("web", 2, 3);
        early.ts = 100.0;
        let mut late = event("web", 3, 4);
        late.ts = 200.0;
        store.insert_batch(&[early, late]).unwrap();

        assert_eq!(store.count_events(None, Some(150.0), None), 1);
        assert_eq!(store.count_events(None, None, Some(150.0)), 1);
        assert_eq!(store.count_events(None, Some(50.0), Some(250.0)), 2);
    }
}
