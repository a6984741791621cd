// HTTP surface contract: stats parameter validation, the 404-when-not-local
// rule, and the events listing round-trip.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;

use swarm_autoscaler::events::{EventStore, ScaleEvent};
use swarm_autoscaler::labels::Metric;
use swarm_autoscaler::server::{router, AppState};
use swarm_autoscaler::swarm::LocalStatsProvider;

/// A node that hosts exactly one container, `c1`.
struct StubStats;

#[async_trait]
impl LocalStatsProvider for StubStats {
    async fn local_cpu_percent(&self, container_id: &str, _cpu_quota: f64) -> Option<f64> {
        (container_id == "c1").then_some(42.0)
    }

    async fn local_memory_percent(&self, container_id: &str) -> Option<f64> {
        (container_id == "c1").then_some(55.0)
    }
}

async fn serve() -> (String, Arc<EventStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let (events, _events_rx) =
        EventStore::open(&dir.path().join("events.db"), 1000).expect("open store");

    let app = router(Arc::new(AppState {
        stats: Arc::new(StubStats),
        events: Arc::clone(&events),
    }));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (format!("http://{addr}"), events, dir)
}

#[tokio::test]
async fn liveness_and_health() {
    let (base, _events, _dir) = serve().await;

    let body = reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(body.status(), 200);
    assert_eq!(body.text().await.unwrap(), "Swarm Autoscaler is running");

    let health: serde_json::Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn stats_parameter_validation() {
    let (base, _events, _dir) = serve().await;

    // id is mandatory
    let resp = reqwest::get(format!("{base}/api/container/stats")).await.unwrap();
    assert_eq!(resp.status(), 400);

    // unknown metric
    let resp = reqwest::get(format!(
        "{base}/api/container/stats?id=c1&metric=disk&cpuLimit=1"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 400);

    // cpu requires cpuLimit
    let resp = reqwest::get(format!("{base}/api/container/stats?id=c1&metric=cpu"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // cpuLimit must be numeric
    let resp = reqwest::get(format!(
        "{base}/api/container/stats?id=c1&metric=cpu&cpuLimit=lots"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn stats_answers_for_local_containers_only() {
    let (base, _events, _dir) = serve().await;

    let resp = reqwest::get(format!(
        "{base}/api/container/stats?id=c1&metric=cpu&cpuLimit=0.5"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ContainerId"], "c1");
    assert_eq!(body["cpu"], 42.0);
    assert!(body.get("memory").is_none());

    let resp = reqwest::get(format!("{base}/api/container/stats?id=c1&metric=memory"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["memory"], 55.0);

    // Not on this node
    let resp = reqwest::get(format!(
        "{base}/api/container/stats?id=c9&metric=cpu&cpuLimit=0.5"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn events_listing_and_clearing() {
    let (base, events, _dir) = serve().await;
    events
        .insert_batch(&[
            ScaleEvent::new("id1", "web", 2, 3, "r1", Metric::Cpu, false),
            ScaleEvent::new("id1", "web", 3, 4, "r2", Metric::Cpu, false),
            ScaleEvent::new("id2", "api", 5, 4, "r3", Metric::Memory, false),
        ])
        .expect("seed events");

    let body: serde_json::Value = reqwest::get(format!("{base}/api/events"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["events"].as_array().unwrap().len(), 3);
    // newest first
    assert_eq!(body["events"][0]["service"], "api");

    let body: serde_json::Value = reqwest::get(format!("{base}/api/events?service=web&limit=1"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let listed = body["events"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["service"], "web");

    // a bad limit falls back to the default
    let body: serde_json::Value = reqwest::get(format!("{base}/api/events?limit=lots"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["events"].as_array().unwrap().len(), 3);

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .post(format!("{base}/api/events/clear?service=web"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["cleared"], 2);
    assert_eq!(body["service"], "web");

    let body: serde_json::Value = reqwest::get(format!("{base}/api/events"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn events_ui_serves_the_dashboard() {
    let (base, _events, _dir) = serve().await;
    let resp = reqwest::get(format!("{base}/events/ui")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/html"));
    assert!(resp.text().await.unwrap().contains("Scale Events"));
}
