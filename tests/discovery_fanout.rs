// Stats fan-out against mock peers: exactly one node hosts the container
// and answers 200, everyone else answers 404, and the client returns the
// hosting peer's value.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use swarm_autoscaler::discovery::{MetricProvider, NodeDiscovery};
use swarm_autoscaler::labels::Metric;

async fn peer_without_container() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/container/stats"))
        .respond_with(ResponseTemplate::new(404).set_body_string(
            "Container with id=c1 not running on this node",
        ))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn fanout_returns_the_hosting_peers_cpu_value() {
    let miss = peer_without_container().await;
    let hit = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/container/stats"))
        .and(query_param("id", "c1"))
        .and(query_param("metric", "cpu"))
        .and(query_param("cpuLimit", "0.5"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ContainerId": "c1", "cpu": 37.5})),
        )
        .mount(&hit)
        .await;

    let discovery = NodeDiscovery::with_static_hosts(
        vec![miss.address().to_string(), hit.address().to_string()],
        8,
    );
    let value = discovery.container_metric("c1", Metric::Cpu, 0.5).await;
    assert_eq!(value, Some(37.5));
}

#[tokio::test]
async fn fanout_returns_none_when_no_peer_hosts_the_container() {
    let a = peer_without_container().await;
    let b = peer_without_container().await;

    let discovery = NodeDiscovery::with_static_hosts(
        vec![a.address().to_string(), b.address().to_string()],
        8,
    );
    assert_eq!(discovery.container_metric("c1", Metric::Cpu, 0.5).await, None);
}

#[tokio::test]
async fn memory_queries_omit_the_cpu_limit_parameter() {
    let hit = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/container/stats"))
        .and(query_param("id", "c9"))
        .and(query_param("metric", "memory"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ContainerId": "c9", "memory": 62.0})),
        )
        .mount(&hit)
        .await;

    let discovery = NodeDiscovery::with_static_hosts(vec![hit.address().to_string()], 8);
    let value = discovery.container_metric("c9", Metric::Memory, -1.0).await;
    assert_eq!(value, Some(62.0));
}

#[tokio::test]
async fn unreachable_peers_are_treated_as_misses() {
    let hit = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/container/stats"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ContainerId": "c1", "cpu": 12.0})),
        )
        .mount(&hit)
        .await;

    // One peer is gone entirely; the race still resolves from the live one.
    let discovery = NodeDiscovery::with_static_hosts(
        vec!["127.0.0.1:1".to_string(), hit.address().to_string()],
        8,
    );
    assert_eq!(
        discovery.container_metric("c1", Metric::Cpu, 0.5).await,
        Some(12.0)
    );
}
