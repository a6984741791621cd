// swarm-autoscaler: HTTP surface
//
// Local container stats (the endpoint sibling nodes hit during the
// fan-out), the audit event listing, and a small dashboard.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::discovery::ContainerStatsReply;
use crate::events::EventStore;
use crate::labels::Metric;
use crate::swarm::LocalStatsProvider;

const DEFAULT_EVENTS_LIMIT: usize = 100;

pub struct AppState {
    pub stats: Arc<dyn LocalStatsProvider>,
    pub events: Arc<EventStore>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/container/stats", get(container_stats))
        .route("/api/events", get(list_events))
        .route("/api/events/clear", post(clear_events))
        .route("/events/ui", get(events_ui))
        .with_state(state)
}

async fn root() -> &'static str {
    "Swarm Autoscaler is running"
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct StatsQuery {
    id: Option<String>,
    metric: Option<String>,
    #[serde(rename = "cpuLimit")]
    cpu_limit: Option<String>,
}

/// Container stats by id, answered only by the node hosting the container.
async fn container_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let Some(container_id) = query.id.filter(|id| !id.is_empty()) else {
        return bad_request("Missing required query parameter 'id'");
    };

    let metric = match query.metric.as_deref() {
        None | Some("") => Metric::Cpu,
        Some(raw) => match Metric::parse_strict(raw) {
            Some(metric) => metric,
            None => return bad_request("Unsupported metric. Use 'cpu' or 'memory'"),
        },
    };

    let value = match metric {
        Metric::Cpu => {
            let Some(raw_limit) = query.cpu_limit else {
                return bad_request("Missing required query parameter 'cpuLimit' for metric=cpu");
            };
            let Ok(cpu_limit) = raw_limit.parse::<f64>() else {
                return bad_request("Query parameter 'cpuLimit' must be a number");
            };
            state.stats.local_cpu_percent(&container_id, cpu_limit).await
        }
        Metric::Memory => state.stats.local_memory_percent(&container_id).await,
    };

    match value {
        Some(value) => Json(ContainerStatsReply {
            cpu: (metric == Metric::Cpu).then_some(value),
            memory: (metric == Metric::Memory).then_some(value),
            container_id,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("Container with id={container_id} not running on this node"),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct EventsQuery {
    service: Option<String>,
    limit: Option<String>,
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Json<serde_json::Value> {
    let limit = query
        .limit
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_EVENTS_LIMIT);
    let events = state
        .events
        .list_events(limit, query.service.as_deref(), None, None, 0);
    Json(json!({ "events": events }))
}

#[derive(Deserialize)]
struct ClearQuery {
    service: Option<String>,
}

async fn clear_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClearQuery>,
) -> Response {
    match state.events.clear(query.service.as_deref()) {
        Ok(cleared) => Json(json!({ "cleared": cleared, "service": query.service })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn events_ui() -> Html<&'static str> {
    Html(include_str!("../static/events.html"))
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}
