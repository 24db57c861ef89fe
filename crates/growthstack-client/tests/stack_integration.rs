use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use growthstack_client::analytics::ClientContext;
use growthstack_client::stack::GrowthStack;
use growthstack_client::storage::MemoryStore;
use growthstack_core::config::GrowthConfig;

async fn running_experiments() -> Json<Value> {
    let now = Utc::now();
    Json(json!([{
        "id": "exp1",
        "name": "onboarding-checklist",
        "description": "",
        "hypothesis": "",
        "status": "running",
        "target_metric": "plan_created",
        "variants": [
            { "id": "v-control", "name": "control", "traffic_allocation": 50.0, "is_control": true, "config": {} },
            { "id": "v-checklist", "name": "checklist", "traffic_allocation": 50.0, "is_control": false, "config": {} }
        ],
        "traffic_allocation": 100.0,
        "created_by": "backend",
        "created_at": now,
        "updated_at": now
    }]))
}

async fn mock_backend() -> String {
    let app = Router::new()
        .route("/api/health", get(|| async { StatusCode::OK }))
        .route("/api/analytics/events", post(|| async { StatusCode::OK }))
        .route("/api/experiments", get(running_experiments))
        .route(
            "/api/experiments/assignments",
            get(|| async { Json(Vec::<Value>::new()) }).post(|| async { StatusCode::CREATED }),
        )
        .route(
            "/api/engagement/metrics",
            get(|| async {
                Json(json!({
                    "period": "7d",
                    "active_users": 12,
                    "total_sessions": 30,
                    "avg_session_duration_seconds": 240.0,
                    "avg_engagement_score": 55.0,
                    "retention_rate": 0.6
                }))
            }),
        )
        .route(
            "/api/engagement/segments",
            get(|| async { Json(json!([{ "segment": "new_users", "users": 12, "share": 1.0 }])) }),
        )
        .route(
            "/api/engagement/insights",
            get(|| async { Json(Vec::<Value>::new()) }),
        )
        .route(
            "/api/retention/campaigns",
            get(|| async { Json(Vec::<Value>::new()) }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("mock backend addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve mock backend");
    });
    format!("http://{addr}")
}

fn stack_config(url: String) -> GrowthConfig {
    GrowthConfig {
        api_base_url: url,
        flush_interval_ms: 600_000,
        campaign_tick_seconds: 3600,
        ..GrowthConfig::default()
    }
}

#[tokio::test]
async fn stack_initializes_and_aggregates_a_snapshot() {
    let url = mock_backend().await;
    let stack = GrowthStack::new(
        stack_config(url),
        ClientContext::default(),
        Arc::new(MemoryStore::new()),
    )
    .expect("build stack");

    stack.initialize(Some("user1")).await.expect("initialize");
    assert_eq!(
        stack
            .analytics()
            .session()
            .await
            .expect("session started")
            .user_id,
        "user1"
    );

    let snapshot = stack.snapshot("7d").await;
    assert_eq!(snapshot.metrics.active_users, 12);
    assert_eq!(snapshot.segments.len(), 1);
    assert_eq!(snapshot.running_experiments.len(), 1);
    assert_eq!(snapshot.running_experiments[0].id, "exp1");
    assert!(snapshot.campaigns.is_empty());

    // The synced experiment is assignable through the stack.
    let variant = stack
        .experiments()
        .assignment(
            "exp1",
            &growthstack_client::experiments::AssignmentContext::new("user123"),
        )
        .await
        .expect("assignment from synced experiment");
    assert!(variant.id == "v-control" || variant.id == "v-checklist");

    stack.shutdown().await.expect("shutdown");
    assert!(stack.analytics().session().await.is_none());
}

#[tokio::test]
async fn stack_snapshot_degrades_when_backend_is_down() {
    // Point the stack at a dead port: every section falls back.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind dead port");
    let addr = listener.local_addr().expect("dead addr");
    drop(listener);

    let stack = GrowthStack::new(
        stack_config(format!("http://{addr}")),
        ClientContext::default(),
        Arc::new(MemoryStore::new()),
    )
    .expect("build stack");

    assert!(
        stack.initialize(None).await.is_err(),
        "probe failure must propagate"
    );

    let snapshot = stack.snapshot("7d").await;
    assert_eq!(snapshot.metrics.active_users, 0);
    assert!(snapshot.segments.is_empty());
    assert!(snapshot.insights.is_empty());
    assert!(snapshot.running_experiments.is_empty());
    assert!(snapshot.campaigns.is_empty());
}
