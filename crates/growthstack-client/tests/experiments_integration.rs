use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value};

use growthstack_client::analytics::{AnalyticsClient, ClientContext};
use growthstack_client::experiments::{AssignmentContext, ExperimentClient};
use growthstack_client::storage::MemoryStore;
use growthstack_client::transport::ApiTransport;
use growthstack_core::config::GrowthConfig;
use growthstack_core::error::GrowthError;
use growthstack_core::experiment::{CreateExperimentRequest, VariantSpec};

/// Accept-everything backend: assignment and event pushes succeed, listing
/// endpoints are empty.
async fn mock_backend() -> String {
    let app = Router::new()
        .route("/api/health", get(|| async { StatusCode::OK }))
        .route(
            "/api/analytics/events",
            post(|| async { StatusCode::OK }),
        )
        .route(
            "/api/experiments",
            get(|| async { Json(Vec::<Value>::new()) }).post(|| async { StatusCode::CREATED }),
        )
        .route(
            "/api/experiments/assignments",
            get(|| async { Json(Vec::<Value>::new()) }).post(|| async { StatusCode::CREATED }),
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

fn variants(split: &[(f64, bool)]) -> Vec<VariantSpec> {
    split
        .iter()
        .enumerate()
        .map(|(i, (allocation, is_control))| VariantSpec {
            name: format!("variant-{i}"),
            traffic_allocation: *allocation,
            is_control: *is_control,
            config: Map::new(),
        })
        .collect()
}

fn request(traffic_allocation: Option<f64>) -> CreateExperimentRequest {
    CreateExperimentRequest {
        name: "meal-plan-cta".into(),
        description: "CTA copy test".into(),
        hypothesis: "action verbs convert better".into(),
        target_metric: "plan_created".into(),
        variants: variants(&[(50.0, true), (50.0, false)]),
        traffic_allocation,
    }
}

async fn setup(config: GrowthConfig) -> (ExperimentClient, AnalyticsClient) {
    let transport = ApiTransport::new(&config).expect("transport");
    let analytics = AnalyticsClient::new(
        config.clone(),
        transport.clone(),
        Arc::new(MemoryStore::new()),
        ClientContext::default(),
    );
    let experiments = ExperimentClient::new(config, transport, analytics.clone());
    (experiments, analytics)
}

async fn setup_default() -> (ExperimentClient, AnalyticsClient) {
    let url = mock_backend().await;
    setup(GrowthConfig {
        api_base_url: url,
        flush_interval_ms: 600_000,
        ..GrowthConfig::default()
    })
    .await
}

#[tokio::test]
async fn assignment_is_sticky_and_reproducible() {
    let (experiments, _analytics) = setup_default().await;
    let created = experiments
        .create_experiment(request(None), "qa")
        .await
        .expect("create");
    experiments
        .start_experiment(&created.id)
        .await
        .expect("start");

    let ctx = AssignmentContext::new("user123");
    let first = experiments
        .assignment(&created.id, &ctx)
        .await
        .expect("assigned at 100% traffic");
    let second = experiments
        .assignment(&created.id, &ctx)
        .await
        .expect("assigned again");
    assert_eq!(first.id, second.id, "sticky assignment must be stable");
}

#[tokio::test]
async fn assignment_survives_allocation_changes() {
    let url = mock_backend().await;
    let config = GrowthConfig {
        api_base_url: url.clone(),
        flush_interval_ms: 600_000,
        ..GrowthConfig::default()
    };
    let (experiments, _analytics) = setup(config.clone()).await;
    let created = experiments
        .create_experiment(request(None), "qa")
        .await
        .expect("create");
    experiments
        .start_experiment(&created.id)
        .await
        .expect("start");

    let ctx = AssignmentContext::new("user123");
    let sticky = experiments
        .assignment(&created.id, &ctx)
        .await
        .expect("assigned");

    // A second client with no cached assignment must land the same user in
    // the same bucket: the hash is a pure function of the user id.
    let (rebuilt, _analytics2) = setup(config).await;
    let rebuilt_exp = rebuilt
        .create_experiment(request(None), "qa")
        .await
        .expect("create again");
    rebuilt.start_experiment(&rebuilt_exp.id).await.expect("start");
    let fresh = rebuilt
        .assignment(&rebuilt_exp.id, &ctx)
        .await
        .expect("assigned in rebuilt client");
    assert_eq!(
        sticky.name, fresh.name,
        "same user id must bucket to the same variant position"
    );
}

#[tokio::test]
async fn zero_traffic_allocation_assigns_nobody() {
    let (experiments, _analytics) = setup_default().await;
    let created = experiments
        .create_experiment(request(Some(0.0)), "qa")
        .await
        .expect("create");
    experiments
        .start_experiment(&created.id)
        .await
        .expect("start");

    for i in 0..25 {
        let ctx = AssignmentContext::new(format!("user-{i}"));
        assert!(
            experiments.assignment(&created.id, &ctx).await.is_none(),
            "0% traffic must exclude every user"
        );
    }
}

#[tokio::test]
async fn non_running_experiment_assigns_nobody() {
    let (experiments, _analytics) = setup_default().await;
    let created = experiments
        .create_experiment(request(None), "qa")
        .await
        .expect("create");
    // Still draft.
    let ctx = AssignmentContext::new("user123");
    assert!(experiments.assignment(&created.id, &ctx).await.is_none());

    experiments.start_experiment(&created.id).await.expect("start");
    experiments.stop_experiment(&created.id).await.expect("stop");
    assert!(
        experiments.assignment(&created.id, &ctx).await.is_none(),
        "completed experiments assign nobody"
    );
}

#[tokio::test]
async fn state_machine_errors_name_the_experiment() {
    let (experiments, _analytics) = setup_default().await;
    let missing = experiments.start_experiment("nope").await.unwrap_err();
    assert!(matches!(missing, GrowthError::ExperimentNotFound(_)));
    assert!(missing.to_string().contains("nope"));

    let created = experiments
        .create_experiment(request(None), "qa")
        .await
        .expect("create");
    let premature = experiments.stop_experiment(&created.id).await.unwrap_err();
    assert!(premature.to_string().contains(&created.id));
}

#[tokio::test]
async fn exposure_fires_on_fresh_and_cached_assignment() {
    let (experiments, analytics) = setup_default().await;
    let created = experiments
        .create_experiment(request(None), "qa")
        .await
        .expect("create");
    experiments.start_experiment(&created.id).await.expect("start");

    let ctx = AssignmentContext::new("user123");
    experiments.assignment(&created.id, &ctx).await.expect("fresh");
    assert_eq!(analytics.queued_events().await, 1, "fresh assignment exposure");
    experiments.assignment(&created.id, &ctx).await.expect("cached");
    assert_eq!(analytics.queued_events().await, 2, "cached retrieval exposure");
}

#[tokio::test]
async fn conversion_without_assignment_is_a_noop() {
    let (experiments, analytics) = setup_default().await;
    let created = experiments
        .create_experiment(request(None), "qa")
        .await
        .expect("create");
    experiments.start_experiment(&created.id).await.expect("start");

    experiments
        .record_conversion(&created.id, "stranger", "plan_created", 1.0, None)
        .await;
    assert_eq!(
        analytics.queued_events().await,
        0,
        "conversion without assignment must emit nothing"
    );
}

#[tokio::test]
async fn conversion_with_assignment_emits_event() {
    let (experiments, analytics) = setup_default().await;
    let created = experiments
        .create_experiment(request(None), "qa")
        .await
        .expect("create");
    experiments.start_experiment(&created.id).await.expect("start");

    let ctx = AssignmentContext::new("user123");
    let _variant = experiments.assignment(&created.id, &ctx).await.expect("assigned");
    let before = analytics.queued_events().await;
    experiments
        .record_conversion(&created.id, "user123", "plan_created", 1.0, None)
        .await;
    assert_eq!(analytics.queued_events().await, before + 1);
}
