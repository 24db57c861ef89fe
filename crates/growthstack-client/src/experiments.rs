//! Experiment definitions and variant assignment.
//!
//! Definitions and assignments live in in-memory maps operating as a
//! write-through cache over the backend: local mutations are pushed
//! best-effort, and `sync` refreshes from the server. Assignment itself
//! never depends on the network: the bucketing hash is a pure function of
//! the user id, so the same user gets the same variant across restarts.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use growthstack_core::bucketing;
use growthstack_core::config::GrowthConfig;
use growthstack_core::error::GrowthError;
use growthstack_core::event::{EventType, EVENT_CONVERSION, EVENT_EXPOSURE};
use growthstack_core::experiment::{
    CreateExperimentRequest, Experiment, ExperimentAssignment, ExperimentResults,
    ExperimentStatus, ExperimentVariant,
};

use crate::analytics::{AnalyticsClient, TrackOptions};
use crate::transport::ApiTransport;

/// Who is asking for a variant.
#[derive(Debug, Clone)]
pub struct AssignmentContext {
    pub user_id: String,
}

impl AssignmentContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

struct Inner {
    config: GrowthConfig,
    transport: ApiTransport,
    analytics: AnalyticsClient,
    experiments: RwLock<HashMap<String, Experiment>>,
    /// Keyed by (user_id, experiment_id).
    assignments: RwLock<HashMap<(String, String), ExperimentAssignment>>,
}

#[derive(Clone)]
pub struct ExperimentClient {
    inner: Arc<Inner>,
}

impl ExperimentClient {
    pub fn new(
        config: GrowthConfig,
        transport: ApiTransport,
        analytics: AnalyticsClient,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                analytics,
                experiments: RwLock::new(HashMap::new()),
                assignments: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Validate and register a new experiment in `draft` status. Validation
    /// errors propagate; the backend write is best-effort.
    pub async fn create_experiment(
        &self,
        req: CreateExperimentRequest,
        created_by: &str,
    ) -> Result<Experiment, GrowthError> {
        let experiment = Experiment::create(req, created_by, Utc::now())?;
        self.inner
            .experiments
            .write()
            .await
            .insert(experiment.id.clone(), experiment.clone());
        if let Err(error) = self.inner.transport.create_experiment(&experiment).await {
            warn!(%error, experiment_id = %experiment.id, "failed to push experiment to backend");
        }
        Ok(experiment)
    }

    pub async fn start_experiment(&self, experiment_id: &str) -> Result<(), GrowthError> {
        self.transition(experiment_id, Experiment::start).await
    }

    pub async fn stop_experiment(&self, experiment_id: &str) -> Result<(), GrowthError> {
        self.transition(experiment_id, Experiment::stop).await
    }

    async fn transition(
        &self,
        experiment_id: &str,
        apply: impl Fn(&mut Experiment, chrono::DateTime<Utc>) -> Result<(), GrowthError>,
    ) -> Result<(), GrowthError> {
        let mut experiments = self.inner.experiments.write().await;
        let experiment = experiments
            .get_mut(experiment_id)
            .ok_or_else(|| GrowthError::ExperimentNotFound(experiment_id.to_string()))?;
        apply(experiment, Utc::now())
    }

    pub async fn experiment(&self, experiment_id: &str) -> Option<Experiment> {
        self.inner.experiments.read().await.get(experiment_id).cloned()
    }

    pub async fn running(&self) -> Vec<Experiment> {
        self.inner
            .experiments
            .read()
            .await
            .values()
            .filter(|e| e.status == ExperimentStatus::Running)
            .cloned()
            .collect()
    }

    /// Refresh running experiments and known assignments from the backend.
    pub async fn sync(&self) -> Result<()> {
        let running = self.inner.transport.running_experiments().await?;
        {
            let mut experiments = self.inner.experiments.write().await;
            for experiment in running {
                experiments.insert(experiment.id.clone(), experiment);
            }
        }
        let assignments = self.inner.transport.assignments().await?;
        {
            let mut cache = self.inner.assignments.write().await;
            for assignment in assignments {
                cache.insert(
                    (assignment.user_id.clone(), assignment.experiment_id.clone()),
                    assignment,
                );
            }
        }
        Ok(())
    }

    /// Resolve the user's variant for a running experiment.
    ///
    /// Sticky assignments are stable for the experiment's lifetime even if
    /// allocations change later. Excluded users (bucket at or past the
    /// experiment-level allocation) get `None` with nothing recorded. Both
    /// fresh assignments and cached retrievals fire an exposure event.
    pub async fn assignment(
        &self,
        experiment_id: &str,
        ctx: &AssignmentContext,
    ) -> Option<ExperimentVariant> {
        let experiment = {
            let experiments = self.inner.experiments.read().await;
            experiments.get(experiment_id).cloned()?
        };
        if experiment.status != ExperimentStatus::Running {
            return None;
        }

        let key = (ctx.user_id.clone(), experiment_id.to_string());
        if self.inner.config.sticky_assignments {
            let cached = {
                let assignments = self.inner.assignments.read().await;
                assignments.get(&key).cloned()
            };
            if let Some(assignment) = cached {
                let variant = experiment.variant(&assignment.variant_id).cloned();
                if let Some(variant) = &variant {
                    self.track_exposure(&experiment, variant, &ctx.user_id, true)
                        .await;
                } else {
                    debug!(
                        experiment_id,
                        variant_id = %assignment.variant_id,
                        "sticky assignment references unknown variant"
                    );
                }
                return variant;
            }
        }

        let bucket = bucketing::bucket_for(&ctx.user_id);
        if !bucketing::included(bucket, experiment.traffic_allocation) {
            return None;
        }
        let variant = bucketing::pick_variant(&experiment.variants, bucket)?.clone();

        let assignment = ExperimentAssignment {
            user_id: ctx.user_id.clone(),
            experiment_id: experiment_id.to_string(),
            variant_id: variant.id.clone(),
            assigned_at: Utc::now(),
            sticky: self.inner.config.sticky_assignments,
        };
        self.inner
            .assignments
            .write()
            .await
            .insert(key, assignment.clone());
        if let Err(error) = self.inner.transport.record_assignment(&assignment).await {
            warn!(%error, experiment_id, "failed to push assignment to backend");
        }
        self.track_exposure(&experiment, &variant, &ctx.user_id, false)
            .await;
        Some(variant)
    }

    /// Conversions only count in-experiment: without an assignment this is
    /// a silent no-op.
    pub async fn record_conversion(
        &self,
        experiment_id: &str,
        user_id: &str,
        metric_name: &str,
        value: f64,
        properties: Option<Map<String, Value>>,
    ) {
        let assignment = {
            let assignments = self.inner.assignments.read().await;
            assignments
                .get(&(user_id.to_string(), experiment_id.to_string()))
                .cloned()
        };
        let Some(assignment) = assignment else {
            return;
        };

        let mut props = properties.unwrap_or_default();
        props.insert(
            "experiment_id".to_string(),
            Value::String(experiment_id.to_string()),
        );
        props.insert(
            "variant_id".to_string(),
            Value::String(assignment.variant_id),
        );
        props.insert(
            "metric_name".to_string(),
            Value::String(metric_name.to_string()),
        );
        props.insert("value".to_string(), Value::from(value));
        self.inner
            .analytics
            .track(
                EVENT_CONVERSION,
                TrackOptions {
                    event_type: Some(EventType::Conversion),
                    properties: Some(props),
                    ..Default::default()
                },
            )
            .await;
    }

    pub async fn results(&self, experiment_id: &str) -> Result<ExperimentResults> {
        self.inner.transport.experiment_results(experiment_id).await
    }

    async fn track_exposure(
        &self,
        experiment: &Experiment,
        variant: &ExperimentVariant,
        user_id: &str,
        cached: bool,
    ) {
        let mut props = Map::new();
        props.insert(
            "experiment_id".to_string(),
            Value::String(experiment.id.clone()),
        );
        props.insert(
            "experiment_name".to_string(),
            Value::String(experiment.name.clone()),
        );
        props.insert("variant_id".to_string(), Value::String(variant.id.clone()));
        props.insert(
            "variant_name".to_string(),
            Value::String(variant.name.clone()),
        );
        props.insert("user_id".to_string(), Value::String(user_id.to_string()));
        props.insert("cached".to_string(), Value::Bool(cached));
        self.inner
            .analytics
            .track(
                EVENT_EXPOSURE,
                TrackOptions {
                    event_type: Some(EventType::Experiment),
                    properties: Some(props),
                    ..Default::default()
                },
            )
            .await;
    }
}
