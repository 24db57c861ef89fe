//! Application-scoped service registry.
//!
//! Constructed once at startup and passed to consumers, replacing
//! module-level singleton accessors. Composition only; the services own
//! all behavior.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use growthstack_core::config::GrowthConfig;
use growthstack_core::engagement::{EngagementInsight, EngagementMetrics, SegmentBreakdown};
use growthstack_core::experiment::Experiment;
use growthstack_core::retention::RetentionCampaign;

use crate::analytics::{AnalyticsClient, ClientContext};
use crate::engagement::EngagementClient;
use crate::experiments::ExperimentClient;
use crate::retention::{run_campaign_loop, RetentionClient};
use crate::storage::SessionStore;
use crate::transport::ApiTransport;

/// Aggregated dashboard view. Every section degrades independently, so a
/// partial backend outage still yields a renderable snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub metrics: EngagementMetrics,
    pub segments: Vec<SegmentBreakdown>,
    pub insights: Vec<EngagementInsight>,
    pub running_experiments: Vec<Experiment>,
    pub campaigns: Vec<RetentionCampaign>,
}

pub struct GrowthStack {
    config: GrowthConfig,
    analytics: AnalyticsClient,
    experiments: ExperimentClient,
    engagement: EngagementClient,
    retention: RetentionClient,
    campaign_task: Mutex<Option<JoinHandle<()>>>,
}

impl GrowthStack {
    /// Wire the shared transport and the four services in dependency order.
    pub fn new(
        config: GrowthConfig,
        context: ClientContext,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let transport = ApiTransport::new(&config)?;
        let analytics =
            AnalyticsClient::new(config.clone(), transport.clone(), store, context);
        let experiments =
            ExperimentClient::new(config.clone(), transport.clone(), analytics.clone());
        let engagement =
            EngagementClient::new(config.clone(), transport.clone(), analytics.clone());
        let retention = RetentionClient::new(
            config.clone(),
            transport,
            analytics.clone(),
            engagement.clone(),
        );
        Ok(Self {
            config,
            analytics,
            experiments,
            engagement,
            retention,
            campaign_task: Mutex::new(None),
        })
    }

    /// Bring the stack up: analytics session first (its probe failure
    /// propagates), then best-effort definition syncs and the campaign
    /// processing loop.
    pub async fn initialize(&self, user_id: Option<&str>) -> Result<()> {
        self.analytics.initialize(user_id).await?;
        if let Err(error) = self.experiments.sync().await {
            warn!(%error, "experiment sync failed during startup");
        }
        if let Err(error) = self.retention.sync().await {
            warn!(%error, "campaign sync failed during startup");
        }
        let mut task = self.campaign_task.lock().await;
        if task.is_none() {
            *task = Some(tokio::spawn(run_campaign_loop(self.retention.clone())));
        }
        Ok(())
    }

    pub fn config(&self) -> &GrowthConfig {
        &self.config
    }

    pub fn analytics(&self) -> &AnalyticsClient {
        &self.analytics
    }

    pub fn experiments(&self) -> &ExperimentClient {
        &self.experiments
    }

    pub fn engagement(&self) -> &EngagementClient {
        &self.engagement
    }

    pub fn retention(&self) -> &RetentionClient {
        &self.retention
    }

    /// Assemble the dashboard view; each fetch falls back on its own.
    pub async fn snapshot(&self, period: &str) -> DashboardSnapshot {
        let metrics = self.engagement.engagement_metrics(period).await;
        let segments = self.engagement.user_segments().await;
        let insights = self.engagement.engagement_insights().await;
        if let Err(error) = self.experiments.sync().await {
            warn!(%error, "experiment refresh failed for snapshot");
        }
        let running_experiments = self.experiments.running().await;
        let campaigns = self.retention.campaigns().await;
        DashboardSnapshot {
            generated_at: Utc::now(),
            metrics,
            segments,
            insights,
            running_experiments,
            campaigns,
        }
    }

    /// Teardown in dependency order: stop the campaign loop, then flush
    /// and end the analytics session.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(task) = self.campaign_task.lock().await.take() {
            task.abort();
        }
        self.analytics.destroy().await
    }
}
