//! HTTP transport to the growth backend.
//!
//! The endpoint paths are a contract with the existing REST backend and
//! must not drift. Every request carries a connect timeout and a total
//! request timeout.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use url::Url;

use growthstack_core::config::GrowthConfig;
use growthstack_core::engagement::{
    CohortAnalysis, EngagementInsight, EngagementMetrics, FunnelAnalysis, SegmentBreakdown,
    UserActivity, UserEngagement,
};
use growthstack_core::event::AnalyticsEvent;
use growthstack_core::experiment::{Experiment, ExperimentAssignment, ExperimentResults};
use growthstack_core::retention::{
    ExecuteActionRequest, RetentionCampaign, RetentionInsight, RetentionMetrics, RetentionProfile,
};

#[derive(Debug, Clone)]
pub struct ApiTransport {
    http: reqwest::Client,
    base: Url,
}

impl ApiTransport {
    pub fn new(config: &GrowthConfig) -> Result<Self> {
        let base = Url::parse(&config.api_base_url)
            .with_context(|| format!("invalid api base url: {}", config.api_base_url))?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("build http client")?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid endpoint path: {path}"))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {path} returned {status}");
        }
        response
            .json()
            .await
            .with_context(|| format!("decode GET {path} response"))
    }

    async fn post_json<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("POST {path} returned {status}");
        }
        Ok(())
    }

    /// Liveness probe used by `initialize`.
    pub async fn health(&self) -> Result<()> {
        let url = self.endpoint("/api/health")?;
        let response = self.http.get(url).send().await.context("GET /api/health")?;
        let status = response.status();
        if !status.is_success() {
            bail!("health probe returned {status}");
        }
        Ok(())
    }

    /// Ship one event batch. Any 2xx is success.
    pub async fn send_events(&self, events: &[AnalyticsEvent]) -> Result<()> {
        self.post_json(
            "/api/analytics/events",
            &serde_json::json!({ "events": events }),
        )
        .await
    }

    pub async fn activities(&self) -> Result<Vec<UserActivity>> {
        self.get_json("/api/engagement/activities", &[]).await
    }

    pub async fn user_engagement(&self, user_id: &str) -> Result<UserEngagement> {
        self.get_json(&format!("/api/engagement/user/{user_id}"), &[])
            .await
    }

    pub async fn engagement_metrics(&self, period: &str) -> Result<EngagementMetrics> {
        self.get_json("/api/engagement/metrics", &[("period", period.to_string())])
            .await
    }

    pub async fn user_segments(&self) -> Result<Vec<SegmentBreakdown>> {
        self.get_json("/api/engagement/segments", &[]).await
    }

    pub async fn funnel_analysis(&self, funnel_id: &str, period: &str) -> Result<FunnelAnalysis> {
        self.get_json(
            &format!("/api/engagement/funnel/{funnel_id}"),
            &[("period", period.to_string())],
        )
        .await
    }

    pub async fn cohort_analysis(&self, cohort_type: &str, periods: u32) -> Result<CohortAnalysis> {
        self.get_json(
            "/api/engagement/cohort",
            &[
                ("type", cohort_type.to_string()),
                ("periods", periods.to_string()),
            ],
        )
        .await
    }

    pub async fn engagement_insights(&self) -> Result<Vec<EngagementInsight>> {
        self.get_json("/api/engagement/insights", &[]).await
    }

    pub async fn running_experiments(&self) -> Result<Vec<Experiment>> {
        self.get_json("/api/experiments", &[("status", "running".to_string())])
            .await
    }

    pub async fn create_experiment(&self, experiment: &Experiment) -> Result<()> {
        self.post_json("/api/experiments", experiment).await
    }

    pub async fn assignments(&self) -> Result<Vec<ExperimentAssignment>> {
        self.get_json("/api/experiments/assignments", &[]).await
    }

    pub async fn record_assignment(&self, assignment: &ExperimentAssignment) -> Result<()> {
        self.post_json("/api/experiments/assignments", assignment)
            .await
    }

    pub async fn experiment_results(&self, experiment_id: &str) -> Result<ExperimentResults> {
        self.get_json(&format!("/api/experiments/{experiment_id}/results"), &[])
            .await
    }

    pub async fn campaigns(&self) -> Result<Vec<RetentionCampaign>> {
        self.get_json("/api/retention/campaigns", &[]).await
    }

    pub async fn create_campaign(&self, campaign: &RetentionCampaign) -> Result<()> {
        self.post_json("/api/retention/campaigns", campaign).await
    }

    pub async fn retention_profile(&self, user_id: &str) -> Result<RetentionProfile> {
        self.get_json(&format!("/api/retention/profile/{user_id}"), &[])
            .await
    }

    pub async fn execute_action(&self, request: &ExecuteActionRequest) -> Result<()> {
        self.post_json("/api/retention/actions/execute", request)
            .await
    }

    pub async fn retention_metrics(&self) -> Result<RetentionMetrics> {
        self.get_json("/api/retention/metrics", &[]).await
    }

    pub async fn retention_insights(&self) -> Result<Vec<RetentionInsight>> {
        self.get_json("/api/retention/insights", &[]).await
    }
}
