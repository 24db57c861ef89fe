//! Churn analysis, retention recommendations, and campaign processing.
//!
//! Campaign processing is a best-effort batch job: one user or action
//! failing is logged and skipped, never halting the rest of the run.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use growthstack_core::config::GrowthConfig;
use growthstack_core::engagement as engagement_core;
use growthstack_core::event::{EventType, EVENT_RETENTION_ACTION};
use growthstack_core::retention::{
    churn_factors, churn_risk_score, low_engagement_action, recommended_actions_for_stage,
    ExecuteActionRequest, RecommendedAction, RetentionAction, RetentionCampaign,
    RetentionInsight, RetentionMetrics, RetentionProfile, RetentionStage,
};

use crate::analytics::{AnalyticsClient, TrackOptions};
use crate::engagement::EngagementClient;
use crate::transport::ApiTransport;

/// Engagement score below which the bonus re-engagement action is added.
const LOW_ENGAGEMENT_SCORE: u8 = 30;

/// Outcome summary of one campaign-processing run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CampaignRunSummary {
    pub campaigns_processed: usize,
    pub actions_executed: usize,
    pub users_skipped: usize,
}

struct Inner {
    config: GrowthConfig,
    transport: ApiTransport,
    analytics: AnalyticsClient,
    engagement: EngagementClient,
    campaigns: RwLock<HashMap<String, RetentionCampaign>>,
}

#[derive(Clone)]
pub struct RetentionClient {
    inner: Arc<Inner>,
}

impl RetentionClient {
    pub fn new(
        config: GrowthConfig,
        transport: ApiTransport,
        analytics: AnalyticsClient,
        engagement: EngagementClient,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                analytics,
                engagement,
                campaigns: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Blend engagement signals into a `[0, 1]` churn-risk score. Returns
    /// a neutral 0.5 when engagement data is unavailable; never fails the
    /// caller.
    pub async fn analyze_churn_risk(&self, user_id: &str) -> f64 {
        match self.inner.engagement.try_user_engagement(user_id).await {
            Ok(engagement) => {
                let factors = churn_factors(
                    &engagement,
                    Utc::now(),
                    self.inner.config.churn_threshold_days,
                    self.inner.config.expected_weekly_sessions,
                );
                churn_risk_score(&factors)
            }
            Err(error) => {
                debug!(%error, user_id, "engagement unavailable, neutral churn risk");
                0.5
            }
        }
    }

    /// Stage-template actions plus a low-engagement bonus, capped at the
    /// configured maximum.
    pub async fn retention_recommendations(&self, user_id: &str) -> Vec<RecommendedAction> {
        let engagement = self.inner.engagement.user_engagement(user_id).await;
        let stage = match self.inner.transport.retention_profile(user_id).await {
            Ok(profile) => profile.retention_stage,
            Err(error) => {
                debug!(%error, user_id, "retention profile unavailable, deriving stage");
                RetentionStage::from_segment(&engagement.segment)
            }
        };

        let mut actions = recommended_actions_for_stage(stage);
        if engagement.engagement_score < LOW_ENGAGEMENT_SCORE {
            actions.push(low_engagement_action());
        }
        actions.truncate(self.inner.config.max_recommendations);
        actions
    }

    /// Register a campaign locally and push it to the backend best-effort.
    pub async fn create_campaign(&self, campaign: RetentionCampaign) -> RetentionCampaign {
        self.inner
            .campaigns
            .write()
            .await
            .insert(campaign.id.clone(), campaign.clone());
        if let Err(error) = self.inner.transport.create_campaign(&campaign).await {
            warn!(%error, campaign_id = %campaign.id, "failed to push campaign to backend");
        }
        campaign
    }

    pub async fn campaigns(&self) -> Vec<RetentionCampaign> {
        self.inner.campaigns.read().await.values().cloned().collect()
    }

    /// Refresh campaign definitions from the backend.
    pub async fn sync(&self) -> Result<()> {
        let fetched = self.inner.transport.campaigns().await?;
        let mut campaigns = self.inner.campaigns.write().await;
        for campaign in fetched {
            campaigns.insert(campaign.id.clone(), campaign);
        }
        Ok(())
    }

    /// One best-effort pass over all active campaigns.
    ///
    /// Eligible users are the server-known activity accumulators whose
    /// segment matches the campaign target. Users who already received the
    /// campaign are skipped. Actions run in order; an action with an
    /// unelapsed delay defers itself and the rest of the sequence to a
    /// later run.
    pub async fn process_campaigns(&self) -> Result<CampaignRunSummary> {
        if let Err(error) = self.sync().await {
            warn!(%error, "campaign sync failed, processing cached definitions");
        }
        let active: Vec<RetentionCampaign> = {
            let campaigns = self.inner.campaigns.read().await;
            campaigns.values().filter(|c| c.is_active()).cloned().collect()
        };
        if active.is_empty() {
            return Ok(CampaignRunSummary::default());
        }

        let activities = self.inner.engagement.remote_activities().await?;
        let params = self.inner.engagement.scoring();
        let now = Utc::now();

        let mut summary = CampaignRunSummary::default();
        for campaign in &active {
            summary.campaigns_processed += 1;
            let eligible = activities.iter().filter(|activity| {
                engagement_core::user_segment(activity, now, &params).as_str()
                    == campaign.target_segment
            });
            for activity in eligible {
                match self.process_user(campaign, &activity.user_id).await {
                    Ok(executed) if executed > 0 => summary.actions_executed += executed,
                    Ok(_) => summary.users_skipped += 1,
                    Err(error) => {
                        warn!(
                            %error,
                            campaign_id = %campaign.id,
                            user_id = %activity.user_id,
                            "campaign user processing failed, continuing"
                        );
                        summary.users_skipped += 1;
                    }
                }
            }
        }
        info!(
            campaigns = summary.campaigns_processed,
            executed = summary.actions_executed,
            skipped = summary.users_skipped,
            "campaign processing pass complete"
        );
        Ok(summary)
    }

    async fn process_user(&self, campaign: &RetentionCampaign, user_id: &str) -> Result<usize> {
        let profile = self.inner.transport.retention_profile(user_id).await?;
        if profile.received_campaigns.iter().any(|id| id == &campaign.id) {
            return Ok(0);
        }

        let reached_at = profile.last_campaign_at.unwrap_or_else(Utc::now);
        let mut executed = 0;
        for action in &campaign.actions {
            if !delay_elapsed(action, reached_at, Utc::now()) {
                // Later actions in the sequence wait at least as long.
                break;
            }
            self.execute_action(campaign, user_id, action).await?;
            executed += 1;
        }
        Ok(executed)
    }

    async fn execute_action(
        &self,
        campaign: &RetentionCampaign,
        user_id: &str,
        action: &RetentionAction,
    ) -> Result<()> {
        let request = ExecuteActionRequest {
            campaign_id: campaign.id.clone(),
            user_id: user_id.to_string(),
            action: action.clone(),
            executed_at: Utc::now(),
        };
        self.inner.transport.execute_action(&request).await?;

        let mut props = Map::new();
        props.insert(
            "campaign_id".to_string(),
            Value::String(campaign.id.clone()),
        );
        props.insert("user_id".to_string(), Value::String(user_id.to_string()));
        if let Ok(action_type) = serde_json::to_value(action.action_type) {
            props.insert("action_type".to_string(), action_type);
        }
        self.inner
            .analytics
            .track(
                EVENT_RETENTION_ACTION,
                TrackOptions {
                    event_type: Some(EventType::UserAction),
                    properties: Some(props),
                    ..Default::default()
                },
            )
            .await;
        Ok(())
    }

    pub async fn retention_metrics(&self) -> RetentionMetrics {
        match self.inner.transport.retention_metrics().await {
            Ok(metrics) => metrics,
            Err(error) => {
                warn!(%error, "retention metrics fetch failed, using default");
                RetentionMetrics::default()
            }
        }
    }

    pub async fn retention_insights(&self) -> Vec<RetentionInsight> {
        match self.inner.transport.retention_insights().await {
            Ok(insights) => insights,
            Err(error) => {
                warn!(%error, "retention insight fetch failed, using empty set");
                Vec::new()
            }
        }
    }

    pub async fn retention_profile(&self, user_id: &str) -> Result<RetentionProfile> {
        self.inner.transport.retention_profile(user_id).await
    }
}

fn delay_elapsed(
    action: &RetentionAction,
    reached_at: chrono::DateTime<Utc>,
    now: chrono::DateTime<Utc>,
) -> bool {
    match action.delay_hours {
        None | Some(0) => true,
        Some(hours) => now - reached_at >= chrono::Duration::hours(i64::from(hours)),
    }
}

/// Hourly campaign driver, spawned by the stack owner.
pub async fn run_campaign_loop(client: RetentionClient) {
    let tick = std::time::Duration::from_secs(client.inner.config.campaign_tick_seconds);
    info!(tick_seconds = tick.as_secs(), "campaign processor started");
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(err) = client.process_campaigns().await {
            error!(error = %err, "campaign processing iteration failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_gating() {
        let now = Utc::now();
        let action = |delay: Option<u32>| RetentionAction {
            action_type: growthstack_core::retention::RetentionActionType::Email,
            config: Map::new(),
            delay_hours: delay,
            frequency_cap: None,
        };
        assert!(delay_elapsed(&action(None), now, now));
        assert!(delay_elapsed(&action(Some(0)), now, now));
        assert!(!delay_elapsed(&action(Some(24)), now, now));
        assert!(delay_elapsed(
            &action(Some(24)),
            now - chrono::Duration::hours(25),
            now
        ));
    }
}
