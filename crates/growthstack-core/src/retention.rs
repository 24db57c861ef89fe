use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engagement::UserEngagement;

/// Weights for the churn-risk blend. Order: inactivity, engagement,
/// retention, session frequency, days active.
const CHURN_FACTOR_WEIGHTS: [f64; 5] = [0.3, 0.25, 0.25, 0.1, 0.1];

/// Tenure normalization horizon for the days-active factor.
const TENURE_HORIZON_DAYS: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionActionType {
    Email,
    PushNotification,
    InAppMessage,
    Discount,
    FeatureHighlight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionAction {
    pub action_type: RetentionActionType,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Hours to wait after the campaign first reaches the user before this
    /// action fires. `None` fires immediately.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_hours: Option<u32>,
    /// Max executions of this action per user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_cap: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionCampaign {
    pub id: String,
    pub name: String,
    /// Segment id the campaign targets, e.g. `at_risk_users`.
    pub target_segment: String,
    pub actions: Vec<RetentionAction>,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetentionCampaign {
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionStage {
    Onboarding,
    Declining,
    AtRisk,
    Churned,
}

impl RetentionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onboarding => "onboarding",
            Self::Declining => "declining",
            Self::AtRisk => "at_risk",
            Self::Churned => "churned",
        }
    }

    /// Fallback derivation when the backend profile is unavailable: map the
    /// engagement segment onto the nearest lifecycle stage.
    pub fn from_segment(segment: &str) -> Self {
        match segment {
            "new_users" => Self::Onboarding,
            "churned_users" => Self::Churned,
            "at_risk_users" => Self::AtRisk,
            _ => Self::Declining,
        }
    }
}

/// A recommended next retention touch for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub action_type: RetentionActionType,
    pub title: String,
    pub reason: String,
}

fn action(action_type: RetentionActionType, title: &str, reason: &str) -> RecommendedAction {
    RecommendedAction {
        action_type,
        title: title.to_string(),
        reason: reason.to_string(),
    }
}

/// Fixed per-stage action templates.
pub fn recommended_actions_for_stage(stage: RetentionStage) -> Vec<RecommendedAction> {
    match stage {
        RetentionStage::Onboarding => vec![
            action(
                RetentionActionType::InAppMessage,
                "Guide the first meal plan",
                "new account without a completed plan",
            ),
            action(
                RetentionActionType::Email,
                "Welcome series: day-2 recipes",
                "onboarding sequence in progress",
            ),
            action(
                RetentionActionType::FeatureHighlight,
                "Show the shopping-list generator",
                "feature not yet discovered",
            ),
        ],
        RetentionStage::Declining => vec![
            action(
                RetentionActionType::PushNotification,
                "Weekly plan reminder",
                "session frequency trending down",
            ),
            action(
                RetentionActionType::Email,
                "New seasonal recipes digest",
                "fresh content nudge for declining usage",
            ),
        ],
        RetentionStage::AtRisk => vec![
            action(
                RetentionActionType::Email,
                "We saved your meal plan",
                "no activity for over a week",
            ),
            action(
                RetentionActionType::Discount,
                "Limited premium trial",
                "at-risk user incentive",
            ),
            action(
                RetentionActionType::PushNotification,
                "Your favorites are waiting",
                "re-engagement prompt",
            ),
        ],
        RetentionStage::Churned => vec![
            action(
                RetentionActionType::Email,
                "Win-back: what's new since you left",
                "past churn threshold",
            ),
            action(
                RetentionActionType::Discount,
                "Come-back offer",
                "churned user incentive",
            ),
        ],
    }
}

/// Bonus action appended when the engagement score is very low.
pub fn low_engagement_action() -> RecommendedAction {
    action(
        RetentionActionType::InAppMessage,
        "One-tap plan for tonight",
        "engagement score below threshold",
    )
}

/// Normalized churn inputs, each in `[0, 1]` with 1 = riskiest.
#[derive(Debug, Clone, Copy)]
pub struct ChurnFactors {
    pub inactivity: f64,
    pub engagement: f64,
    pub retention: f64,
    pub session_frequency: f64,
    pub days_active: f64,
}

fn unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Derive churn factors from a server engagement summary.
pub fn churn_factors(
    engagement: &UserEngagement,
    now: DateTime<Utc>,
    churn_threshold_days: i64,
    expected_weekly_sessions: f64,
) -> ChurnFactors {
    let threshold = churn_threshold_days.max(1) as f64;
    let inactive_days = engagement
        .last_active
        .map(|t| ((now - t).num_seconds().max(0) as f64) / 86_400.0)
        .unwrap_or(threshold);
    let tenure_days = engagement
        .first_visit
        .map(|t| ((now - t).num_seconds().max(0) as f64) / 86_400.0)
        .unwrap_or(0.0);
    let weeks = (tenure_days.max(1.0)) / 7.0;
    let per_week = f64::from(engagement.session_count) / weeks;

    ChurnFactors {
        inactivity: unit(inactive_days / threshold),
        engagement: unit(1.0 - f64::from(engagement.engagement_score) / 100.0),
        retention: unit(1.0 - f64::from(engagement.retention_score) / 100.0),
        session_frequency: unit(1.0 - per_week / expected_weekly_sessions.max(0.1)),
        days_active: unit(1.0 - tenure_days / TENURE_HORIZON_DAYS),
    }
}

/// Weighted churn-risk blend in `[0, 1]`.
pub fn churn_risk_score(factors: &ChurnFactors) -> f64 {
    let values = [
        factors.inactivity,
        factors.engagement,
        factors.retention,
        factors.session_frequency,
        factors.days_active,
    ];
    unit(
        values
            .iter()
            .zip(CHURN_FACTOR_WEIGHTS.iter())
            .map(|(value, weight)| value * weight)
            .sum(),
    )
}

/// Per-user retention state (`GET /api/retention/profile/:id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionProfile {
    pub user_id: String,
    pub retention_stage: RetentionStage,
    #[serde(default)]
    pub received_campaigns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_campaign_at: Option<DateTime<Utc>>,
}

/// Aggregate retention metrics (`GET /api/retention/metrics`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionMetrics {
    pub retained_users: i64,
    pub churned_users: i64,
    pub reactivated_users: i64,
    pub retention_rate: f64,
}

/// Narrative retention finding (`GET /api/retention/insights`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionInsight {
    pub kind: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_users: Option<i64>,
}

/// Wire request for `POST /api/retention/actions/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteActionRequest {
    pub campaign_id: String,
    pub user_id: String,
    pub action: RetentionAction,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engagement(
        score: u8,
        retention: u8,
        sessions: u32,
        tenure_days: i64,
        inactive_days: i64,
        now: DateTime<Utc>,
    ) -> UserEngagement {
        UserEngagement {
            user_id: "u1".into(),
            engagement_score: score,
            retention_score: retention,
            segment: "returning_users".into(),
            session_count: sessions,
            first_visit: Some(now - chrono::Duration::days(tenure_days)),
            last_active: Some(now - chrono::Duration::days(inactive_days)),
        }
    }

    #[test]
    fn churn_score_is_bounded() {
        let now = Utc::now();
        let best = engagement(100, 100, 100, 365, 0, now);
        let worst = engagement(0, 0, 0, 1, 60, now);
        let low = churn_risk_score(&churn_factors(&best, now, 30, 3.0));
        let high = churn_risk_score(&churn_factors(&worst, now, 30, 3.0));
        assert!((0.0..=1.0).contains(&low));
        assert!((0.0..=1.0).contains(&high));
        assert!(high > low);
    }

    #[test]
    fn missing_timestamps_read_as_risky() {
        let now = Utc::now();
        let mut sparse = engagement(50, 50, 0, 0, 0, now);
        sparse.first_visit = None;
        sparse.last_active = None;
        let factors = churn_factors(&sparse, now, 30, 3.0);
        assert_eq!(factors.inactivity, 1.0);
        assert_eq!(factors.days_active, 1.0);
    }

    #[test]
    fn every_stage_has_templates() {
        for stage in [
            RetentionStage::Onboarding,
            RetentionStage::Declining,
            RetentionStage::AtRisk,
            RetentionStage::Churned,
        ] {
            assert!(!recommended_actions_for_stage(stage).is_empty());
        }
    }

    #[test]
    fn stage_from_segment_mapping() {
        assert_eq!(RetentionStage::from_segment("new_users"), RetentionStage::Onboarding);
        assert_eq!(RetentionStage::from_segment("churned_users"), RetentionStage::Churned);
        assert_eq!(RetentionStage::from_segment("at_risk_users"), RetentionStage::AtRisk);
        assert_eq!(RetentionStage::from_segment("power_users"), RetentionStage::Declining);
    }
}
