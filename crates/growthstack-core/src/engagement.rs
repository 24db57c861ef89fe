use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Component weights for the engagement score blend. Order: session
/// frequency, recency, session duration, action density, page views.
const ENGAGEMENT_WEIGHTS: [f64; 5] = [0.25, 0.25, 0.2, 0.15, 0.15];

/// Bound on the recent-event tag list kept per user.
const RECENT_EVENT_TAGS: usize = 50;

/// Days of inactivity after which a user is considered at risk.
const AT_RISK_INACTIVITY_DAYS: f64 = 7.0;

/// Tunables shared by the scoring and segmentation functions.
#[derive(Debug, Clone)]
pub struct ScoringParams {
    pub churn_threshold_days: i64,
    pub expected_weekly_sessions: f64,
    pub power_user_weekly_sessions: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            churn_threshold_days: 30,
            expected_weekly_sessions: 3.0,
            power_user_weekly_sessions: 5.0,
        }
    }
}

/// Per-user activity accumulator. Created on first sight, grown
/// incrementally by every engagement event, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserActivity {
    pub user_id: String,
    pub session_count: u32,
    pub total_duration_seconds: i64,
    pub page_views: u32,
    pub action_count: u32,
    pub conversion_count: u32,
    pub first_visit: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub recent_events: Vec<String>,
}

impl UserActivity {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            session_count: 0,
            total_duration_seconds: 0,
            page_views: 0,
            action_count: 0,
            conversion_count: 0,
            first_visit: now,
            last_active: now,
            recent_events: Vec::new(),
        }
    }

    /// Fold one engagement event into the accumulator.
    pub fn record(&mut self, event_tag: &str, now: DateTime<Utc>) {
        match event_tag {
            "session_start" => self.session_count += 1,
            "page_view" => self.page_views += 1,
            "conversion" => self.conversion_count += 1,
            _ => self.action_count += 1,
        }
        self.last_active = now;
        self.recent_events.push(event_tag.to_string());
        if self.recent_events.len() > RECENT_EVENT_TAGS {
            let excess = self.recent_events.len() - RECENT_EVENT_TAGS;
            self.recent_events.drain(..excess);
        }
    }

    /// Add a finished session's duration to the running total.
    pub fn add_duration(&mut self, seconds: i64) {
        self.total_duration_seconds += seconds.max(0);
    }

    pub fn days_since_first_visit(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.first_visit).num_seconds().max(0) as f64) / 86_400.0
    }

    pub fn days_since_last_active(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.last_active).num_seconds().max(0) as f64) / 86_400.0
    }

    /// Session frequency normalized to sessions per week. Accounts younger
    /// than a day are treated as a day old so the ratio stays finite.
    pub fn sessions_per_week(&self, now: DateTime<Utc>) -> f64 {
        let weeks = self.days_since_first_visit(now).max(1.0) / 7.0;
        f64::from(self.session_count) / weeks
    }
}

fn component(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Weighted engagement blend, rounded to an integer in `[0, 100]`.
///
/// Components (each clamped to `[0, 100]` before blending):
/// frequency (a daily session scores 100), recency (linear per-day penalty
/// reaching 0 at the churn threshold), duration (a 30-minute average session
/// scores 100), action+conversion density, and page views per session.
pub fn engagement_score(activity: &UserActivity, now: DateTime<Utc>, params: &ScoringParams) -> u8 {
    let sessions = f64::from(activity.session_count).max(1.0);

    let frequency = component(activity.sessions_per_week(now) / 7.0 * 100.0);
    let recency = component(
        100.0
            - activity.days_since_last_active(now) * 100.0
                / (params.churn_threshold_days.max(1) as f64),
    );
    let avg_minutes = activity.total_duration_seconds as f64 / 60.0 / sessions;
    let duration = component(avg_minutes / 30.0 * 100.0);
    let density = component(
        f64::from(activity.action_count + activity.conversion_count) / sessions * 20.0,
    );
    let views = component(f64::from(activity.page_views) / sessions * 10.0);

    let blended = [frequency, recency, duration, density, views]
        .iter()
        .zip(ENGAGEMENT_WEIGHTS.iter())
        .map(|(value, weight)| value * weight)
        .sum::<f64>();
    blended.round().clamp(0.0, 100.0) as u8
}

/// Retention score in `[0, 100]`: 0 past the churn threshold, otherwise a
/// capped session-ratio term plus a recency bonus.
pub fn retention_score(activity: &UserActivity, now: DateTime<Utc>, params: &ScoringParams) -> u8 {
    let inactive_days = activity.days_since_last_active(now);
    if inactive_days > params.churn_threshold_days as f64 {
        return 0;
    }
    let ratio = (activity.sessions_per_week(now) / params.expected_weekly_sessions.max(0.1))
        .min(1.0);
    let bonus = (30.0 - inactive_days).clamp(0.0, 30.0);
    (ratio * 70.0 + bonus).round().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSegment {
    ChurnedUsers,
    AtRiskUsers,
    NewUsers,
    PowerUsers,
    ReturningUsers,
}

impl UserSegment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChurnedUsers => "churned_users",
            Self::AtRiskUsers => "at_risk_users",
            Self::NewUsers => "new_users",
            Self::PowerUsers => "power_users",
            Self::ReturningUsers => "returning_users",
        }
    }
}

/// Ordered decision rule; the check order is the tie-break policy.
pub fn user_segment(activity: &UserActivity, now: DateTime<Utc>, params: &ScoringParams) -> UserSegment {
    let inactive_days = activity.days_since_last_active(now);
    let per_week = activity.sessions_per_week(now);
    if inactive_days > params.churn_threshold_days as f64 {
        UserSegment::ChurnedUsers
    } else if inactive_days > AT_RISK_INACTIVITY_DAYS && per_week < 1.0 {
        UserSegment::AtRiskUsers
    } else if activity.days_since_first_visit(now) <= 7.0 {
        UserSegment::NewUsers
    } else if per_week >= params.power_user_weekly_sessions {
        UserSegment::PowerUsers
    } else {
        UserSegment::ReturningUsers
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChurnRisk {
    #[default]
    Low,
    Medium,
    High,
}

impl ChurnRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Qualitative churn banding from inactivity and session count.
pub fn churn_risk(activity: &UserActivity, now: DateTime<Utc>, params: &ScoringParams) -> ChurnRisk {
    let inactive_days = activity.days_since_last_active(now);
    if inactive_days > params.churn_threshold_days as f64 {
        ChurnRisk::High
    } else if inactive_days > 14.0 || activity.session_count < 2 {
        ChurnRisk::Medium
    } else {
        ChurnRisk::Low
    }
}

/// Server-computed engagement summary for one user
/// (`GET /api/engagement/user/:id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEngagement {
    pub user_id: String,
    pub engagement_score: u8,
    pub retention_score: u8,
    pub segment: String,
    pub session_count: u32,
    pub first_visit: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
}

impl Default for UserEngagement {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            engagement_score: 0,
            retention_score: 0,
            segment: UserSegment::ReturningUsers.as_str().to_string(),
            session_count: 0,
            first_visit: None,
            last_active: None,
        }
    }
}

/// Aggregate metrics for a period (`GET /api/engagement/metrics?period=`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub period: String,
    pub active_users: i64,
    pub total_sessions: i64,
    pub avg_session_duration_seconds: f64,
    pub avg_engagement_score: f64,
    pub retention_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentBreakdown {
    pub segment: String,
    pub users: i64,
    pub share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStepStat {
    pub label: String,
    pub entered: i64,
    pub completed: i64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunnelAnalysis {
    pub funnel_id: String,
    pub period: String,
    #[serde(default)]
    pub steps: Vec<FunnelStepStat>,
    pub overall_conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortRow {
    pub cohort_start: String,
    pub cohort_size: i64,
    pub retention: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CohortAnalysis {
    pub cohort_type: String,
    pub periods: u32,
    #[serde(default)]
    pub rows: Vec<CohortRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementInsight {
    pub kind: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_delta: Option<f64>,
}
