use std::time::Duration;

use crate::engagement::ScoringParams;

#[derive(Debug, Clone)]
pub struct GrowthConfig {
    pub api_base_url: String,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub session_timeout_minutes: i64,
    pub cache_ttl_ms: u64,
    pub churn_threshold_days: i64,
    pub expected_weekly_sessions: f64,
    pub power_user_weekly_sessions: f64,
    pub sticky_assignments: bool,
    pub max_recommendations: usize,
    pub campaign_tick_seconds: u64,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            batch_size: 50,
            flush_interval_ms: 30_000,
            session_timeout_minutes: 30,
            cache_ttl_ms: 300_000,
            churn_threshold_days: 30,
            expected_weekly_sessions: 3.0,
            power_user_weekly_sessions: 5.0,
            sticky_assignments: true,
            max_recommendations: 5,
            campaign_tick_seconds: 3600,
            request_timeout_ms: 10_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl GrowthConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        Ok(Self {
            api_base_url: std::env::var("GROWTHSTACK_API_URL")
                .unwrap_or(defaults.api_base_url),
            batch_size: std::env::var("GROWTHSTACK_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.batch_size),
            flush_interval_ms: std::env::var("GROWTHSTACK_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.flush_interval_ms),
            session_timeout_minutes: std::env::var("GROWTHSTACK_SESSION_TIMEOUT_MINUTES")
                .map(|v| {
                    v.parse()
                        .map_err(|e| format!("invalid session timeout: {e}"))
                })
                .unwrap_or(Ok(defaults.session_timeout_minutes))?,
            cache_ttl_ms: std::env::var("GROWTHSTACK_CACHE_TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_ttl_ms),
            churn_threshold_days: std::env::var("GROWTHSTACK_CHURN_THRESHOLD_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.churn_threshold_days),
            expected_weekly_sessions: std::env::var("GROWTHSTACK_EXPECTED_WEEKLY_SESSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.expected_weekly_sessions),
            power_user_weekly_sessions: std::env::var("GROWTHSTACK_POWER_WEEKLY_SESSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.power_user_weekly_sessions),
            sticky_assignments: std::env::var("GROWTHSTACK_STICKY_ASSIGNMENTS")
                .map(|v| v != "false")
                .unwrap_or(defaults.sticky_assignments),
            max_recommendations: std::env::var("GROWTHSTACK_MAX_RECOMMENDATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_recommendations),
            campaign_tick_seconds: std::env::var("GROWTHSTACK_CAMPAIGN_TICK_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| v.clamp(10, 86_400))
                .unwrap_or(defaults.campaign_tick_seconds),
            request_timeout_ms: std::env::var("GROWTHSTACK_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_ms),
            connect_timeout_ms: std::env::var("GROWTHSTACK_CONNECT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.connect_timeout_ms),
        })
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_timeout_minutes)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn scoring(&self) -> ScoringParams {
        ScoringParams {
            churn_threshold_days: self.churn_threshold_days,
            expected_weekly_sessions: self.expected_weekly_sessions,
            power_user_weekly_sessions: self.power_user_weekly_sessions,
        }
    }
}
