//! Engagement accumulation and cached metric reads.
//!
//! Remote reads are cache-then-fetch with a TTL, and every reader degrades
//! to a zeroed/empty default on transport failure: the dashboard renders
//! stale or empty panels, it never crashes on backend unavailability.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::warn;

use growthstack_core::config::GrowthConfig;
use growthstack_core::engagement::{
    self, ChurnRisk, CohortAnalysis, EngagementInsight, EngagementMetrics, FunnelAnalysis,
    SegmentBreakdown, UserActivity, UserEngagement, UserSegment,
};
use growthstack_core::event::{EventType, EVENT_ENGAGEMENT};

use crate::analytics::{AnalyticsClient, TrackOptions};
use crate::transport::ApiTransport;

/// TTL-bound memo of JSON-shaped responses, keyed per request.
struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl TtlCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entries = self.entries.lock().await;
        let (stored_at, value) = entries.get(key)?;
        if stored_at.elapsed() > self.ttl {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) {
        let Ok(value) = serde_json::to_value(value) else {
            return;
        };
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (Instant::now(), value));
    }
}

struct Inner {
    config: GrowthConfig,
    transport: ApiTransport,
    analytics: AnalyticsClient,
    activities: RwLock<HashMap<String, UserActivity>>,
    cache: TtlCache,
}

#[derive(Clone)]
pub struct EngagementClient {
    inner: Arc<Inner>,
}

impl EngagementClient {
    pub fn new(
        config: GrowthConfig,
        transport: ApiTransport,
        analytics: AnalyticsClient,
    ) -> Self {
        let cache = TtlCache::new(config.cache_ttl());
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                analytics,
                activities: RwLock::new(HashMap::new()),
                cache,
            }),
        }
    }

    /// Fold one engagement event into the per-user accumulator and emit the
    /// matching analytics event. Never fails.
    pub async fn track_engagement(
        &self,
        user_id: &str,
        event_tag: &str,
        properties: Option<Map<String, Value>>,
    ) {
        let now = Utc::now();
        {
            let mut activities = self.inner.activities.write().await;
            let activity = activities
                .entry(user_id.to_string())
                .or_insert_with(|| UserActivity::new(user_id, now));
            activity.record(event_tag, now);
        }

        let mut props = properties.unwrap_or_default();
        props.insert("user_id".to_string(), Value::String(user_id.to_string()));
        props.insert("action".to_string(), Value::String(event_tag.to_string()));
        self.inner
            .analytics
            .track(
                EVENT_ENGAGEMENT,
                TrackOptions {
                    event_type: Some(EventType::Engagement),
                    properties: Some(props),
                    ..Default::default()
                },
            )
            .await;
    }

    /// Credit a finished session's duration to the accumulator.
    pub async fn record_session_duration(&self, user_id: &str, seconds: i64) {
        let mut activities = self.inner.activities.write().await;
        if let Some(activity) = activities.get_mut(user_id) {
            activity.add_duration(seconds);
        }
    }

    pub async fn activity(&self, user_id: &str) -> Option<UserActivity> {
        self.inner.activities.read().await.get(user_id).cloned()
    }

    /// Score the locally accumulated activity for a user.
    pub async fn local_scores(&self, user_id: &str) -> Option<(u8, u8, UserSegment, ChurnRisk)> {
        let activity = self.activity(user_id).await?;
        let now = Utc::now();
        let params = self.inner.config.scoring();
        Some((
            engagement::engagement_score(&activity, now, &params),
            engagement::retention_score(&activity, now, &params),
            engagement::user_segment(&activity, now, &params),
            engagement::churn_risk(&activity, now, &params),
        ))
    }

    async fn cached<T, F, Fut>(&self, key: String, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.inner.cache.get(&key).await {
            return Ok(hit);
        }
        let fresh = fetch().await?;
        self.inner.cache.put(&key, &fresh).await;
        Ok(fresh)
    }

    /// Fallible fetch for callers that need to distinguish "backend down"
    /// from a zeroed default (the retention analyzer does).
    pub async fn try_user_engagement(&self, user_id: &str) -> Result<UserEngagement> {
        let transport = self.inner.transport.clone();
        let owned = user_id.to_string();
        self.cached(format!("user_engagement:{user_id}"), move || async move {
            transport.user_engagement(&owned).await
        })
        .await
    }

    pub async fn user_engagement(&self, user_id: &str) -> UserEngagement {
        match self.try_user_engagement(user_id).await {
            Ok(engagement) => engagement,
            Err(error) => {
                warn!(%error, user_id, "user engagement fetch failed, using default");
                UserEngagement {
                    user_id: user_id.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    pub async fn engagement_metrics(&self, period: &str) -> EngagementMetrics {
        let transport = self.inner.transport.clone();
        let owned = period.to_string();
        match self
            .cached(format!("metrics:{period}"), move || async move {
                transport.engagement_metrics(&owned).await
            })
            .await
        {
            Ok(metrics) => metrics,
            Err(error) => {
                warn!(%error, period, "engagement metrics fetch failed, using default");
                EngagementMetrics {
                    period: period.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    pub async fn user_segments(&self) -> Vec<SegmentBreakdown> {
        let transport = self.inner.transport.clone();
        match self
            .cached("segments".to_string(), move || async move {
                transport.user_segments().await
            })
            .await
        {
            Ok(segments) => segments,
            Err(error) => {
                warn!(%error, "segment fetch failed, using empty set");
                Vec::new()
            }
        }
    }

    pub async fn funnel_analysis(&self, funnel_id: &str, period: &str) -> FunnelAnalysis {
        let transport = self.inner.transport.clone();
        let funnel = funnel_id.to_string();
        let owned_period = period.to_string();
        match self
            .cached(format!("funnel:{funnel_id}:{period}"), move || async move {
                transport.funnel_analysis(&funnel, &owned_period).await
            })
            .await
        {
            Ok(analysis) => analysis,
            Err(error) => {
                warn!(%error, funnel_id, "funnel fetch failed, using default");
                FunnelAnalysis {
                    funnel_id: funnel_id.to_string(),
                    period: period.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    pub async fn cohort_analysis(&self, cohort_type: &str, periods: u32) -> CohortAnalysis {
        let transport = self.inner.transport.clone();
        let owned = cohort_type.to_string();
        match self
            .cached(
                format!("cohort:{cohort_type}:{periods}"),
                move || async move { transport.cohort_analysis(&owned, periods).await },
            )
            .await
        {
            Ok(analysis) => analysis,
            Err(error) => {
                warn!(%error, cohort_type, "cohort fetch failed, using default");
                CohortAnalysis {
                    cohort_type: cohort_type.to_string(),
                    periods,
                    ..Default::default()
                }
            }
        }
    }

    pub async fn engagement_insights(&self) -> Vec<EngagementInsight> {
        let transport = self.inner.transport.clone();
        match self
            .cached("insights".to_string(), move || async move {
                transport.engagement_insights().await
            })
            .await
        {
            Ok(insights) => insights,
            Err(error) => {
                warn!(%error, "insight fetch failed, using empty set");
                Vec::new()
            }
        }
    }

    /// All server-known activity accumulators; used by campaign targeting.
    pub async fn remote_activities(&self) -> Result<Vec<UserActivity>> {
        self.inner.transport.activities().await
    }

    pub(crate) fn scoring(&self) -> growthstack_core::engagement::ScoringParams {
        self.inner.config.scoring()
    }
}
