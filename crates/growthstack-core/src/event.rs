use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::device::DeviceInfo;

/// User id attached to events tracked before `identify` is called.
pub const ANONYMOUS_USER_ID: &str = "anonymous";

pub const EVENT_SESSION_START: &str = "session_start";
pub const EVENT_SESSION_END: &str = "session_end";
pub const EVENT_USER_IDENTIFIED: &str = "user_identified";
pub const EVENT_PAGE_VIEW: &str = "page_view";
pub const EVENT_ERROR: &str = "error_encounter";
pub const EVENT_EXPOSURE: &str = "experiment_exposure";
pub const EVENT_CONVERSION: &str = "experiment_conversion";
pub const EVENT_ENGAGEMENT: &str = "engagement_action";
pub const EVENT_RETENTION_ACTION: &str = "retention_action";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    UserAction,
    Conversion,
    Error,
    Engagement,
    Experiment,
    Custom,
}

impl EventType {
    /// Map a recognized event name to its type; everything else is `Custom`.
    pub fn infer(event_name: &str) -> Self {
        match event_name {
            EVENT_PAGE_VIEW => Self::PageView,
            EVENT_ERROR => Self::Error,
            EVENT_EXPOSURE | EVENT_CONVERSION => Self::Experiment,
            EVENT_ENGAGEMENT => Self::Engagement,
            EVENT_SESSION_START | EVENT_SESSION_END | EVENT_USER_IDENTIFIED => Self::UserAction,
            _ => Self::Custom,
        }
    }
}

/// UTM query parameters captured from the page URL at session start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmParams {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
}

impl UtmParams {
    /// Parse UTM parameters from a full page URL. Returns the default
    /// (all-`None`) set when the URL is absent or unparseable.
    pub fn from_url(page_url: Option<&str>) -> Self {
        let mut utm = Self::default();
        let Some(raw) = page_url else {
            return utm;
        };
        let Ok(parsed) = url::Url::parse(raw) else {
            return utm;
        };
        for (key, value) in parsed.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "utm_source" => utm.utm_source = Some(value),
                "utm_medium" => utm.utm_medium = Some(value),
                "utm_campaign" => utm.utm_campaign = Some(value),
                "utm_term" => utm.utm_term = Some(value),
                "utm_content" => utm.utm_content = Some(value),
                _ => {}
            }
        }
        utm
    }

    pub fn is_empty(&self) -> bool {
        self.utm_source.is_none()
            && self.utm_medium.is_none()
            && self.utm_campaign.is_none()
            && self.utm_term.is_none()
            && self.utm_content.is_none()
    }
}

/// A single tracked event. Immutable once constructed; queued and shipped
/// in batches to `POST /api/analytics/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub event_type: EventType,
    pub event_name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl AnalyticsEvent {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        event_type: EventType,
        event_name: impl Into<String>,
        properties: Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            event_type,
            event_name: event_name.into(),
            properties,
            timestamp,
            page_url: None,
            referrer: None,
            device: None,
            user_agent: None,
        }
    }

    pub fn with_page_context(
        mut self,
        page_url: Option<String>,
        referrer: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.device = user_agent.as_deref().and_then(DeviceInfo::from_user_agent);
        self.page_url = page_url;
        self.referrer = referrer;
        self.user_agent = user_agent;
        self
    }
}

/// Wire payload for `POST /api/analytics/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<AnalyticsEvent>,
}
