use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::event::UtmParams;

/// One client session. Persisted as a single JSON blob so a restarting
/// host can resume it, and mutated in place by every tracked event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub page_views: u32,
    pub events: u32,
    pub referrer: Option<String>,
    #[serde(default)]
    pub utm: UtmParams,
}

impl UserSession {
    pub fn new(
        user_id: impl Into<String>,
        referrer: Option<String>,
        utm: UtmParams,
        now: DateTime<Utc>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            id: compute_session_id(&user_id, now.timestamp_millis()),
            user_id,
            started_at: now,
            ended_at: None,
            duration_seconds: None,
            page_views: 0,
            events: 0,
            referrer,
            utm,
        }
    }

    /// Bump counters for a tracked event.
    pub fn record_event(&mut self, is_page_view: bool) {
        self.events += 1;
        if is_page_view {
            self.page_views += 1;
        }
    }

    /// Rebind the session to an identified user. Last call wins.
    pub fn rebind(&mut self, user_id: impl Into<String>) {
        self.user_id = user_id.into();
    }

    pub fn end(&mut self, now: DateTime<Utc>) {
        self.ended_at = Some(now);
        self.duration_seconds = Some((now - self.started_at).num_seconds().max(0));
    }

    /// Staleness rule for *persisted* sessions: a stored session older than
    /// the timeout is discarded on restore, regardless of how recently it
    /// was active. Live inactivity expiry is handled separately by the
    /// heartbeat watcher.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.ended_at.is_some() || now - self.started_at > timeout
    }
}

/// `session_id = sha256(user_id + started_at_ms)[0:8]` as 16 hex chars.
fn compute_session_id(user_id: &str, started_at_ms: i64) -> String {
    let input = format!("{}{}", user_id, started_at_ms);
    let hash = Sha256::digest(input.as_bytes());
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_16_hex_chars() {
        let session = UserSession::new("u1", None, UtmParams::default(), Utc::now());
        assert_eq!(session.id.len(), 16);
        assert!(session.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn counters_bump_on_record() {
        let mut session = UserSession::new("u1", None, UtmParams::default(), Utc::now());
        session.record_event(true);
        session.record_event(false);
        assert_eq!(session.page_views, 1);
        assert_eq!(session.events, 2);
    }

    #[test]
    fn stale_when_older_than_timeout() {
        let started = Utc::now() - chrono::Duration::minutes(45);
        let mut session = UserSession::new("u1", None, UtmParams::default(), started);
        let timeout = chrono::Duration::minutes(30);
        assert!(session.is_stale(Utc::now(), timeout));

        session.started_at = Utc::now() - chrono::Duration::minutes(5);
        assert!(!session.is_stale(Utc::now(), timeout));

        session.end(Utc::now());
        assert!(session.is_stale(Utc::now(), timeout));
    }

    #[test]
    fn end_records_duration() {
        let started = Utc::now() - chrono::Duration::seconds(90);
        let mut session = UserSession::new("u1", None, UtmParams::default(), started);
        session.end(Utc::now());
        assert_eq!(session.duration_seconds, Some(90));
        assert!(session.ended_at.is_some());
    }
}
