//! Event buffering and session bookkeeping.
//!
//! Tracking calls are fire-and-forget instrumentation: they must never
//! surface an error to the host application. The one exception is
//! [`AnalyticsClient::initialize`], which propagates probe failures so the
//! caller knows setup did not complete.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use growthstack_core::config::GrowthConfig;
use growthstack_core::event::{
    AnalyticsEvent, EventType, UtmParams, ANONYMOUS_USER_ID, EVENT_ERROR, EVENT_PAGE_VIEW,
    EVENT_SESSION_END, EVENT_SESSION_START, EVENT_USER_IDENTIFIED,
};
use growthstack_core::session::UserSession;

use crate::heartbeat::{self, ActivityTicks, Heartbeat, InactivityTimer};
use crate::storage::{SessionStore, SESSION_STORAGE_KEY};
use crate::transport::ApiTransport;

/// Runtime context the host supplies once at construction: where the SDK
/// is embedded and on whose behalf it reports.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
}

/// Per-call options for [`AnalyticsClient::track`].
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Defaults to [`EventType::infer`] on the event name.
    pub event_type: Option<EventType>,
    pub properties: Option<Map<String, Value>>,
    /// Defaults to now.
    pub timestamp: Option<DateTime<Utc>>,
    /// Overrides the current session id on the emitted event only.
    pub session_id: Option<String>,
    /// Flush the queue right after enqueueing.
    pub immediate: bool,
}

struct Lifecycle {
    initialized: bool,
    heartbeat: Option<Heartbeat>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: GrowthConfig,
    transport: ApiTransport,
    store: Arc<dyn SessionStore>,
    context: ClientContext,
    session: Mutex<Option<UserSession>>,
    queue: Mutex<VecDeque<AnalyticsEvent>>,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes concurrent flushes so a retrying batch is not interleaved
    /// with a fresh one.
    flush_gate: Mutex<()>,
}

#[derive(Clone)]
pub struct AnalyticsClient {
    inner: Arc<Inner>,
}

impl AnalyticsClient {
    pub fn new(
        config: GrowthConfig,
        transport: ApiTransport,
        store: Arc<dyn SessionStore>,
        context: ClientContext,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                store,
                context,
                session: Mutex::new(None),
                queue: Mutex::new(VecDeque::new()),
                lifecycle: Mutex::new(Lifecycle {
                    initialized: false,
                    heartbeat: None,
                    tasks: Vec::new(),
                }),
                flush_gate: Mutex::new(()),
            }),
        }
    }

    /// Idempotent setup: probe the backend, restore or start a session, and
    /// spawn the flush and inactivity loops. Probe failure propagates; a
    /// later retry starts clean.
    pub async fn initialize(&self, user_id: Option<&str>) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.initialized {
            return Ok(());
        }

        self.inner
            .transport
            .health()
            .await
            .context("growth backend probe failed")?;

        let now = Utc::now();
        let mut session = match self.restore_session(now).await {
            Some(session) => session,
            None => self.fresh_session(user_id, now),
        };
        if let Some(user_id) = user_id {
            session.rebind(user_id);
        }
        self.persist_session(&session).await;
        *self.inner.session.lock().await = Some(session);

        let (heartbeat, ticks) = heartbeat::channel();
        lifecycle.heartbeat = Some(heartbeat);
        lifecycle
            .tasks
            .push(tokio::spawn(run_flush_loop(self.clone())));
        lifecycle
            .tasks
            .push(tokio::spawn(run_inactivity_watcher(self.clone(), ticks)));
        lifecycle.initialized = true;
        drop(lifecycle);

        self.track(EVENT_SESSION_START, TrackOptions::default())
            .await;
        Ok(())
    }

    /// Rebind the session to an identified user; last call wins.
    pub async fn identify(&self, user_id: &str, traits: Option<Map<String, Value>>) {
        let snapshot = {
            let mut guard = self.inner.session.lock().await;
            match guard.as_mut() {
                Some(session) => {
                    session.rebind(user_id);
                    Some(session.clone())
                }
                None => None,
            }
        };
        if let Some(session) = snapshot {
            self.persist_session(&session).await;
        }

        let mut properties = traits.unwrap_or_default();
        properties.insert("user_id".to_string(), Value::String(user_id.to_string()));
        self.track(
            EVENT_USER_IDENTIFIED,
            TrackOptions {
                properties: Some(properties),
                ..Default::default()
            },
        )
        .await;
    }

    /// Enqueue one event. Never fails: storage and transport problems are
    /// logged and swallowed so instrumentation cannot break the host.
    pub async fn track(&self, event_name: &str, opts: TrackOptions) {
        let timestamp = opts.timestamp.unwrap_or_else(Utc::now);
        let event_type = opts
            .event_type
            .unwrap_or_else(|| EventType::infer(event_name));

        let mut snapshot = None;
        let (user_id, session_id) = {
            let mut guard = self.inner.session.lock().await;
            match guard.as_mut() {
                Some(session) => {
                    session.record_event(event_type == EventType::PageView);
                    snapshot = Some(session.clone());
                    let id = opts.session_id.clone().unwrap_or_else(|| session.id.clone());
                    (session.user_id.clone(), id)
                }
                None => (
                    ANONYMOUS_USER_ID.to_string(),
                    opts.session_id.clone().unwrap_or_default(),
                ),
            }
        };
        if let Some(session) = snapshot {
            self.persist_session(&session).await;
        }
        if let Some(heartbeat) = self.heartbeat().await {
            heartbeat.beat();
        }

        let event = AnalyticsEvent::new(
            user_id,
            session_id,
            event_type,
            event_name,
            opts.properties.unwrap_or_default(),
            timestamp,
        )
        .with_page_context(
            self.inner.context.page_url.clone(),
            self.inner.context.referrer.clone(),
            self.inner.context.user_agent.clone(),
        );

        let should_flush = {
            let mut queue = self.inner.queue.lock().await;
            queue.push_back(event);
            opts.immediate || queue.len() >= self.inner.config.batch_size
        };
        if should_flush {
            let client = self.clone();
            tokio::spawn(async move {
                if let Err(error) = client.flush().await {
                    warn!(%error, "background flush failed; events re-queued");
                }
            });
        }
    }

    /// `page_view` convenience with url/title context merged in.
    pub async fn page(&self, name: Option<&str>, properties: Option<Map<String, Value>>) {
        let mut props = properties.unwrap_or_default();
        if let Some(name) = name {
            props.insert("name".to_string(), Value::String(name.to_string()));
        }
        if let Some(url) = &self.inner.context.page_url {
            props.insert("url".to_string(), Value::String(url.clone()));
        }
        if let Some(title) = &self.inner.context.page_title {
            props.insert("title".to_string(), Value::String(title.clone()));
        }
        self.track(
            EVENT_PAGE_VIEW,
            TrackOptions {
                event_type: Some(EventType::PageView),
                properties: Some(props),
                ..Default::default()
            },
        )
        .await;
    }

    /// Errors skip the batch window.
    pub async fn error(&self, message: &str, details: Option<Map<String, Value>>) {
        let mut props = details.unwrap_or_default();
        props.insert("message".to_string(), Value::String(message.to_string()));
        self.track(
            EVENT_ERROR,
            TrackOptions {
                event_type: Some(EventType::Error),
                properties: Some(props),
                immediate: true,
                ..Default::default()
            },
        )
        .await;
    }

    /// Drain the queue and POST it as one batch. On failure the drained
    /// events go back to the front (retry order preserved) and the queue is
    /// truncated from the oldest end to `3 x batch_size` so memory stays
    /// bounded under a sustained outage.
    pub async fn flush(&self) -> Result<()> {
        let _gate = self.inner.flush_gate.lock().await;
        let batch: Vec<AnalyticsEvent> = {
            let mut queue = self.inner.queue.lock().await;
            queue.drain(..).collect()
        };
        if batch.is_empty() {
            return Ok(());
        }
        debug!(events = batch.len(), "flushing event batch");
        match self.inner.transport.send_events(&batch).await {
            Ok(()) => Ok(()),
            Err(error) => {
                let mut queue = self.inner.queue.lock().await;
                for event in batch.into_iter().rev() {
                    queue.push_front(event);
                }
                let cap = self.inner.config.batch_size * 3;
                let excess = queue.len().saturating_sub(cap);
                if excess > 0 {
                    queue.drain(..excess);
                    warn!(dropped = excess, "event queue over capacity, dropped oldest");
                }
                Err(error)
            }
        }
    }

    /// End the session, flush what remains, stop background tasks.
    pub async fn destroy(&self) -> Result<()> {
        let (heartbeat, tasks) = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            lifecycle.initialized = false;
            (
                lifecycle.heartbeat.take(),
                std::mem::take(&mut lifecycle.tasks),
            )
        };
        drop(heartbeat);
        for task in &tasks {
            task.abort();
        }

        if let Some(mut session) = self.inner.session.lock().await.take() {
            let now = Utc::now();
            session.end(now);
            let mut props = Map::new();
            if let Some(duration) = session.duration_seconds {
                props.insert("duration_seconds".to_string(), Value::from(duration));
            }
            let event = AnalyticsEvent::new(
                session.user_id.clone(),
                session.id.clone(),
                EventType::UserAction,
                EVENT_SESSION_END,
                props,
                now,
            );
            self.inner.queue.lock().await.push_back(event);
            if let Err(error) = self.inner.store.remove(SESSION_STORAGE_KEY).await {
                warn!(%error, "failed to clear persisted session");
            }
        }

        self.flush().await
    }

    /// Host-side handle for reporting user activity.
    pub async fn heartbeat(&self) -> Option<Heartbeat> {
        self.inner.lifecycle.lock().await.heartbeat.clone()
    }

    pub async fn session(&self) -> Option<UserSession> {
        self.inner.session.lock().await.clone()
    }

    pub async fn queued_events(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// End the current session and start a fresh one in place. Driven by
    /// the inactivity watcher; also emits the session boundary events.
    async fn rotate_session(&self) {
        let rotated = {
            let mut guard = self.inner.session.lock().await;
            let Some(mut ended) = guard.take() else {
                return;
            };
            let now = Utc::now();
            ended.end(now);
            let replacement = UserSession::new(
                ended.user_id.clone(),
                self.inner.context.referrer.clone(),
                UtmParams::from_url(self.inner.context.page_url.as_deref()),
                now,
            );
            let snapshot = replacement.clone();
            *guard = Some(replacement);
            (ended, snapshot)
        };
        let (ended, snapshot) = rotated;
        self.persist_session(&snapshot).await;

        let mut props = Map::new();
        if let Some(duration) = ended.duration_seconds {
            props.insert("duration_seconds".to_string(), Value::from(duration));
        }
        props.insert("reason".to_string(), Value::String("inactivity".to_string()));
        self.track(
            EVENT_SESSION_END,
            TrackOptions {
                session_id: Some(ended.id),
                properties: Some(props),
                ..Default::default()
            },
        )
        .await;
        self.track(EVENT_SESSION_START, TrackOptions::default())
            .await;
    }

    async fn restore_session(&self, now: DateTime<Utc>) -> Option<UserSession> {
        let raw = match self.inner.store.load(SESSION_STORAGE_KEY).await {
            Ok(raw) => raw?,
            Err(error) => {
                warn!(%error, "failed to read persisted session");
                return None;
            }
        };
        let session: UserSession = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, "discarding corrupt persisted session");
                self.remove_persisted_session().await;
                return None;
            }
        };
        if session.is_stale(now, self.inner.config.session_timeout()) {
            debug!(session_id = %session.id, "discarding stale persisted session");
            self.remove_persisted_session().await;
            return None;
        }
        Some(session)
    }

    fn fresh_session(&self, user_id: Option<&str>, now: DateTime<Utc>) -> UserSession {
        UserSession::new(
            user_id.unwrap_or(ANONYMOUS_USER_ID),
            self.inner.context.referrer.clone(),
            UtmParams::from_url(self.inner.context.page_url.as_deref()),
            now,
        )
    }

    async fn persist_session(&self, session: &UserSession) {
        let serialized = match serde_json::to_string(session) {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!(%error, "failed to serialize session");
                return;
            }
        };
        if let Err(error) = self
            .inner
            .store
            .save(SESSION_STORAGE_KEY, &serialized)
            .await
        {
            warn!(%error, "failed to persist session");
        }
    }

    async fn remove_persisted_session(&self) {
        if let Err(error) = self.inner.store.remove(SESSION_STORAGE_KEY).await {
            warn!(%error, "failed to remove persisted session");
        }
    }

    fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inner.config.session_timeout_minutes.max(1) as u64 * 60)
    }
}

async fn run_flush_loop(client: AnalyticsClient) {
    let mut interval = tokio::time::interval(client.inner.config.flush_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so the loop waits a full
    // interval before its first flush.
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(error) = client.flush().await {
            warn!(%error, "scheduled flush failed; events re-queued");
        }
    }
}

async fn run_inactivity_watcher(client: AnalyticsClient, mut ticks: ActivityTicks) {
    let mut timer = InactivityTimer::new(client.inactivity_timeout());
    loop {
        tokio::select! {
            tick = ticks.next() => match tick {
                Some(()) => timer.touch(),
                // Every heartbeat handle dropped: the client was destroyed.
                None => break,
            },
            _ = tokio::time::sleep_until(timer.deadline()) => {
                info!("session expired after inactivity, rotating");
                client.rotate_session().await;
                timer.touch();
            }
        }
    }
}
