//! Async service layer of the growthstack SDK: queues, caches, timers,
//! persisted session state, and the HTTP transport to the growth backend.

pub mod analytics;
pub mod engagement;
pub mod experiments;
pub mod heartbeat;
pub mod retention;
pub mod stack;
pub mod storage;
pub mod transport;

pub use analytics::{AnalyticsClient, ClientContext, TrackOptions};
pub use engagement::EngagementClient;
pub use experiments::{AssignmentContext, ExperimentClient};
pub use retention::RetentionClient;
pub use stack::{DashboardSnapshot, GrowthStack};
pub use storage::{FileStore, MemoryStore, SessionStore, SESSION_STORAGE_KEY};
pub use transport::ApiTransport;
