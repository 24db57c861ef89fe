//! Activity heartbeat.
//!
//! The host environment (browser shell, TUI, test harness) reports user
//! activity as ticks on a channel instead of the SDK listening to DOM
//! events directly. The inactivity deadline math stays pure so the timeout
//! behavior is testable without any host plumbing.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

/// Cloneable host-side handle. Call [`Heartbeat::beat`] on any user
/// activity (input, scroll, navigation).
#[derive(Debug, Clone)]
pub struct Heartbeat {
    tx: mpsc::UnboundedSender<()>,
}

impl Heartbeat {
    pub fn beat(&self) {
        // Watcher gone means the client was destroyed; nothing to reset.
        let _ = self.tx.send(());
    }
}

/// Receiving side, consumed by the inactivity watcher task.
#[derive(Debug)]
pub struct ActivityTicks {
    rx: mpsc::UnboundedReceiver<()>,
}

impl ActivityTicks {
    /// Resolves on the next activity tick; `None` when every handle is gone.
    pub async fn next(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

pub fn channel() -> (Heartbeat, ActivityTicks) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Heartbeat { tx }, ActivityTicks { rx })
}

/// Rolling inactivity deadline.
#[derive(Debug)]
pub struct InactivityTimer {
    timeout: Duration,
    deadline: Instant,
}

impl InactivityTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    /// Reset the deadline; called on every activity tick.
    pub fn touch(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn touch_pushes_the_deadline() {
        let mut timer = InactivityTimer::new(Duration::from_secs(60));
        let start = Instant::now();
        assert!(!timer.is_expired(start));
        assert!(timer.is_expired(start + Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(45)).await;
        timer.touch();
        assert!(!timer.is_expired(start + Duration::from_secs(60)));
        assert!(timer.is_expired(start + Duration::from_secs(105)));
    }

    #[tokio::test]
    async fn ticks_flow_through_the_channel() {
        let (heartbeat, mut ticks) = channel();
        heartbeat.beat();
        assert_eq!(ticks.next().await, Some(()));
        drop(heartbeat);
        assert_eq!(ticks.next().await, None);
    }
}
