use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::services::MatchmakingApi;

/// Periodically refreshed count of users waiting at the matchmaker.
///
/// The first fetch happens immediately. A failed fetch keeps the last
/// known value.
pub struct OnlineCounter {
    count: watch::Receiver<Option<u64>>,
    task: JoinHandle<()>,
}

impl OnlineCounter {
    pub fn start(api: Arc<dyn MatchmakingApi>, period: Duration) -> Self {
        let (sender, count) = watch::channel(None);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match api.waiting_users().await {
                    Ok(waiting) => {
                        sender.send_replace(Some(waiting));
                    }
                    Err(e) => debug!("Online count unavailable: {}", e),
                }
            }
        });
        Self { count, task }
    }

    /// Last known count, `None` before the first successful fetch.
    pub fn count(&self) -> Option<u64> {
        *self.count.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Option<u64>> {
        self.count.clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for OnlineCounter {
    fn drop(&mut self) {
        self.task.abort();
    }
}
