use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use parley_stream::HealthCheck;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(4);

/// Shared view of whether the transcription backend answered its last ping.
#[derive(Clone, Debug, Default)]
pub struct HealthMonitor {
    available: Arc<AtomicBool>,
}

impl HealthMonitor {
    /// A monitor with no backend behind it; always reports unavailable.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Ping `backend` every `interval` and publish the result.
    pub fn spawn(backend: Arc<dyn HealthCheck>, interval: Duration) -> (Self, JoinHandle<()>) {
        let monitor = Self::default();
        let flag = Arc::clone(&monitor.available);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let up = match backend.ping().await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(error = %e, "transcriber ping failed");
                        false
                    }
                };
                let was = flag.swap(up, Ordering::Relaxed);
                if was != up {
                    if up {
                        info!("transcriber is available");
                    } else {
                        warn!("transcriber became unavailable");
                    }
                }
            }
        });
        (monitor, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_stream::MockTransport;

    #[tokio::test(start_paused = true)]
    async fn reachable_backend_sets_flag() {
        let (monitor, handle) =
            HealthMonitor::spawn(Arc::new(MockTransport::new(vec![])), Duration::from_secs(4));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.is_available());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_backend_leaves_flag_clear() {
        let (monitor, handle) =
            HealthMonitor::spawn(Arc::new(MockTransport::unreachable()), Duration::from_secs(4));
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!monitor.is_available());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn flag_drops_when_backend_goes_down() {
        let backend = Arc::new(MockTransport::new(vec![]));
        let (monitor, handle) = HealthMonitor::spawn(backend.clone(), Duration::from_secs(4));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.is_available());

        backend.set_reachable(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!monitor.is_available());

        backend.set_reachable(true);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(monitor.is_available());
        handle.abort();
    }

    #[test]
    fn disabled_reports_unavailable() {
        assert!(!HealthMonitor::disabled().is_available());
    }
}
