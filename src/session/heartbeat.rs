//! Progress reporting and the heartbeat ticker

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::host::Host;

/// Default heartbeat period.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Forwards progress messages to the host with a monotonically increasing
/// progress value, shared by the event loop and the heartbeat.
pub struct ProgressReporter {
    host: Arc<dyn Host>,
    sequence: AtomicU64,
}

impl ProgressReporter {
    /// Reporter for `host`
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            sequence: AtomicU64::new(0),
        }
    }

    /// Send one message.
    pub async fn report(&self, message: &str) {
        let progress = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.host.report_progress(progress, None, message).await;
    }
}

/// Periodic "still working" reports. Stops when dropped.
pub struct Heartbeat {
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Report elapsed time since `started` every `period`, first tick after
    /// one full period.
    #[must_use]
    pub fn start(reporter: Arc<ProgressReporter>, period: Duration, started: Instant) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let elapsed = started.elapsed().as_secs();
                reporter
                    .report(&format!("Agent working... {elapsed}s elapsed"))
                    .await;
            }
        });
        Self { task }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedHost;

    #[tokio::test]
    async fn test_reporter_sends_messages() {
        let host = Arc::new(ScriptedHost::new(vec![]));
        let reporter = ProgressReporter::new(Arc::clone(&host) as Arc<dyn Host>);
        reporter.report("one").await;
        reporter.report("two").await;
        assert_eq!(host.progress(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_heartbeat_ticks_until_dropped() {
        let host = Arc::new(ScriptedHost::new(vec![]));
        let reporter = Arc::new(ProgressReporter::new(Arc::clone(&host) as Arc<dyn Host>));
        let heartbeat = Heartbeat::start(reporter, Duration::from_millis(50), Instant::now());

        tokio::time::sleep(Duration::from_millis(180)).await;
        drop(heartbeat);
        let ticks = host.progress().len();
        assert!(ticks >= 2, "ticks: {ticks}");
        assert!(host.progress()[0].starts_with("Agent working..."));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(host.progress().len(), ticks);
    }
}
