//! Bounded-retry polling for asynchronous generation jobs.
//!
//! Used by the Leonardo.ai adapter and available to any backend that submits
//! a server-side job and reads its status until a terminal state. Polling is
//! strictly sequential: at most one outstanding status read at a time.

use std::future::Future;
use std::time::Duration;

/// Default spacing between status reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default tick budget (60 ticks at 2 s = 120 s wall clock).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// One observation of a remote job, produced by the caller's status read.
///
/// `E` is the caller's failure type, so a terminal failure keeps its
/// classification (network, malformed payload, remote FAILED) instead of
/// collapsing into text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPoll<T, E = String> {
    /// Job still pending or running; also used for skippable read glitches
    /// (e.g. a transient non-200 status response).
    Pending,
    /// Job reached COMPLETE with its payload.
    Complete(T),
    /// Job reached FAILED, or the status read failed terminally.
    Failed(E),
}

/// Terminal outcome of a polling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T, E = String> {
    Complete(T),
    Failed(E),
    /// The tick budget was exhausted without a terminal status.
    TimedOut,
}

/// Fixed-interval, bounded-attempt poller.
#[derive(Debug, Clone)]
pub struct JobPoller {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl JobPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Total wall-clock budget across all ticks.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Drive `poll` until a terminal observation or tick exhaustion.
    ///
    /// Each tick sleeps the configured interval first, then issues exactly
    /// one status read. `Pending` continues; `Complete`/`Failed` exit
    /// immediately; running out of ticks yields [`PollOutcome::TimedOut`]
    /// with no partial result.
    pub async fn run<T, E, F, Fut>(&self, mut poll: F) -> PollOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = JobPoll<T, E>>,
    {
        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.interval).await;
            match poll(attempt).await {
                JobPoll::Pending => continue,
                JobPoll::Complete(value) => return PollOutcome::Complete(value),
                JobPoll::Failed(failure) => return PollOutcome::Failed(failure),
            }
        }
        PollOutcome::TimedOut
    }
}
