//! Session scheduler: one independent check loop per proxy

use crate::monitor::session::{ProxySession, SessionSnapshot};
use crate::monitor::tracker::IpTracker;
use crate::proxy::{IdentityResolver, Proxy};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default seconds between checks of one session
const DEFAULT_INTERVAL_SECS: u64 = 20;

/// Default delay between starting successive sessions
const DEFAULT_STAGGER_MS: u64 = 50;

/// Default pause before the first session starts
const DEFAULT_STARTUP_DELAY_MS: u64 = 100;

/// Bounded local retry for one check cycle: fixed delay, no backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Configuration for the session scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between the starts of consecutive checks of one session
    pub interval: Duration,
    /// Delay inserted between starting successive sessions
    pub stagger: Duration,
    /// One-off pause before the first session starts
    pub startup_delay: Duration,
    /// Retry policy applied inside each check
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            stagger: Duration::from_millis(DEFAULT_STAGGER_MS),
            startup_delay: Duration::from_millis(DEFAULT_STARTUP_DELAY_MS),
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Owns every session and drives each on its own timer
pub struct Scheduler {
    sessions: Vec<Arc<ProxySession>>,
    resolver: Arc<dyn IdentityResolver>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Build one session per distinct proxy descriptor, in list order.
    /// Descriptors with the same session identifier collapse into one.
    pub fn new(
        proxies: Vec<Proxy>,
        tracker: Arc<IpTracker>,
        resolver: Arc<dyn IdentityResolver>,
        config: SchedulerConfig,
    ) -> Self {
        let mut seen = HashSet::new();
        let sessions = proxies
            .into_iter()
            .filter(|proxy| {
                let fresh = seen.insert(proxy.session_id());
                if !fresh {
                    warn!(proxy = %proxy, "duplicate proxy entry ignored");
                }
                fresh
            })
            .map(|proxy| Arc::new(ProxySession::new(proxy, Arc::clone(&tracker))))
            .collect();

        Self {
            sessions,
            resolver,
            config,
        }
    }

    pub fn sessions(&self) -> &[Arc<ProxySession>] {
        &self.sessions
    }

    /// Current snapshot of every session, in list order
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(|s| s.snapshot()).collect()
    }

    /// Start every session loop, staggered, and return their handles.
    /// Snapshots are pushed to `updates` after each check.
    pub async fn start(&self, updates: UnboundedSender<SessionSnapshot>) -> Vec<JoinHandle<()>> {
        info!(
            sessions = self.sessions.len(),
            interval_secs = self.config.interval.as_secs(),
            "starting monitoring"
        );

        sleep(self.config.startup_delay).await;

        let mut handles = Vec::with_capacity(self.sessions.len());
        for session in &self.sessions {
            handles.push(tokio::spawn(monitor_session(
                Arc::clone(session),
                Arc::clone(&self.resolver),
                self.config.interval,
                self.config.retry,
                updates.clone(),
            )));
            sleep(self.config.stagger).await;
        }
        handles
    }

    /// Start every loop and wait on them. Loops never end on their own.
    pub async fn run(&self, updates: UnboundedSender<SessionSnapshot>) {
        let handles = self.start(updates).await;
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "monitor task ended");
            }
        }
    }
}

/// Check immediately, then once per `interval`, forever. Checks within a
/// session never overlap: the next tick is awaited only after the previous
/// check has been recorded.
async fn monitor_session(
    session: Arc<ProxySession>,
    resolver: Arc<dyn IdentityResolver>,
    every: Duration,
    retry: RetryPolicy,
    updates: UnboundedSender<SessionSnapshot>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let snapshot = session.check(resolver.as_ref(), &retry).await;
        if updates.send(snapshot).is_err() {
            debug!(session = %session.id(), "display gone, update dropped");
        }
    }
}
