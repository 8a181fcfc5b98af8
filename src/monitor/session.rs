//! Per-proxy monitoring state
//!
//! A [`ProxySession`] owns one proxy's history. The check loop mutates it,
//! the display only ever sees [`SessionSnapshot`] values.

use crate::monitor::scheduler::RetryPolicy;
use crate::monitor::tracker::IpTracker;
use crate::proxy::{IdentityResolver, ProbeResult, Proxy};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stored session status. "Duplicate" is never stored, see
/// [`derive_display_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Starting,
    Stable,
    Rotated,
    Dead,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Starting => write!(f, "Starting"),
            SessionStatus::Stable => write!(f, "Stable"),
            SessionStatus::Rotated => write!(f, "Rotated"),
            SessionStatus::Dead => write!(f, "DEAD"),
        }
    }
}

/// Status as presented to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Starting,
    Stable,
    StableDuplicate,
    Rotated,
    Dead,
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayStatus::Starting => write!(f, "Starting"),
            DisplayStatus::Stable => write!(f, "Stable"),
            DisplayStatus::StableDuplicate => write!(f, "Stable (Duplicate)"),
            DisplayStatus::Rotated => write!(f, "Rotated"),
            DisplayStatus::Dead => write!(f, "DEAD"),
        }
    }
}

/// Overlay the tracker's live view on a stored status. A stable session
/// whose IP is also held by another session is shown as a duplicate.
pub fn derive_display_status(
    status: SessionStatus,
    tracker: &IpTracker,
    current_ip: &str,
    session_id: &str,
) -> DisplayStatus {
    match status {
        SessionStatus::Stable if tracker.is_duplicate(current_ip, session_id) => {
            DisplayStatus::StableDuplicate
        }
        SessionStatus::Stable => DisplayStatus::Stable,
        SessionStatus::Starting => DisplayStatus::Starting,
        SessionStatus::Rotated => DisplayStatus::Rotated,
        SessionStatus::Dead => DisplayStatus::Dead,
    }
}

/// Mutable fields, always changed together under the session lock
#[derive(Debug, Clone, Default)]
struct SessionState {
    current_ip: String,
    initial_ip: String,
    location: String,
    check_count: u64,
    rotation_count: u64,
    first_seen: Option<DateTime<Utc>>,
    total_latency: Duration,
    total_bandwidth: u64,
    status: SessionStatus,
}

/// Point-in-time copy of a session, handed to the display
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: String,
    pub host: String,
    pub status: SessionStatus,
    pub current_ip: String,
    pub initial_ip: String,
    pub location: String,
    pub first_seen: Option<DateTime<Utc>>,
    pub check_count: u64,
    pub rotation_count: u64,
    pub total_latency: Duration,
    pub total_bandwidth: u64,
}

impl SessionSnapshot {
    /// Mean latency over successful checks, if any were measured
    pub fn avg_latency_ms(&self) -> Option<u64> {
        if self.check_count == 0 || self.total_latency.is_zero() {
            return None;
        }
        let avg_nanos = self.total_latency.as_nanos() / u128::from(self.check_count);
        Some((avg_nanos / 1_000_000) as u64)
    }

    /// Time since the first successful probe
    pub fn duration_since_first_seen(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.first_seen
            .map(|seen| (now - seen).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn display_status(&self, tracker: &IpTracker) -> DisplayStatus {
        derive_display_status(self.status, tracker, &self.current_ip, &self.id)
    }
}

/// Monitoring state for one configured proxy
pub struct ProxySession {
    proxy: Proxy,
    id: String,
    tracker: Arc<IpTracker>,
    state: Mutex<SessionState>,
}

impl ProxySession {
    pub fn new(proxy: Proxy, tracker: Arc<IpTracker>) -> Self {
        let id = proxy.session_id();
        Self {
            proxy,
            id,
            tracker,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Run one check cycle: probe with bounded retry, then record the
    /// outcome. Returns the resulting snapshot.
    pub async fn check(
        &self,
        resolver: &dyn IdentityResolver,
        retry: &RetryPolicy,
    ) -> SessionSnapshot {
        match self.try_probe_with_retry(resolver, retry).await {
            Some(result) => self.update_status(result),
            None => {
                warn!(
                    session = %self.id,
                    proxy = %self.proxy,
                    attempts = retry.max_attempts,
                    "all probe attempts failed, marking dead"
                );
                self.mark_dead();
            }
        }
        self.snapshot()
    }

    /// Probe up to `retry.max_attempts` times with a fixed pause between
    /// attempts. No lock is held here.
    async fn try_probe_with_retry(
        &self,
        resolver: &dyn IdentityResolver,
        retry: &RetryPolicy,
    ) -> Option<ProbeResult> {
        for attempt in 1..=retry.max_attempts {
            match resolver.probe(&self.proxy).await {
                Ok(result) => return Some(result),
                Err(e) if !e.is_retryable() => {
                    warn!(session = %self.id, attempt, error = %e, "probe cannot be retried");
                    return None;
                }
                Err(e) => {
                    debug!(session = %self.id, attempt, error = %e, "probe failed");
                    if attempt < retry.max_attempts {
                        tokio::time::sleep(retry.delay).await;
                    }
                }
            }
        }
        None
    }

    /// Apply a successful probe. Tracker registration happens while the
    /// session lock is held so readers never see counters without it.
    pub fn update_status(&self, result: ProbeResult) {
        let mut state = self.state.lock();

        if state.current_ip.is_empty() {
            state.current_ip = result.ip.clone();
            state.initial_ip = result.ip.clone();
            state.first_seen = Some(Utc::now());
            state.status = SessionStatus::Stable;
            self.tracker.register(&result.ip, &self.id);
            info!(session = %self.id, ip = %result.ip, "first identity observed");
        } else if result.ip != state.current_ip {
            state.rotation_count += 1;
            state.status = SessionStatus::Rotated;
            info!(
                session = %self.id,
                from = %state.current_ip,
                to = %result.ip,
                rotations = state.rotation_count,
                "egress IP rotated"
            );
            state.current_ip = result.ip.clone();
            self.tracker.register(&result.ip, &self.id);
        } else {
            state.status = SessionStatus::Stable;
        }

        state.check_count += 1;
        state.total_latency += result.latency;
        state.total_bandwidth += result.bandwidth;
        state.location = result.location;
    }

    /// Record an exhausted-retry cycle. History is left untouched.
    pub fn mark_dead(&self) {
        self.state.lock().status = SessionStatus::Dead;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().clone();
        SessionSnapshot {
            id: self.id.clone(),
            host: self.proxy.host.clone(),
            status: state.status,
            current_ip: state.current_ip,
            initial_ip: state.initial_ip,
            location: state.location,
            first_seen: state.first_seen,
            check_count: state.check_count,
            rotation_count: state.rotation_count,
            total_latency: state.total_latency,
            total_bandwidth: state.total_bandwidth,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::proxy::ProxyType;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver that replays a fixed script of outcomes
    pub(crate) struct ScriptedResolver {
        script: Mutex<VecDeque<Result<ProbeResult, ProbeError>>>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedResolver {
        pub(crate) fn new(script: Vec<Result<ProbeResult, ProbeError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityResolver for ScriptedResolver {
        async fn probe(&self, _proxy: &Proxy) -> Result<ProbeResult, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Err(ProbeError::Connect("script exhausted".to_string())))
        }
    }

    pub(crate) fn ok(ip: &str) -> Result<ProbeResult, ProbeError> {
        Ok(ProbeResult::new(ip, "Berlin, Land Berlin")
            .with_latency(Duration::from_millis(400))
            .with_bandwidth(1500))
    }

    pub(crate) fn fail() -> Result<ProbeResult, ProbeError> {
        Err(ProbeError::Timeout)
    }

    fn session(host: &str, tracker: &Arc<IpTracker>) -> ProxySession {
        ProxySession::new(
            Proxy::new(host.to_string(), 8080, ProxyType::Http),
            Arc::clone(tracker),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_sets_baseline() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        assert_eq!(s.snapshot().status, SessionStatus::Starting);

        let resolver = ScriptedResolver::new(vec![ok("9.9.9.9")]);
        let snap = s.check(&resolver, &policy()).await;

        assert_eq!(snap.status, SessionStatus::Stable);
        assert_eq!(snap.check_count, 1);
        assert_eq!(snap.rotation_count, 0);
        assert_eq!(snap.current_ip, "9.9.9.9");
        assert_eq!(snap.initial_ip, "9.9.9.9");
        assert!(snap.first_seen.is_some());
        assert_eq!(snap.location, "Berlin, Land Berlin");
        assert_eq!(tracker.sessions_for("9.9.9.9"), vec![s.id().to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_moves_tracker_entry() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        let resolver = ScriptedResolver::new(vec![ok("9.9.9.9"), ok("8.8.8.8")]);

        s.check(&resolver, &policy()).await;
        let snap = s.check(&resolver, &policy()).await;

        assert_eq!(snap.status, SessionStatus::Rotated);
        assert_eq!(snap.rotation_count, 1);
        assert_eq!(snap.current_ip, "8.8.8.8");
        assert_eq!(snap.initial_ip, "9.9.9.9");
        assert_eq!(snap.check_count, 2);
        assert!(tracker.sessions_for("9.9.9.9").is_empty());
        assert_eq!(tracker.sessions_for("8.8.8.8"), vec![s.id().to_string()]);
        assert_eq!(tracker.ip_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_ip_returns_to_stable() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        let resolver = ScriptedResolver::new(vec![ok("9.9.9.9"), ok("8.8.8.8"), ok("8.8.8.8")]);

        for _ in 0..3 {
            s.check(&resolver, &policy()).await;
        }
        let snap = s.snapshot();
        assert_eq!(snap.status, SessionStatus::Stable);
        assert_eq!(snap.rotation_count, 1);
        assert_eq!(snap.check_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retry_preserves_history() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        let resolver = ScriptedResolver::new(vec![ok("9.9.9.9"), fail(), fail(), fail()]);

        let before = s.check(&resolver, &policy()).await;
        let after = s.check(&resolver, &policy()).await;

        assert_eq!(after.status, SessionStatus::Dead);
        assert_eq!(after.check_count, before.check_count);
        assert_eq!(after.rotation_count, before.rotation_count);
        assert_eq!(after.current_ip, before.current_ip);
        assert_eq!(after.initial_ip, before.initial_ip);
        assert_eq!(after.first_seen, before.first_seen);
        assert_eq!(after.total_latency, before.total_latency);
        assert_eq!(after.total_bandwidth, before.total_bandwidth);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
        assert_eq!(tracker.sessions_for("9.9.9.9"), vec![s.id().to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_between_attempts_only() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        let resolver = ScriptedResolver::new(vec![fail(), fail(), fail()]);

        let start = tokio::time::Instant::now();
        let snap = s.check(&resolver, &policy()).await;

        assert_eq!(snap.status, SessionStatus::Dead);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(snap.check_count, 0);
        assert!(snap.current_ip.is_empty());
        assert_eq!(tracker.ip_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_stops_retrying() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        let resolver = ScriptedResolver::new(vec![
            Err(ProbeError::Client("builder error: unknown proxy scheme".to_string())),
            ok("9.9.9.9"),
        ]);

        let start = tokio::time::Instant::now();
        let snap = s.check(&resolver, &policy()).await;

        assert_eq!(snap.status, SessionStatus::Dead);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(tracker.ip_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_within_cycle() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        let resolver = ScriptedResolver::new(vec![fail(), fail(), ok("9.9.9.9")]);

        let snap = s.check(&resolver, &policy()).await;
        assert_eq!(snap.status, SessionStatus::Stable);
        assert_eq!(snap.check_count, 1);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_then_recovery_keeps_counting() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        let resolver = ScriptedResolver::new(vec![
            ok("9.9.9.9"),
            fail(),
            fail(),
            fail(),
            ok("7.7.7.7"),
        ]);

        for _ in 0..3 {
            s.check(&resolver, &policy()).await;
        }
        let snap = s.snapshot();
        assert_eq!(snap.status, SessionStatus::Rotated);
        assert_eq!(snap.check_count, 2);
        assert_eq!(snap.rotation_count, 1);
        assert_eq!(snap.initial_ip, "9.9.9.9");
    }

    #[test]
    fn test_counters_accumulate() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        let ips = ["1.1.1.1", "1.1.1.1", "2.2.2.2", "3.3.3.3", "3.3.3.3", "1.1.1.1"];
        for ip in ips {
            s.update_status(ok(ip).unwrap());
        }

        let snap = s.snapshot();
        assert_eq!(snap.check_count, 6);
        assert_eq!(snap.rotation_count, 3);
        assert_eq!(snap.initial_ip, "1.1.1.1");
        assert_eq!(snap.total_latency, Duration::from_millis(2400));
        assert_eq!(snap.total_bandwidth, 9000);
        assert_eq!(snap.avg_latency_ms(), Some(400));
    }

    #[test]
    fn test_duplicate_overlay_for_shared_ip() {
        let tracker = Arc::new(IpTracker::new());
        let a = session("1.1.1.1", &tracker);
        let b = session("2.2.2.2", &tracker);
        a.update_status(ok("5.5.5.5").unwrap());
        b.update_status(ok("5.5.5.5").unwrap());

        let (sa, sb) = (a.snapshot(), b.snapshot());
        assert_eq!(sa.status, SessionStatus::Stable);
        assert_eq!(sb.status, SessionStatus::Stable);
        assert_eq!(sa.display_status(&tracker), DisplayStatus::StableDuplicate);
        assert_eq!(sb.display_status(&tracker), DisplayStatus::StableDuplicate);
        assert_eq!(sa.display_status(&tracker).to_string(), "Stable (Duplicate)");

        // b rotates away: a is no longer shared, b shows Rotated
        b.update_status(ok("6.6.6.6").unwrap());
        assert_eq!(a.snapshot().display_status(&tracker), DisplayStatus::Stable);
        assert_eq!(b.snapshot().display_status(&tracker), DisplayStatus::Rotated);
    }

    #[test]
    fn test_overlay_only_applies_to_stable() {
        let tracker = IpTracker::new();
        tracker.register("5.5.5.5", "a");
        tracker.register("5.5.5.5", "b");

        for (status, expected) in [
            (SessionStatus::Starting, DisplayStatus::Starting),
            (SessionStatus::Rotated, DisplayStatus::Rotated),
            (SessionStatus::Dead, DisplayStatus::Dead),
            (SessionStatus::Stable, DisplayStatus::StableDuplicate),
        ] {
            assert_eq!(derive_display_status(status, &tracker, "5.5.5.5", "a"), expected);
        }
        assert_eq!(
            derive_display_status(SessionStatus::Stable, &tracker, "9.9.9.9", "a"),
            DisplayStatus::Stable
        );
    }

    #[test]
    fn test_rotation_back_onto_ip_held_elsewhere() {
        let tracker = Arc::new(IpTracker::new());
        let a = session("1.1.1.1", &tracker);
        let b = session("2.2.2.2", &tracker);

        a.update_status(ok("10.0.0.1").unwrap());
        a.update_status(ok("10.0.0.2").unwrap());
        b.update_status(ok("10.0.0.1").unwrap());
        a.update_status(ok("10.0.0.1").unwrap());

        let snap = a.snapshot();
        assert_eq!(snap.rotation_count, 2);
        assert_eq!(snap.status, SessionStatus::Rotated);
        assert_eq!(tracker.ip_of(a.id()).as_deref(), Some("10.0.0.1"));
        assert!(tracker.sessions_for("10.0.0.2").is_empty());
        assert!(tracker.is_duplicate("10.0.0.1", b.id()));

        // Next identical reading turns a Stable, which now surfaces the collision
        a.update_status(ok("10.0.0.1").unwrap());
        assert_eq!(a.snapshot().display_status(&tracker), DisplayStatus::StableDuplicate);
    }

    #[test]
    fn test_snapshot_helpers() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        let snap = s.snapshot();
        assert_eq!(snap.avg_latency_ms(), None);
        assert_eq!(snap.duration_since_first_seen(Utc::now()), None);
        assert_eq!(snap.host, "1.2.3.4");

        s.update_status(ok("9.9.9.9").unwrap());
        let snap = s.snapshot();
        let later = snap.first_seen.unwrap() + chrono::Duration::seconds(65);
        assert_eq!(snap.duration_since_first_seen(later), Some(Duration::from_secs(65)));
    }

    #[test]
    fn test_avg_latency_with_huge_check_count() {
        let tracker = Arc::new(IpTracker::new());
        let s = session("1.2.3.4", &tracker);
        let mut snap = s.snapshot();
        snap.check_count = 1u64 << 32;
        snap.total_latency = Duration::from_millis(250) * (1u32 << 31) * 2;
        assert_eq!(snap.avg_latency_ms(), Some(250));

        snap.check_count = 4;
        snap.total_latency = Duration::from_millis(1000);
        assert_eq!(snap.avg_latency_ms(), Some(250));
    }
}
