//! Headless presentation: one structured log event per session update

use crate::monitor::session::SessionSnapshot;
use crate::monitor::tracker::IpTracker;
use crate::tui::format::{format_bytes, format_duration};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

/// Consume snapshots until every sender is gone
pub async fn log_updates(mut updates: UnboundedReceiver<SessionSnapshot>, tracker: Arc<IpTracker>) {
    while let Some(snapshot) = updates.recv().await {
        info!(target: "proxy_sentinel::report", "{}", render_line(&snapshot, &tracker));
    }
}

/// One-line summary of a snapshot with the duplicate overlay applied
pub fn render_line(snapshot: &SessionSnapshot, tracker: &IpTracker) -> String {
    let duration = snapshot
        .duration_since_first_seen(Utc::now())
        .map_or_else(|| "-".to_string(), format_duration);
    let latency = snapshot
        .avg_latency_ms()
        .map_or_else(|| "-".to_string(), |ms| format!("{}ms", ms));

    format!(
        "{} [{}] status={} ip={} location=\"{}\" up={} checks={} rotations={} avg_latency={} bandwidth={}",
        snapshot.host,
        snapshot.id,
        snapshot.display_status(tracker),
        if snapshot.current_ip.is_empty() { "-" } else { snapshot.current_ip.as_str() },
        snapshot.location,
        duration,
        snapshot.check_count,
        snapshot.rotation_count,
        latency,
        format_bytes(snapshot.total_bandwidth),
    )
}
