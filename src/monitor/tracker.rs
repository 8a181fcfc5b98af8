//! Cross-session registry of observed egress IPs

use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps each observed IP to the sessions currently reporting it.
///
/// A session identifier is a member of at most one IP's set at any time.
/// Registering under a new IP moves it, and emptied sets are pruned, so
/// [`IpTracker::is_duplicate`] never sees stale membership.
#[derive(Debug, Default)]
pub struct IpTracker {
    ip_to_ids: RwLock<HashMap<String, Vec<String>>>,
}

impl IpTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `session_id` with `ip`, removing it from any IP it was
    /// previously registered under. Idempotent.
    pub fn register(&self, ip: &str, session_id: &str) {
        let mut map = self.ip_to_ids.write();

        map.retain(|_, ids| {
            ids.retain(|id| id != session_id);
            !ids.is_empty()
        });

        map.entry(ip.to_string())
            .or_default()
            .push(session_id.to_string());
    }

    /// True when `ip` is also held by at least one session other than
    /// `session_id`.
    pub fn is_duplicate(&self, ip: &str, session_id: &str) -> bool {
        self.ip_to_ids
            .read()
            .get(ip)
            .is_some_and(|ids| ids.iter().any(|id| id != session_id))
    }

    /// Sessions currently registered under `ip`, in registration order
    pub fn sessions_for(&self, ip: &str) -> Vec<String> {
        self.ip_to_ids.read().get(ip).cloned().unwrap_or_default()
    }

    /// The IP a session is currently registered under, if any
    pub fn ip_of(&self, session_id: &str) -> Option<String> {
        self.ip_to_ids
            .read()
            .iter()
            .find(|(_, ids)| ids.iter().any(|id| id == session_id))
            .map(|(ip, _)| ip.clone())
    }

    /// Number of distinct IPs currently tracked
    pub fn ip_count(&self) -> usize {
        self.ip_to_ids.read().len()
    }
}
