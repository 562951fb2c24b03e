// Process-wide session table. Keyed by session id, created lazily on first
// reference. Each session is guarded by its own lock (via DashMap's
// per-shard locking); the table itself uses read-mostly lookup.

use crate::core::models::{now, RateWindow, Session};
use dashmap::DashMap;
use std::sync::Arc;

pub struct SessionTable {
    sessions: DashMap<String, Arc<std::sync::Mutex<Session>>>,
    ring_capacity: usize,
    ttl_secs: u64,
}

impl SessionTable {
    pub fn new(ring_capacity: usize, ttl_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            ring_capacity,
            ttl_secs,
        }
    }

    /// Returns the session for `session_id`, creating it if absent.
    pub fn get_or_create(&self, session_id: &str) -> Arc<std::sync::Mutex<Session>> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(std::sync::Mutex::new(Session::new(session_id.to_string(), self.ring_capacity))))
            .clone()
    }

    pub fn clear_taint(&self, session_id: &str) {
        if let Some(entry) = self.sessions.get(session_id) {
            entry.lock().unwrap().taint.clear();
        }
    }

    /// Evicts sessions idle longer than the configured TTL.
    pub fn evict_idle(&self) {
        let cutoff = now() - self.ttl_secs as f64;
        self.sessions.retain(|_, session| session.lock().unwrap().last_seen >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Checks `(session, rule_id)`'s sliding rate-limit window; records the
/// current observation and returns whether the window has overflowed
/// `max_calls` within `window_seconds`. Pruning happens on every observation.
pub fn rate_limit_exceeded(
    session: &mut Session,
    rule_id: &str,
    max_calls: usize,
    window_seconds: u64,
) -> bool {
    let window = session
        .rate_windows
        .entry(rule_id.to_string())
        .or_insert_with(RateWindow::default);
    let now_ts = now();
    let cutoff = now_ts - window_seconds as f64;
    while let Some(front) = window.timestamps.front() {
        if *front < cutoff {
            window.timestamps.pop_front();
        } else {
            break;
        }
    }
    window.timestamps.push_back(now_ts);
    window.timestamps.len() > max_calls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_creation() {
        let table = SessionTable::new(128, 3600);
        assert_eq!(table.len(), 0);
        let _s = table.get_or_create("abc");
        assert_eq!(table.len(), 1);
        let _s2 = table.get_or_create("abc");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn rate_limit_window() {
        let mut session = Session::new("s".to_string(), 10);
        assert!(!rate_limit_exceeded(&mut session, "r1", 2, 60));
        assert!(!rate_limit_exceeded(&mut session, "r1", 2, 60));
        assert!(rate_limit_exceeded(&mut session, "r1", 2, 60));
    }
}
