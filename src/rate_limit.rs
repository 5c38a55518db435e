use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::Id;

/// Sliding window limiter held in process memory.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Report,
    Comment,
    Follow,
}

impl Action {
    fn key(self) -> &'static str {
        match self {
            Action::Report => "report",
            Action::Comment => "comment",
            Action::Follow => "follow",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub report_limit: usize,
    pub report_window: Duration,
    pub comment_limit: usize,
    pub comment_window: Duration,
    pub follow_limit: usize,
    pub follow_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_limit: 5,
            report_window: Duration::from_secs(300),
            comment_limit: 10,
            comment_window: Duration::from_secs(60),
            follow_limit: 30,
            follow_window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Reads `RL_*` overrides through `lookup`; unparsable values keep the
    /// default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let num = |name: &str, default: usize| lookup(name).and_then(|v| v.parse().ok()).unwrap_or(default);
        let secs = |name: &str, default: Duration| {
            lookup(name).and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default)
        };
        Self {
            enabled: lookup("RATE_LIMIT_ENABLED")
                .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
                .unwrap_or(d.enabled),
            report_limit: num("RL_REPORT_LIMIT", d.report_limit),
            report_window: secs("RL_REPORT_WINDOW", d.report_window),
            comment_limit: num("RL_COMMENT_LIMIT", d.comment_limit),
            comment_window: secs("RL_COMMENT_WINDOW", d.comment_window),
            follow_limit: num("RL_FOLLOW_LIMIT", d.follow_limit),
            follow_window: secs("RL_FOLLOW_WINDOW", d.follow_window),
        }
    }

    fn budget(&self, action: Action) -> (usize, Duration) {
        match action {
            Action::Report => (self.report_limit, self.report_window),
            Action::Comment => (self.comment_limit, self.comment_window),
            Action::Follow => (self.follow_limit, self.follow_window),
        }
    }
}

/// Per-user guard used by handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self { limiter: InMemoryRateLimiter::new(cfg.enabled), cfg }
    }

    pub fn disabled() -> Self {
        Self::new(RateLimitConfig { enabled: false, ..RateLimitConfig::default() })
    }

    pub fn allow(&self, action: Action, user_id: Id) -> bool {
        let (limit, window) = self.cfg.budget(action);
        self.limiter.check(&format!("{}:{user_id}", action.key()), limit, window)
    }
}
