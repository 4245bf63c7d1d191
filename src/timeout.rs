//! Sticky command timeouts.
//!
//! A command timeout set by an outer call stays in force for everything it
//! runs. A nested request is ignored until the outer scope ends, so helper
//! commands issued on the same connection cannot shorten or lift it.

use std::time::Duration;

/// Per-connection command timeout state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeout {
    active: Option<Duration>,
}

impl CommandTimeout {
    /// Install `timeout` unless one is already active.
    ///
    /// Returns true if this call installed it; pass that to [`exit`](Self::exit).
    pub fn enter(&mut self, timeout: Option<Duration>) -> bool {
        if self.active.is_some() || timeout.is_none() {
            return false;
        }
        self.active = timeout;
        true
    }

    /// Leave a scope opened by [`enter`](Self::enter).
    pub fn exit(&mut self, installed: bool) {
        if installed {
            self.active = None;
        }
    }

    /// The timeout currently in force.
    pub fn active(&self) -> Option<Duration> {
        self.active
    }

    /// The active timeout, falling back to the connection default.
    pub fn effective(&self, default: Option<Duration>) -> Option<Duration> {
        self.active.or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_timeout_is_ignored() {
        let mut timeout = CommandTimeout::default();
        let outer = timeout.enter(Some(Duration::from_secs(5)));
        assert!(outer);

        let inner = timeout.enter(Some(Duration::from_secs(1)));
        assert!(!inner);
        assert_eq!(timeout.active(), Some(Duration::from_secs(5)));
        timeout.exit(inner);
        assert_eq!(timeout.active(), Some(Duration::from_secs(5)));

        timeout.exit(outer);
        assert_eq!(timeout.active(), None);
    }

    #[test]
    fn test_default_applies_without_scope() {
        let mut timeout = CommandTimeout::default();
        let default = Some(Duration::from_secs(30));
        assert_eq!(timeout.effective(default), default);
        assert!(!timeout.enter(None));
        let installed = timeout.enter(Some(Duration::from_millis(10)));
        assert_eq!(timeout.effective(default), Some(Duration::from_millis(10)));
        timeout.exit(installed);
        assert_eq!(timeout.effective(default), default);
    }
}
