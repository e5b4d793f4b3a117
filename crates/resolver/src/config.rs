use std::time::Duration;

use crate::server::SelectionStrategy;

/// Which address families recursion is allowed to chase NS glue for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum IpVersion {
    V4Only,
    V6Only,
    Both,
}

/// The whole resolver core is an embeddable library, not a daemon, so
/// there is no config-file format to parse: callers build this struct
/// directly (or via [`Default`]) and hand it to [`crate::resolver::Resolver::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Maximum cache entries before least-recently-used eviction
    /// kicks in. Clamped to a minimum of 1000.
    pub max_entries: usize,

    /// Upper bound applied to every record's TTL before it is cached,
    /// regardless of what the server claimed.
    pub max_allowed_ttl: Duration,

    /// Timeout for a single request/response exchange with one
    /// server, over one transport.
    pub exchange_timeout: Duration,

    /// Timeout for an entire query (forwarded or recursive), covering
    /// every sub-exchange and sub-query it spawns.
    pub query_timeout: Duration,

    /// Upper bound on recursion/forwarding descent depth.
    pub recursion_limit: usize,

    /// Which address families to prefer when choosing among candidate
    /// name servers during recursion.
    pub ip_version: IpVersion,

    /// How to order configured upstream servers for forwarded queries.
    pub selection_strategy: SelectionStrategy,
}

pub const DEFAULT_MAX_ENTRIES: usize = 5000;
pub const MIN_MAX_ENTRIES: usize = 1000;

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_allowed_ttl: Duration::from_secs(2 * 60 * 60),
            exchange_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(60),
            recursion_limit: 32,
            ip_version: IpVersion::V4Only,
            selection_strategy: SelectionStrategy::Speed,
        }
    }
}

impl ResolverConfig {
    /// Clamp `max_entries` up to [`MIN_MAX_ENTRIES`] if a caller sets
    /// something unreasonably small.
    pub fn normalised(mut self) -> Self {
        if self.max_entries < MIN_MAX_ENTRIES {
            self.max_entries = MIN_MAX_ENTRIES;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_internally_consistent() {
        let cfg = ResolverConfig::default();
        assert!(cfg.max_entries >= MIN_MAX_ENTRIES);
        assert_eq!(cfg.recursion_limit, 32);
    }

    #[test]
    fn normalised_clamps_small_max_entries() {
        let cfg = ResolverConfig {
            max_entries: 10,
            ..ResolverConfig::default()
        }
        .normalised();
        assert_eq!(cfg.max_entries, MIN_MAX_ENTRIES);
    }
}
