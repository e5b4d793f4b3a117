use std::net::SocketAddr;
use std::time::Duration;

use rand::seq::SliceRandom;

/// How a [`crate::resolver::Resolver`] orders the configured
/// `ServerSpec` list for a forwarded query with more than one
/// candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionStrategy {
    /// Highest priority first.
    Priority,
    /// Smallest configured timeout first.
    Speed,
    /// Configured order, unchanged.
    RoundRobin,
    /// Shuffle the candidate list for every query.
    Random,
    /// Use exactly one configured server, picked out by name.
    Named(String),
}

/// One upstream server a forwarding query is allowed to use.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSpec {
    pub name: String,
    pub address: SocketAddr,
    /// Clamped to `[5ms, 15s]` by callers that source this from user
    /// input; not enforced here since ephemeral specs built mid-descent
    /// also flow through this type.
    pub timeout: Duration,
    /// Higher sorts first under [`SelectionStrategy::Priority`].
    pub priority: i32,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, address: SocketAddr, timeout: Duration, priority: i32) -> Self {
        Self {
            name: name.into(),
            address,
            timeout,
            priority,
        }
    }
}

/// Order a set of server specs according to a strategy.
pub fn order_servers(strategy: &SelectionStrategy, specs: &[ServerSpec]) -> Vec<ServerSpec> {
    let mut ordered = specs.to_vec();
    match strategy {
        SelectionStrategy::Priority => ordered.sort_by_key(|s| std::cmp::Reverse(s.priority)),
        SelectionStrategy::Speed => ordered.sort_by_key(|s| s.timeout),
        SelectionStrategy::RoundRobin => (),
        SelectionStrategy::Random => ordered.shuffle(&mut rand::thread_rng()),
        SelectionStrategy::Named(name) => ordered.retain(|s| &s.name == name),
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 53)
    }

    fn spec(name: &str, last: u8, timeout_ms: u64, priority: i32) -> ServerSpec {
        ServerSpec::new(name, addr(last), Duration::from_millis(timeout_ms), priority)
    }

    #[test]
    fn priority_orders_highest_first() {
        let specs = vec![
            spec("a", 1, 1000, 5),
            spec("b", 2, 1000, 1),
            spec("c", 3, 1000, 3),
        ];
        let ordered = order_servers(&SelectionStrategy::Priority, &specs);
        assert_eq!(
            ordered.iter().map(|s| s.address).collect::<Vec<_>>(),
            vec![addr(1), addr(3), addr(2)]
        );
    }

    #[test]
    fn speed_orders_by_smallest_timeout() {
        let specs = vec![spec("a", 1, 1500, 0), spec("b", 2, 50, 0)];
        let ordered = order_servers(&SelectionStrategy::Speed, &specs);
        assert_eq!(ordered[0].address, addr(2));
    }

    #[test]
    fn round_robin_keeps_configured_order() {
        let specs = vec![spec("a", 1, 1000, 9), spec("b", 2, 1000, 0)];
        let ordered = order_servers(&SelectionStrategy::RoundRobin, &specs);
        assert_eq!(
            ordered.iter().map(|s| s.address).collect::<Vec<_>>(),
            vec![addr(1), addr(2)]
        );
    }

    #[test]
    fn named_picks_exactly_one() {
        let specs = vec![spec("cloudflare", 1, 1000, 0), spec("google", 2, 1000, 0)];
        let ordered = order_servers(&SelectionStrategy::Named("google".into()), &specs);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].address, addr(2));
    }

    #[test]
    fn named_with_unknown_name_yields_no_candidates() {
        let specs = vec![spec("cloudflare", 1, 1000, 0)];
        let ordered = order_servers(&SelectionStrategy::Named("nope".into()), &specs);
        assert!(ordered.is_empty());
    }
}
