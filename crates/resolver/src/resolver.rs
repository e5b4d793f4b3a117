//! C7: `Resolver`, the single entry point this crate exposes. Owns
//! the shared cache and root hints provider and dispatches a question
//! to either `ForwardedQuery` or `RecursiveQuery` depending on how it
//! was constructed, mirroring the teacher's top-level `resolve`
//! dispatcher in `lib-dns-resolver/src/lib.rs`.

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use dns_proto::protocol::types::{DomainName, QueryType};

use crate::cache::{CacheResolution, SharedCache};
use crate::config::ResolverConfig;
use crate::engine::forwarded::ForwardedQuery;
use crate::engine::recursive::RecursiveQuery;
use crate::engine::ResolvedAnswer;
use crate::error::ResolutionError;
use crate::metrics::Metrics;
use crate::roothints::{RootHintsProvider, StaticRootHints};
use crate::server::ServerSpec;

/// How a [`Resolver`] is allowed to satisfy a question.
#[derive(Clone)]
pub enum Mode {
    /// Descend the delegation chain from the root ourselves.
    Recursive { root_hints: Arc<dyn RootHintsProvider> },

    /// Hand every question to a fixed set of upstream servers and
    /// trust their answer.
    Forwarding { servers: Vec<ServerSpec> },
}

/// The resolver core's public facade: one cache, one resolution mode,
/// one config, shared across however many questions callers ask it.
#[derive(Clone)]
pub struct Resolver {
    cache: SharedCache,
    mode: Mode,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(config: ResolverConfig, mode: Mode) -> Self {
        let config = config.normalised();
        Self {
            cache: SharedCache::new(&config),
            mode,
            config,
        }
    }

    /// A recursive resolver seeded with the bundled static root hints.
    pub fn recursive_with_default_hints(config: ResolverConfig) -> Self {
        Self::new(
            config,
            Mode::Recursive {
                root_hints: Arc::new(StaticRootHints::new()),
            },
        )
    }

    pub fn forwarding(config: ResolverConfig, servers: Vec<ServerSpec>) -> Self {
        Self::new(config, Mode::Forwarding { servers })
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Resolve one question, returning what was found and the metrics
    /// this attempt generated.
    pub async fn resolve(
        &self,
        qname: DomainName,
        qtype: QueryType,
    ) -> (Metrics, Result<ResolvedAnswer, ResolutionError>) {
        let mut metrics = Metrics::new();

        match &self.mode {
            Mode::Recursive { root_hints } => {
                match self.cache.lock().resolve(Instant::now(), &qname, qtype) {
                    CacheResolution::Answer { .. } => metrics.record_cache_hit(),
                    _ => metrics.record_cache_miss(),
                }

                let query = RecursiveQuery::new(self.cache.clone(), root_hints.clone(), self.config.clone());
                let result = query
                    .resolve(qname.clone(), qtype)
                    .instrument(tracing::info_span!("resolve_recursive", %qname, %qtype))
                    .await;
                match &result {
                    Ok(_) => metrics.record_nameserver_hit(),
                    Err(_) => metrics.record_nameserver_miss(),
                }
                (metrics, result)
            }
            Mode::Forwarding { servers } => {
                match self.cache.lock().resolve(Instant::now(), &qname, qtype) {
                    CacheResolution::Answer { .. } => metrics.record_cache_hit(),
                    _ => metrics.record_cache_miss(),
                }

                let question = dns_proto::protocol::types::Question {
                    name: qname.clone(),
                    qtype,
                    qclass: dns_proto::protocol::types::QueryClass::Record(
                        dns_proto::protocol::types::RecordClass::IN,
                    ),
                };
                let query = ForwardedQuery::new(
                    question,
                    servers,
                    &self.config.selection_strategy,
                    self.config.exchange_timeout,
                    self.cache.clone(),
                );
                let result = query
                    .run()
                    .instrument(tracing::info_span!("resolve_forwarding", %qname, %qtype))
                    .await
                    .map(|message| {
                        if matches!(
                            message.header.rcode,
                            dns_proto::protocol::types::Rcode::NameError
                        ) {
                            ResolvedAnswer::NameError {
                                authority_rrs: message.authority,
                            }
                        } else {
                            ResolvedAnswer::Answer {
                                rrs: message.answers,
                                authority_rrs: message.authority,
                            }
                        }
                    });
                match &result {
                    Ok(_) => metrics.record_nameserver_hit(),
                    Err(_) => metrics.record_nameserver_miss(),
                }
                (metrics, result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_proto::protocol::types::test_util::*;
    use dns_proto::protocol::types::RecordType;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn recursive_resolver_answers_from_cache() {
        let resolver = Resolver::recursive_with_default_hints(ResolverConfig::default());
        resolver.cache().lock().insert(
            Instant::now(),
            &[a_record("example.com.", Ipv4Addr::new(1, 2, 3, 4))],
        );

        let (metrics, result) = resolver
            .resolve(domain("example.com."), QueryType::Record(RecordType::A))
            .await;
        assert_eq!(metrics.cache_hits, 1);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn forwarding_resolver_fails_with_no_servers_configured() {
        let resolver = Resolver::forwarding(ResolverConfig::default(), Vec::new());
        let (_, result) = resolver
            .resolve(domain("example.com."), QueryType::Record(RecordType::A))
            .await;
        assert!(result.is_err());
    }
}
