//! `RecursiveQuery`: the full iterative-descent resolver algorithm
//! (RFC 1034 §5.3.3) - consult the cache, and on a miss or referral
//! walk the delegation chain from the root down, caching everything
//! learned along the way.
//!
//! Adapted from the teacher's `recursive.rs`, redesigned around two
//! decisions: a CNAME found at the end of a chase is resolved by
//! looping this same query forward to the new name, rather than
//! spawning a fresh query object; and when a delegation's NS records
//! arrive without glue, the addresses are resolved by a bounded set of
//! concurrent sub-queries instead of one at a time.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use async_recursion::async_recursion;

use dns_proto::protocol::types::{
    DomainName, Message, QueryClass, QueryType, Rcode, RecordClass, RecordType,
    RecordTypeWithData, ResourceRecord, Question,
};

use crate::cache::{CacheResolution, SharedCache};
use crate::config::{IpVersion, ResolverConfig};
use crate::engine::{prioritising_merge, QueryContext, ResolvedAnswer};
use crate::error::ResolutionError;
use crate::roothints::{glue_addresses, RootHintsProvider};
use crate::transport::agent::ServerAgent;

/// Cap on how many candidate name servers get their addresses resolved
/// concurrently for one delegation. A real zone can list a dozen NS
/// records; we don't need all of them to make progress.
const MAX_NS_FANOUT: usize = 4;

enum DescendOutcome {
    Answer(Vec<ResourceRecord>),
    NameError(Vec<ResourceRecord>),
}

#[derive(Clone)]
pub struct RecursiveQuery {
    cache: SharedCache,
    root_hints: Arc<dyn RootHintsProvider>,
    config: ResolverConfig,
}

impl RecursiveQuery {
    pub fn new(
        cache: SharedCache,
        root_hints: Arc<dyn RootHintsProvider>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            cache,
            root_hints,
            config,
        }
    }

    pub async fn resolve(
        &self,
        qname: DomainName,
        qtype: QueryType,
    ) -> Result<ResolvedAnswer, ResolutionError> {
        let mut ctx = QueryContext::new(self.config.recursion_limit);
        self.resolve_with_ctx(qname, qtype, &mut ctx).await
    }

    #[async_recursion]
    async fn resolve_with_ctx(
        &self,
        mut qname: DomainName,
        qtype: QueryType,
        ctx: &mut QueryContext,
    ) -> Result<ResolvedAnswer, ResolutionError> {
        let mut accumulated = Vec::new();

        loop {
            let question = Question {
                name: qname.clone(),
                qtype,
                qclass: QueryClass::Record(RecordClass::IN),
            };
            if ctx.at_recursion_limit() {
                return Err(ResolutionError::RecursionLimit);
            }
            if ctx.is_duplicate(&question) {
                return Err(ResolutionError::DuplicateQuestion { question });
            }
            ctx.push(question);

            let now = Instant::now();
            let cache_result = self.cache.lock().resolve(now, &qname, qtype);

            let rrs = match cache_result {
                CacheResolution::Answer { rrs } => rrs,
                CacheResolution::Referral { rrs } => {
                    match self.descend(&qname, qtype, rrs).await? {
                        DescendOutcome::Answer(rrs) => rrs,
                        DescendOutcome::NameError(authority_rrs) => {
                            return Ok(ResolvedAnswer::NameError { authority_rrs })
                        }
                    }
                }
                CacheResolution::Miss => {
                    let hints = self.root_hints.root_hints().await.map_err(|e| {
                        ResolutionError::RootHintsProblem { detail: e.to_string() }
                    })?;
                    if hints.is_empty() {
                        return Err(ResolutionError::NoRootServers);
                    }
                    match self.descend(&qname, qtype, hints).await? {
                        DescendOutcome::Answer(rrs) => rrs,
                        DescendOutcome::NameError(authority_rrs) => {
                            return Ok(ResolvedAnswer::NameError { authority_rrs })
                        }
                    }
                }
            };

            if let Some(next) = terminal_cname_target(&rrs, qtype) {
                prioritising_merge(&mut accumulated, rrs);
                qname = next;
                continue;
            }

            prioritising_merge(&mut accumulated, rrs);
            return Ok(ResolvedAnswer::Answer {
                rrs: accumulated,
                authority_rrs: Vec::new(),
            });
        }
    }

    /// Walk a delegation chain, starting from `initial_candidates`
    /// (NS + glue, either cached or root hints), sending the question
    /// to a live server at each hop until an answer, a name error, or
    /// a dead end is reached.
    async fn descend(
        &self,
        qname: &DomainName,
        qtype: QueryType,
        initial_candidates: Vec<ResourceRecord>,
    ) -> Result<DescendOutcome, ResolutionError> {
        let mut candidate_rrs = initial_candidates;

        for _step in 0..self.config.recursion_limit {
            let addresses = self.addresses_for_candidates(&candidate_rrs).await?;
            if addresses.is_empty() {
                return Err(ResolutionError::DeadEnd {
                    question: Question {
                        name: qname.clone(),
                        qtype,
                        qclass: QueryClass::Record(RecordClass::IN),
                    },
                });
            }

            let question = Question {
                name: qname.clone(),
                qtype,
                qclass: QueryClass::Record(RecordClass::IN),
            };

            let mut last_error = ResolutionError::NoNameServers {
                domain: qname.clone(),
            };
            let mut response = None;
            for address in &addresses {
                let request = Message::from_question(transaction_id(), question.clone(), false);
                let agent = ServerAgent::new(SocketAddr::new(*address, 53));
                match agent.exchange(request, self.config.exchange_timeout).await {
                    Ok(resp) => {
                        response = Some(resp);
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(address = %address, error = %e, "delegation candidate failed");
                        last_error = e;
                    }
                }
            }
            let Some(response) = response else {
                return Err(last_error);
            };

            let cache_now = Instant::now();
            {
                let mut cache = self.cache.lock();
                cache.insert(cache_now, &response.answers);
                cache.insert(cache_now, &response.authority);
                cache.insert(cache_now, &response.additional);
            }

            if matches!(response.header.rcode, Rcode::NameError) {
                return Ok(DescendOutcome::NameError(response.authority));
            }

            if !response.answers.is_empty() || response.header.is_authoritative {
                let rrs = analyze_answers(qname, qtype, &question, response.answers)?;
                return Ok(DescendOutcome::Answer(rrs));
            }

            let mut next_candidates: Vec<ResourceRecord> = response
                .authority
                .iter()
                .filter(|rr| matches!(rr.rtype_with_data, RecordTypeWithData::NS { .. }))
                .cloned()
                .collect();
            if next_candidates.is_empty() {
                return Err(ResolutionError::DeadEnd { question });
            }
            next_candidates.extend(response.additional.iter().filter(|rr| {
                matches!(
                    rr.rtype_with_data,
                    RecordTypeWithData::A { .. } | RecordTypeWithData::AAAA { .. }
                )
            }).cloned());
            candidate_rrs = next_candidates;
        }

        Err(ResolutionError::RecursionLimit)
    }

    /// Find addresses to try for a set of candidate NS (+ glue)
    /// records: use attached glue if there is any, otherwise resolve
    /// up to [`MAX_NS_FANOUT`] of the NS names' own addresses
    /// concurrently.
    async fn addresses_for_candidates(
        &self,
        candidate_rrs: &[ResourceRecord],
    ) -> Result<Vec<IpAddr>, ResolutionError> {
        let ns_names: Vec<DomainName> = candidate_rrs
            .iter()
            .filter_map(|rr| match &rr.rtype_with_data {
                RecordTypeWithData::NS { nsdname } => Some(nsdname.clone()),
                _ => None,
            })
            .collect();

        let glue: Vec<IpAddr> = ns_names
            .iter()
            .flat_map(|name| glue_addresses(candidate_rrs, name))
            .filter(|addr| self.address_allowed(*addr))
            .collect();
        if !glue.is_empty() {
            return Ok(glue);
        }

        let want = match self.config.ip_version {
            IpVersion::V6Only => RecordType::AAAA,
            _ => RecordType::A,
        };

        let mut fanout = tokio::task::JoinSet::new();
        for name in ns_names.into_iter().take(MAX_NS_FANOUT) {
            let sub_query = self.clone();
            fanout.spawn(async move {
                let mut sub_ctx = QueryContext::new(sub_query.config.recursion_limit);
                sub_query
                    .resolve_with_ctx(name, QueryType::Record(want), &mut sub_ctx)
                    .await
            });
        }

        let mut addresses = Vec::new();
        while let Some(joined) = fanout.join_next().await {
            if let Ok(Ok(ResolvedAnswer::Answer { rrs, .. })) = joined {
                for rr in rrs {
                    match rr.rtype_with_data {
                        RecordTypeWithData::A { address } => addresses.push(IpAddr::V4(address)),
                        RecordTypeWithData::AAAA { address } => addresses.push(IpAddr::V6(address)),
                        _ => {}
                    }
                }
            }
        }
        Ok(addresses
            .into_iter()
            .filter(|addr| self.address_allowed(*addr))
            .collect())
    }

    fn address_allowed(&self, addr: IpAddr) -> bool {
        match self.config.ip_version {
            IpVersion::V4Only => addr.is_ipv4(),
            IpVersion::V6Only => addr.is_ipv6(),
            IpVersion::Both => true,
        }
    }
}

/// Spec's per-step answer analysis: classify a server's answers into
/// `cname_count`/`desired_count`/`wrong_count` and decide whether this
/// step is a terminal success, a CNAME chain to keep following, or a
/// malformed response.
///
/// Returns the (validated) answers to carry forward. The caller is
/// responsible for noticing an unresolved trailing CNAME and
/// continuing the chase - this function only validates and rejects.
fn analyze_answers(
    qname: &DomainName,
    qtype: QueryType,
    question: &Question,
    rrs: Vec<ResourceRecord>,
) -> Result<Vec<ResourceRecord>, ResolutionError> {
    if rrs.is_empty() {
        return Ok(rrs);
    }

    if matches!(qtype, QueryType::Wildcard | QueryType::Record(RecordType::CNAME)) {
        return Ok(rrs);
    }

    let cname_count = rrs
        .iter()
        .filter(|rr| matches!(rr.rtype_with_data, RecordTypeWithData::CNAME { .. }))
        .count();
    let desired_count = rrs
        .iter()
        .filter(|rr| {
            !matches!(rr.rtype_with_data, RecordTypeWithData::CNAME { .. }) && rr.rtype_with_data.matches(&qtype)
        })
        .count();
    let wrong_count = rrs.len() - cname_count - desired_count;

    if wrong_count > 0 {
        return Err(ResolutionError::UnexpectedRecordTypes { question: question.clone() });
    }

    if cname_count == 0 {
        // every record is the desired type.
        return Ok(rrs);
    }

    if desired_count > 0 {
        if !cname_chain_is_ordered(qname, &rrs) {
            return Err(ResolutionError::InvalidCnameChain { question: question.clone() });
        }
        return Ok(rrs);
    }

    // all records are CNAMEs: the caller will fold the last target into
    // the next resolution step.
    if !cname_owners_are_loopless(&rrs) {
        return Err(ResolutionError::InvalidCnameChain { question: question.clone() });
    }
    Ok(rrs)
}

/// The first record's owner must be `qname`; each subsequent CNAME's
/// owner must be the previous CNAME's target. Terminal target-type
/// records inherit the same rule, since their owner is just the last
/// CNAME's target too.
fn cname_chain_is_ordered(qname: &DomainName, rrs: &[ResourceRecord]) -> bool {
    let mut expected_owner = qname.clone();
    for rr in rrs {
        if rr.name != expected_owner {
            return false;
        }
        if let RecordTypeWithData::CNAME { cname } = &rr.rtype_with_data {
            expected_owner = cname.clone();
        }
    }
    true
}

fn cname_owners_are_loopless(rrs: &[ResourceRecord]) -> bool {
    let mut seen = std::collections::HashSet::new();
    rrs.iter()
        .filter(|rr| matches!(rr.rtype_with_data, RecordTypeWithData::CNAME { .. }))
        .all(|rr| seen.insert(rr.name.clone()))
}

/// If `rrs` doesn't already contain a record satisfying `qtype`, and
/// the chain ends in an unresolved CNAME, return the name to continue
/// resolving at.
fn terminal_cname_target(rrs: &[ResourceRecord], qtype: QueryType) -> Option<DomainName> {
    if matches!(qtype, QueryType::Record(RecordType::CNAME)) {
        return None;
    }
    if rrs.iter().any(|rr| rr.rtype_with_data.matches(&qtype)) {
        return None;
    }
    match &rrs.last()?.rtype_with_data {
        RecordTypeWithData::CNAME { cname } => Some(cname.clone()),
        _ => None,
    }
}

fn transaction_id() -> u16 {
    use rand::Rng;
    rand::thread_rng().gen()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_proto::protocol::types::test_util::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    struct FakeRootHints(Vec<ResourceRecord>);

    #[async_trait::async_trait]
    impl RootHintsProvider for FakeRootHints {
        async fn root_hints(&self) -> Result<Vec<ResourceRecord>, ResolutionError> {
            Ok(self.0.clone())
        }
    }

    fn config() -> ResolverConfig {
        ResolverConfig {
            exchange_timeout: Duration::from_millis(500),
            ..ResolverConfig::default()
        }
    }

    #[tokio::test]
    async fn answers_directly_from_cache() {
        let cache = SharedCache::new(&config());
        cache.lock().insert(
            Instant::now(),
            &[a_record("example.com.", Ipv4Addr::new(1, 2, 3, 4))],
        );
        let query = RecursiveQuery::new(
            cache,
            Arc::new(FakeRootHints(Vec::new())),
            config(),
        );
        let answer = query
            .resolve(domain("example.com."), QueryType::Record(RecordType::A))
            .await
            .unwrap();
        assert_eq!(answer.rrs().len(), 1);
    }

    #[tokio::test]
    async fn descends_to_root_hint_server_on_cache_miss() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            let req = Message::from_octets(&buf[..n]).unwrap();
            let mut response = req.make_response();
            response
                .answers
                .push(a_record("example.com.", Ipv4Addr::new(7, 7, 7, 7)));
            let out = response.into_octets().unwrap();
            server.send_to(&out, peer).await.unwrap();
        });

        let IpAddr::V4(server_ip) = server_addr.ip() else {
            panic!("expected v4 test address");
        };
        let hints = vec![
            ResourceRecord {
                name: domain("com."),
                rtype_with_data: RecordTypeWithData::NS {
                    nsdname: domain("ns1.example-hint.net."),
                },
                rclass: RecordClass::IN,
                ttl: 3600,
            },
            ResourceRecord {
                name: domain("ns1.example-hint.net."),
                rtype_with_data: RecordTypeWithData::A { address: server_ip },
                rclass: RecordClass::IN,
                ttl: 3600,
            },
        ];

        let cache = SharedCache::new(&config());
        let query = RecursiveQuery::new(cache, Arc::new(FakeRootHints(hints)), config());
        let answer = query
            .resolve(domain("example.com."), QueryType::Record(RecordType::A))
            .await
            .unwrap();
        assert_eq!(answer.rrs().len(), 1);

        task.await.unwrap();
    }

    #[tokio::test]
    async fn fails_with_no_root_servers_on_empty_hints() {
        let cache = SharedCache::new(&config());
        let query = RecursiveQuery::new(cache, Arc::new(FakeRootHints(Vec::new())), config());
        let result = query
            .resolve(domain("example.com."), QueryType::Record(RecordType::A))
            .await;
        assert!(matches!(result, Err(ResolutionError::NoRootServers)));
    }

    struct FailingRootHints;

    #[async_trait::async_trait]
    impl RootHintsProvider for FailingRootHints {
        async fn root_hints(&self) -> Result<Vec<ResourceRecord>, ResolutionError> {
            Err(ResolutionError::Network { detail: "hints fetch failed".into() })
        }
    }

    #[tokio::test]
    async fn root_hints_failure_is_reported_as_root_hints_problem() {
        let cache = SharedCache::new(&config());
        let query = RecursiveQuery::new(cache, Arc::new(FailingRootHints), config());
        let result = query
            .resolve(domain("example.com."), QueryType::Record(RecordType::A))
            .await;
        assert!(matches!(result, Err(ResolutionError::RootHintsProblem { .. })));
    }

    fn question(name: &str, qtype: QueryType) -> Question {
        Question {
            name: domain(name),
            qtype,
            qclass: QueryClass::Record(RecordClass::IN),
        }
    }

    #[test]
    fn analyze_answers_accepts_all_desired_type() {
        let rrs = vec![a_record("example.com.", Ipv4Addr::new(1, 1, 1, 1))];
        let q = question("example.com.", QueryType::Record(RecordType::A));
        let result = analyze_answers(&domain("example.com."), q.qtype, &q, rrs.clone());
        assert_eq!(result.unwrap(), rrs);
    }

    #[test]
    fn analyze_answers_validates_proper_cname_chain() {
        let rrs = vec![
            cname_record("alias.example.com.", "target.example.com."),
            a_record("target.example.com.", Ipv4Addr::new(2, 2, 2, 2)),
        ];
        let q = question("alias.example.com.", QueryType::Record(RecordType::A));
        let result = analyze_answers(&domain("alias.example.com."), q.qtype, &q, rrs.clone());
        assert_eq!(result.unwrap(), rrs);
    }

    #[test]
    fn analyze_answers_rejects_out_of_order_cname_chain() {
        // the CNAME's owner doesn't match qname - a server shouldn't be
        // able to smuggle in an answer for a name nobody asked about.
        let rrs = vec![
            cname_record("unrelated.example.com.", "target.example.com."),
            a_record("target.example.com.", Ipv4Addr::new(2, 2, 2, 2)),
        ];
        let q = question("alias.example.com.", QueryType::Record(RecordType::A));
        let result = analyze_answers(&domain("alias.example.com."), q.qtype, &q, rrs);
        assert!(matches!(result, Err(ResolutionError::InvalidCnameChain { .. })));
    }

    #[test]
    fn analyze_answers_rejects_wrong_record_types() {
        let rrs = vec![
            a_record("example.com.", Ipv4Addr::new(1, 1, 1, 1)),
            ns_record("example.com.", "ns1.example.com."),
        ];
        let q = question("example.com.", QueryType::Record(RecordType::A));
        let result = analyze_answers(&domain("example.com."), q.qtype, &q, rrs);
        assert!(matches!(result, Err(ResolutionError::UnexpectedRecordTypes { .. })));
    }

    #[test]
    fn analyze_answers_passes_through_unresolved_cname_chain() {
        let rrs = vec![cname_record("alias.example.com.", "target.example.com.")];
        let q = question("alias.example.com.", QueryType::Record(RecordType::A));
        let result = analyze_answers(&domain("alias.example.com."), q.qtype, &q, rrs.clone());
        assert_eq!(result.unwrap(), rrs);
    }

    #[test]
    fn analyze_answers_rejects_repeated_cname_owner() {
        // two different CNAMEs claiming the same owner in one response
        // - malformed, and would loop forever if followed.
        let rrs = vec![
            cname_record("a.example.com.", "b.example.com."),
            cname_record("a.example.com.", "c.example.com."),
        ];
        let q = question("a.example.com.", QueryType::Record(RecordType::A));
        let result = analyze_answers(&domain("a.example.com."), q.qtype, &q, rrs);
        assert!(matches!(result, Err(ResolutionError::InvalidCnameChain { .. })));
    }

    #[tokio::test]
    async fn authoritative_nodata_terminates_with_empty_success() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            let req = Message::from_octets(&buf[..n]).unwrap();
            let mut response = req.make_response();
            response.header.is_authoritative = true;
            response
                .authority
                .push(soa_record("example.com.", "ns1.example.com.", "hostmaster.example.com."));
            let out = response.into_octets().unwrap();
            server.send_to(&out, peer).await.unwrap();
        });

        let IpAddr::V4(server_ip) = server_addr.ip() else {
            panic!("expected v4 test address");
        };
        let hints = vec![
            ResourceRecord {
                name: domain("com."),
                rtype_with_data: RecordTypeWithData::NS {
                    nsdname: domain("ns1.example-hint.net."),
                },
                rclass: RecordClass::IN,
                ttl: 3600,
            },
            ResourceRecord {
                name: domain("ns1.example-hint.net."),
                rtype_with_data: RecordTypeWithData::A { address: server_ip },
                rclass: RecordClass::IN,
                ttl: 3600,
            },
        ];

        let cache = SharedCache::new(&config());
        let query = RecursiveQuery::new(cache, Arc::new(FakeRootHints(hints)), config());
        let answer = query
            .resolve(domain("nothing.example.com."), QueryType::Record(RecordType::A))
            .await
            .unwrap();
        assert!(answer.rrs().is_empty());

        task.await.unwrap();
    }
}
