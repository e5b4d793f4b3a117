//! `ForwardedQuery`: ask a fixed list of configured upstream servers,
//! in order, and return whatever the first one that answers sends
//! back. No delegation is followed - that's what `RecursiveQuery` is
//! for - this is the "stub resolver" half of this core.
//!
//! Modelled as an explicit state machine rather than a straight-line
//! function so a caller driving it from outside (the `resolveq` CLI's
//! `--trace` flag, say) can observe each step. On entry, `IDLE` is
//! resolved by a cache probe before anything touches the network: a
//! cache hit answers with zero network bytes, exactly like a `DATA`
//! event faked from the initial transport.

use std::time::{Duration, Instant};

use dns_proto::protocol::types::{Message, Question, Rcode};

use crate::cache::{CacheResolution, SharedCache};
use crate::error::ResolutionError;
use crate::server::{order_servers, SelectionStrategy, ServerSpec};
use crate::transport::agent::ServerAgent;

/// The state a `ForwardedQuery` is in between steps.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    /// Not yet resolved from cache or sent to any server.
    Idle,

    /// Waiting on a response from the server at this index into the
    /// (already-ordered) candidate list.
    Querying { candidate_index: usize },

    /// The cache answered directly, or a server answered with
    /// `NOERROR`/`NXDOMAIN`.
    Answered { message: Message },

    /// Every candidate server was tried and none produced a usable
    /// response.
    Failed { error: ResolutionError },
}

/// Drives one question through the cache, then a fixed list of
/// upstream servers.
pub struct ForwardedQuery {
    question: Question,
    candidates: Vec<ServerSpec>,
    exchange_timeout: Duration,
    cache: SharedCache,
    state: State,
}

impl ForwardedQuery {
    pub fn new(
        question: Question,
        servers: &[ServerSpec],
        strategy: &SelectionStrategy,
        exchange_timeout: Duration,
        cache: SharedCache,
    ) -> Self {
        Self {
            question,
            candidates: order_servers(strategy, servers),
            exchange_timeout,
            cache,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Run the state machine to completion: answer from cache if
    /// possible, otherwise try each candidate server in turn until one
    /// gives a usable answer, caching it on the way out.
    pub async fn run(mut self) -> Result<Message, ResolutionError> {
        if let CacheResolution::Answer { rrs } =
            self.cache.lock().resolve(Instant::now(), &self.question.name, self.question.qtype)
        {
            let mut response =
                Message::from_question(transaction_id(), self.question.clone(), true).make_response();
            response.answers = rrs;
            self.state = State::Answered {
                message: response.clone(),
            };
            return Ok(response);
        }

        if self.candidates.is_empty() {
            self.state = State::Failed {
                error: ResolutionError::NoNameServers {
                    domain: self.question.name.clone(),
                },
            };
            return Err(ResolutionError::NoNameServers {
                domain: self.question.name,
            });
        }

        let mut last_error = ResolutionError::NoNameServers {
            domain: self.question.name.clone(),
        };

        for (index, server) in self.candidates.clone().into_iter().enumerate() {
            self.state = State::Querying {
                candidate_index: index,
            };

            let request = Message::from_question(
                transaction_id(),
                self.question.clone(),
                true,
            );
            let agent = ServerAgent::new(server.address);

            match agent.exchange(request, self.exchange_timeout).await {
                Ok(response) if is_usable(&response) => {
                    if matches!(response.header.rcode, Rcode::NoError) {
                        let mut cache = self.cache.lock();
                        cache.insert(Instant::now(), &response.answers);
                        cache.insert(Instant::now(), &response.authority);
                        cache.insert(Instant::now(), &response.additional);
                    }
                    self.state = State::Answered {
                        message: response.clone(),
                    };
                    return Ok(response);
                }
                Ok(response) => {
                    last_error = ResolutionError::ServerError {
                        code: response.header.rcode.into(),
                    };
                }
                Err(e) => {
                    tracing::debug!(address = %server.address, error = %e, "forwarded candidate failed");
                    last_error = e;
                }
            }
        }

        self.state = State::Failed {
            error: last_error.clone(),
        };
        Err(last_error)
    }
}

fn is_usable(response: &Message) -> bool {
    matches!(response.header.rcode, Rcode::NoError | Rcode::NameError)
}

fn transaction_id() -> u16 {
    use rand::Rng;
    rand::thread_rng().gen()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_proto::protocol::types::test_util::*;
    use dns_proto::protocol::types::{QueryClass, QueryType, RecordClass, RecordType};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::net::UdpSocket;

    fn question() -> Question {
        Question {
            name: domain("example.com."),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        }
    }

    fn cache() -> SharedCache {
        SharedCache::new(&crate::config::ResolverConfig::default())
    }

    #[tokio::test]
    async fn falls_through_to_second_candidate_on_failure() {
        let good = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let good_addr = good.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let (n, peer) = good.recv_from(&mut buf).await.unwrap();
            let req = Message::from_octets(&buf[..n]).unwrap();
            let mut response = req.make_response();
            response
                .answers
                .push(a_record("example.com.", Ipv4Addr::new(9, 9, 9, 9)));
            let out = response.into_octets().unwrap();
            good.send_to(&out, peer).await.unwrap();
        });

        let dead_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1);
        let servers = vec![
            ServerSpec::new("dead", dead_addr, Duration::from_millis(200), 0),
            ServerSpec::new("good", good_addr, Duration::from_millis(200), 1),
        ];

        let query = ForwardedQuery::new(
            question(),
            &servers,
            &SelectionStrategy::RoundRobin,
            Duration::from_millis(500),
            cache(),
        );
        let response = query.run().await.unwrap();
        assert_eq!(response.answers.len(), 1);

        task.await.unwrap();
    }

    #[tokio::test]
    async fn fails_when_no_candidates_configured() {
        let query = ForwardedQuery::new(
            question(),
            &[],
            &SelectionStrategy::Priority,
            Duration::from_millis(200),
            cache(),
        );
        assert!(matches!(
            query.run().await,
            Err(ResolutionError::NoNameServers { .. })
        ));
    }

    #[tokio::test]
    async fn answers_from_cache_without_any_candidates() {
        let shared = cache();
        shared
            .lock()
            .insert(Instant::now(), &[a_record("example.com.", Ipv4Addr::new(1, 1, 1, 1))]);

        let query = ForwardedQuery::new(
            question(),
            &[],
            &SelectionStrategy::Priority,
            Duration::from_millis(200),
            shared,
        );
        let response = query.run().await.unwrap();
        assert_eq!(response.answers.len(), 1);
    }

    #[tokio::test]
    async fn successful_exchange_is_cached_for_next_query() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            let req = Message::from_octets(&buf[..n]).unwrap();
            let mut response = req.make_response();
            response
                .answers
                .push(a_record("example.com.", Ipv4Addr::new(2, 2, 2, 2)));
            let out = response.into_octets().unwrap();
            server.send_to(&out, peer).await.unwrap();
        });

        let shared = cache();
        let servers = vec![ServerSpec::new(
            "test",
            server_addr,
            Duration::from_millis(500),
            0,
        )];
        let first = ForwardedQuery::new(
            question(),
            &servers,
            &SelectionStrategy::Priority,
            Duration::from_millis(500),
            shared.clone(),
        );
        first.run().await.unwrap();
        task.await.unwrap();

        // second query never needs the network: cache already has the answer.
        let second = ForwardedQuery::new(
            question(),
            &[],
            &SelectionStrategy::Priority,
            Duration::from_millis(200),
            shared,
        );
        let response = second.run().await.unwrap();
        assert_eq!(response.answers.len(), 1);
    }
}
