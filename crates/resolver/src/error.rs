use std::fmt;

use dns_proto::protocol::types::{DomainName, Question};

/// Everything that can go wrong while resolving a question.
///
/// Hand-rolled `Display`/`Error` impls, matching the style the rest of
/// this resolver core uses for its other small error types.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionError {
    /// A socket-level failure talking to a server (connection refused,
    /// unreachable, etc).
    Network { detail: String },

    /// Every server we tried for this exchange, or this whole query,
    /// timed out.
    Timeout,

    /// A server responded with a non-`NOERROR`/`NXDOMAIN` RCODE.
    ServerError { code: u8 },

    /// A response could not be decoded, or was not a sane response to
    /// the request we sent (wrong ID, wrong question, etc).
    DecodeError { detail: String },

    /// The question itself is malformed (e.g. unknown qtype/qclass
    /// combination this core doesn't handle, or recursion requested on
    /// a query object that forbids it).
    BadQuery { detail: String },

    /// Recursion ran out of candidate name servers to try at some
    /// point in the descent.
    NoNameServers { domain: DomainName },

    /// No root hints were available to seed recursion from, and no
    /// cached NS ancestor existed either.
    NoRootServers,

    /// Recursion or forwarding exceeded the configured step limit.
    RecursionLimit,

    /// The same question was already in this query's ancestry: a
    /// referral loop.
    DuplicateQuestion { question: Question },

    /// Recursion reached a server set with nothing useful to ask and
    /// nowhere further to delegate to.
    DeadEnd { question: Question },

    /// A response arrived on a transport different from the one we
    /// expected for it (e.g. still truncated after the UDP→TCP
    /// fallback, where TCP is supposed to carry the whole answer).
    WrongTransport { detail: String },

    /// The configured `RootHintsProvider` could not supply hints.
    RootHintsProblem { detail: String },

    /// A cached or server-supplied CNAME chain skipped a name, looped,
    /// or otherwise didn't connect owner-to-target in order.
    InvalidCnameChain { question: Question },

    /// The answer section contained records that were neither the
    /// desired type nor part of a CNAME chain leading to it.
    UnexpectedRecordTypes { question: Question },
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResolutionError::Network { detail } => write!(f, "network error: {detail}"),
            ResolutionError::Timeout => write!(f, "query timed out"),
            ResolutionError::ServerError { code } => write!(f, "server returned rcode {code}"),
            ResolutionError::DecodeError { detail } => write!(f, "could not decode response: {detail}"),
            ResolutionError::BadQuery { detail } => write!(f, "bad query: {detail}"),
            ResolutionError::NoNameServers { domain } => {
                write!(f, "no name servers available for {domain}")
            }
            ResolutionError::NoRootServers => write!(f, "no root hints available"),
            ResolutionError::RecursionLimit => write!(f, "recursion limit exceeded"),
            ResolutionError::DuplicateQuestion { question } => {
                write!(f, "duplicate question: {} {}", question.name, question.qtype)
            }
            ResolutionError::DeadEnd { question } => {
                write!(f, "dead end resolving {} {}", question.name, question.qtype)
            }
            ResolutionError::WrongTransport { detail } => {
                write!(f, "response arrived on wrong transport: {detail}")
            }
            ResolutionError::RootHintsProblem { detail } => {
                write!(f, "root hints provider failed: {detail}")
            }
            ResolutionError::InvalidCnameChain { question } => {
                write!(f, "invalid CNAME chain resolving {} {}", question.name, question.qtype)
            }
            ResolutionError::UnexpectedRecordTypes { question } => {
                write!(f, "unexpected record types in answers for {} {}", question.name, question.qtype)
            }
        }
    }
}

impl std::error::Error for ResolutionError {}
