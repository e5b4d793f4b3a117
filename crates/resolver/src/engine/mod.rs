pub mod forwarded;
pub mod recursive;

use dns_proto::protocol::types::{Question, RecordTypeWithData, ResourceRecord};

/// What a query resolved to, mirroring the three shapes a standard
/// resolver algorithm can terminate in (RFC 1034 §5.3.3): a positive
/// answer (with or without an authority section attached), or a
/// negative (name error) result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAnswer {
    Answer {
        rrs: Vec<ResourceRecord>,
        authority_rrs: Vec<ResourceRecord>,
    },
    NameError {
        authority_rrs: Vec<ResourceRecord>,
    },
}

impl ResolvedAnswer {
    pub fn rrs(&self) -> &[ResourceRecord] {
        match self {
            ResolvedAnswer::Answer { rrs, .. } => rrs,
            ResolvedAnswer::NameError { .. } => &[],
        }
    }

    pub fn authority_rrs(&self) -> &[ResourceRecord] {
        match self {
            ResolvedAnswer::Answer { authority_rrs, .. } => authority_rrs,
            ResolvedAnswer::NameError { authority_rrs } => authority_rrs,
        }
    }

    /// The SOA record from the authority section, if one was sent -
    /// purely informational for a NAME_ERROR/NODATA result, never used
    /// to drive negative caching.
    pub fn soa(&self) -> Option<&ResourceRecord> {
        self.authority_rrs()
            .iter()
            .find(|rr| matches!(rr.rtype_with_data, RecordTypeWithData::SOA { .. }))
    }
}

/// Tracks the in-flight ancestry of one user-visible query so the
/// engine can detect referral loops and enforce the recursion/step
/// limit, independent of whether it's a `ForwardedQuery` or a
/// `RecursiveQuery` underneath.
pub struct QueryContext {
    recursion_limit: usize,
    question_stack: Vec<Question>,
}

impl QueryContext {
    pub fn new(recursion_limit: usize) -> Self {
        Self {
            recursion_limit,
            question_stack: Vec::with_capacity(recursion_limit),
        }
    }

    pub fn at_recursion_limit(&self) -> bool {
        self.question_stack.len() >= self.recursion_limit
    }

    pub fn is_duplicate(&self, question: &Question) -> bool {
        self.question_stack.contains(question)
    }

    pub fn push(&mut self, question: Question) {
        self.question_stack.push(question);
    }
}

/// Merge `new` into `priority`, keeping whichever record a (name,
/// rtype) pair already has in `priority` rather than letting a later,
/// possibly less-trusted, source overwrite it.
///
/// Grounded in the teacher's `prioritising_merge`: used so that a
/// CNAME chain this engine has already confirmed can't be shadowed by
/// answers folded in from a later sub-query.
pub fn prioritising_merge(priority: &mut Vec<ResourceRecord>, new: Vec<ResourceRecord>) {
    for rr in new {
        let already_present = priority
            .iter()
            .any(|existing| existing.name == rr.name && existing.rtype_with_data.rtype() == rr.rtype_with_data.rtype());
        if !already_present {
            priority.push(rr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_proto::protocol::types::test_util::*;
    use std::net::Ipv4Addr;

    #[test]
    fn prioritising_merge_keeps_existing_over_new() {
        let mut priority = vec![a_record("example.com.", Ipv4Addr::new(1, 1, 1, 1))];
        prioritising_merge(
            &mut priority,
            vec![a_record("example.com.", Ipv4Addr::new(2, 2, 2, 2))],
        );
        assert_eq!(priority.len(), 1);
        assert_eq!(
            priority[0].rtype_with_data,
            dns_proto::protocol::types::RecordTypeWithData::A {
                address: Ipv4Addr::new(1, 1, 1, 1)
            }
        );
    }

    #[test]
    fn soa_is_found_in_name_error_authority_section() {
        let answer = ResolvedAnswer::NameError {
            authority_rrs: vec![soa_record(
                "example.com.",
                "ns1.example.com.",
                "hostmaster.example.com.",
            )],
        };
        assert!(answer.soa().is_some());
        assert!(answer.rrs().is_empty());
    }

    #[test]
    fn query_context_detects_duplicates_and_limit() {
        let mut ctx = QueryContext::new(2);
        let q = dns_proto::protocol::types::Question {
            name: domain("example.com."),
            qtype: dns_proto::protocol::types::QueryType::Record(
                dns_proto::protocol::types::RecordType::A,
            ),
            qclass: dns_proto::protocol::types::QueryClass::Record(
                dns_proto::protocol::types::RecordClass::IN,
            ),
        };
        assert!(!ctx.is_duplicate(&q));
        ctx.push(q.clone());
        assert!(ctx.is_duplicate(&q));
        assert!(!ctx.at_recursion_limit());
        ctx.push(q.clone());
        assert!(ctx.at_recursion_limit());
    }
}
