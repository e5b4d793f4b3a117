use std::net::{IpAddr, Ipv4Addr};

use dns_proto::protocol::types::{DomainName, RecordClass, RecordTypeWithData, ResourceRecord};

use crate::error::ResolutionError;

/// Supplies the NS/glue-A records recursion seeds itself with when no
/// cached ancestor NS records exist for a name.
///
/// This is the out-of-scope external collaborator that would, in a
/// full deployment, fetch `named.root`/`root.hints` over HTTP and
/// cache it to disk; here it is a trait so the engine never depends on
/// how that happens. [`StaticRootHints`] is the bundled fallback
/// implementation, seeded with a handful of the published root
/// servers so the crate is runnable standalone.
#[async_trait::async_trait]
pub trait RootHintsProvider: Send + Sync {
    async fn root_hints(&self) -> Result<Vec<ResourceRecord>, ResolutionError>;
}

/// A fixed, compiled-in set of root server NS + glue records.
///
/// Not a complete or currently-accurate root hints file - acquiring
/// and periodically refreshing one is explicitly out of scope for this
/// core - just enough real root servers that recursion has somewhere
/// to start.
pub struct StaticRootHints {
    hints: Vec<ResourceRecord>,
}

impl StaticRootHints {
    pub fn new() -> Self {
        let root = DomainName::root_domain();
        let servers: &[(&str, Ipv4Addr)] = &[
            ("a.root-servers.net.", Ipv4Addr::new(198, 41, 0, 4)),
            ("b.root-servers.net.", Ipv4Addr::new(199, 9, 14, 201)),
            ("c.root-servers.net.", Ipv4Addr::new(192, 33, 4, 12)),
            ("d.root-servers.net.", Ipv4Addr::new(199, 7, 91, 13)),
            ("e.root-servers.net.", Ipv4Addr::new(192, 203, 230, 10)),
        ];

        let mut hints = Vec::with_capacity(servers.len() * 2);
        for (name, addr) in servers {
            let nsdname = DomainName::from_dotted_string(name).expect("hardcoded name is valid");
            hints.push(ResourceRecord {
                name: root.clone(),
                rtype_with_data: RecordTypeWithData::NS {
                    nsdname: nsdname.clone(),
                },
                rclass: RecordClass::IN,
                ttl: u32::MAX,
            });
            hints.push(ResourceRecord {
                name: nsdname,
                rtype_with_data: RecordTypeWithData::A { address: *addr },
                rclass: RecordClass::IN,
                ttl: u32::MAX,
            });
        }

        Self { hints }
    }
}

impl Default for StaticRootHints {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RootHintsProvider for StaticRootHints {
    async fn root_hints(&self) -> Result<Vec<ResourceRecord>, ResolutionError> {
        Ok(self.hints.clone())
    }
}

/// Returns the A-record glue addresses present in a root hints set for
/// a given name server name.
pub fn glue_addresses(hints: &[ResourceRecord], nsdname: &DomainName) -> Vec<IpAddr> {
    hints
        .iter()
        .filter(|rr| &rr.name == nsdname)
        .filter_map(|rr| match &rr.rtype_with_data {
            RecordTypeWithData::A { address } => Some(IpAddr::V4(*address)),
            RecordTypeWithData::AAAA { address } => Some(IpAddr::V6(*address)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_hints_has_ns_and_glue() {
        let hints = StaticRootHints::new().root_hints().await.unwrap();
        let root = DomainName::root_domain();
        let ns_count = hints
            .iter()
            .filter(|rr| rr.name == root && matches!(rr.rtype_with_data, RecordTypeWithData::NS { .. }))
            .count();
        assert!(ns_count >= 5);

        for rr in &hints {
            if let RecordTypeWithData::NS { nsdname } = &rr.rtype_with_data {
                assert!(!glue_addresses(&hints, nsdname).is_empty());
            }
        }
    }
}
