//! The shared record cache: C3 in the resolver core.
//!
//! Adapted from the teacher's TTL priority-queue cache, generalised so
//! capacity eviction always removes the earliest-expiring entry (rather
//! than the teacher's least-recently-used one), plus two additions the
//! original didn't need: a configurable size floor/TTL ceiling
//! (`ResolverConfig`), and a `resolve` method that walks a cached CNAME
//! chain and synthesises an NS referral when it can't answer directly -
//! the standard resolver algorithm's "look in local data first" step
//! (RFC 1034 §5.3.3).

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use priority_queue::PriorityQueue;

use dns_proto::protocol::types::{
    DomainName, QueryType, RecordType, RecordTypeWithData, ResourceRecord,
};

use crate::config::ResolverConfig;

const MUTEX_POISON_MESSAGE: &str =
    "cache mutex poisoned - a thread must have panicked while holding it";

/// A `Cache`, shareable and mutable from multiple tasks.
#[derive(Clone)]
pub struct SharedCache(Arc<Mutex<Cache>>);

impl SharedCache {
    pub fn new(config: &ResolverConfig) -> Self {
        Self(Arc::new(Mutex::new(Cache::new(config))))
    }

    pub fn lock(&self) -> MutexGuard<Cache> {
        self.0.lock().expect(MUTEX_POISON_MESSAGE)
    }
}

impl std::fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("SharedCache(..)")
    }
}

/// The result of looking a name + qtype up in the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheResolution {
    /// A direct (possibly CNAME-chained) answer.
    Answer { rrs: Vec<ResourceRecord> },

    /// Neither a direct answer nor a usable NS ancestor was cached.
    Miss,

    /// No direct answer, but NS records (and any glue) for the closest
    /// cached ancestor of `qname` are available - a referral the
    /// caller should follow.
    Referral { rrs: Vec<ResourceRecord> },
}

struct CachedDomainRecords {
    next_expiry: Instant,
    size: usize,
    records: HashMap<RecordType, Vec<(RecordTypeWithData, Instant)>>,
}

impl CachedDomainRecords {
    fn is_empty(&self) -> bool {
        self.records.values().all(Vec::is_empty)
    }
}

/// An in-memory, TTL-bounded, size-bounded DNS record cache.
///
/// Capacity eviction removes the earliest-expiring entry first: entries
/// in `expiry_priority` are keyed by `(expiry, discriminator)`, where
/// `discriminator` is drawn from a monotonically increasing counter so
/// the ordering is total even when two entries expire at the same
/// instant.
pub struct Cache {
    entries: HashMap<DomainName, CachedDomainRecords>,
    expiry_priority: PriorityQueue<DomainName, Reverse<(Instant, u64)>>,
    current_size: usize,
    max_entries: usize,
    max_allowed_ttl: Duration,
    next_discriminator: u64,
}

impl Cache {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            entries: HashMap::new(),
            expiry_priority: PriorityQueue::new(),
            current_size: 0,
            max_entries: config.max_entries.max(crate::config::MIN_MAX_ENTRIES),
            max_allowed_ttl: config.max_allowed_ttl,
            next_discriminator: 0,
        }
    }

    fn discriminator(&mut self) -> u64 {
        let next = self.next_discriminator;
        self.next_discriminator += 1;
        next
    }

    pub fn len(&self) -> usize {
        self.current_size
    }

    pub fn is_empty(&self) -> bool {
        self.current_size == 0
    }

    /// Insert a batch of resource records, applying the configured TTL
    /// cap and deduplicating against any record already cached for the
    /// same name/type/data.
    pub fn insert(&mut self, now: Instant, rrs: &[ResourceRecord]) {
        for rr in rrs {
            self.insert_one(now, rr);
        }
        self.prune(now);
    }

    /// Skips the record entirely - no insertion, no cache mutation - if
    /// its TTL is zero or it's an opaque `UNIMPLEMENTED`/`Unknown`
    /// record; both are silent no-ops, not errors.
    fn insert_one(&mut self, now: Instant, rr: &ResourceRecord) {
        if rr.ttl == 0 {
            return;
        }
        if matches!(rr.rtype_with_data, RecordTypeWithData::Unknown { .. }) {
            return;
        }

        let ttl = Duration::from_secs(rr.ttl.into()).min(self.max_allowed_ttl);
        let expires_at = now + ttl;
        let rtype = rr.rtype_with_data.rtype();

        let entry = self.entries.entry(rr.name.clone()).or_insert_with(|| CachedDomainRecords {
            next_expiry: expires_at,
            size: 0,
            records: HashMap::new(),
        });

        let bucket = entry.records.entry(rtype).or_default();
        if let Some(slot) = bucket
            .iter_mut()
            .find(|(existing, _)| *existing == rr.rtype_with_data)
        {
            slot.1 = expires_at;
        } else {
            bucket.push((rr.rtype_with_data.clone(), expires_at));
            entry.size += 1;
            self.current_size += 1;
        }

        entry.next_expiry = entry.next_expiry.min(expires_at);
        let next_expiry = entry.next_expiry;

        let discriminator = self.discriminator();
        self.expiry_priority
            .push(rr.name.clone(), Reverse((next_expiry, discriminator)));
    }

    /// Fetch cached, non-expired records of `rtype` for `name`, without
    /// updating its access time (used internally by `resolve`, which
    /// performs its own bookkeeping for the whole chain it follows).
    fn get_without_touching(
        &self,
        now: Instant,
        name: &DomainName,
        rtype: RecordType,
    ) -> Vec<ResourceRecord> {
        let Some(entry) = self.entries.get(name) else {
            return Vec::new();
        };
        let Some(bucket) = entry.records.get(&rtype) else {
            return Vec::new();
        };
        bucket
            .iter()
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(data, expires_at)| ResourceRecord {
                name: name.clone(),
                rtype_with_data: data.clone(),
                rclass: dns_proto::protocol::types::RecordClass::IN,
                ttl: expires_at.saturating_duration_since(now).as_secs() as u32,
            })
            .collect()
    }

    /// Resolve `qname`/`qtype` against cached data only: follows CNAME
    /// chains, and on a miss walks up through `qname`'s ancestors
    /// looking for the closest cached NS records to synthesise a
    /// referral from.
    pub fn resolve(&mut self, now: Instant, qname: &DomainName, qtype: QueryType) -> CacheResolution {
        let mut rrs = Vec::new();
        let mut current = qname.clone();
        let mut seen = std::collections::HashSet::new();

        loop {
            if !seen.insert(current.clone()) {
                // chain loop in cached data - stop, return what we have
                break;
            }

            if let QueryType::Record(want) = qtype {
                let direct = self.get_without_touching(now, &current, want);
                if !direct.is_empty() {
                    rrs.extend(direct);
                    return CacheResolution::Answer { rrs };
                }
            }

            let cnames = self.get_without_touching(now, &current, RecordType::CNAME);
            if let Some(first) = cnames.into_iter().next() {
                let RecordTypeWithData::CNAME { cname } = &first.rtype_with_data else {
                    unreachable!("get_without_touching filtered by rtype")
                };
                let target = cname.clone();
                rrs.push(first);
                current = target;
                continue;
            }

            break;
        }

        if !rrs.is_empty() {
            // we followed at least one CNAME but never found a terminal
            // answer: still useful, the caller will continue resolving
            // `current` itself.
            return CacheResolution::Answer { rrs };
        }

        match self.referral_for(now, qname) {
            Some(referral) => CacheResolution::Referral { rrs: referral },
            None => CacheResolution::Miss,
        }
    }

    fn referral_for(&mut self, now: Instant, qname: &DomainName) -> Option<Vec<ResourceRecord>> {
        for ancestor in qname.ancestors() {
            let ns = self.get_without_touching(now, &ancestor, RecordType::NS);
            if ns.is_empty() {
                continue;
            }
            let mut out = ns.clone();
            for rr in &ns {
                if let RecordTypeWithData::NS { nsdname } = &rr.rtype_with_data {
                    out.extend(self.get_without_touching(now, nsdname, RecordType::A));
                    out.extend(self.get_without_touching(now, nsdname, RecordType::AAAA));
                }
            }
            return Some(out);
        }
        None
    }

    /// Remove every expired entry, then evict entries in earliest-
    /// expiring-first order down to `max_entries` if still over budget.
    pub fn prune(&mut self, now: Instant) -> (usize, usize) {
        let num_expired = self.remove_expired(now);
        let mut num_evicted = 0;
        while self.current_size > self.max_entries {
            if self.remove_earliest_expiring() {
                num_evicted += 1;
            } else {
                break;
            }
        }
        (num_expired, num_evicted)
    }

    fn remove_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        loop {
            let Some((name, Reverse((expiry, _)))) = self.expiry_priority.peek() else {
                break;
            };
            if *expiry > now {
                break;
            }
            let (name, _) = self.expiry_priority.pop().expect("just peeked");
            removed += self.remove_expired_records_for(now, &name);
            // if the entry still has live records with a later expiry,
            // put it back in the queue under its new expiry time.
            if let Some(next_expiry) = self.entries.get(&name).map(|entry| entry.next_expiry) {
                let discriminator = self.discriminator();
                self.expiry_priority
                    .push(name, Reverse((next_expiry, discriminator)));
            }
        }
        removed
    }

    fn remove_expired_records_for(&mut self, now: Instant, name: &DomainName) -> usize {
        let mut removed = 0;
        if let Some(entry) = self.entries.get_mut(name) {
            for bucket in entry.records.values_mut() {
                let before = bucket.len();
                bucket.retain(|(_, expires_at)| *expires_at > now);
                removed += before - bucket.len();
            }
            self.current_size -= removed;

            if let Some(next) = entry
                .records
                .values()
                .flatten()
                .map(|(_, expires_at)| *expires_at)
                .min()
            {
                entry.next_expiry = next;
            }

            if entry.is_empty() {
                self.entries.remove(name);
            }
        }
        removed
    }

    /// Evict the entry whose nearest-expiring record is soonest,
    /// breaking ties by insertion order via the monotonic discriminator.
    fn remove_earliest_expiring(&mut self) -> bool {
        let Some((name, _)) = self.expiry_priority.pop() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&name) {
            self.current_size -= entry.size;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        let mut recomputed_size = 0;
        for (name, entry) in &self.entries {
            recomputed_size += entry.size;
            assert!(self.expiry_priority.get(name).is_some());
        }
        assert_eq!(recomputed_size, self.current_size);
    }
}
