use std::fmt;

use hashlink::LinkedHashMap;

use crate::{Action, RecordKind};

/// A cached decision for one `(qtype, name)` question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionEntry {
    pub action: Action,
    pub expires_at: i64,
}

/// Cache of blocking decisions, not DNS answers − answering is the upstream
/// resolver's job. Caching the action taken is enough and saves the suffix
/// walk and regexp scans on the hot path.
///
/// The map keeps insertion order so the bounded [`purge_expired`] scan always
/// looks at the oldest entries first.
///
/// [`purge_expired`]: DecisionCache::purge_expired
#[derive(Default, Debug)]
pub struct DecisionCache {
    entries: LinkedHashMap<(RecordKind, String), DecisionEntry>,
}

impl DecisionCache {
    pub fn new() -> Self {
        Default::default()
    }

    /// A hit past its expiry counts as a miss; the entry self-evicts on the
    /// next [`put`](DecisionCache::put) or sweep.
    pub fn get(&self, qtype: RecordKind, name: &str, now: i64) -> Option<Action> {
        self.entries
            .get(&(qtype, name.to_owned()))
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.action)
    }

    pub fn put(&mut self, qtype: RecordKind, name: &str, action: Action, expires_at: i64) {
        self.entries
            .insert((qtype, name.to_owned()), DecisionEntry { action, expires_at });
    }

    /// Surgical invalidation: removes exactly the given keys. Granting an
    /// override for `host` deletes `(A, host)` and `(AAAA, host)`; subdomain
    /// entries are left to expire naturally.
    pub fn delete(&mut self, keys: &[(RecordKind, &str)]) {
        for (qtype, name) in keys {
            self.entries.remove(&(*qtype, (*name).to_owned()));
        }
    }

    pub fn purge_all(&mut self) {
        self.entries.clear();
    }

    /// Scan up to `max_scan` entries, oldest first, removing expired ones.
    /// Bounded to limit how long the caller holds its write lock; full
    /// correctness is not required since expired entries are misses anyway.
    pub fn purge_expired(&mut self, max_scan: usize, now: i64) {
        let expired: Vec<_> = self
            .entries
            .iter()
            .take(max_scan)
            .filter(|(_, entry)| entry.expires_at < now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dump(&self, w: &mut impl fmt::Write) -> fmt::Result {
        for ((qtype, name), entry) in &self.entries {
            writeln!(w, "{qtype} {name}  {}  expires={}", entry.action, entry.expires_at)?;
        }
        Ok(())
    }
}
