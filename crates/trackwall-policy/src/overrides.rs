use std::collections::HashMap;
use std::fmt;

use crate::suffixes;

/// Hosts the user told us not to block. The value is the expiry timestamp in
/// unix seconds; entries past it count as absent and are removed
/// opportunistically during lookup. A grant covers the name and all its
/// subdomains.
#[derive(Default, Debug)]
pub struct OverrideSet {
    entries: HashMap<String, i64>,
}

impl OverrideSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn put(&mut self, name: &str, expires_at: i64) {
        self.entries.insert(name.to_owned(), expires_at);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.entries.get(name).copied()
    }

    pub fn delete(&mut self, names: &[&str]) {
        for name in names {
            self.entries.remove(*name);
        }
    }

    pub fn purge(&mut self) {
        self.entries.clear();
    }

    /// Whether any suffix of `name` carries a live grant. Expired entries
    /// found under the exact name are deleted in place.
    pub fn check(&mut self, name: &str, now: i64) -> bool {
        let mut live = false;
        let mut drop_exact = false;
        for suffix in suffixes(name) {
            if let Some(&expires_at) = self.entries.get(suffix) {
                if expires_at > now {
                    live = true;
                    break;
                }
                if suffix == name {
                    drop_exact = true;
                }
            }
        }
        if drop_exact {
            self.entries.remove(name);
        }
        live
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dump(&self, w: &mut impl fmt::Write) -> fmt::Result {
        for (name, expires_at) in &self.entries {
            writeln!(w, "{name}  expires={expires_at}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_covers_subdomains() {
        let mut set = OverrideSet::new();
        set.put("example.com", 1_000);
        assert!(set.check("example.com", 990));
        assert!(set.check("a.b.example.com", 990));
        assert!(!set.check("example.net", 990));
    }

    #[test]
    fn expired_grant_is_absent() {
        let mut set = OverrideSet::new();
        set.put("example.com", 1_000);
        assert!(!set.check("example.com", 1_000));
        assert!(!set.check("sub.example.com", 1_001));
    }

    #[test]
    fn expired_exact_entry_is_deleted_in_place() {
        let mut set = OverrideSet::new();
        set.put("example.com", 500);
        assert!(!set.check("example.com", 1_000));
        assert_eq!(set.get("example.com"), None);
    }

    #[test]
    fn expired_suffix_entry_is_kept() {
        let mut set = OverrideSet::new();
        set.put("example.com", 500);
        assert!(!set.check("sub.example.com", 1_000));
        assert_eq!(set.get("example.com"), Some(500));
    }

    #[test]
    fn live_entry_wins_over_expired_suffix() {
        let mut set = OverrideSet::new();
        set.put("com", 500);
        set.put("example.com", 2_000);
        assert!(set.check("a.example.com", 1_000));
    }

    #[test]
    fn delete_and_purge() {
        let mut set = OverrideSet::new();
        set.put("a.example", 1_000);
        set.put("b.example", 1_000);
        set.delete(&["a.example"]);
        assert_eq!(set.len(), 1);
        set.purge();
        assert!(set.is_empty());
    }
}
