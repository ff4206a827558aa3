use std::collections::HashMap;
use std::fmt;

use crate::suffixes;
use crate::surrogates::SurrogateRule;

/// Static hosts added with hostlist/host directives. The key is the
/// canonical hostname, the optional value is a surrogate script to serve in
/// place of the blocked resource.
///
/// Canonical means lowercased, with a single leading `www.` stripped; the
/// empty name is rejected silently. After [`crate::compile`] has run, no key
/// is a domain suffix of another — before that the invariant does not hold.
#[derive(Default, Debug)]
pub struct HostSet {
    hosts: HashMap<String, Option<String>>,
}

fn canonicalize(name: &str) -> Option<String> {
    let name = name.to_lowercase();
    let name = name.strip_prefix("www.").unwrap_or(&name);
    if name.is_empty() {
        return None;
    }
    Some(name.to_owned())
}

impl HostSet {
    pub fn new() -> Self {
        Default::default()
    }

    /// Insert a host, keeping any surrogate already attached to it.
    pub fn add(&mut self, name: &str) {
        let Some(name) = canonicalize(name) else {
            return;
        };
        self.hosts.entry(name).or_insert(None);
    }

    pub fn remove(&mut self, name: &str) {
        let Some(name) = canonicalize(name) else {
            return;
        };
        self.hosts.remove(&name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hosts.contains_key(name)
    }

    /// The surrogate script attached to an exact host, if any.
    pub fn surrogate(&self, name: &str) -> Option<&str> {
        self.hosts.get(name).and_then(|script| script.as_deref())
    }

    /// Whether any suffix of `name` is in the set. This is a pure membership
    /// test; the first matching suffix in the short-to-long walk wins, which
    /// is sufficient because the compiled set contains no two entries in a
    /// suffix relationship.
    pub fn matches_suffix(&self, name: &str) -> bool {
        suffixes(name).any(|suffix| self.hosts.contains_key(suffix))
    }

    /// Attach a surrogate script to every host matching the rule's pattern.
    /// Returns how many hosts matched.
    pub fn attach_surrogate(&mut self, rule: &SurrogateRule) -> usize {
        let mut found = 0;
        for (host, script) in self.hosts.iter_mut() {
            if rule.pattern.is_match(host) {
                *script = Some(rule.script.clone());
                found += 1;
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn dump(&self, w: &mut impl fmt::Write) -> fmt::Result {
        for (host, script) in &self.hosts {
            match script {
                Some(script) => writeln!(w, "{host}  # {script}")?,
                None => writeln!(w, "{host}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for HostSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.dump(&mut out)?;
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn add_canonicalizes() {
        let mut hosts = HostSet::new();
        hosts.add("www.Ads.Example");
        assert!(hosts.contains("ads.example"));
        assert!(!hosts.contains("www.ads.example"));
    }

    #[test]
    fn add_rejects_empty() {
        let mut hosts = HostSet::new();
        hosts.add("");
        hosts.add("www.");
        assert_eq!(hosts.len(), 0);
    }

    #[test]
    fn add_is_idempotent_and_keeps_surrogate() {
        let mut hosts = HostSet::new();
        hosts.add("ads.example");
        let rule = SurrogateRule {
            pattern: Regex::new(r"ads\.example").unwrap(),
            script: "var x=1;".into(),
        };
        assert_eq!(hosts.attach_surrogate(&rule), 1);
        hosts.add("ads.example");
        assert_eq!(hosts.surrogate("ads.example"), Some("var x=1;"));
    }

    #[test]
    fn remove_uses_canonical_name() {
        let mut hosts = HostSet::new();
        hosts.add("tracker.net");
        hosts.remove("www.TRACKER.net");
        assert_eq!(hosts.len(), 0);
    }

    #[test]
    fn suffix_match() {
        let mut hosts = HostSet::new();
        hosts.add("tracker.net");
        assert!(hosts.matches_suffix("cdn.eu.tracker.net"));
        assert!(hosts.matches_suffix("tracker.net"));
        assert!(!hosts.matches_suffix("nottracker.net"));
        assert!(!hosts.matches_suffix("tracker.net.evil.com"));
    }

    #[test]
    fn dump_marks_surrogates() {
        let mut hosts = HostSet::new();
        hosts.add("ads.example");
        let rule = SurrogateRule {
            pattern: Regex::new(r"^ads\.").unwrap(),
            script: "var x;".into(),
        };
        hosts.attach_surrogate(&rule);
        assert_eq!(hosts.to_string(), "ads.example  # var x;\n");
    }
}
