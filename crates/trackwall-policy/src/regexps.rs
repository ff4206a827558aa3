use std::fmt;

use anyhow::Context as _;
use regex::Regex;

/// Compiled name-blocking patterns, in insertion order. Matches are
/// evaluated linearly and the first match wins.
#[derive(Default, Debug)]
pub struct RegexSet {
    rules: Vec<Regex>,
}

impl RegexSet {
    pub fn new() -> Self {
        Default::default()
    }

    /// Compile and append a pattern. A syntactically invalid pattern is an
    /// error; loaders treat this as fatal since a partially applied policy
    /// is unsafe.
    pub fn add(&mut self, pattern: &str) -> anyhow::Result<()> {
        let compiled = Regex::new(pattern).with_context(|| format!("invalid regexp {pattern:?}"))?;
        self.rules.push(compiled);
        Ok(())
    }

    /// Remove the first rule whose source string equals `pattern`.
    pub fn remove(&mut self, pattern: &str) {
        if let Some(idx) = self.rules.iter().position(|r| r.as_str() == pattern) {
            self.rules.remove(idx);
        }
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.is_match(name))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn dump(&self, w: &mut impl fmt::Write) -> fmt::Result {
        for rule in &self.rules {
            writeln!(w, "{}", rule.as_str())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_match() {
        let mut set = RegexSet::new();
        set.add(r"^ads\.").unwrap();
        assert!(set.is_match("ads.example"));
        assert!(!set.is_match("example.com"));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let mut set = RegexSet::new();
        assert!(set.add(r"(unclosed").is_err());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn remove_by_source_removes_first_only() {
        let mut set = RegexSet::new();
        set.add(r"a+").unwrap();
        set.add(r"b+").unwrap();
        set.add(r"a+").unwrap();
        set.remove(r"a+");
        assert_eq!(set.len(), 2);
        assert!(set.is_match("aaa"));
    }
}
