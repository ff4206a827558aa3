use anyhow::Context as _;
use regex::Regex;

/// A replacement script served in place of a blocked tracker's JavaScript,
/// for every host matching `pattern`.
#[derive(Debug, Clone)]
pub struct SurrogateRule {
    pub pattern: Regex,
    pub script: String,
}

/// All registered surrogate rules. Scripts are eagerly copied onto matching
/// hosts at registration time; the compiled rules are also retained so that
/// hosts added later still match by pattern on the HTTP path.
#[derive(Default, Debug)]
pub struct SurrogateSet {
    rules: Vec<SurrogateRule>,
}

impl SurrogateSet {
    pub fn new() -> Self {
        Default::default()
    }

    /// Compile and register a rule. Every literal `@@` in the script is
    /// replaced with `function(){}`, an API-preserving no-op. Returns the
    /// compiled rule so the caller can attach it to the current host set.
    pub fn add(&mut self, pattern: &str, script: &str) -> anyhow::Result<SurrogateRule> {
        let rule = SurrogateRule {
            pattern: Regex::new(pattern).with_context(|| format!("invalid surrogate pattern {pattern:?}"))?,
            script: script.replace("@@", "function(){}"),
        };
        self.rules.push(rule.clone());
        Ok(rule)
    }

    /// Linear scan of the compiled patterns.
    pub fn find(&self, host: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(host))
            .map(|rule| rule.script.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_substitutes_noop() {
        let mut set = SurrogateSet::new();
        let rule = set.add(r"ads\.example", "var x=@@;var y=@@;").unwrap();
        assert_eq!(rule.script, "var x=function(){};var y=function(){};");
    }

    #[test]
    fn find_matches_later_hosts() {
        let mut set = SurrogateSet::new();
        set.add(r"addthis\.com$", "window.addthis=@@;").unwrap();
        assert_eq!(set.find("s7.addthis.com"), Some("window.addthis=function(){};"));
        assert_eq!(set.find("example.com"), None);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let mut set = SurrogateSet::new();
        assert!(set.add(r"[", "x").is_err());
        assert!(set.is_empty());
    }
}
