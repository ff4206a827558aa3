use crate::{suffixes, HostSet};

fn is_domain_suffix(host: &str, suffix: &str) -> bool {
    host.len() > suffix.len() && host.ends_with(suffix) && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
}

/// Reduce the host set to a minimum suffix-antichain: drop every name that a
/// shorter entry already covers, and drop entries a newly added shorter name
/// makes redundant. The result contains no two names where one is a domain
/// suffix of the other, which is what lets the decision pipeline stop at the
/// first matching suffix.
///
/// Output is sorted so the compiled file is byte-identical across runs.
pub fn compile(hosts: &HostSet) -> Vec<String> {
    let mut compiled: Vec<String> = Vec::new();

    'outer: for name in hosts.names() {
        // Is some proper suffix of `name` already in the compiled set?
        // This catches adding "s8.addthis.com" while "addthis.com" is in.
        for suffix in suffixes(name) {
            if suffix != name && compiled.iter().any(|c| c == suffix) {
                continue 'outer;
            }
        }

        // Does `name` cover entries already in the compiled set? This
        // catches adding "addthis.com" while "s7.addthis.com" is in, in
        // which case the longer entry goes.
        compiled.retain(|existing| !is_domain_suffix(existing, name));

        compiled.push(name.to_owned());
    }

    compiled.sort();
    compiled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_set(names: &[&str]) -> HostSet {
        let mut hosts = HostSet::new();
        for name in names {
            hosts.add(name);
        }
        hosts
    }

    #[test]
    fn collapses_subdomains() {
        let compiled = compile(&host_set(&["addthis.com", "s7.addthis.com", "s8.addthis.com"]));
        assert_eq!(compiled, ["addthis.com"]);
    }

    #[test]
    fn result_is_order_independent() {
        let a = compile(&host_set(&["addthis.com", "s7.addthis.com", "s8.addthis.com"]));
        let b = compile(&host_set(&["s8.addthis.com", "s7.addthis.com", "addthis.com"]));
        let c = compile(&host_set(&["s7.addthis.com", "addthis.com", "s8.addthis.com"]));
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn keeps_unrelated_names() {
        let compiled = compile(&host_set(&["ads.example", "tracker.net"]));
        assert_eq!(compiled, ["ads.example", "tracker.net"]);
    }

    #[test]
    fn string_suffix_is_not_a_domain_suffix() {
        // "sfoo.com" ends with "foo.com" as a string but is a different
        // domain, so both survive.
        let compiled = compile(&host_set(&["foo.com", "sfoo.com"]));
        assert_eq!(compiled, ["foo.com", "sfoo.com"]);
    }

    #[test]
    fn no_suffix_pairs_survive() {
        let compiled = compile(&host_set(&[
            "a.b.tracker.net",
            "b.tracker.net",
            "tracker.net",
            "cdn.ads.example",
            "ads.example",
            "metrics.example",
        ]));
        for a in &compiled {
            for b in &compiled {
                if a != b {
                    assert!(
                        !a.ends_with(&format!(".{b}")),
                        "{a} is a suffix of {b} in {compiled:?}"
                    );
                }
            }
        }
        assert_eq!(compiled, ["ads.example", "metrics.example", "tracker.net"]);
    }
}
