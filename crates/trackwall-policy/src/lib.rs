//! The blocking policy core: every data structure the trackwall daemon
//! consults to decide what to do with a DNS name, plus the offline host-list
//! compiler and the duration grammar used by the config file and the unblock
//! endpoint.
//!
//! Nothing in this crate does I/O or knows about sockets. Everything that
//! reasons about expiry takes the current unix time as an explicit argument,
//! which keeps the structures trivially testable and leaves the "one
//! timestamp per request" discipline to the caller.

mod cache;
pub use cache::{DecisionCache, DecisionEntry};
mod compile;
pub use compile::compile;
mod duration;
pub use duration::parse_duration;
mod hosts;
pub use hosts::HostSet;
mod overrides;
pub use overrides::OverrideSet;
mod regexps;
pub use regexps::RegexSet;
mod surrogates;
pub use surrogates::{SurrogateRule, SurrogateSet};

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// What to do with a DNS question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Relay the query to the upstream resolver.
    Forward,
    /// Answer with an A record pointing at our own HTTP frontend.
    Spoof,
    /// Answer with an empty answer section. Used for blocked AAAA questions:
    /// the spoof target is an IPv4 loopback and there is no IPv6 equivalent,
    /// so "no answer" is the least harmful reply.
    Empty,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Forward => "forward",
            Action::Spoof => "spoof",
            Action::Empty => "empty",
        })
    }
}

/// The two record types the decision pipeline caches. Everything else is
/// forwarded before the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    A,
    Aaaa,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordKind::A => "A",
            RecordKind::Aaaa => "AAAA",
        })
    }
}

/// Iterate the suffix sequence of a name from shortest to longest: for
/// `a.b.example.com` this yields `com`, `example.com`, `b.example.com`,
/// `a.b.example.com`.
pub fn suffixes(name: &str) -> impl Iterator<Item = &str> {
    name.rmatch_indices('.')
        .map(move |(idx, _)| &name[idx + 1..])
        .chain(std::iter::once(name))
}

/// Seconds since the unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
