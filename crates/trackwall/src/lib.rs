pub mod app;
pub use app::App;
mod cli;
pub use cli::{Args, Command};
mod config;
pub use config::Config;
pub mod control;
mod connection;
pub use connection::Connection;
pub mod logging;
mod resolver;
pub use resolver::Resolver;
mod server;
pub use server::DnsServer;
pub mod http;
pub mod sources;
pub mod tls;

use tokio::sync::RwLock;
use trackwall_policy::{DecisionCache, HostSet, OverrideSet, RecordKind, RegexSet, SurrogateSet};

/// Receive buffer size for DNS datagrams, large enough for EDNS payloads.
pub const MAX_UDP_PACKET_SIZE: usize = 4096;
/// How many worker tasks poll the DNS sockets.
pub const DNS_WORKERS: u8 = 5;

/// All shared runtime state: the configuration plus the mutable policy
/// structures, each behind its own reader/writer lock. One `Arc<State>` is
/// handed to every component at construction time; tests build isolated
/// instances the same way.
///
/// There is no cross-structure atomicity. A decision that reads the host set
/// and then the regexp set may observe a mutation in between, which is fine:
/// the decision can only flip between forward and spoof/empty, and the cache
/// write that follows is last-writer-wins with a short TTL.
pub struct State {
    pub config: Config,
    pub hosts: RwLock<HostSet>,
    pub regexps: RwLock<RegexSet>,
    pub surrogates: RwLock<SurrogateSet>,
    pub overrides: RwLock<OverrideSet>,
    pub cache: RwLock<DecisionCache>,
}

impl State {
    pub fn new(config: Config) -> Self {
        State {
            config,
            hosts: RwLock::new(HostSet::new()),
            regexps: RwLock::new(RegexSet::new()),
            surrogates: RwLock::new(SurrogateSet::new()),
            overrides: RwLock::new(OverrideSet::new()),
            cache: RwLock::new(DecisionCache::new()),
        }
    }

    /// Register a surrogate rule and copy its script onto every matching
    /// host. The rule itself is kept as well, so hosts added later still
    /// match by pattern on the HTTP path.
    pub async fn add_surrogate(&self, pattern: &str, script: &str) -> anyhow::Result<()> {
        let rule = self.surrogates.write().await.add(pattern, script)?;
        let found = self.hosts.write().await.attach_surrogate(&rule);
        if found > 50 {
            tracing::warn!(
                pattern,
                found,
                "surrogate matches a suspicious number of hosts; is the pattern correct?"
            );
        }
        Ok(())
    }

    /// Grant a blocking override for `host` until `expires_at`, then drop
    /// the two decision-cache entries for its exact name. The override write
    /// must come first: a reader racing the invalidation will re-read the
    /// now-visible override.
    pub async fn grant_override(&self, host: &str, expires_at: i64) {
        self.overrides.write().await.put(host, expires_at);
        self.cache
            .write()
            .await
            .delete(&[(RecordKind::A, host), (RecordKind::Aaaa, host)]);
    }
}
