use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use trackwall_policy::unix_now;

use crate::tls::LeafFactory;
use crate::{control, http, sources, tls, Config, DnsServer, Resolver, State, DNS_WORKERS};

/// Expired decision-cache entries are swept on this cadence, a bounded
/// number at a time.
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(300);
const CACHE_PURGE_SCAN: usize = 1_000;

pub struct App;

impl App {
    /// Bind everything, spawn the serving tasks, load the policy, park on a
    /// shutdown signal. Any error before "ready to serve" is fatal.
    pub async fn run_server(config: Config) -> anyhow::Result<()> {
        tls::ensure_root_material(&config).context("cannot set up the root TLS material")?;

        let state = Arc::new(State::new(config));
        let resolver = Arc::new(Resolver::new(state.clone()));

        // Bind every socket up front so a taken port fails fast.
        let mut dns = DnsServer::bind(state.config.dns_listen, resolver).await?;
        let control_listener = TcpListener::bind(state.config.control_listen)
            .await
            .with_context(|| format!("error while binding the control socket on {}", state.config.control_listen))?;
        let http_listener = TcpListener::bind(state.config.http_listen)
            .await
            .with_context(|| format!("error while binding the HTTP listener on {}", state.config.http_listen))?;
        let https_listener = TcpListener::bind(state.config.https_listen)
            .await
            .with_context(|| format!("error while binding the HTTPS listener on {}", state.config.https_listen))?;

        let factory = Arc::new(LeafFactory::new(&state.config));
        let tls_config = Arc::new(factory.server_config());
        let router = http::router(state.clone());

        let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();
        dns.add_workers(DNS_WORKERS);
        tasks.spawn(dns.block_until_completion());
        tasks.spawn(control::serve(control_listener, state.clone()));
        tasks.spawn(http::serve_http(http_listener, router.clone()));
        tasks.spawn(http::serve_https(https_listener, router, tls_config));
        tasks.spawn(purge_cache_periodically(state.clone()));

        // The policy is loaded after the DNS server is up, the way the
        // compiled list expects it.
        sources::populate(&state).await.context("cannot load the blocking policy")?;

        tracing::info!("initialisation finished; ready to serve");

        tokio::select! {
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received; stopping");
                Ok(())
            }
            Some(result) = tasks.join_next() => {
                result.context("a server task failed to execute")?
            }
        }
    }

    /// Rebuild the compiled list from the full sources.
    pub async fn run_compile(config: Config) -> anyhow::Result<()> {
        let state = State::new(config);

        // Make sure the stale compiled list is not read back in.
        let _ = tokio::fs::remove_file(state.config.compiled_path()).await;
        sources::populate(&state).await.context("cannot load the blocking policy")?;

        let hosts = state.hosts.read().await;
        let compiled = trackwall_policy::compile(&hosts);
        tracing::info!("compiled {} hosts to {} entries", hosts.len(), compiled.len());
        drop(hosts);

        sources::write_compiled(&state.config, &compiled).await
    }
}

async fn purge_cache_periodically(state: Arc<State>) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        state.cache.write().await.purge_expired(CACHE_PURGE_SCAN, unix_now());
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
        }
    }
}
