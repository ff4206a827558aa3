use anyhow::Context as _;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOGGING_ENV: &str = "TRACKWALL_LOG";

/// Install the global tracing subscriber. `TRACKWALL_LOG` wins over the
/// `--verbose` flag when set.
pub fn setup(verbose: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_env_var(LOGGING_ENV)
        .try_from_env()
        .unwrap_or_else(|_| {
            let default = if verbose { "trackwall=debug" } else { "trackwall=info" };
            EnvFilter::new(default)
        });

    tracing_subscriber::registry()
        .with(layer().with_target(false).with_filter(filter))
        .try_init()
        .context("failed to initialize tracing_subscriber")
}
