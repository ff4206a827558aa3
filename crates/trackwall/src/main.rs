use anyhow::Context as _;
use clap::Parser;
use trackwall::{control, logging, App, Args, Command, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::setup(args.verbose)?;

    let config = Config::load(&args.config).with_context(|| format!("cannot load {}", args.config.display()))?;

    match args.command {
        Command::Server => App::run_server(config).await,
        Command::Compile => App::run_compile(config).await,
        Command::Status { sub } => relay(&config, format!("status {sub}")).await,
        Command::Cache { sub } => relay(&config, format!("cache {sub}")).await,
        Command::Override { sub } => relay(&config, format!("override {sub}")).await,
        Command::Host { args } => relay(&config, join_words("host", &args)).await,
        Command::Regex { args } => relay(&config, join_words("regex", &args)).await,
    }
}

/// Hand a command to the control socket of a running server and print the
/// reply.
async fn relay(config: &Config, line: String) -> anyhow::Result<()> {
    let reply = control::send_command(config.control_listen, &line).await?;
    println!("{reply}");
    Ok(())
}

fn join_words(verb: &str, args: &[String]) -> String {
    let mut line = verb.to_owned();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
