use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, name = "trackwall")]
#[command(about = "DNS proxy that spoofs responses to block ads and trackers")]
pub struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "PATH", default_value = "/etc/trackwall/config.toml")]
    pub config: PathBuf,

    /// Print more information to the screen
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the DNS, HTTP(S), and control servers
    Server,
    /// Compact all hostlist sources into the compiled list
    Compile,
    /// Inspect a running server: summary, config, cache, hosts, regexps, override
    Status { sub: String },
    /// Decision-cache maintenance on a running server: flush
    Cache { sub: String },
    /// Override maintenance on a running server: flush
    Override { sub: String },
    /// Reserved for host mutations on a running server
    Host {
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Reserved for regexp mutations on a running server
    Regex {
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}
