//! The control socket: a line-oriented TCP protocol for inspecting and
//! mutating a running server. One command per connection, either shell-like
//! (`status summary`) or HTTP-like (`GET /status/summary HTTP/1.1`), so both
//! netcat and a browser work.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt as _, AsyncReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::State;

const NEED_SUB: &str = "error: need a subcommand";

const INDEX_PAGE: &str = r#"<html><head><title>trackwall</title></head><body><ul>
<li><a href="/status/summary">status summary</a></li>
<li><a href="/status/config">status config</a></li>
<li><a href="/status/hosts">status hosts</a></li>
<li><a href="/status/regexps">status regexps</a></li>
<li><a href="/status/override">status override</a></li>
<li><a href="/status/cache">status cache</a></li>
<li><a href="/cache/flush">cache flush</a></li>
<li><a href="/override/flush">override flush</a></li>
</ul></body></html>"#;

pub async fn serve(listener: TcpListener, state: Arc<State>) -> anyhow::Result<()> {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("error while accepting a control connection: {e}");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::debug!("control connection failed: {e:#}");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<State>) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();

    let mut line = String::new();
    BufReader::new(read_half)
        .read_line(&mut line)
        .await
        .context("error while reading a command")?;

    let (input, is_http) = parse_command(&line);
    let reply = dispatch(&input, is_http, &state).await;

    write_half
        .write_all(reply.as_bytes())
        .await
        .context("error while writing the reply")?;
    write_half.write_all(b"\n").await.context("error while writing the reply")?;
    Ok(())
}

/// Split one input line into command words. HTTP-style input is recognized
/// by its `GET /` prefix; everything after the path is ignored.
fn parse_command(line: &str) -> (Vec<String>, bool) {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(rest) = line.strip_prefix("GET /") {
        let path = rest.split(' ').next().unwrap_or("");
        (path.split('/').map(str::to_owned).collect(), true)
    } else {
        (line.trim().split(' ').map(str::to_owned).collect(), false)
    }
}

async fn dispatch(input: &[String], is_http: bool, state: &State) -> String {
    let verb = input.first().map(String::as_str).unwrap_or("");
    let sub = input.get(1).map(String::as_str);

    match verb {
        "" if is_http => format!("HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n{INDEX_PAGE}"),
        "status" => match sub {
            Some(sub) => handle_status(sub, state).await,
            None => NEED_SUB.to_owned(),
        },
        "cache" => match sub {
            Some("flush") => {
                state.cache.write().await.purge_all();
                "okay".to_owned()
            }
            Some(sub) => format!("error: unknown subcommand: {sub:?}"),
            None => NEED_SUB.to_owned(),
        },
        "override" => match sub {
            Some("flush") => {
                state.overrides.write().await.purge();
                "okay".to_owned()
            }
            Some(sub) => format!("error: unknown subcommand: {sub:?}"),
            None => NEED_SUB.to_owned(),
        },
        "host" | "regex" => "error: not implemented".to_owned(),
        _ => format!("error: unknown command: {verb:?}"),
    }
}

async fn handle_status(sub: &str, state: &State) -> String {
    // Writes to a String cannot fail, so the fmt results are dropped.
    let mut out = String::new();
    match sub {
        "summary" => {
            let hosts = state.hosts.read().await.len();
            let regexps = state.regexps.read().await.len();
            let cache = state.cache.read().await.len();
            let resident = resident_memory_kb().unwrap_or(0);
            let _ = writeln!(out, "hosts:             {hosts}");
            let _ = writeln!(out, "regexps:           {regexps}");
            let _ = writeln!(out, "cache items:       {cache}");
            let _ = write!(out, "memory resident:   {resident}Kb");
        }
        "config" => {
            let _ = write!(out, "{:#?}", state.config);
        }
        "cache" => {
            let _ = state.cache.read().await.dump(&mut out);
        }
        "hosts" => {
            let hosts = state.hosts.read().await;
            let _ = writeln!(out, "# Blocking {} hosts", hosts.len());
            let _ = hosts.dump(&mut out);
        }
        "regexps" => {
            let _ = state.regexps.read().await.dump(&mut out);
        }
        "override" => {
            let _ = state.overrides.read().await.dump(&mut out);
        }
        _ => return format!("error: unknown subcommand: {sub:?}"),
    }
    out
}

/// Resident set size in kilobytes, from `/proc/self/statm`.
fn resident_memory_kb() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4)
}

/// Send one command to a running server and return its reply; used by the
/// command-line passthrough subcommands.
pub async fn send_command(addr: SocketAddr, line: &str) -> anyhow::Result<String> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot reach the control socket at {addr}; is the server running?"))?;

    stream.write_all(line.as_bytes()).await.context("error while sending the command")?;
    stream.write_all(b"\n").await.context("error while sending the command")?;

    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .await
        .context("error while reading the reply")?;
    Ok(reply.trim_end().to_owned())
}
