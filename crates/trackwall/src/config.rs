use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Deserializer};
use trackwall_policy::parse_duration;

/// Runtime configuration, deserialized from a TOML file. Durations use the
/// same grammar as the unblock endpoint (`30m`, `2d`, …).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Address the DNS server listens on, UDP and TCP.
    pub dns_listen: SocketAddr,
    /// Upstream resolver blocked queries are NOT sent to and everything else
    /// is. Must be an already-resolved socket address.
    pub dns_forward: SocketAddr,
    /// Control socket address.
    pub control_listen: SocketAddr,
    /// Address of the HTTP frontend; its IP is also the spoof target.
    pub http_listen: SocketAddr,
    /// Address of the HTTPS frontend.
    pub https_listen: SocketAddr,

    /// Root certificate clients are told to trust; generated when missing.
    pub root_cert: PathBuf,
    /// Root private key; generated when missing.
    pub root_key: PathBuf,
    /// Directory for the compiled list and the leaf-certificate cache.
    pub cache_dir: PathBuf,

    /// How long blocking decisions are cached.
    #[serde(default = "default_cache_dns", deserialize_with = "duration_secs")]
    pub cache_dns: i64,
    /// How long the compiled host list stays valid.
    #[serde(default = "default_cache_hosts", deserialize_with = "duration_secs")]
    pub cache_hosts: i64,

    #[serde(default)]
    pub hostlists: Vec<ListSource>,
    #[serde(default)]
    pub unhostlists: Vec<ListSource>,
    #[serde(default)]
    pub regexplists: Vec<ListSource>,
    #[serde(default)]
    pub unregexplists: Vec<ListSource>,

    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub unhosts: Vec<String>,
    #[serde(default)]
    pub regexps: Vec<String>,
    #[serde(default)]
    pub unregexps: Vec<String>,

    #[serde(default)]
    pub surrogates: Vec<Surrogate>,
}

/// A list of hosts or regexps to load, in one of the known formats.
#[derive(Debug, Clone, Deserialize)]
pub struct ListSource {
    pub format: ListFormat,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFormat {
    /// `/etc/hosts` style: IP field first, `#` comments.
    Hosts,
    /// One entry per line.
    Plain,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Surrogate {
    pub pattern: String,
    pub script: String,
}

fn default_cache_dns() -> i64 {
    3_600
}

fn default_cache_hosts() -> i64 {
    86_400
}

fn duration_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config at {}", path.display()))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("malformed config at {}", path.display()))?;
        // The spoof target is an A record, so the HTTP frontend has to sit
        // on an IPv4 address.
        config.spoof_ip()?;
        Ok(config)
    }

    /// The address spoofed A answers point at.
    pub fn spoof_ip(&self) -> anyhow::Result<Ipv4Addr> {
        match self.http_listen {
            SocketAddr::V4(addr) => Ok(*addr.ip()),
            SocketAddr::V6(_) => anyhow::bail!("http-listen must be an IPv4 address, it is the spoof target"),
        }
    }

    pub fn compiled_path(&self) -> PathBuf {
        self.cache_dir.join("compiled")
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.cache_dir.join("certs")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
dns-listen = "127.0.0.53:53"
dns-forward = "9.9.9.9:53"
control-listen = "127.0.0.1:9922"
http-listen = "127.0.0.53:80"
https-listen = "127.0.0.53:443"
root-cert = "/var/trackwall/rootCA.pem"
root-key = "/var/trackwall/rootCA.key"
cache-dir = "/var/trackwall/cache"
cache-dns = "1h"
cache-hosts = "2d"
hosts = ["ads.example"]
regexps = ['^adserver\d+\.']

[[hostlists]]
format = "hosts"
path = "/var/trackwall/hosts.txt"

[[surrogates]]
pattern = 'addthis\.com$'
script = "window.addthis=@@;"
"#;

    #[test]
    fn parses_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.cache_dns, 3_600);
        assert_eq!(config.cache_hosts, 172_800);
        assert_eq!(config.spoof_ip().unwrap(), "127.0.0.53".parse::<Ipv4Addr>().unwrap());
        assert_eq!(config.hostlists.len(), 1);
        assert_eq!(config.hostlists[0].format, ListFormat::Hosts);
        assert_eq!(config.surrogates[0].pattern, r"addthis\.com$");
        assert_eq!(config.compiled_path(), PathBuf::from("/var/trackwall/cache/compiled"));
    }

    #[test]
    fn ttls_have_defaults() {
        let trimmed: String = SAMPLE
            .lines()
            .filter(|l| !l.starts_with("cache-dns") && !l.starts_with("cache-hosts"))
            .collect::<Vec<_>>()
            .join("\n");
        let config: Config = toml::from_str(&trimmed).unwrap();
        assert_eq!(config.cache_dns, 3_600);
        assert_eq!(config.cache_hosts, 86_400);
    }

    #[test]
    fn rejects_ipv6_http_listen() {
        let patched = SAMPLE.replace("http-listen = \"127.0.0.53:80\"", "http-listen = \"[::1]:80\"");
        let config: Config = toml::from_str(&patched).unwrap();
        assert!(config.spoof_ip().is_err());
    }

    #[test]
    fn rejects_bad_duration() {
        let patched = SAMPLE.replace("cache-dns = \"1h\"", "cache-dns = \"soon\"");
        assert!(toml::from_str::<Config>(&patched).is_err());
    }
}
