//! Loading the blocking policy from its configured sources, and the
//! compiled-list fast path. All sources are local files; fetching remote
//! lists is somebody else's job.

use std::time::SystemTime;

use anyhow::Context as _;

use crate::config::{Config, ListFormat, ListSource};
use crate::State;

/// Names some upstream hosts files carry that must never be blocked.
const DISCARDED_NAMES: [&str; 4] = ["localhost", "localhost.localdomain", "broadcasthost", "local"];

/// Extract the host from one line in `/etc/hosts` format: the IP field is
/// dropped, `#` starts a comment.
fn parse_hosts_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.split('#').next().unwrap_or("").trim();

    let mut fields = line.split_whitespace();
    let _ip = fields.next()?;
    let host = fields.next()?;
    if DISCARDED_NAMES.contains(&host) {
        return None;
    }
    Some(host)
}

fn parse_plain_line(line: &str) -> Option<&str> {
    let line = line.trim();
    (!line.is_empty()).then_some(line)
}

/// Read every entry from one list source.
pub async fn read_source(source: &ListSource) -> anyhow::Result<Vec<String>> {
    let content = tokio::fs::read_to_string(&source.path)
        .await
        .with_context(|| format!("unable to read the list at {}", source.path.display()))?;

    let entries = content
        .lines()
        .filter_map(|line| match source.format {
            ListFormat::Hosts => parse_hosts_line(line),
            ListFormat::Plain => parse_plain_line(line),
        })
        .map(str::to_owned)
        .collect();
    Ok(entries)
}

/// Populate the policy state from all configured sources. When a fresh
/// compiled list exists it replaces the hostlist sources; regexps and
/// surrogates are always processed from their own sources.
pub async fn populate(state: &State) -> anyhow::Result<()> {
    let config = &state.config;

    if let Some(names) = compiled_list_if_fresh(config).await? {
        tracing::info!("using the compiled list");
        let mut hosts = state.hosts.write().await;
        for name in &names {
            hosts.add(name);
        }
    } else {
        for source in &config.hostlists {
            let entries = read_source(source).await?;
            let mut hosts = state.hosts.write().await;
            for name in &entries {
                hosts.add(name);
            }
        }
        for source in &config.unhostlists {
            let entries = read_source(source).await?;
            let mut hosts = state.hosts.write().await;
            for name in &entries {
                hosts.remove(name);
            }
        }
        for name in &config.hosts {
            state.hosts.write().await.add(name);
        }
        for name in &config.unhosts {
            state.hosts.write().await.remove(name);
        }
    }

    for source in &config.regexplists {
        let entries = read_source(source).await?;
        let mut regexps = state.regexps.write().await;
        for pattern in &entries {
            regexps.add(pattern)?;
        }
    }
    for source in &config.unregexplists {
        let entries = read_source(source).await?;
        let mut regexps = state.regexps.write().await;
        for pattern in &entries {
            regexps.remove(pattern);
        }
    }
    for pattern in &config.regexps {
        state.regexps.write().await.add(pattern)?;
    }
    for pattern in &config.unregexps {
        state.regexps.write().await.remove(pattern);
    }

    for surrogate in &config.surrogates {
        state.add_surrogate(&surrogate.pattern, &surrogate.script).await?;
    }

    Ok(())
}

/// The compiled list, if it exists and its mtime is within the configured
/// blocklist TTL. An expired file is ignored with a warning; the full
/// sources are processed instead.
pub async fn compiled_list_if_fresh(config: &Config) -> anyhow::Result<Option<Vec<String>>> {
    let path = config.compiled_path();
    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(_) => return Ok(None),
    };

    let modified = metadata
        .modified()
        .with_context(|| format!("cannot read the mtime of {}", path.display()))?;
    let age = SystemTime::now().duration_since(modified).unwrap_or_default();
    if age.as_secs() as i64 > config.cache_hosts {
        tracing::warn!("the compiled list has expired, not using it");
        return Ok(None);
    }

    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("unable to read the compiled list at {}", path.display()))?;
    let names = content.lines().filter(|l| !l.is_empty()).map(str::to_owned).collect();
    Ok(Some(names))
}

/// Persist the compiled list, one canonical name per line.
pub async fn write_compiled(config: &Config, names: &[String]) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("cannot create the cache dir at {}", config.cache_dir.display()))?;

    let mut out = names.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    let path = config.compiled_path();
    tokio::fs::write(&path, out)
        .await
        .with_context(|| format!("unable to write the compiled list to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use std::io::Write as _;
    use std::sync::Arc;

    #[test]
    fn hosts_format_drops_the_ip_field_and_comments() {
        assert_eq!(parse_hosts_line("0.0.0.0 ads.example"), Some("ads.example"));
        assert_eq!(parse_hosts_line("0.0.0.0 ads.example # annoying"), Some("ads.example"));
        assert_eq!(parse_hosts_line("  127.0.0.1\ttracker.net  "), Some("tracker.net"));
        assert_eq!(parse_hosts_line("# a comment"), None);
        assert_eq!(parse_hosts_line(""), None);
        assert_eq!(parse_hosts_line("0.0.0.0"), None);
    }

    #[test]
    fn hosts_format_discards_the_usual_suspects() {
        for name in DISCARDED_NAMES {
            assert_eq!(parse_hosts_line(&format!("127.0.0.1 {name}")), None);
        }
    }

    #[test]
    fn plain_format_takes_trimmed_lines() {
        assert_eq!(parse_plain_line("  ads.example  "), Some("ads.example"));
        assert_eq!(parse_plain_line("   "), None);
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.cache_dir = dir.to_path_buf();
        config.hostlists.clear();
        config
    }

    #[tokio::test]
    async fn populate_loads_inline_sources() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.hosts = vec!["www.Ads.Example".into(), "tracker.net".into()];
        config.unhosts = vec!["tracker.net".into()];
        let state = Arc::new(State::new(config));

        populate(&state).await.unwrap();

        let hosts = state.hosts.read().await;
        assert!(hosts.contains("ads.example"));
        assert!(!hosts.contains("tracker.net"));
        assert!(state.regexps.read().await.is_match("adserver7.example"));
        assert_eq!(state.surrogates.read().await.len(), 1);
    }

    #[tokio::test]
    async fn populate_reads_hostlist_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut list = tempfile::NamedTempFile::new().unwrap();
        writeln!(list, "# StevenBlack style").unwrap();
        writeln!(list, "0.0.0.0 ads.example").unwrap();
        writeln!(list, "0.0.0.0 localhost").unwrap();
        writeln!(list, "0.0.0.0 www.tracker.net").unwrap();

        let mut config = test_config(dir.path());
        config.hosts.clear();
        config.hostlists = vec![ListSource {
            format: ListFormat::Hosts,
            path: list.path().to_path_buf(),
        }];
        let state = Arc::new(State::new(config));

        populate(&state).await.unwrap();

        let hosts = state.hosts.read().await;
        assert!(hosts.contains("ads.example"));
        assert!(hosts.contains("tracker.net"));
        assert!(!hosts.contains("localhost"));
        assert_eq!(hosts.len(), 2);
    }

    #[tokio::test]
    async fn invalid_regexp_in_a_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.regexps = vec!["(broken".into()];
        let state = Arc::new(State::new(config));
        assert!(populate(&state).await.is_err());
    }

    #[tokio::test]
    async fn fresh_compiled_list_replaces_hostlists() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.hosts.clear();
        write_compiled(&config, &["compiled.example".to_owned()]).await.unwrap();

        // A hostlist pointing nowhere proves it was not read.
        config.hostlists = vec![ListSource {
            format: ListFormat::Hosts,
            path: dir.path().join("does-not-exist"),
        }];
        let state = Arc::new(State::new(config));

        populate(&state).await.unwrap();
        assert!(state.hosts.read().await.contains("compiled.example"));
    }

    #[tokio::test]
    async fn expired_compiled_list_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.cache_hosts = 0;
        write_compiled(&config, &["compiled.example".to_owned()]).await.unwrap();

        // mtime is "now"; an age over 0 seconds needs a beat to pass.
        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
        assert!(compiled_list_if_fresh(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compiled_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let names = vec!["a.example".to_owned(), "b.example".to_owned()];
        write_compiled(&config, &names).await.unwrap();

        let raw = tokio::fs::read_to_string(config.compiled_path()).await.unwrap();
        assert_eq!(raw, "a.example\nb.example\n");

        let loaded = compiled_list_if_fresh(&config).await.unwrap().unwrap();
        assert_eq!(loaded, names);
    }
}
