use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use super::{stamp, LoaderConfig, ProxyLoader};
use crate::error::{Result, SieveError};
use crate::models::{Proxy, ProxyProtocol};

/// Loader reading `ip:port` lines from a local file
///
/// Blank lines and `#` comments are ignored. A line may carry its own
/// `scheme://` prefix; otherwise the loader's protocol is used.
pub struct FileLoader {
    config: LoaderConfig,
    path: PathBuf,
    protocol: ProxyProtocol,
}

impl FileLoader {
    pub fn new(config: LoaderConfig, path: impl Into<PathBuf>, protocol: ProxyProtocol) -> Self {
        Self {
            config,
            path: path.into(),
            protocol,
        }
    }
}

#[async_trait]
impl ProxyLoader for FileLoader {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Vec<Proxy>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SieveError::LoaderFailed {
                loader: self.name(),
                reason: format!("{}: {}", self.path.display(), e),
            })?;

        let entries = parse_lines(&content, self.protocol);
        let proxies = stamp(entries, &self.config.local, Utc::now());
        let proxies = self.config.apply_limit(proxies);
        info!(count = proxies.len(), "Proxy file loaded");
        Ok(proxies)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

fn parse_lines(content: &str, default_protocol: ProxyProtocol) -> Vec<(String, u16, ProxyProtocol)> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, raw)| {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                return None;
            }

            let entry = parse_line(line, default_protocol);
            if entry.is_none() {
                warn!(line = index + 1, content = line, "Skipping unparsable proxy line");
            }
            entry
        })
        .collect()
}

fn parse_line(line: &str, default_protocol: ProxyProtocol) -> Option<(String, u16, ProxyProtocol)> {
    let (protocol, address) = match line.split_once("://") {
        Some((scheme, rest)) => (ProxyProtocol::from_str(scheme)?, rest),
        None => (default_protocol, line),
    };

    let (host, port) = address.trim_end_matches('/').rsplit_once(':')?;
    let host = host.trim();
    let port: u16 = port.trim().parse().ok()?;
    if host.is_empty() || port == 0 {
        return None;
    }

    Some((host.to_string(), port, protocol))
}
