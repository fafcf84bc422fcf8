use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

use super::{stamp, LoaderConfig, ProxyLoader};
use crate::error::Result;
use crate::models::{Proxy, ProxyProtocol};

const POOL_URL: &str = "http://proxylist.fatezero.org/proxy.list";

/// One line of the proxy list; the port may be a number or a string
#[derive(Debug, Deserialize)]
struct Entry {
    host: String,
    port: Value,
    #[serde(rename = "type")]
    protocol: String,
}

/// Loader for the JSON-lines list published by fatezero.org
pub struct FatezeroLoader {
    config: LoaderConfig,
    url: String,
}

impl FatezeroLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            url: POOL_URL.to_string(),
        }
    }

    /// Point the loader at a mirror of the list
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[async_trait]
impl ProxyLoader for FatezeroLoader {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Vec<Proxy>> {
        info!("Loading proxy list");
        let body = self.config.fetch_text(self.name(), &self.url).await?;

        let proxies = stamp(parse_list(&body), &self.config.local, Utc::now());
        let proxies = self.config.apply_limit(proxies);
        info!(count = proxies.len(), "Proxy list loaded");
        Ok(proxies)
    }

    fn name(&self) -> &'static str {
        "fatezero"
    }
}

/// Parse newline-separated JSON entries, skipping malformed lines
fn parse_list(body: &str) -> Vec<(String, u16, ProxyProtocol)> {
    body.lines()
        .filter_map(|line| {
            let entry: Entry = serde_json::from_str(line.trim()).ok()?;
            let port = match &entry.port {
                Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
                Value::String(s) => s.trim().parse().ok()?,
                _ => return None,
            };
            let protocol = ProxyProtocol::from_str(&entry.protocol)?;
            Some((entry.host.trim().to_string(), port, protocol))
        })
        .filter(|(host, port, _)| !host.is_empty() && *port != 0)
        .collect()
}
