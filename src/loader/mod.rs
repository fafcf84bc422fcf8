//! Proxy loaders
//!
//! A loader produces the candidate proxies of a run. Entries that cannot be
//! parsed are skipped; a failure to reach the source fails the whole load.

mod fatezero;
mod file;
mod sixsix;

pub use fatezero::FatezeroLoader;
pub use file::FileLoader;
pub use sixsix::SixSixIpLoader;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::debug;

use crate::error::{Result, SieveError};
use crate::models::{Proxy, ProxyProtocol};

/// Default timeout for fetching a proxy source
pub const DEFAULT_LOADER_TIMEOUT: Duration = Duration::from_secs(60);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Source of candidate proxies
#[async_trait]
pub trait ProxyLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<Proxy>>;

    /// Short name used in logs and errors
    fn name(&self) -> &'static str;
}

/// Settings shared by all loaders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Max proxies returned; `None` is unlimited
    pub limit: Option<usize>,
    pub timeout: Duration,
    /// Upstream proxy used to reach the source
    pub system_proxy: Option<String>,
    /// Locality tag stamped on every loaded proxy
    pub local: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            limit: Some(50),
            timeout: DEFAULT_LOADER_TIMEOUT,
            system_proxy: None,
            local: "home".to_string(),
        }
    }
}

impl LoaderConfig {
    pub fn new(local: &str) -> Self {
        Self {
            local: local.to_string(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_system_proxy(mut self, system_proxy: Option<String>) -> Self {
        self.system_proxy = system_proxy;
        self
    }

    /// Truncate to the configured limit
    fn apply_limit(&self, mut proxies: Vec<Proxy>) -> Vec<Proxy> {
        if let Some(limit) = self.limit {
            proxies.truncate(limit);
        }
        proxies
    }

    fn client(&self, loader: &'static str) -> Result<Client> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        if let Some(system_proxy) = &self.system_proxy {
            let proxy = reqwest::Proxy::all(system_proxy).map_err(|e| SieveError::LoaderFailed {
                loader,
                reason: format!("invalid system proxy {}: {}", system_proxy, e),
            })?;
            builder = builder.proxy(proxy);
        }

        Ok(builder.build()?)
    }

    /// GET the source body as text
    async fn fetch_text(&self, loader: &'static str, url: &str) -> Result<String> {
        debug!(loader, url, "Fetching proxy source");

        let failed = |e: reqwest::Error| SieveError::LoaderFailed {
            loader,
            reason: e.to_string(),
        };

        let response = self
            .client(loader)?
            .get(url)
            .send()
            .await
            .map_err(failed)?
            .error_for_status()
            .map_err(failed)?;

        response.text().await.map_err(failed)
    }
}

/// Stamp parsed entries with locality and collection time
fn stamp<I>(entries: I, local: &str, collect_time: DateTime<Utc>) -> Vec<Proxy>
where
    I: IntoIterator<Item = (String, u16, ProxyProtocol)>,
{
    entries
        .into_iter()
        .map(|(ip, port, protocol)| Proxy::collected_at(&ip, port, protocol, local, collect_time))
        .collect()
}
