use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument};

use super::{stamp, LoaderConfig, ProxyLoader};
use crate::error::Result;
use crate::models::{Proxy, ProxyProtocol};

const POOL_URL: &str = "http://www.66ip.cn/mo.php";

/// Count requested from the source when the loader is unlimited
const UNLIMITED_COUNT: usize = 1000;

/// `ip:port` followed by a line break tag
static ENTRY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})<br\s*/?>")
        .expect("Invalid 66ip entry regex")
});

/// Scraper for the plain listing served by 66ip.cn
///
/// The listing does not say which protocol an address speaks, so each
/// address is emitted once as `http` and once as `https`.
pub struct SixSixIpLoader {
    config: LoaderConfig,
    url: String,
}

impl SixSixIpLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            url: POOL_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    fn request_url(&self) -> String {
        let count = self.config.limit.unwrap_or(UNLIMITED_COUNT);
        format!("{}?tqsl={}", self.url, count)
    }
}

#[async_trait]
impl ProxyLoader for SixSixIpLoader {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Vec<Proxy>> {
        info!("Loading proxy list");
        let body = self
            .config
            .fetch_text(self.name(), &self.request_url())
            .await?;

        // The limit bounds addresses requested, not the doubled entries.
        let proxies = stamp(parse_listing(&body), &self.config.local, Utc::now());
        info!(count = proxies.len(), "Proxy list loaded");
        Ok(proxies)
    }

    fn name(&self) -> &'static str {
        "66ip"
    }
}

fn parse_listing(body: &str) -> Vec<(String, u16, ProxyProtocol)> {
    ENTRY_REGEX
        .captures_iter(body)
        .filter_map(|cap| {
            let ip = cap.get(1)?.as_str();
            if ip.split('.').any(|octet| octet.parse::<u8>().is_err()) {
                return None;
            }
            let port: u16 = cap.get(2)?.as_str().parse().ok()?;
            if port == 0 {
                return None;
            }
            Some((ip.to_string(), port))
        })
        .flat_map(|(ip, port)| {
            [ProxyProtocol::Http, ProxyProtocol::Https]
                .into_iter()
                .map(move |protocol| (ip.clone(), port, protocol))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_listing_into_both_protocols() {
        let body = "<html><body>\r\n\t\t1.2.3.4:8080<br />\r\n\t\t5.6.7.8:3128<br />\r\n\
                    300.1.1.1:80<br />\r\n9.9.9.9:0<br />\r\n8.8.8.8:53 no tag\r\n</body></html>";

        let parsed = parse_listing(body);
        assert_eq!(
            parsed,
            vec![
                ("1.2.3.4".to_string(), 8080, ProxyProtocol::Http),
                ("1.2.3.4".to_string(), 8080, ProxyProtocol::Https),
                ("5.6.7.8".to_string(), 3128, ProxyProtocol::Http),
                ("5.6.7.8".to_string(), 3128, ProxyProtocol::Https),
            ]
        );
    }

    #[test]
    fn test_request_url_uses_limit() {
        let limited = SixSixIpLoader::new(LoaderConfig::default().with_limit(Some(20)));
        assert_eq!(limited.request_url(), "http://www.66ip.cn/mo.php?tqsl=20");

        let unlimited = SixSixIpLoader::new(LoaderConfig::default().with_limit(None));
        assert_eq!(unlimited.request_url(), "http://www.66ip.cn/mo.php?tqsl=1000");
    }
}
