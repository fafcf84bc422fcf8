use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Identified;

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks5" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks4 | ProxyProtocol::Socks5)
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Candidate proxy produced by a loader
///
/// Identity is `proxy_url`, derived from protocol, ip and port. Values are
/// never changed after a loader builds them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Proxy {
    pub proxy_url: String,
    pub ip: String,
    #[sqlx(try_from = "i32")]
    pub port: u16,
    pub protocol: ProxyProtocol,
    /// Locality tag of the host that collected the proxy
    pub local: String,
    pub collect_time: DateTime<Utc>,
}

impl Proxy {
    /// Build a proxy collected now
    pub fn new(ip: &str, port: u16, protocol: ProxyProtocol, local: &str) -> Self {
        Self::collected_at(ip, port, protocol, local, Utc::now())
    }

    pub fn collected_at(
        ip: &str,
        port: u16,
        protocol: ProxyProtocol,
        local: &str,
        collect_time: DateTime<Utc>,
    ) -> Self {
        Self {
            proxy_url: Self::build_url(ip, port, protocol),
            ip: ip.to_string(),
            port,
            protocol,
            local: local.to_string(),
            collect_time,
        }
    }

    /// `{protocol}://{ip}:{port}`
    pub fn build_url(ip: &str, port: u16, protocol: ProxyProtocol) -> String {
        format!("{}://{}:{}", protocol, ip, port)
    }
}

impl std::fmt::Display for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.proxy_url)
    }
}

impl Identified for Proxy {
    fn identity(&self) -> String {
        self.proxy_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_protocol_parsing_and_helpers() {
        assert_eq!(ProxyProtocol::from_str("HTTP"), Some(ProxyProtocol::Http));
        assert_eq!(ProxyProtocol::from_str(" https "), Some(ProxyProtocol::Https));
        assert_eq!(ProxyProtocol::from_str("SOCKS5"), Some(ProxyProtocol::Socks5));
        assert_eq!(ProxyProtocol::from_str("socks4a"), None);

        assert!(ProxyProtocol::Socks4.is_socks());
        assert!(!ProxyProtocol::Https.is_socks());
        assert_eq!(ProxyProtocol::Socks4.to_string(), "socks4");
    }

    #[test]
    fn test_proxy_url_is_derived() {
        let proxy = Proxy::new("1.2.3.4", 8080, ProxyProtocol::Https, "home");
        assert_eq!(proxy.proxy_url, "https://1.2.3.4:8080");
        assert_eq!(proxy.identity(), "https://1.2.3.4:8080");
        assert_eq!(proxy.to_string(), "https://1.2.3.4:8080");
        assert_eq!(proxy.local, "home");
    }

    #[test]
    fn test_same_address_different_protocol_is_distinct() {
        let http = Proxy::new("1.2.3.4", 80, ProxyProtocol::Http, "home");
        let https = Proxy::new("1.2.3.4", 80, ProxyProtocol::Https, "home");
        assert_ne!(http.identity(), https.identity());
    }
}
