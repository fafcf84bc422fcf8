//! Website plans used by validators

use crate::models::{Proxy, ProxyProtocol};

/// Target website with one URL per supported proxy protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsitePlan {
    pub name: String,
    pub http_url: Option<String>,
    pub https_url: Option<String>,
}

impl WebsitePlan {
    pub fn new(name: &str, http_url: Option<&str>, https_url: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            http_url: http_url.map(str::to_string),
            https_url: https_url.map(str::to_string),
        }
    }

    /// URL probed for proxies of the given protocol, if this plan covers it
    pub fn url_for(&self, protocol: ProxyProtocol) -> Option<&str> {
        match protocol {
            ProxyProtocol::Http => self.http_url.as_deref(),
            ProxyProtocol::Https => self.https_url.as_deref(),
            ProxyProtocol::Socks4 | ProxyProtocol::Socks5 => None,
        }
    }
}

/// How a received response is judged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCheck {
    /// The target echoes the caller IP; it must be the proxy's IP
    Identity,
    /// The body must contain the keyword
    Keyword(String),
}

impl ResponseCheck {
    pub fn verifies_ip(&self) -> bool {
        matches!(self, ResponseCheck::Identity)
    }

    /// `true` when the response shows the proxy did not relay faithfully
    pub fn is_proxy_exception(&self, proxy: &Proxy, body: &str) -> bool {
        match self {
            ResponseCheck::Identity => !body.contains(&proxy.ip),
            ResponseCheck::Keyword(keyword) => !body.contains(keyword.as_str()),
        }
    }
}

/// A website plus the check applied to its responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorPlan {
    pub website: WebsitePlan,
    pub check: ResponseCheck,
}

impl ValidatorPlan {
    pub fn ip138() -> Self {
        Self::identity(WebsitePlan::new(
            "ip138.com",
            Some("http://202020.ip138.com/"),
            Some("https://202020.ip138.com/"),
        ))
    }

    pub fn ipinfo() -> Self {
        Self::identity(WebsitePlan::new(
            "ipinfo.io",
            Some("http://ipinfo.io/ip"),
            Some("https://ipinfo.io/ip"),
        ))
    }

    pub fn ip_cn() -> Self {
        Self::identity(WebsitePlan::new("ip.cn", None, Some("https://ip.cn/")))
    }

    pub fn akamai() -> Self {
        Self::identity(WebsitePlan::new(
            "whatismyip.akamai.com",
            Some("http://whatismyip.akamai.com/"),
            Some("https://whatismyip.akamai.com/"),
        ))
    }

    pub fn baidu_sug() -> Self {
        Self::keyword(
            WebsitePlan::new("www.baidu.com", None, Some("https://www.baidu.com/su")),
            "window.baidu.sug",
        )
    }

    pub fn zhihu_signin() -> Self {
        Self::keyword(
            WebsitePlan::new("www.zhihu.com", None, Some("https://www.zhihu.com/signin")),
            "有问题，上知乎",
        )
    }

    pub fn identity(website: WebsitePlan) -> Self {
        Self {
            website,
            check: ResponseCheck::Identity,
        }
    }

    pub fn keyword(website: WebsitePlan, keyword: &str) -> Self {
        Self {
            website,
            check: ResponseCheck::Keyword(keyword.to_string()),
        }
    }

    /// Look up a built-in plan by name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "ip138" => Some(Self::ip138()),
            "ipinfo" | "ipinfo_io" => Some(Self::ipinfo()),
            "ip_cn" | "ipcn" => Some(Self::ip_cn()),
            "akamai" | "whatismyip_akamai_com" => Some(Self::akamai()),
            "baidu_sug" => Some(Self::baidu_sug()),
            "zhihu_signin" => Some(Self::zhihu_signin()),
            _ => None,
        }
    }

    /// Replace the keyword of a keyword plan; identity plans are unchanged
    pub fn with_keyword(mut self, keyword: &str) -> Self {
        if let ResponseCheck::Keyword(_) = self.check {
            self.check = ResponseCheck::Keyword(keyword.to_string());
        }
        self
    }
}
