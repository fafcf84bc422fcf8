//! Proxy validators
//!
//! A validator performs one HTTP probe through one proxy and records the
//! result as a [`TestOutcome`]. Network failures never escape `verify`: they
//! are captured into the outcome's flags and error text. The only error a
//! validator returns is a configuration error, when the website plan has no
//! URL for the proxy's protocol.

mod plan;

pub use plan::{ResponseCheck, ValidatorPlan, WebsitePlan};

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Proxy as ReqwestProxy, Response};
use tracing::{debug, instrument};

use crate::context::RunContext;
use crate::error::{Result, SieveError};
use crate::models::{Proxy, ProxyProtocol, TestOutcome};

/// Default timeout for each probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/78.0.3904.108 Safari/537.36";

/// Performs one probe through one proxy
#[async_trait]
pub trait Validator: Send + Sync {
    /// Probe the proxy once
    ///
    /// Returns an error only for configuration problems; every network
    /// level failure is reported inside the outcome.
    async fn verify(&self, proxy: &Proxy) -> Result<TestOutcome>;

    /// Name of the probed website
    fn website_name(&self) -> &str;
}

/// Validator probing a website plan over HTTP
pub struct HttpValidator {
    plan: ValidatorPlan,
    timeout: Duration,
    job_time: DateTime<Utc>,
}

impl HttpValidator {
    pub fn new(plan: ValidatorPlan, ctx: &RunContext) -> Self {
        Self {
            plan,
            timeout: DEFAULT_PROBE_TIMEOUT,
            job_time: ctx.job_time(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn plan(&self) -> &ValidatorPlan {
        &self.plan
    }

    /// Build a client whose every request is routed through the proxy
    fn create_client(&self, proxy: &Proxy) -> std::result::Result<Client, reqwest::Error> {
        let reqwest_proxy = ReqwestProxy::all(proxy_endpoint(proxy))?;

        Client::builder()
            .proxy(reqwest_proxy)
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
    }

    async fn probe(&self, client: &Client, proxy: &Proxy, outcome: &mut TestOutcome) {
        let start = Instant::now();

        let response = match client.get(&outcome.website_url).send().await {
            Ok(response) => response,
            Err(e) => return record_failure(outcome, &e),
        };
        let response_elapsed = start.elapsed();
        let head = format_head(&response);

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return record_failure(outcome, &e),
        };
        let transfer_elapsed = start.elapsed();

        let text = String::from_utf8_lossy(&body).into_owned();
        outcome.response_elapsed = round_secs(response_elapsed);
        outcome.transfer_elapsed = round_secs(transfer_elapsed);
        outcome.transfer_size = body.len() as i64;
        outcome.proxy_exception = self.plan.check.is_proxy_exception(proxy, &text);
        outcome.response_head = Some(head);
        outcome.response_body = Some(text);
    }
}

#[async_trait]
impl Validator for HttpValidator {
    #[instrument(skip(self, proxy), fields(proxy_url = %proxy.proxy_url))]
    async fn verify(&self, proxy: &Proxy) -> Result<TestOutcome> {
        let website = &self.plan.website;
        let url = website
            .url_for(proxy.protocol)
            .ok_or_else(|| SieveError::UnsupportedProtocol {
                protocol: proxy.protocol.to_string(),
                website: website.name.clone(),
            })?;

        debug!("Verifying proxy");

        let mut outcome = TestOutcome::pending(
            &proxy.proxy_url,
            &website.name,
            url,
            self.job_time,
            self.plan.check.verifies_ip(),
        );

        match self.create_client(proxy) {
            Ok(client) => self.probe(&client, proxy, &mut outcome).await,
            Err(e) => outcome.exception = Some(error_chain(&e)),
        }

        debug!(
            response_elapsed = outcome.response_elapsed,
            transfer_size = outcome.transfer_size,
            timeout = outcome.timeout_exception,
            proxy_exception = outcome.proxy_exception,
            "Probe finished"
        );

        Ok(outcome)
    }

    fn website_name(&self) -> &str {
        &self.plan.website.name
    }
}

/// Address the HTTP client dials for the given proxy
fn proxy_endpoint(proxy: &Proxy) -> String {
    let scheme = match proxy.protocol {
        // HTTPS proxies are plain HTTP proxies that accept CONNECT.
        ProxyProtocol::Http | ProxyProtocol::Https => "http",
        ProxyProtocol::Socks4 => "socks4",
        ProxyProtocol::Socks5 => "socks5",
    };
    format!("{}://{}:{}", scheme, proxy.ip, proxy.port)
}

fn record_failure(outcome: &mut TestOutcome, err: &reqwest::Error) {
    if err.is_timeout() {
        outcome.timeout_exception = true;
    } else {
        outcome.exception = Some(error_chain(err));
    }
}

/// Error message including its source chain
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn format_head(response: &Response) -> String {
    let mut head = format!("{:?} {}", response.version(), response.status());
    for (name, value) in response.headers() {
        head.push('\n');
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(&String::from_utf8_lossy(value.as_bytes()));
    }
    head
}

fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Plain HTTP proxy answering one request with `body`; yields the request head
    async fn serve_once(body: &'static str) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });

        (port, handle)
    }

    fn local_plan() -> WebsitePlan {
        WebsitePlan::new("local", Some("http://sieve.test/ip"), None)
    }

    fn ctx() -> RunContext {
        RunContext::new("validator-test")
    }

    #[test]
    fn test_proxy_endpoint() {
        let http = Proxy::new("1.2.3.4", 80, ProxyProtocol::Https, "home");
        assert_eq!(proxy_endpoint(&http), "http://1.2.3.4:80");

        let socks = Proxy::new("1.2.3.4", 1080, ProxyProtocol::Socks5, "home");
        assert_eq!(proxy_endpoint(&socks), "socks5://1.2.3.4:1080");
    }

    #[test]
    fn test_round_secs() {
        assert_eq!(round_secs(Duration::from_micros(1_234_567)), 1.2346);
        assert_eq!(round_secs(Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn test_unsupported_protocol_is_a_config_error() {
        let validator = HttpValidator::new(ValidatorPlan::ip_cn(), &ctx());
        let proxy = Proxy::new("1.2.3.4", 80, ProxyProtocol::Http, "home");

        let err = validator.verify(&proxy).await.unwrap_err();
        assert!(matches!(err, SieveError::UnsupportedProtocol { .. }));
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_captured_in_outcome() {
        let ctx = ctx();
        let plan = ValidatorPlan::identity(WebsitePlan::new(
            "local",
            Some("http://example.invalid/ip"),
            None,
        ));
        let validator =
            HttpValidator::new(plan, &ctx).with_timeout(Duration::from_secs(2));
        // Port 1 on loopback refuses connections.
        let proxy = Proxy::new("127.0.0.1", 1, ProxyProtocol::Http, "home");

        let outcome = tokio_test::assert_ok!(validator.verify(&proxy).await);

        assert_eq!(outcome.proxy_url, "http://127.0.0.1:1");
        assert_eq!(outcome.website_name, "local");
        assert_eq!(outcome.website_url, "http://example.invalid/ip");
        assert_eq!(outcome.job_time, ctx.job_time());
        assert!(outcome.verification_ip);
        assert_eq!(outcome.transfer_size, 0);
        assert!(outcome.exception.is_some() || outcome.timeout_exception);
        assert!(outcome.response_body.is_none());
        assert_eq!(validator.website_name(), "local");
    }

    #[tokio::test]
    async fn test_identity_response_is_recorded() {
        let (port, server) = serve_once("127.0.0.1\n").await;
        let validator = HttpValidator::new(ValidatorPlan::identity(local_plan()), &ctx());
        let proxy = Proxy::new("127.0.0.1", port, ProxyProtocol::Http, "home");

        let outcome = validator.verify(&proxy).await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("GET http://sieve.test/ip HTTP/1.1"));
        assert!(!outcome.timeout_exception);
        assert!(!outcome.proxy_exception);
        assert!(outcome.exception.is_none());
        assert_eq!(outcome.transfer_size, 10);
        assert_eq!(outcome.response_body.as_deref(), Some("127.0.0.1\n"));

        let head = outcome.response_head.unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(head.contains("content-length: 10"));

        assert!(outcome.response_elapsed >= 0.0);
        assert!(outcome.transfer_elapsed >= outcome.response_elapsed);
        assert!(outcome.transfer_elapsed < DEFAULT_PROBE_TIMEOUT.as_secs_f64());
    }

    #[tokio::test]
    async fn test_foreign_ip_is_a_proxy_exception() {
        let (port, server) = serve_once("203.0.113.7\n").await;
        let validator = HttpValidator::new(ValidatorPlan::identity(local_plan()), &ctx());
        let proxy = Proxy::new("127.0.0.1", port, ProxyProtocol::Http, "home");

        let outcome = validator.verify(&proxy).await.unwrap();
        server.await.unwrap();

        assert!(outcome.is_valid_response());
        assert!(outcome.proxy_exception);
        assert!(outcome.verification_ip);
    }

    #[tokio::test]
    async fn test_missing_keyword_is_a_proxy_exception() {
        let (port, server) = serve_once("<html>captcha</html>").await;
        let validator =
            HttpValidator::new(ValidatorPlan::keyword(local_plan(), "window.sug"), &ctx());
        let proxy = Proxy::new("127.0.0.1", port, ProxyProtocol::Http, "home");

        let outcome = validator.verify(&proxy).await.unwrap();
        server.await.unwrap();

        assert!(outcome.proxy_exception);
        assert!(!outcome.verification_ip);
        assert_eq!(outcome.transfer_size, 20);
    }
}
