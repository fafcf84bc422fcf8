use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Identified;

/// Recorded result of one verification probe against one proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TestOutcome {
    pub proxy_url: String,
    pub website_name: String,
    pub website_url: String,
    /// Seconds until the response head arrived
    pub response_elapsed: f64,
    /// Seconds until the body was fully read
    pub transfer_elapsed: f64,
    pub transfer_size: i64,
    pub timeout_exception: bool,
    /// Response arrived but failed the identity/content check
    pub proxy_exception: bool,
    pub test_time: DateTime<Utc>,
    pub job_time: DateTime<Utc>,
    pub verification_ip: bool,
    #[serde(skip_serializing)]
    pub response_head: Option<String>,
    #[serde(skip_serializing)]
    pub response_body: Option<String>,
    pub exception: Option<String>,
}

impl TestOutcome {
    /// Blank outcome for a probe that is about to run
    pub fn pending(
        proxy_url: &str,
        website_name: &str,
        website_url: &str,
        job_time: DateTime<Utc>,
        verification_ip: bool,
    ) -> Self {
        Self {
            proxy_url: proxy_url.to_string(),
            website_name: website_name.to_string(),
            website_url: website_url.to_string(),
            response_elapsed: 0.0,
            transfer_elapsed: 0.0,
            transfer_size: 0,
            timeout_exception: false,
            proxy_exception: false,
            test_time: Utc::now(),
            job_time,
            verification_ip,
            response_head: None,
            response_body: None,
            exception: None,
        }
    }

    /// A response with a body was received
    pub fn is_valid_response(&self) -> bool {
        self.transfer_size > 0
    }
}

impl Identified for TestOutcome {
    fn identity(&self) -> String {
        format!(
            "{}@{}#{}",
            self.proxy_url,
            self.website_name,
            self.test_time.to_rfc3339()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_outcome_defaults() {
        let job_time = Utc::now();
        let outcome = TestOutcome::pending(
            "http://1.2.3.4:80",
            "ip138.com",
            "http://202020.ip138.com/",
            job_time,
            true,
        );

        assert_eq!(outcome.transfer_size, 0);
        assert!(!outcome.is_valid_response());
        assert!(!outcome.timeout_exception);
        assert!(!outcome.proxy_exception);
        assert!(outcome.verification_ip);
        assert_eq!(outcome.job_time, job_time);
        assert!(outcome.exception.is_none());
        assert!(outcome.identity().starts_with("http://1.2.3.4:80@ip138.com#"));
    }
}
