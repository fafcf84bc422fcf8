use thiserror::Error;

/// Unified error type for the sieve pipeline
#[derive(Error, Debug)]
pub enum SieveError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Proxy errors
    #[error("Unsupported proxy protocol {protocol} for website {website}")]
    UnsupportedProtocol { protocol: String, website: String },

    // Loader errors
    #[error("Loader {loader} failed: {reason}")]
    LoaderFailed { loader: &'static str, reason: String },

    // Persistence errors
    #[error("Batch write failed: {0}")]
    BatchWrite(String),

    #[error("Handler is closed")]
    HandlerClosed,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid filter condition: {0}")]
    InvalidCondition(String),

    // HTTP client errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Job errors
    #[error("Job {job} failed: {source}")]
    Job {
        job: String,
        #[source]
        source: Box<SieveError>,
    },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for sieve operations
pub type Result<T> = std::result::Result<T, SieveError>;

impl SieveError {
    /// Attach the job name to an error that ended a job
    pub fn in_job(self, job: impl Into<String>) -> Self {
        match self {
            err @ SieveError::Job { .. } => err,
            other => SieveError::Job {
                job: job.into(),
                source: Box::new(other),
            },
        }
    }

    /// Configuration or programmer errors: fail fast, never retried
    pub fn is_config_error(&self) -> bool {
        match self {
            SieveError::InvalidConfig(_)
            | SieveError::InvalidCondition(_)
            | SieveError::UnsupportedProtocol { .. } => true,
            SieveError::Job { source, .. } => source.is_config_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SieveError::InvalidConfig("bad".to_string()).is_config_error());
        assert!(SieveError::UnsupportedProtocol {
            protocol: "socks5".to_string(),
            website: "ip138.com".to_string(),
        }
        .is_config_error());
        assert!(!SieveError::BatchWrite("dup".to_string()).is_config_error());
        assert!(!SieveError::LoaderFailed {
            loader: "fatezero",
            reason: "timeout".to_string(),
        }
        .is_config_error());
    }

    #[test]
    fn test_in_job_wraps_once() {
        let err = SieveError::InvalidConfig("bad".to_string())
            .in_job("001")
            .in_job("002");

        match &err {
            SieveError::Job { job, source } => {
                assert_eq!(job, "001");
                assert!(matches!(**source, SieveError::InvalidConfig(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_config_error());
        assert_eq!(
            err.to_string(),
            "Job 001 failed: Invalid configuration: bad"
        );
    }
}
