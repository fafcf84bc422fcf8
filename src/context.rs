//! Shared run context
//!
//! One value per job run, cloned into every pipeline component at
//! construction. It carries the job identity, the run start time and the
//! tracing span used as the logging sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info_span, Span};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunContext {
    job_name: Arc<str>,
    job_time: DateTime<Utc>,
    run_id: Uuid,
    span: Span,
}

impl RunContext {
    /// Start a new run for the named job, stamped with the current time
    pub fn new(job_name: &str) -> Self {
        Self::with_time(job_name, Utc::now())
    }

    pub fn with_time(job_name: &str, job_time: DateTime<Utc>) -> Self {
        let run_id = Uuid::new_v4();
        let span = info_span!("job", job = %job_name, run_id = %run_id);

        Self {
            job_name: Arc::from(job_name),
            job_time,
            run_id,
            span,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn job_time(&self) -> DateTime<Utc> {
        self.job_time
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Span that pipeline futures are instrumented with
    pub fn span(&self) -> &Span {
        &self.span
    }
}
