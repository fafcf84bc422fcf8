//! Job runner
//!
//! Wires a loader, a validator, the verification pool and the buffered
//! stores into one run, and reports what happened.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::{Config, FilterConfig, LoaderSource};
use crate::context::RunContext;
use crate::database::Database;
use crate::error::Result;
use crate::filter::{OutcomeFilter, ProxyFilter};
use crate::loader::{FatezeroLoader, FileLoader, ProxyLoader, SixSixIpLoader};
use crate::models::{Proxy, TestOutcome};
use crate::pipeline::{
    BufferSettings, BufferedBatchHandler, FlushStats, Handler, ResultRouter, RouterStats,
    VerificationPool, VerifyReport, VerifySettings,
};
use crate::repository::BatchStore;
use crate::validator::{HttpValidator, Validator};

/// Summary of one job run
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: String,
    pub run_id: Uuid,
    /// Proxies returned by the loader
    pub loaded: usize,
    pub verify: VerifyReport,
    pub routed: RouterStats,
    pub proxies: FlushStats,
    pub outcomes: FlushStats,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn failed_records(&self) -> usize {
        self.proxies.failed_records() + self.outcomes.failed_records()
    }
}

/// Settings of the in-process part of a run
#[derive(Clone)]
pub struct PipelineSettings {
    pub verify: VerifySettings,
    pub buffer: BufferSettings,
    pub filter: Option<OutcomeFilter>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            verify: config.verify,
            buffer: config.buffer_settings(),
            filter: build_filter(&config.filter)?,
        })
    }
}

/// Run a job end to end against the configured database
///
/// Any error is wrapped with the job name.
pub async fn run(config: &Config) -> Result<JobReport> {
    let ctx = RunContext::new(&config.job.name);
    execute(config, &ctx)
        .instrument(ctx.span().clone())
        .await
        .map_err(|e| e.in_job(config.job.name.as_str()))
}

async fn execute(config: &Config, ctx: &RunContext) -> Result<JobReport> {
    info!(job_time = %ctx.job_time(), "Starting job");

    let settings = PipelineSettings::from_config(config)?;

    let db = Database::new(&config.database).await?;
    let latency = db.health_check().await?;
    info!(latency_ms = latency.as_millis() as u64, "Connected to database");
    db.run_migrations().await?;

    let loader = build_loader(config);
    let validator = HttpValidator::new(config.validator.plan.clone(), ctx)
        .with_timeout(config.validator.timeout);

    let proxy_store: Arc<dyn BatchStore<Proxy>> = Arc::new(db.proxy_store());
    let outcome_store: Arc<dyn BatchStore<TestOutcome>> = Arc::new(db.outcome_store());

    let report = run_pipeline(
        ctx,
        loader.as_ref(),
        &validator,
        proxy_store,
        outcome_store,
        settings,
    )
    .await;

    if report.is_ok() {
        let proxies = db.proxies();
        if let Ok(stored) = proxies.count().await {
            info!(stored, "Proxies in store");
        }
        if !config.filter.is_empty() {
            match proxies
                .find_qualified(&config.filter.proxy, &config.filter.outcome)
                .await
            {
                Ok(qualified) => {
                    info!(qualified = qualified.len(), "Stored proxies passing the filter")
                }
                Err(e) => warn!(error = %e, "Failed to query qualified proxies"),
            }
        }
    }

    let stats = db.pool_stats();
    info!(size = stats.size, idle = stats.idle, "Database pool at job end");
    db.close().await;

    report
}

/// Load, verify, filter and persist with the given collaborators
pub async fn run_pipeline(
    ctx: &RunContext,
    loader: &dyn ProxyLoader,
    validator: &dyn Validator,
    proxy_store: Arc<dyn BatchStore<Proxy>>,
    outcome_store: Arc<dyn BatchStore<TestOutcome>>,
    settings: PipelineSettings,
) -> Result<JobReport> {
    let started = Instant::now();

    let proxies = loader.load().await?;
    let loaded = proxies.len();
    info!(loader = loader.name(), loaded, "Proxies loaded");

    let proxy_handler = Arc::new(BufferedBatchHandler::new(
        ctx,
        "proxy",
        proxy_store,
        settings.buffer.clone(),
    )?);
    let outcome_handler = Arc::new(BufferedBatchHandler::new(
        ctx,
        "test_log",
        outcome_store,
        settings.buffer,
    )?);

    let mut router = ResultRouter::new()
        .with_proxy_handler(proxy_handler.clone() as Arc<dyn Handler<Proxy>>)
        .with_outcome_handler(outcome_handler.clone() as Arc<dyn Handler<TestOutcome>>);
    if let Some(filter) = settings.filter {
        router = router.with_filter(filter);
    }

    let pool = VerificationPool::new(ctx, settings.verify)?;
    let verify = pool.verify_all(proxies, validator, &router).await?;

    let report = JobReport {
        job: ctx.job_name().to_string(),
        run_id: ctx.run_id(),
        loaded,
        verify,
        routed: router.stats(),
        proxies: proxy_handler.stats(),
        outcomes: outcome_handler.stats(),
        elapsed: started.elapsed(),
    };

    if report.failed_records() > 0 {
        warn!(failed = report.failed_records(), "Some records could not be persisted");
    }
    info!(
        loaded = report.loaded,
        emitted = report.verify.emitted,
        skipped = report.verify.skipped,
        accepted = report.routed.accepted,
        dropped = report.routed.dropped,
        proxies_persisted = report.proxies.persisted,
        outcomes_persisted = report.outcomes.persisted,
        failed = report.failed_records(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Job finished"
    );

    Ok(report)
}

fn build_loader(config: &Config) -> Box<dyn ProxyLoader> {
    let loader_config = config.loader_config();
    match &config.loader.source {
        LoaderSource::Fatezero => Box::new(FatezeroLoader::new(loader_config)),
        LoaderSource::SixSixIp => Box::new(SixSixIpLoader::new(loader_config)),
        LoaderSource::File { path, protocol } => {
            Box::new(FileLoader::new(loader_config, path.as_str(), *protocol))
        }
    }
}

/// Router filter for the configured conditions, `None` when nothing is set
fn build_filter(filter: &FilterConfig) -> Result<Option<OutcomeFilter>> {
    if filter.is_empty() {
        return Ok(None);
    }

    let mut outcome_filter = OutcomeFilter::new(filter.outcome.clone())?;
    if !filter.proxy.is_empty() {
        outcome_filter = outcome_filter.with_proxy_filter(ProxyFilter::new(filter.proxy.clone())?);
    }
    Ok(Some(outcome_filter))
}
