//! Verification pool
//!
//! Probes every proxy `repeat` times with a bounded number of proxies in
//! flight, and hands each finished [`ResultBundle`] to a handler.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use super::Handler;
use crate::context::RunContext;
use crate::error::{Result, SieveError};
use crate::models::{Proxy, ResultBundle};
use crate::validator::Validator;

/// Probing schedule of a verification run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifySettings {
    /// Probes per proxy
    pub repeat: usize,
    /// Proxies verified at the same time
    pub concurrency: usize,
    /// Pause before each probe
    pub inter_call_delay: Duration,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            repeat: 3,
            concurrency: 10,
            inter_call_delay: Duration::from_secs(1),
        }
    }
}

impl VerifySettings {
    pub fn validate(&self) -> Result<()> {
        if self.repeat == 0 {
            return Err(SieveError::InvalidConfig(
                "verification repeat must be at least 1".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(SieveError::InvalidConfig(
                "verification concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Progress of a running verification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    /// Identifier of the proxy that finished last
    pub last: Option<String>,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }
}

/// Summary of a verification run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub total: usize,
    pub processed: usize,
    /// Bundles handed to the handler
    pub emitted: usize,
    /// Proxies the validator could not be configured for
    pub skipped: usize,
}

enum ProxyResult {
    Verified(ResultBundle),
    Skipped { proxy_url: String, reason: SieveError },
}

#[derive(Debug)]
pub struct VerificationPool {
    ctx: RunContext,
    settings: VerifySettings,
    progress: Option<watch::Sender<Progress>>,
}

impl VerificationPool {
    pub fn new(ctx: &RunContext, settings: VerifySettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            ctx: ctx.clone(),
            settings,
            progress: None,
        })
    }

    /// Publish progress on a watch channel in addition to the log
    pub fn subscribe(&mut self) -> watch::Receiver<Progress> {
        match &self.progress {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(Progress::default());
                self.progress = Some(tx);
                rx
            }
        }
    }

    pub fn settings(&self) -> &VerifySettings {
        &self.settings
    }

    /// Verify all proxies, then close the handler
    ///
    /// Returns the first handler error after the handler has been closed.
    pub async fn verify_all(
        &self,
        proxies: Vec<Proxy>,
        validator: &dyn Validator,
        handler: &dyn Handler<ResultBundle>,
    ) -> Result<VerifyReport> {
        let span = self.ctx.span().clone();
        async move {
            let mut report = VerifyReport {
                total: proxies.len(),
                ..Default::default()
            };
            info!(
                total = report.total,
                website = validator.website_name(),
                repeat = self.settings.repeat,
                concurrency = self.settings.concurrency,
                "Starting verification"
            );
            self.publish(&report, None);

            let outcome = self.drive(proxies, validator, handler, &mut report).await;
            let closed = handler.close().await;

            info!(
                processed = report.processed,
                emitted = report.emitted,
                skipped = report.skipped,
                "Verification finished"
            );

            outcome?;
            closed?;
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        proxies: Vec<Proxy>,
        validator: &dyn Validator,
        handler: &dyn Handler<ResultBundle>,
        report: &mut VerifyReport,
    ) -> Result<()> {
        let mut results = futures::stream::iter(proxies)
            .map(|proxy| self.verify_proxy(proxy, validator))
            .buffer_unordered(self.settings.concurrency);

        while let Some(result) = results.next().await {
            report.processed += 1;

            let last = match result? {
                ProxyResult::Verified(bundle) => {
                    let proxy_url = bundle.proxy.proxy_url.clone();
                    if let Err(e) = handler.handle(bundle).await {
                        error!(proxy_url = %proxy_url, error = %e, "Handler rejected bundle, aborting");
                        return Err(e);
                    }
                    report.emitted += 1;
                    proxy_url
                }
                ProxyResult::Skipped { proxy_url, reason } => {
                    warn!(proxy_url = %proxy_url, reason = %reason, "Proxy skipped");
                    report.skipped += 1;
                    proxy_url
                }
            };

            self.publish(report, Some(last));
        }

        Ok(())
    }

    /// Probe one proxy `repeat` times in sequence
    async fn verify_proxy(&self, proxy: Proxy, validator: &dyn Validator) -> Result<ProxyResult> {
        let mut outcomes = Vec::with_capacity(self.settings.repeat);

        for attempt in 0..self.settings.repeat {
            if !self.settings.inter_call_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_call_delay).await;
            }

            match validator.verify(&proxy).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_config_error() => {
                    return Ok(ProxyResult::Skipped {
                        proxy_url: proxy.proxy_url,
                        reason: e,
                    });
                }
                Err(e) => return Err(e),
            }
            debug!(proxy_url = %proxy.proxy_url, attempt = attempt + 1, "Probe recorded");
        }

        Ok(ProxyResult::Verified(ResultBundle::new(proxy, outcomes)))
    }

    fn publish(&self, report: &VerifyReport, last: Option<String>) {
        let progress = Progress {
            processed: report.processed,
            total: report.total,
            last,
        };

        if let Some(last) = &progress.last {
            info!(
                "Verified [ {:.1}% | {}/{} ] {}",
                progress.percent(),
                progress.processed,
                progress.total,
                last
            );
        }

        if let Some(tx) = &self.progress {
            tx.send_replace(progress);
        }
    }
}
