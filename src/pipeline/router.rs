//! Result router
//!
//! Applies the outcome filter to each bundle and fans accepted bundles out
//! to the proxy and outcome handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use super::Handler;
use crate::error::Result;
use crate::filter::OutcomeFilter;
use crate::models::{Proxy, ResultBundle, TestOutcome};

/// Accepted and dropped bundle counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub accepted: u64,
    pub dropped: u64,
}

/// Routes accepted bundles to the proxy and outcome sinks
///
/// Without a filter every bundle is accepted. Rejected bundles are counted
/// and dropped.
#[derive(Default)]
pub struct ResultRouter {
    filter: Option<OutcomeFilter>,
    proxy_handler: Option<Arc<dyn Handler<Proxy>>>,
    outcome_handler: Option<Arc<dyn Handler<TestOutcome>>>,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl ResultRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: OutcomeFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_proxy_handler(mut self, handler: Arc<dyn Handler<Proxy>>) -> Self {
        self.proxy_handler = Some(handler);
        self
    }

    pub fn with_outcome_handler(mut self, handler: Arc<dyn Handler<TestOutcome>>) -> Self {
        self.outcome_handler = Some(handler);
        self
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn accepts(&self, bundle: &ResultBundle) -> bool {
        match &self.filter {
            Some(filter) => filter.assess(&bundle.proxy, &bundle.outcomes),
            None => true,
        }
    }
}

#[async_trait]
impl Handler<ResultBundle> for ResultRouter {
    async fn handle(&self, bundle: ResultBundle) -> Result<()> {
        if !self.accepts(&bundle) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(proxy_url = %bundle.proxy.proxy_url, "Bundle rejected by filter");
            return Ok(());
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);

        let ResultBundle { proxy, outcomes } = bundle;
        let proxy_url = proxy.proxy_url.clone();

        if let Some(handler) = &self.proxy_handler {
            if let Err(e) = handler.handle(proxy).await {
                error!(proxy_url = %proxy_url, error = %e, "Proxy handler failed");
                return Err(e);
            }
        }

        if let Some(handler) = &self.outcome_handler {
            for outcome in outcomes {
                if let Err(e) = handler.handle(outcome).await {
                    error!(proxy_url = %proxy_url, error = %e, "Outcome handler failed");
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut first_error = None;

        if let Some(handler) = &self.proxy_handler {
            if let Err(e) = handler.close().await {
                error!(error = %e, "Failed to close proxy handler");
                first_error.get_or_insert(e);
            }
        }

        if let Some(handler) = &self.outcome_handler {
            if let Err(e) = handler.close().await {
                error!(error = %e, "Failed to close outcome handler");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SieveError;
    use crate::filter::OutcomeConditions;
    use crate::models::ProxyProtocol;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    /// Collects items; optionally fails `handle` or `close`
    struct Collector<T> {
        items: Mutex<Vec<T>>,
        fail_handle: bool,
        fail_close: bool,
        closed: AtomicBool,
    }

    impl<T> Default for Collector<T> {
        fn default() -> Self {
            Self {
                items: Mutex::new(Vec::new()),
                fail_handle: false,
                fail_close: false,
                closed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl<T: Send + 'static> Handler<T> for Collector<T> {
        async fn handle(&self, item: T) -> Result<()> {
            if self.fail_handle {
                return Err(SieveError::BatchWrite("sink down".into()));
            }
            self.items.lock().push(item);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(SieveError::Internal("close failed".into()));
            }
            Ok(())
        }
    }

    fn bundle(ip: &str, transfer_sizes: &[i64]) -> ResultBundle {
        let proxy = Proxy::new(ip, 8080, ProxyProtocol::Http, "home");
        let outcomes = transfer_sizes
            .iter()
            .map(|size| {
                let mut outcome =
                    TestOutcome::pending(&proxy.proxy_url, "site", "http://site/", Utc::now(), true);
                outcome.transfer_size = *size;
                outcome
            })
            .collect();
        ResultBundle::new(proxy, outcomes)
    }

    #[tokio::test]
    async fn test_routes_proxy_and_every_outcome() {
        let proxies = Arc::new(Collector::<Proxy>::default());
        let outcomes = Arc::new(Collector::<TestOutcome>::default());
        let router = ResultRouter::new()
            .with_proxy_handler(proxies.clone())
            .with_outcome_handler(outcomes.clone());

        router.handle(bundle("1.1.1.1", &[10, 0, 30])).await.unwrap();
        router.close().await.unwrap();

        assert_eq!(proxies.items.lock().len(), 1);
        let sizes: Vec<i64> = outcomes.items.lock().iter().map(|o| o.transfer_size).collect();
        assert_eq!(sizes, vec![10, 0, 30]);
        assert_eq!(router.stats(), RouterStats { accepted: 1, dropped: 0 });
        assert!(proxies.closed.load(Ordering::SeqCst));
        assert!(outcomes.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_rejected_bundles_are_dropped() {
        let proxies = Arc::new(Collector::<Proxy>::default());
        let filter = OutcomeFilter::new(OutcomeConditions {
            valid_responses_pr: Some(0.5),
            ..Default::default()
        })
        .unwrap();
        let router = ResultRouter::new()
            .with_filter(filter)
            .with_proxy_handler(proxies.clone());

        router.handle(bundle("1.1.1.1", &[0, 0, 10])).await.unwrap();
        router.handle(bundle("2.2.2.2", &[10, 10, 0])).await.unwrap();

        let kept: Vec<String> = proxies.items.lock().iter().map(|p| p.ip.clone()).collect();
        assert_eq!(kept, vec!["2.2.2.2".to_string()]);
        assert_eq!(router.stats(), RouterStats { accepted: 1, dropped: 1 });
    }

    #[tokio::test]
    async fn test_downstream_error_propagates() {
        let proxies = Arc::new(Collector::<Proxy> {
            fail_handle: true,
            ..Default::default()
        });
        let outcomes = Arc::new(Collector::<TestOutcome>::default());
        let router = ResultRouter::new()
            .with_proxy_handler(proxies)
            .with_outcome_handler(outcomes.clone());

        let err = router.handle(bundle("1.1.1.1", &[1])).await.unwrap_err();
        assert!(matches!(err, SieveError::BatchWrite(_)));
        assert!(outcomes.items.lock().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_best_effort() {
        let proxies = Arc::new(Collector::<Proxy> {
            fail_close: true,
            ..Default::default()
        });
        let outcomes = Arc::new(Collector::<TestOutcome>::default());
        let router = ResultRouter::new()
            .with_proxy_handler(proxies.clone())
            .with_outcome_handler(outcomes.clone());

        let err = router.close().await.unwrap_err();
        assert!(matches!(err, SieveError::Internal(_)));
        assert!(proxies.closed.load(Ordering::SeqCst));
        assert!(outcomes.closed.load(Ordering::SeqCst));
    }
}
