//! Bundle-level (outcome) filter
//!
//! Pre-conditions decide which outcomes count; aggregate thresholds are then
//! evaluated over the outcomes that remain.

use chrono::{DateTime, Duration, Utc};

use super::ProxyFilter;
use crate::error::{Result, SieveError};
use crate::models::{Proxy, TestOutcome};

/// Aggregate thresholds and per-outcome pre-conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeConditions {
    /// Max mean response latency, seconds
    pub response_elapsed_mean: Option<f64>,
    /// Max mean transfer latency, seconds
    pub transfer_elapsed_mean: Option<f64>,
    pub timeout_exception_pr: Option<f64>,
    pub proxy_exception_pr: Option<f64>,
    /// Min fraction of outcomes with a non-empty body
    pub valid_responses_pr: Option<f64>,

    /// Only count outcomes that transferred data
    pub pre_valid_responses: bool,
    /// Only count identity-verifying outcomes
    pub pre_verification_ip: bool,
    /// Only count outcomes tested within this window
    pub pre_tested_within: Option<Duration>,
}

impl OutcomeConditions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("response_elapsed_mean", self.response_elapsed_mean),
            ("transfer_elapsed_mean", self.transfer_elapsed_mean),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(SieveError::InvalidCondition(format!(
                        "{} must be a non-negative number, got {}",
                        name, v
                    )));
                }
            }
        }

        for (name, value) in [
            ("timeout_exception_pr", self.timeout_exception_pr),
            ("proxy_exception_pr", self.proxy_exception_pr),
            ("valid_responses_pr", self.valid_responses_pr),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(SieveError::InvalidCondition(format!(
                        "{} must be within [0, 1], got {}",
                        name, v
                    )));
                }
            }
        }

        if let Some(window) = self.pre_tested_within {
            if window <= Duration::zero() {
                return Err(SieveError::InvalidCondition(
                    "pre_tested_within must be a positive duration".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Aggregates over the outcomes that passed the pre-conditions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeStats {
    pub count: usize,
    pub response_elapsed_mean: f64,
    pub transfer_elapsed_mean: f64,
    pub timeout_exception_pr: f64,
    pub proxy_exception_pr: f64,
    pub valid_responses_pr: f64,
}

impl OutcomeStats {
    /// `None` for an empty sample
    pub fn from_outcomes<'a, I>(outcomes: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a TestOutcome>,
    {
        let mut count = 0usize;
        let mut response_sum = 0.0;
        let mut transfer_sum = 0.0;
        let mut timeouts = 0usize;
        let mut proxy_exceptions = 0usize;
        let mut valid = 0usize;

        for outcome in outcomes {
            count += 1;
            // Unfinished probes carry a zero latency and only weigh on the count.
            if outcome.response_elapsed > 0.0 {
                response_sum += outcome.response_elapsed;
            }
            if outcome.transfer_elapsed > 0.0 {
                transfer_sum += outcome.transfer_elapsed;
            }
            timeouts += usize::from(outcome.timeout_exception);
            proxy_exceptions += usize::from(outcome.proxy_exception);
            valid += usize::from(outcome.is_valid_response());
        }

        if count == 0 {
            return None;
        }

        let n = count as f64;
        Some(Self {
            count,
            response_elapsed_mean: response_sum / n,
            transfer_elapsed_mean: transfer_sum / n,
            timeout_exception_pr: timeouts as f64 / n,
            proxy_exception_pr: proxy_exceptions as f64 / n,
            valid_responses_pr: valid as f64 / n,
        })
    }
}

/// Decides whether a verified bundle qualifies for persistence
#[derive(Debug, Clone)]
pub struct OutcomeFilter {
    proxy_filter: Option<ProxyFilter>,
    conditions: OutcomeConditions,
}

impl OutcomeFilter {
    pub fn new(conditions: OutcomeConditions) -> Result<Self> {
        conditions.validate()?;
        Ok(Self {
            proxy_filter: None,
            conditions,
        })
    }

    /// Evaluate the entity filter first, failing fast
    pub fn with_proxy_filter(mut self, proxy_filter: ProxyFilter) -> Self {
        self.proxy_filter = Some(proxy_filter);
        self
    }

    pub fn conditions(&self) -> &OutcomeConditions {
        &self.conditions
    }

    pub fn proxy_filter(&self) -> Option<&ProxyFilter> {
        self.proxy_filter.as_ref()
    }

    pub fn assess(&self, proxy: &Proxy, outcomes: &[TestOutcome]) -> bool {
        self.assess_at(proxy, outcomes, Utc::now())
    }

    pub fn assess_at(&self, proxy: &Proxy, outcomes: &[TestOutcome], now: DateTime<Utc>) -> bool {
        if let Some(proxy_filter) = &self.proxy_filter {
            if !proxy_filter.assess_at(proxy, now) {
                return false;
            }
        }

        let counted = outcomes.iter().filter(|o| self.passes_preconditions(o, now));
        match OutcomeStats::from_outcomes(counted) {
            Some(stats) => self.assess_stats(&stats),
            None => false,
        }
    }

    /// Evaluate only the aggregate thresholds
    pub fn assess_stats(&self, stats: &OutcomeStats) -> bool {
        let c = &self.conditions;
        at_most(c.response_elapsed_mean, stats.response_elapsed_mean)
            && at_most(c.transfer_elapsed_mean, stats.transfer_elapsed_mean)
            && at_most(c.timeout_exception_pr, stats.timeout_exception_pr)
            && at_most(c.proxy_exception_pr, stats.proxy_exception_pr)
            && c
                .valid_responses_pr
                .map_or(true, |min| stats.valid_responses_pr >= min)
    }

    fn passes_preconditions(&self, outcome: &TestOutcome, now: DateTime<Utc>) -> bool {
        let c = &self.conditions;
        if c.pre_valid_responses && !outcome.is_valid_response() {
            return false;
        }
        if c.pre_verification_ip && !outcome.verification_ip {
            return false;
        }
        if let Some(window) = c.pre_tested_within {
            if now - outcome.test_time >= window {
                return false;
            }
        }
        true
    }
}

fn at_most(limit: Option<f64>, value: f64) -> bool {
    limit.map_or(true, |max| value <= max)
}
