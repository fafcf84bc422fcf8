//! Proxy-level (entity) filter

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SieveError};
use crate::models::{Proxy, ProxyProtocol};

/// Static thresholds evaluated against a proxy alone
///
/// Every `None` condition places no constraint on the proxy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyConditions {
    pub port_list: Option<Vec<u16>>,
    pub protocol_list: Option<Vec<ProxyProtocol>>,
    pub local_list: Option<Vec<String>>,
    /// Maximum age since the proxy was collected
    pub collected_within: Option<Duration>,
}

impl ProxyConditions {
    pub fn is_empty(&self) -> bool {
        self.port_list.is_none()
            && self.protocol_list.is_none()
            && self.local_list.is_none()
            && self.collected_within.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(window) = self.collected_within {
            if window <= Duration::zero() {
                return Err(SieveError::InvalidCondition(
                    "collected_within must be a positive duration".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Entity filter: all configured sub-predicates must hold
#[derive(Debug, Clone)]
pub struct ProxyFilter {
    conditions: ProxyConditions,
}

impl ProxyFilter {
    pub fn new(conditions: ProxyConditions) -> Result<Self> {
        conditions.validate()?;
        Ok(Self { conditions })
    }

    pub fn conditions(&self) -> &ProxyConditions {
        &self.conditions
    }

    pub fn assess(&self, proxy: &Proxy) -> bool {
        self.assess_at(proxy, Utc::now())
    }

    pub fn assess_at(&self, proxy: &Proxy, now: DateTime<Utc>) -> bool {
        self.assess_port(proxy.port)
            && self.assess_protocol(proxy.protocol)
            && self.assess_local(&proxy.local)
            && self.assess_collected_within(proxy.collect_time, now)
    }

    fn assess_port(&self, port: u16) -> bool {
        self.conditions
            .port_list
            .as_ref()
            .map_or(true, |ports| ports.contains(&port))
    }

    fn assess_protocol(&self, protocol: ProxyProtocol) -> bool {
        self.conditions
            .protocol_list
            .as_ref()
            .map_or(true, |protocols| protocols.contains(&protocol))
    }

    fn assess_local(&self, local: &str) -> bool {
        self.conditions
            .local_list
            .as_ref()
            .map_or(true, |locals| locals.iter().any(|l| l == local))
    }

    fn assess_collected_within(&self, collect_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.conditions
            .collected_within
            .map_or(true, |window| now - collect_time < window)
    }
}
