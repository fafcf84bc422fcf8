//! Filter chain
//!
//! Pure decision logic over proxies and their verification outcomes.

mod outcome_filter;
mod proxy_filter;

pub use outcome_filter::{OutcomeConditions, OutcomeFilter, OutcomeStats};
pub use proxy_filter::{ProxyConditions, ProxyFilter};
