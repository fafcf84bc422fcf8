//! Proxy Sieve - proxy harvesting and verification pipeline
//!
//! Loads candidate proxies from public sources, probes each one repeatedly
//! through a bounded worker pool, filters the evidence and persists the
//! survivors with their probe outcomes.
//!
//! ## Features
//!
//! - Fatezero, 66ip and plain file proxy loaders
//! - Identity (echo IP) and keyword website validators
//! - Proxy-level and outcome-level filter chain, in memory and in SQL
//! - Buffered batch persistence with bisection of failing batches
//! - PostgreSQL storage with versioned migrations

pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod filter;
pub mod jobs;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod validator;

pub use config::Config;
pub use context::RunContext;
pub use database::Database;
pub use error::{Result, SieveError};
