//! Verification pipeline
//!
//! The [`VerificationPool`] emits one [`ResultBundle`](crate::models::ResultBundle)
//! per proxy into a [`ResultRouter`], which forwards accepted bundles to
//! buffered sinks backed by a [`BatchStore`](crate::repository::BatchStore).

mod buffer;
mod handler;
mod pool;
mod router;

pub use buffer::{
    BatchFailure, BisectPolicy, BufferSettings, BufferedBatchHandler, FailureCallback,
    FlushStats, DEFAULT_BUFFER_SIZE, DEFAULT_FLUSH_CONCURRENCY,
};
pub use handler::Handler;
pub use pool::{Progress, VerificationPool, VerifyReport, VerifySettings};
pub use router::{ResultRouter, RouterStats};
