use async_trait::async_trait;

use crate::error::Result;

/// Downstream consumer of pipeline items
///
/// An error from `handle` is treated as fatal by the producer.
#[async_trait]
pub trait Handler<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn handle(&self, item: T) -> Result<()>;

    /// Flush whatever is buffered and wait for all background work
    async fn close(&self) -> Result<()>;
}
