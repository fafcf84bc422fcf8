pub mod proxy;
pub mod store;
pub mod test_log;

pub use proxy::{qualified_query, ProxyRepository};
pub use store::{insert_query, BatchStore, PgBatchStore, TableRecord};
