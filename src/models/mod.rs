pub mod bundle;
pub mod proxy;
pub mod test_log;

pub use bundle::*;
pub use proxy::*;
pub use test_log::*;

/// Human-readable identity used when a record has to be reported by name
pub trait Identified {
    fn identity(&self) -> String;
}
