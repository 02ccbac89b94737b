//! Engine sync configuration.

mod mode;
pub use mode::SyncMode;
