//! The sync state of the engine.

mod core;
pub use core::{EngineSyncState, EngineSyncStateUpdate, HeadOrderingError};
