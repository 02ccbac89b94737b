//! Error taxonomy of the sync core.

use derive_more::Display;
use thiserror::Error;

/// How a failure must be handled.
///
/// Every failure path in the sync core maps to exactly one kind, which decides the signal event
/// raised for it.
#[derive(Debug, PartialEq, Eq, Display, Clone, Copy, Hash)]
pub enum ErrorKind {
    /// A transient engine or network problem. The caller may retry on the next cycle.
    #[display("temporary")]
    Temporary,
    /// The local view of the chain is wrong and heads must be re-synced.
    #[display("reset")]
    Reset,
    /// An invariant is broken and the node must stop.
    #[display("critical")]
    Critical,
}

/// An error with an associated [`ErrorKind`].
pub trait SyncTaskError: std::error::Error {
    /// The kind of the error.
    fn kind(&self) -> ErrorKind;
}

/// A terminal error of the [`EventSystem`].
///
/// [`EventSystem`]: crate::EventSystem
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The event queue exceeded its bound, which means a deriver is feeding itself events.
    #[error("Event queue overflow: {0} events queued, limit {1}")]
    QueueOverflow(usize, usize),
    /// A critical error was raised.
    #[error("Critical error: {0}")]
    Critical(String),
    /// Every inbound event sender was dropped.
    #[error("Inbound event channel closed")]
    InboundClosed,
}
