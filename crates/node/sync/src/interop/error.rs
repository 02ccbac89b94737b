//! Errors of the interop hook.

use crate::{ErrorKind, SyncTaskError};
use alloy_primitives::{Address, B256};
use thiserror::Error;

/// JSON-RPC error code for a reset anchor the node does not have.
pub const BLOCK_NOT_FOUND_CODE: i64 = -39001;

/// JSON-RPC error code for a reset anchor that conflicts with the local chain.
pub const CONFLICTING_BLOCK_CODE: i64 = -39002;

/// JSON-RPC error code for any other failure while resolving a reset anchor.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// An error returned by an [`InteropL2Source`] or [`InteropL1Source`].
///
/// [`InteropL2Source`]: crate::InteropL2Source
/// [`InteropL1Source`]: crate::InteropL1Source
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InteropSourceError {
    /// The requested block is not known.
    #[error("Block not found")]
    NotFound,
    /// The source failed to serve the request.
    #[error("Source error: {0}")]
    Other(String),
}

/// An error raised by the interop hook or its API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InteropError {
    /// A transaction could not be decoded.
    #[error("Failed to decode transaction: {0}")]
    TxDecode(String),
    /// A transaction expected to be a deposit has another type.
    #[error("Expected deposit transaction, got type {0}")]
    NotDeposit(u8),
    /// The replacement block carries no transactions.
    #[error("Replacement block has no transactions")]
    MissingReplacementTx,
    /// The last deposit of a replacement block was not sent by the replacement sender.
    #[error("Unexpected replacement deposit sender: {0}")]
    UnexpectedReplacementSender(Address),
    /// The replacement deposit does not carry a V0 output root preimage.
    #[error("Invalid output root preimage in replacement deposit")]
    InvalidOutputRoot,
    /// A Holocene block lacks the EIP-1559 parameters in its extra data.
    #[error("Missing EIP-1559 parameters in extra data")]
    MissingEip1559Params,
    /// A reset anchor is not known locally.
    #[error("Cannot reset, {0} anchor not found")]
    AnchorNotFound(&'static str),
    /// A reset anchor conflicts with the local chain.
    #[error("Conflicting {name} anchor: local block at that height is {local}")]
    ConflictingAnchor {
        /// The name of the anchor.
        name: &'static str,
        /// The hash of the local block at the anchor height.
        local: B256,
    },
    /// A reset anchor could not be resolved.
    #[error("Failed to find {0} anchor reference")]
    AnchorLookup(&'static str),
    /// A provider call failed.
    #[error(transparent)]
    Source(#[from] InteropSourceError),
    /// The event system stopped accepting events.
    #[error("Event system is closed")]
    Closed,
}

impl InteropError {
    /// Returns the JSON-RPC error code the supervisor expects for reset failures.
    pub const fn code(&self) -> Option<i64> {
        match self {
            Self::AnchorNotFound(_) => Some(BLOCK_NOT_FOUND_CODE),
            Self::ConflictingAnchor { .. } => Some(CONFLICTING_BLOCK_CODE),
            Self::AnchorLookup(_) => Some(INTERNAL_ERROR_CODE),
            _ => None,
        }
    }
}

impl SyncTaskError for InteropError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed => ErrorKind::Critical,
            _ => ErrorKind::Temporary,
        }
    }
}
