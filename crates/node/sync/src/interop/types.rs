//! Messages exchanged with the supervisor.

use crate::BlockInfo;
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// An L2 block paired with the L1 block it was derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedRefPair {
    /// The L1 source.
    pub source: BlockInfo,
    /// The derived L2 block.
    pub derived: BlockInfo,
}

/// A block that replaced an invalidated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReplacement {
    /// The replacement block.
    pub replacement: BlockInfo,
    /// The hash of the invalidated block.
    pub invalidated: B256,
}

/// Identifies a block by hash, number and timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[display("{hash}:{number}")]
pub struct BlockSeal {
    /// The block hash.
    pub hash: B256,
    /// The block number.
    pub number: u64,
    /// The block timestamp.
    pub timestamp: u64,
}

/// A notification for the supervisor. Exactly one field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedEvent {
    /// The node reset, with the cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<String>,
    /// A new unsafe block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsafe_block: Option<BlockInfo>,
    /// A new local-safe block and its L1 source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_update: Option<DerivedRefPair>,
    /// An invalidated block was replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_block: Option<BlockReplacement>,
}
