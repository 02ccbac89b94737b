//! Payload attributes annotated with the block they build on.

use crate::{BlockInfo, L2BlockInfo};
use alloy_primitives::Bytes;
use op_alloy_consensus::OpTxType;
use op_alloy_rpc_types_engine::OpPayloadAttributes;

/// [`OpPayloadAttributes`] together with the parent block they extend, and the L1 block they were
/// derived from, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributesWithParent {
    /// The payload attributes.
    pub attributes: OpPayloadAttributes,
    /// The parent block the attributes build on.
    pub parent: L2BlockInfo,
    /// The L1 block the attributes were derived from. `None` for sequencer-local builds.
    pub derived_from: Option<BlockInfo>,
    /// Whether the attributes close the derivation window of their L1 source.
    pub concluding: bool,
}

impl AttributesWithParent {
    /// Creates a new [`AttributesWithParent`].
    pub const fn new(
        attributes: OpPayloadAttributes,
        parent: L2BlockInfo,
        derived_from: Option<BlockInfo>,
        concluding: bool,
    ) -> Self {
        Self { attributes, parent, derived_from, concluding }
    }

    /// Returns the payload timestamp.
    pub const fn timestamp(&self) -> u64 {
        self.attributes.payload_attributes.timestamp
    }

    /// Returns the number of the block the attributes build.
    pub const fn block_number(&self) -> u64 {
        self.parent.block_info.number + 1
    }

    /// Returns `true` if the attributes were derived from L1 data.
    pub const fn is_derived(&self) -> bool {
        self.derived_from.is_some()
    }

    /// Returns the L1 source, or the zero value for sequencer-local builds.
    pub fn derived_from_or_default(&self) -> BlockInfo {
        self.derived_from.unwrap_or_default()
    }

    /// Returns `true` if every transaction in the attributes is a deposit.
    pub fn is_deposits_only(&self) -> bool {
        self.attributes.transactions.iter().flatten().all(is_deposit)
    }

    /// Converts the attributes into a deposits-only set, which the engine must accept.
    pub fn as_deposits_only(&self) -> Self {
        Self {
            attributes: OpPayloadAttributes {
                transactions: self.attributes.transactions.as_ref().map(|txs| {
                    txs.iter().filter(|tx| is_deposit(tx)).cloned().collect::<Vec<Bytes>>()
                }),
                no_tx_pool: Some(true),
                ..self.attributes.clone()
            },
            parent: self.parent,
            derived_from: self.derived_from,
            concluding: self.concluding,
        }
    }
}

/// Returns `true` if the encoded transaction is a deposit.
pub(crate) fn is_deposit(tx: &Bytes) -> bool {
    tx.first().is_some_and(|t| *t == OpTxType::Deposit as u8)
}
