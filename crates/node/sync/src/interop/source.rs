//! Chain data the interop hook reads.

use crate::{BlockInfo, InteropSourceError, L2BlockInfo, OutputRoot};
use alloy_primitives::B256;
use async_trait::async_trait;
use op_alloy_rpc_types_engine::OpExecutionPayloadEnvelope;
use std::fmt::Debug;

/// Read access to the local L2 chain.
#[async_trait]
pub trait InteropL2Source: Debug + Send + Sync {
    /// Returns the L2 block with the given hash.
    async fn l2_block_ref_by_hash(&self, hash: B256) -> Result<L2BlockInfo, InteropSourceError>;

    /// Returns the canonical L2 block at the given height.
    async fn l2_block_ref_by_number(&self, number: u64)
    -> Result<L2BlockInfo, InteropSourceError>;

    /// Returns the full payload of the block with the given hash.
    async fn payload_by_hash(
        &self,
        hash: B256,
    ) -> Result<OpExecutionPayloadEnvelope, InteropSourceError>;

    /// Returns the V0 output root of the block with the given hash.
    async fn output_v0_at_block(&self, hash: B256) -> Result<OutputRoot, InteropSourceError>;
}

/// Read access to the L1 chain.
#[async_trait]
pub trait InteropL1Source: Debug + Send + Sync {
    /// Returns the L1 block with the given hash.
    async fn l1_block_ref_by_hash(&self, hash: B256) -> Result<BlockInfo, InteropSourceError>;
}
