//! The operations the supervisor drives a managed node with.

use crate::{
    BlockInfo, BlockSeal, DerivedRefPair, EventSender, InteropError, InteropL1Source,
    InteropL2Source, InteropSourceError, L2BlockInfo, SyncConfig, SyncEvent, payload_block_info,
    replacement_attributes,
};
use alloy_eips::BlockNumHash;
use std::sync::Arc;

/// The supervisor-facing handle of a managed node.
///
/// Every operation only queues events and returns once they are accepted, without waiting for
/// the engine.
#[derive(Debug)]
pub struct ManagedModeApi<L2, L1> {
    events: EventSender,
    cfg: Arc<SyncConfig>,
    l2: Arc<L2>,
    l1: Arc<L1>,
}

impl<L2, L1> Clone for ManagedModeApi<L2, L1> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            cfg: self.cfg.clone(),
            l2: self.l2.clone(),
            l1: self.l1.clone(),
        }
    }
}

impl<L2, L1> ManagedModeApi<L2, L1>
where
    L2: InteropL2Source,
    L1: InteropL1Source,
{
    /// Creates a new [`ManagedModeApi`].
    pub const fn new(events: EventSender, cfg: Arc<SyncConfig>, l2: Arc<L2>, l1: Arc<L1>) -> Self {
        Self { events, cfg, l2, l1 }
    }

    /// Marks the block as cross-unsafe.
    pub async fn update_cross_unsafe(&self, id: BlockNumHash) -> Result<(), InteropError> {
        let block = self.l2.l2_block_ref_by_hash(id.hash).await?;
        debug!(target: "interop", %block, "Supervisor confirmed cross-unsafe block");
        self.send(SyncEvent::PromoteCrossUnsafe { block }).await
    }

    /// Marks the block as cross-safe, derived from `derived_from`.
    pub async fn update_cross_safe(
        &self,
        derived: BlockNumHash,
        derived_from: BlockNumHash,
    ) -> Result<(), InteropError> {
        let block = self.l2.l2_block_ref_by_hash(derived.hash).await?;
        let source = self.l1.l1_block_ref_by_hash(derived_from.hash).await?;
        debug!(target: "interop", %block, %source, "Supervisor confirmed cross-safe block");
        self.send(SyncEvent::PromoteSafe { block, source }).await
    }

    /// Marks the block as finalized.
    pub async fn update_finalized(&self, id: BlockNumHash) -> Result<(), InteropError> {
        let block = self.l2.l2_block_ref_by_hash(id.hash).await?;
        debug!(target: "interop", %block, "Supervisor finalized block");
        self.send(SyncEvent::PromoteFinalized { block }).await
    }

    /// Replaces the block with a deposits-only block.
    pub async fn invalidate_block(&self, seal: BlockSeal) -> Result<(), InteropError> {
        let envelope = self.l2.payload_by_hash(seal.hash).await?;
        let invalidated = payload_block_info(&envelope.execution_payload);
        let parent = self.l2.l2_block_ref_by_hash(invalidated.parent_hash).await?;
        let output = self.l2.output_v0_at_block(seal.hash).await?;

        let attributes = replacement_attributes(&self.cfg, &envelope, parent, &output)?;
        info!(target: "interop", %seal, "Supervisor invalidated block");
        self.send(SyncEvent::InteropInvalidateBlock {
            invalidated,
            attributes: Box::new(attributes),
        })
        .await
    }

    /// Resets the node to the given anchors.
    ///
    /// Each anchor must match the canonical local block at its height.
    pub async fn reset(
        &self,
        unsafe_id: BlockNumHash,
        safe_id: BlockNumHash,
        finalized_id: BlockNumHash,
    ) -> Result<(), InteropError> {
        // The local unsafe chain is kept, but must contain the anchor.
        self.resolve_anchor("unsafe", unsafe_id).await?;
        let safe = self.resolve_anchor("safe", safe_id).await?;
        let finalized = self.resolve_anchor("finalized", finalized_id).await?;

        info!(target: "interop", %safe, %finalized, "Supervisor reset");
        self.send(SyncEvent::ForceReset {
            local_unsafe: None,
            cross_unsafe: safe,
            local_safe: safe,
            cross_safe: safe,
            finalized,
        })
        .await
    }

    /// Returns the genesis blocks the chain derives from.
    pub async fn anchor_point(&self) -> Result<DerivedRefPair, InteropError> {
        let genesis = self.cfg.genesis();
        let source = self.l1.l1_block_ref_by_hash(genesis.l1.hash).await?;
        let derived = self.l2.l2_block_ref_by_hash(genesis.l2.hash).await?;
        Ok(DerivedRefPair { source, derived: derived.block_info })
    }

    async fn resolve_anchor(
        &self,
        name: &'static str,
        id: BlockNumHash,
    ) -> Result<L2BlockInfo, InteropError> {
        let block = match self.l2.l2_block_ref_by_number(id.number).await {
            Ok(block) => block,
            Err(InteropSourceError::NotFound) => {
                warn!(target: "interop", name, number = id.number, "Reset anchor not found");
                return Err(InteropError::AnchorNotFound(name));
            }
            Err(e) => {
                error!(target: "interop", name, error = %e, "Failed to look up reset anchor");
                return Err(InteropError::AnchorLookup(name));
            }
        };

        if block.hash() != id.hash {
            warn!(
                target: "interop",
                name,
                expected = %id.hash,
                local = %block.hash(),
                "Reset anchor conflicts with local chain"
            );
            return Err(InteropError::ConflictingAnchor { name, local: block.hash() });
        }
        Ok(block)
    }

    async fn send(&self, event: SyncEvent) -> Result<(), InteropError> {
        self.events.send(event).await.map_err(|_| InteropError::Closed)
    }
}
