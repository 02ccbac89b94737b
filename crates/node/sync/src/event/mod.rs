//! The events exchanged through the [`EventSystem`].
//!
//! [`EventSystem`]: crate::EventSystem

use crate::{AttributesWithParent, BlockInfo, ErrorKind, L2BlockInfo, PayloadInfo, SyncTaskError};
use alloy_eips::BlockNumHash;
use alloy_primitives::B256;
use op_alloy_rpc_types_engine::OpExecutionPayloadEnvelope;
use std::time::Instant;

/// The derived-from marker of interop replacement blocks.
///
/// A payload carrying it is not promoted through the safety ladder. It resets all heads to itself
/// instead, since the block it replaces was already cross-safe.
pub const REPLACE_BLOCK_SOURCE: BlockInfo =
    BlockInfo::new(B256::new([0xff; 32]), u64::MAX, B256::ZERO, 0);

/// When a payload started building and when it was submitted to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadTiming {
    /// Set when this node built the block.
    pub build_started: Option<Instant>,
    /// When the payload was submitted for validation.
    pub insert_started: Instant,
}

/// A payload accepted by the engine, waiting for the forkchoice update that makes it canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedPayload {
    /// The block reference of the payload.
    pub block: L2BlockInfo,
    /// The number of transactions in the block.
    pub txs: usize,
    /// The gas used by the block.
    pub gas_used: u64,
    /// Whether the block closes the derivation window of its L1 source.
    pub concluding: bool,
    /// The L1 source of the block, if derived.
    pub derived_from: Option<BlockInfo>,
    /// Build and insertion marks.
    pub timing: PayloadTiming,
}

/// Every event handled by the sync core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Start building a block from the attributes.
    BuildStart {
        /// The attributes to build with.
        attributes: Box<AttributesWithParent>,
    },
    /// The engine accepted the attributes and is building.
    BuildStarted {
        /// The build job.
        info: PayloadInfo,
        /// The attributes the job builds with.
        attributes: Box<AttributesWithParent>,
        /// When the build was requested.
        build_started: Instant,
    },
    /// Seal the block of a build job.
    BuildSeal {
        /// The build job.
        info: PayloadInfo,
        /// Whether the block closes the derivation window of its L1 source.
        concluding: bool,
        /// The L1 source of the block, if derived.
        derived_from: Option<BlockInfo>,
        /// When the build was requested, if known.
        build_started: Option<Instant>,
    },
    /// A build job was sealed.
    BuildSealed {
        /// The build job.
        info: PayloadInfo,
        /// The sealed payload.
        envelope: Box<OpExecutionPayloadEnvelope>,
        /// The block reference of the payload.
        block: L2BlockInfo,
        /// Whether the block closes the derivation window of its L1 source.
        concluding: bool,
        /// The L1 source of the block, if derived.
        derived_from: Option<BlockInfo>,
        /// When the build was requested, if known.
        build_started: Option<Instant>,
    },
    /// The engine rejected the attributes.
    BuildInvalid {
        /// The rejected attributes.
        attributes: Box<AttributesWithParent>,
        /// The rejection cause.
        err: String,
    },
    /// Discard a build job.
    BuildCancel {
        /// The build job.
        info: PayloadInfo,
        /// Swallow errors other than an unknown payload.
        force: bool,
    },
    /// The sealed payload was lost by the engine or failed sanity checks.
    PayloadSealInvalid {
        /// The build job.
        info: PayloadInfo,
        /// The cause.
        err: String,
        /// Whether the block was to close the derivation window.
        concluding: bool,
        /// The L1 source of the block, if derived.
        derived_from: Option<BlockInfo>,
    },
    /// The sealed payload could not be fetched. The build may be retried.
    PayloadSealExpired {
        /// The build job.
        info: PayloadInfo,
        /// The cause.
        err: String,
        /// Whether the block was to close the derivation window.
        concluding: bool,
        /// The L1 source of the block, if derived.
        derived_from: Option<BlockInfo>,
    },

    /// Submit a payload to the engine for validation.
    PayloadProcess {
        /// The payload.
        envelope: Box<OpExecutionPayloadEnvelope>,
        /// The block reference of the payload.
        block: L2BlockInfo,
        /// Whether the block closes the derivation window of its L1 source.
        concluding: bool,
        /// The L1 source of the block, if derived.
        derived_from: Option<BlockInfo>,
        /// When the build was requested, if this node built the block.
        build_started: Option<Instant>,
    },
    /// The engine accepted a payload.
    PayloadSuccess {
        /// The payload.
        envelope: Box<OpExecutionPayloadEnvelope>,
        /// The block reference of the payload.
        block: L2BlockInfo,
        /// Whether the block closes the derivation window of its L1 source.
        concluding: bool,
        /// The L1 source of the block, if derived.
        derived_from: Option<BlockInfo>,
        /// Build and insertion marks.
        timing: PayloadTiming,
    },
    /// The engine rejected a payload.
    PayloadInvalid {
        /// The payload.
        envelope: Box<OpExecutionPayloadEnvelope>,
        /// The rejection cause.
        err: String,
    },
    /// Insert a payload received from outside of this node.
    ProcessUnsafePayload {
        /// The payload.
        envelope: Box<OpExecutionPayloadEnvelope>,
    },

    /// Promote a block to unsafe.
    PromoteUnsafe {
        /// The block.
        block: L2BlockInfo,
    },
    /// The unsafe head changed.
    UnsafeUpdate {
        /// The new unsafe head.
        block: L2BlockInfo,
    },
    /// Promote a block to cross-unsafe.
    PromoteCrossUnsafe {
        /// The block.
        block: L2BlockInfo,
    },
    /// The cross-unsafe head changed, or was requested.
    CrossUnsafeUpdate {
        /// The cross-unsafe head.
        cross_unsafe: L2BlockInfo,
        /// The unsafe head.
        local_unsafe: L2BlockInfo,
    },
    /// Promote a derived block to pending-safe.
    PromotePendingSafe {
        /// The block.
        block: L2BlockInfo,
        /// Whether the block closes the derivation window of its L1 source.
        concluding: bool,
        /// The L1 source of the block.
        source: BlockInfo,
    },
    /// The pending-safe head changed, or was requested.
    PendingSafeUpdate {
        /// The pending-safe head.
        pending_safe: L2BlockInfo,
        /// The unsafe head.
        unsafe_head: L2BlockInfo,
    },
    /// Promote a block to local-safe.
    PromoteLocalSafe {
        /// The block.
        block: L2BlockInfo,
        /// The L1 source of the block.
        source: BlockInfo,
    },
    /// The local-safe head changed.
    LocalSafeUpdate {
        /// The new local-safe head.
        block: L2BlockInfo,
        /// The L1 source of the block.
        source: BlockInfo,
    },
    /// Promote a block to safe.
    PromoteSafe {
        /// The block.
        block: L2BlockInfo,
        /// The L1 source of the block.
        source: BlockInfo,
    },
    /// A block became safe, derived from the given L1 source.
    SafeDerived {
        /// The safe block.
        safe: L2BlockInfo,
        /// The L1 source.
        source: BlockInfo,
    },
    /// The safe head changed, or was requested.
    CrossSafeUpdate {
        /// The safe head.
        cross_safe: L2BlockInfo,
        /// The local-safe head.
        local_safe: L2BlockInfo,
    },
    /// Promote a block to finalized.
    PromoteFinalized {
        /// The block.
        block: L2BlockInfo,
    },
    /// The finalized head changed, or was requested.
    FinalizedUpdate {
        /// The finalized head.
        block: L2BlockInfo,
    },

    /// Request the current cross heads.
    CrossUpdateRequest {
        /// Answer with a [`SyncEvent::CrossUnsafeUpdate`].
        cross_unsafe: bool,
        /// Answer with a [`SyncEvent::CrossSafeUpdate`].
        cross_safe: bool,
    },
    /// Request the current pending-safe head.
    PendingSafeRequest,
    /// Request the current finalized head.
    FinalizedRequest,
    /// Request the current forkchoice heads.
    ForkchoiceRequest,
    /// The engine forkchoice changed, or was requested.
    ForkchoiceUpdate {
        /// The unsafe head.
        unsafe_head: L2BlockInfo,
        /// The safe head.
        safe: L2BlockInfo,
        /// The finalized head.
        finalized: L2BlockInfo,
    },

    /// Overwrite every head.
    ForceReset {
        /// The new unsafe head. `None` keeps the current one.
        local_unsafe: Option<L2BlockInfo>,
        /// The new cross-unsafe head.
        cross_unsafe: L2BlockInfo,
        /// The new local-safe and pending-safe head.
        local_safe: L2BlockInfo,
        /// The new safe head.
        cross_safe: L2BlockInfo,
        /// The new finalized head.
        finalized: L2BlockInfo,
    },
    /// The heads were overwritten.
    EngineResetConfirmed {
        /// The unsafe head.
        local_unsafe: L2BlockInfo,
        /// The cross-unsafe head.
        cross_unsafe: L2BlockInfo,
        /// The local-safe head.
        local_safe: L2BlockInfo,
        /// The safe head.
        cross_safe: L2BlockInfo,
        /// The finalized head.
        finalized: L2BlockInfo,
    },
    /// Try to restore the backup unsafe head.
    TryBackupUnsafeReorg,
    /// Sync the engine forkchoice with the heads, if needed.
    TryUpdateEngine {
        /// The payload the update makes canonical, if any.
        inserted: Option<InsertedPayload>,
    },

    /// The engine rejected attributes, and the pipeline should move on.
    InvalidPayloadAttributes {
        /// The rejected attributes.
        attributes: Box<AttributesWithParent>,
        /// The rejection cause.
        err: String,
    },
    /// The pipeline should retry the slot with deposits only.
    DepositsOnlyPayloadAttributesRequest {
        /// The parent of the slot.
        parent: BlockNumHash,
        /// The L1 source of the slot.
        derived_from: BlockInfo,
    },

    /// The local view of the chain is wrong.
    ResetRequest {
        /// The cause.
        err: String,
    },
    /// A transient engine failure.
    EngineTemporaryError {
        /// The cause.
        err: String,
    },
    /// An unrecoverable failure. The event system stops after delivering it.
    CriticalError {
        /// The cause.
        err: String,
    },

    /// Replace a block with a deposits-only block.
    InteropInvalidateBlock {
        /// The invalidated block.
        invalidated: BlockInfo,
        /// The attributes of the replacement.
        attributes: Box<AttributesWithParent>,
    },
    /// An invalidated block was replaced.
    InteropReplacedBlock {
        /// The replacement block.
        replacement: L2BlockInfo,
        /// The replacement payload.
        envelope: Box<OpExecutionPayloadEnvelope>,
    },
}

impl SyncEvent {
    /// Returns the stable name of the event, used in logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BuildStart { .. } => "build-start",
            Self::BuildStarted { .. } => "build-started",
            Self::BuildSeal { .. } => "build-seal",
            Self::BuildSealed { .. } => "build-sealed",
            Self::BuildInvalid { .. } => "build-invalid",
            Self::BuildCancel { .. } => "build-cancel",
            Self::PayloadSealInvalid { .. } => "payload-seal-invalid",
            Self::PayloadSealExpired { .. } => "payload-seal-expired",
            Self::PayloadProcess { .. } => "payload-process",
            Self::PayloadSuccess { .. } => "payload-success",
            Self::PayloadInvalid { .. } => "payload-invalid",
            Self::ProcessUnsafePayload { .. } => "process-unsafe-payload",
            Self::PromoteUnsafe { .. } => "promote-unsafe",
            Self::UnsafeUpdate { .. } => "unsafe-update",
            Self::PromoteCrossUnsafe { .. } => "promote-cross-unsafe",
            Self::CrossUnsafeUpdate { .. } => "cross-unsafe-update",
            Self::PromotePendingSafe { .. } => "promote-pending-safe",
            Self::PendingSafeUpdate { .. } => "pending-safe-update",
            Self::PromoteLocalSafe { .. } => "promote-local-safe",
            Self::LocalSafeUpdate { .. } => "local-safe-update",
            Self::PromoteSafe { .. } => "promote-safe",
            Self::SafeDerived { .. } => "safe-derived",
            Self::CrossSafeUpdate { .. } => "cross-safe-update",
            Self::PromoteFinalized { .. } => "promote-finalized",
            Self::FinalizedUpdate { .. } => "finalized-update",
            Self::CrossUpdateRequest { .. } => "cross-update-request",
            Self::PendingSafeRequest => "pending-safe-request",
            Self::FinalizedRequest => "finalized-request",
            Self::ForkchoiceRequest => "forkchoice-request",
            Self::ForkchoiceUpdate { .. } => "forkchoice-update",
            Self::ForceReset { .. } => "force-reset",
            Self::EngineResetConfirmed { .. } => "engine-reset-confirmed",
            Self::TryBackupUnsafeReorg => "try-backup-unsafe-reorg",
            Self::TryUpdateEngine { .. } => "try-update-engine",
            Self::InvalidPayloadAttributes { .. } => "invalid-payload-attributes",
            Self::DepositsOnlyPayloadAttributesRequest { .. } => {
                "deposits-only-payload-attributes-request"
            }
            Self::ResetRequest { .. } => "reset-request",
            Self::EngineTemporaryError { .. } => "engine-temporary-error",
            Self::CriticalError { .. } => "critical-error",
            Self::InteropInvalidateBlock { .. } => "interop-invalidate-block",
            Self::InteropReplacedBlock { .. } => "interop-replaced-block",
        }
    }

    /// Creates a [`SyncEvent::BuildStart`].
    pub fn build_start(attributes: AttributesWithParent) -> Self {
        Self::BuildStart { attributes: Box::new(attributes) }
    }

    /// Creates a [`SyncEvent::TryUpdateEngine`] that carries no inserted payload.
    pub const fn try_update_engine() -> Self {
        Self::TryUpdateEngine { inserted: None }
    }

    /// Creates the signal event matching the kind of `err`.
    pub fn from_task_error<E: SyncTaskError>(err: &E) -> Self {
        let cause = err.to_string();
        match err.kind() {
            ErrorKind::Temporary => Self::EngineTemporaryError { err: cause },
            ErrorKind::Reset => Self::ResetRequest { err: cause },
            ErrorKind::Critical => Self::CriticalError { err: cause },
        }
    }
}
