//! The head registry.

use crate::{L2BlockInfo, Metrics};
use alloy_rpc_types_engine::ForkchoiceState;
use thiserror::Error;

/// The chain heads tracked by the sync core, one per safety level.
///
/// ## Head Hierarchy (by Safety Level)
///
/// 1. **Finalized**: safe, and derived from finalized L1 data.
/// 2. **Safe** (cross-safe): local-safe, and cross-chain confirmed.
/// 3. **Local Safe**: derivation from L1 data concluded, not cross-chain confirmed.
/// 4. **Pending Safe**: attributed to L1 data, derivation window still open.
/// 5. **Cross-Unsafe**: unsafe, and cross-chain confirmed.
/// 6. **Unsafe**: the latest block known locally.
///
/// The **backup unsafe** head is the previous unsafe head, kept while the unsafe chain is
/// replaced by one that does not extend it.
///
/// ## Invariants
///
/// ```text
/// finalized <= safe <= local_safe <= cross_unsafe <= unsafe
/// pending_safe <= unsafe
/// ```
///
/// Updates are not rejected when they break these orderings, since promotions move heads one at a
/// time and the ordering is restored by the follow-up events. [`EngineSyncState::check_invariants`]
/// reports the first violated ordering once the event queue has settled.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct EngineSyncState {
    /// Most recent block known locally.
    unsafe_head: L2BlockInfo,
    /// Cross-verified unsafe head, always equal to the unsafe head pre-interop.
    cross_unsafe_head: L2BlockInfo,
    /// Derived from L1, derivation window still open.
    pending_safe_head: L2BlockInfo,
    /// Derived from L1, and known to be a completed span-batch,
    /// but not cross-verified yet.
    local_safe_head: L2BlockInfo,
    /// Derived from L1 and cross-verified to have cross-safe dependencies.
    safe_head: L2BlockInfo,
    /// Derived from finalized L1 data,
    /// and cross-verified to only have finalized dependencies.
    finalized_head: L2BlockInfo,
    /// The unsafe head that was replaced by a non-extending unsafe block.
    backup_unsafe_head: L2BlockInfo,
}

impl EngineSyncState {
    /// Returns the current unsafe head.
    pub const fn unsafe_head(&self) -> L2BlockInfo {
        self.unsafe_head
    }

    /// Returns the current cross-verified unsafe head.
    pub const fn cross_unsafe_head(&self) -> L2BlockInfo {
        self.cross_unsafe_head
    }

    /// Returns the current pending safe head.
    pub const fn pending_safe_head(&self) -> L2BlockInfo {
        self.pending_safe_head
    }

    /// Returns the current local safe head.
    pub const fn local_safe_head(&self) -> L2BlockInfo {
        self.local_safe_head
    }

    /// Returns the current safe head.
    pub const fn safe_head(&self) -> L2BlockInfo {
        self.safe_head
    }

    /// Returns the current finalized head.
    pub const fn finalized_head(&self) -> L2BlockInfo {
        self.finalized_head
    }

    /// Returns the backup unsafe head.
    pub const fn backup_unsafe_head(&self) -> L2BlockInfo {
        self.backup_unsafe_head
    }

    /// Creates a `ForkchoiceState`
    ///
    /// - `head_block` = `unsafe_head`
    /// - `safe_block` = `safe_head`
    /// - `finalized_block` = `finalized_head`
    ///
    /// If the block info is not yet available, the default values are used.
    pub const fn create_forkchoice_state(&self) -> ForkchoiceState {
        ForkchoiceState {
            head_block_hash: self.unsafe_head.hash(),
            safe_block_hash: self.safe_head.hash(),
            finalized_block_hash: self.finalized_head.hash(),
        }
    }

    /// Applies the update, keeping the current value of every head the update leaves unset.
    pub fn apply_update(self, update: EngineSyncStateUpdate) -> Self {
        let labelled = [
            (update.unsafe_head, Metrics::UNSAFE_BLOCK_LABEL),
            (update.cross_unsafe_head, Metrics::CROSS_UNSAFE_BLOCK_LABEL),
            (update.pending_safe_head, Metrics::PENDING_SAFE_BLOCK_LABEL),
            (update.local_safe_head, Metrics::LOCAL_SAFE_BLOCK_LABEL),
            (update.safe_head, Metrics::SAFE_BLOCK_LABEL),
            (update.finalized_head, Metrics::FINALIZED_BLOCK_LABEL),
            (update.backup_unsafe_head, Metrics::BACKUP_UNSAFE_BLOCK_LABEL),
        ];
        for (head, label) in labelled {
            if let Some(head) = head {
                Self::update_block_label_metric(label, head.block_info.number);
            }
        }

        Self {
            unsafe_head: update.unsafe_head.unwrap_or(self.unsafe_head),
            cross_unsafe_head: update.cross_unsafe_head.unwrap_or(self.cross_unsafe_head),
            pending_safe_head: update.pending_safe_head.unwrap_or(self.pending_safe_head),
            local_safe_head: update.local_safe_head.unwrap_or(self.local_safe_head),
            safe_head: update.safe_head.unwrap_or(self.safe_head),
            finalized_head: update.finalized_head.unwrap_or(self.finalized_head),
            backup_unsafe_head: update.backup_unsafe_head.unwrap_or(self.backup_unsafe_head),
        }
    }

    /// Checks the ordering invariants between heads, returning the first violation.
    pub const fn check_invariants(&self) -> Result<(), HeadOrderingError> {
        let ladder = [
            ("finalized", self.finalized_head, "safe", self.safe_head),
            ("safe", self.safe_head, "local-safe", self.local_safe_head),
            ("local-safe", self.local_safe_head, "cross-unsafe", self.cross_unsafe_head),
            ("cross-unsafe", self.cross_unsafe_head, "unsafe", self.unsafe_head),
            ("pending-safe", self.pending_safe_head, "unsafe", self.unsafe_head),
        ];
        let mut i = 0;
        while i < ladder.len() {
            let (lower, lower_ref, upper, upper_ref) = ladder[i];
            if lower_ref.block_info.number > upper_ref.block_info.number {
                return Err(HeadOrderingError {
                    lower,
                    lower_number: lower_ref.block_info.number,
                    upper,
                    upper_number: upper_ref.block_info.number,
                });
            }
            i += 1;
        }
        Ok(())
    }

    /// Updates a block label metric, keyed by the label.
    #[cfg(feature = "metrics")]
    #[inline]
    fn update_block_label_metric(label: &'static str, number: u64) {
        set!(gauge, Metrics::BLOCK_LABELS, "label", label, number as f64);
    }

    /// Updates a block label metric, keyed by the label.
    #[cfg(not(feature = "metrics"))]
    #[inline]
    const fn update_block_label_metric(_label: &'static str, _number: u64) {}
}

/// Specifies how to update the [`EngineSyncState`].
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct EngineSyncStateUpdate {
    /// New unsafe head.
    pub unsafe_head: Option<L2BlockInfo>,
    /// New cross-unsafe head.
    pub cross_unsafe_head: Option<L2BlockInfo>,
    /// New pending-safe head.
    pub pending_safe_head: Option<L2BlockInfo>,
    /// New local-safe head.
    pub local_safe_head: Option<L2BlockInfo>,
    /// New safe head.
    pub safe_head: Option<L2BlockInfo>,
    /// New finalized head.
    pub finalized_head: Option<L2BlockInfo>,
    /// New backup unsafe head.
    pub backup_unsafe_head: Option<L2BlockInfo>,
}

/// A violated ordering between two heads.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{lower} head #{lower_number} is ahead of {upper} head #{upper_number}")]
pub struct HeadOrderingError {
    /// The head expected to be lower.
    pub lower: &'static str,
    /// Its number.
    pub lower_number: u64,
    /// The head expected to be higher.
    pub upper: &'static str,
    /// Its number.
    pub upper_number: u64,
}
