//! The engine controller: the head registry plus the bookkeeping of engine synchronization.

use crate::{
    EngineSyncState, EngineSyncStateUpdate, HeadOrderingError, L2BlockInfo, SyncConfig, SyncMode,
};
use alloy_rpc_types_engine::ForkchoiceState;
use std::sync::Arc;

/// The recovery path currently in progress.
///
/// Backup unsafe reorgs and interop block replacements both rewrite the unsafe chain, so only one
/// of them may be in flight at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, derive_more::Display)]
pub enum RecoveryGuard {
    /// No recovery in progress.
    #[default]
    #[display("idle")]
    Idle,
    /// A backup unsafe reorg is armed.
    #[display("backup-unsafe-reorg")]
    BackupUnsafeReorg,
    /// An interop replacement block is being built.
    #[display("interop-replacement")]
    InteropReplacement,
}

/// Owns the [`EngineSyncState`].
///
/// The setters are the only way heads change, and none of them perform I/O.
#[derive(Debug, Clone)]
pub struct EngineController {
    /// The sync config.
    cfg: Arc<SyncConfig>,
    /// The heads.
    state: EngineSyncState,
    /// Whether the engine forkchoice lags behind the heads.
    needs_forkchoice_update: bool,
    /// Whether the engine should be reorged back to the backup unsafe head.
    backup_reorg_armed: bool,
    /// Whether the engine answered with a valid status at least once.
    el_sync_finished: bool,
    /// The recovery path in progress.
    recovery: RecoveryGuard,
}

impl EngineController {
    /// Creates a new [`EngineController`] with every head unset.
    pub fn new(cfg: Arc<SyncConfig>) -> Self {
        Self {
            cfg,
            state: EngineSyncState::default(),
            needs_forkchoice_update: false,
            backup_reorg_armed: false,
            el_sync_finished: false,
            recovery: RecoveryGuard::Idle,
        }
    }

    /// Returns the sync config.
    pub fn cfg(&self) -> &SyncConfig {
        &self.cfg
    }

    /// Returns the heads.
    pub const fn state(&self) -> &EngineSyncState {
        &self.state
    }

    /// Returns the unsafe head.
    pub const fn unsafe_head(&self) -> L2BlockInfo {
        self.state.unsafe_head()
    }

    /// Returns the cross-unsafe head.
    pub const fn cross_unsafe_head(&self) -> L2BlockInfo {
        self.state.cross_unsafe_head()
    }

    /// Returns the pending-safe head.
    pub const fn pending_safe_head(&self) -> L2BlockInfo {
        self.state.pending_safe_head()
    }

    /// Returns the local-safe head.
    pub const fn local_safe_head(&self) -> L2BlockInfo {
        self.state.local_safe_head()
    }

    /// Returns the safe head.
    pub const fn safe_head(&self) -> L2BlockInfo {
        self.state.safe_head()
    }

    /// Returns the finalized head.
    pub const fn finalized_head(&self) -> L2BlockInfo {
        self.state.finalized_head()
    }

    /// Returns the backup unsafe head.
    pub const fn backup_unsafe_head(&self) -> L2BlockInfo {
        self.state.backup_unsafe_head()
    }

    /// Sets the unsafe head.
    pub fn set_unsafe_head(&mut self, block: L2BlockInfo) {
        self.apply(EngineSyncStateUpdate { unsafe_head: Some(block), ..Default::default() });
        self.needs_forkchoice_update = true;
    }

    /// Sets the cross-unsafe head.
    pub fn set_cross_unsafe_head(&mut self, block: L2BlockInfo) {
        self.apply(EngineSyncStateUpdate { cross_unsafe_head: Some(block), ..Default::default() });
    }

    /// Sets the pending-safe head.
    pub fn set_pending_safe_head(&mut self, block: L2BlockInfo) {
        self.apply(EngineSyncStateUpdate { pending_safe_head: Some(block), ..Default::default() });
    }

    /// Sets the local-safe head.
    pub fn set_local_safe_head(&mut self, block: L2BlockInfo) {
        self.apply(EngineSyncStateUpdate { local_safe_head: Some(block), ..Default::default() });
    }

    /// Sets the safe head.
    pub fn set_safe_head(&mut self, block: L2BlockInfo) {
        self.apply(EngineSyncStateUpdate { safe_head: Some(block), ..Default::default() });
        self.needs_forkchoice_update = true;
    }

    /// Sets the finalized head.
    pub fn set_finalized_head(&mut self, block: L2BlockInfo) {
        self.apply(EngineSyncStateUpdate { finalized_head: Some(block), ..Default::default() });
        self.needs_forkchoice_update = true;
    }

    /// Sets the backup unsafe head.
    ///
    /// With `trigger_reorg`, the engine is reorged back to the backup on the next
    /// [`SyncEvent::TryBackupUnsafeReorg`], unless an interop replacement is in flight. In that
    /// case the backup is recorded but left unarmed.
    ///
    /// [`SyncEvent::TryBackupUnsafeReorg`]: crate::SyncEvent::TryBackupUnsafeReorg
    pub fn set_backup_unsafe_head(&mut self, block: L2BlockInfo, trigger_reorg: bool) {
        self.apply(EngineSyncStateUpdate {
            backup_unsafe_head: Some(block),
            ..Default::default()
        });

        if trigger_reorg && self.recovery == RecoveryGuard::InteropReplacement {
            warn!(
                target: "engine",
                backup = %block,
                "Interop replacement in progress, not arming backup unsafe reorg"
            );
            self.backup_reorg_armed = false;
            return;
        }

        self.backup_reorg_armed = trigger_reorg;
        if trigger_reorg {
            self.recovery = RecoveryGuard::BackupUnsafeReorg;
        } else if self.recovery == RecoveryGuard::BackupUnsafeReorg {
            self.recovery = RecoveryGuard::Idle;
        }
    }

    /// Returns `true` if a backup unsafe reorg is armed.
    pub const fn backup_reorg_armed(&self) -> bool {
        self.backup_reorg_armed
    }

    /// Disarms the backup unsafe reorg, keeping the backup head.
    pub const fn disarm_backup_reorg(&mut self) {
        self.backup_reorg_armed = false;
    }

    /// Returns `true` if the engine forkchoice lags behind the heads.
    pub const fn needs_forkchoice_update(&self) -> bool {
        self.needs_forkchoice_update
    }

    /// Records whether the engine forkchoice lags behind the heads.
    pub const fn set_needs_forkchoice_update(&mut self, needed: bool) {
        self.needs_forkchoice_update = needed;
    }

    /// Returns `true` while the execution layer syncs on its own and has not reported a valid
    /// head yet.
    pub fn is_engine_syncing(&self) -> bool {
        self.cfg.sync_mode == SyncMode::ExecutionLayer && !self.el_sync_finished
    }

    /// Records a valid engine response, ending execution layer sync.
    pub fn mark_el_sync_finished(&mut self) {
        if !self.el_sync_finished && self.cfg.sync_mode == SyncMode::ExecutionLayer {
            info!(target: "engine", unsafe_head = %self.unsafe_head(), "Finished execution layer sync");
        }
        self.el_sync_finished = true;
    }

    /// Returns the recovery path in progress.
    pub const fn recovery(&self) -> RecoveryGuard {
        self.recovery
    }

    /// Claims the recovery guard for an interop replacement.
    ///
    /// Fails with the current guard if a backup unsafe reorg is armed.
    pub const fn begin_interop_replacement(&mut self) -> Result<(), RecoveryGuard> {
        if self.backup_reorg_armed {
            return Err(self.recovery);
        }
        self.recovery = RecoveryGuard::InteropReplacement;
        Ok(())
    }

    /// Releases the recovery guard.
    pub const fn release_recovery(&mut self) {
        self.recovery = RecoveryGuard::Idle;
    }

    /// Returns the [`ForkchoiceState`] of the heads.
    pub const fn forkchoice_state(&self) -> ForkchoiceState {
        self.state.create_forkchoice_state()
    }

    /// Checks the ordering invariants between heads.
    pub const fn check_invariants(&self) -> Result<(), HeadOrderingError> {
        self.state.check_invariants()
    }

    fn apply(&mut self, update: EngineSyncStateUpdate) {
        self.state = self.state.apply_update(update);
    }
}
