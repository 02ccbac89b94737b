//! Head resets and engine forkchoice synchronization.

use crate::{
    AttributesWithParent, BlockInfo, BlockRefExt, Deriver, DeriverContext, EngineForkchoiceVersion,
    EngineGateway, ErrorKind, InsertedPayload, L2BlockInfo, RecoveryGuard, SyncEvent, SyncTaskError, bounded_call,
};
use alloy_primitives::B256;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// An error raised while synchronizing the engine forkchoice.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForkchoiceError {
    /// The unsafe head fell behind the finalized head.
    #[error("Unsafe head {unsafe_head} is behind finalized head {finalized}")]
    UnsafeBehindFinalized {
        /// The unsafe head.
        unsafe_head: L2BlockInfo,
        /// The finalized head.
        finalized: L2BlockInfo,
    },
    /// The engine did not accept the backup unsafe head.
    #[error("Cannot restore unsafe chain using backup {backup}: {status}")]
    BackupRejected {
        /// The backup unsafe head.
        backup: L2BlockInfo,
        /// The forkchoice status.
        status: String,
    },
    /// Another recovery holds the guard.
    #[error("Cannot replace block {invalidated}, {guard} in progress")]
    RecoveryInProgress {
        /// The block that should be replaced.
        invalidated: B256,
        /// The guard holder.
        guard: RecoveryGuard,
    },
}

impl SyncTaskError for ForkchoiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsafeBehindFinalized { .. } => ErrorKind::Critical,
            Self::BackupRejected { .. } | Self::RecoveryInProgress { .. } => ErrorKind::Temporary,
        }
    }
}

/// Overwrites heads on reset, restores backup unsafe heads, and pushes the heads to the engine.
#[derive(Debug, Clone)]
pub struct ResetDeriver {
    gateway: Arc<dyn EngineGateway>,
}

impl ResetDeriver {
    /// Creates a new [`ResetDeriver`].
    pub const fn new(gateway: Arc<dyn EngineGateway>) -> Self {
        Self { gateway }
    }

    fn force_reset(
        local_unsafe: Option<L2BlockInfo>,
        cross_unsafe: L2BlockInfo,
        local_safe: L2BlockInfo,
        cross_safe: L2BlockInfo,
        finalized: L2BlockInfo,
        ctx: &mut DeriverContext<'_>,
    ) {
        let ec = ctx.controller_mut();
        if let Some(local_unsafe) = local_unsafe.filter(|b| !b.is_zero()) {
            ec.set_unsafe_head(local_unsafe);
        }
        ec.set_cross_unsafe_head(cross_unsafe);
        ec.set_local_safe_head(local_safe);
        ec.set_pending_safe_head(local_safe);
        ec.set_safe_head(cross_safe);
        ec.set_finalized_head(finalized);
        ec.set_backup_unsafe_head(L2BlockInfo::default(), false);
        ec.release_recovery();
        ec.set_needs_forkchoice_update(true);

        let confirmed = SyncEvent::EngineResetConfirmed {
            local_unsafe: ec.unsafe_head(),
            cross_unsafe: ec.cross_unsafe_head(),
            local_safe: ec.local_safe_head(),
            cross_safe: ec.safe_head(),
            finalized: ec.finalized_head(),
        };
        info!(
            target: "engine",
            unsafe_head = %ec.unsafe_head(),
            safe = %cross_safe,
            finalized = %finalized,
            "Reset engine heads"
        );

        ctx.emit(SyncEvent::try_update_engine());
        ctx.emit(confirmed);
    }

    async fn try_backup_unsafe_reorg(&self, ctx: &mut DeriverContext<'_>) {
        if !ctx.controller().backup_reorg_armed() {
            return;
        }
        if ctx.controller().is_engine_syncing() {
            debug!(target: "engine", "Engine is syncing, deferring backup unsafe reorg");
            return;
        }

        let backup = ctx.controller().backup_unsafe_head();
        ctx.controller_mut().disarm_backup_reorg();
        if backup.is_zero() {
            warn!(target: "engine", "Backup unsafe reorg armed without a backup head");
            ctx.controller_mut().set_backup_unsafe_head(L2BlockInfo::default(), false);
            return;
        }

        let mut fcs = ctx.controller().forkchoice_state();
        fcs.head_block_hash = backup.hash();
        let version = EngineForkchoiceVersion::from_cfg(ctx.cfg(), backup.timestamp());
        let budget = ctx.cfg().timeouts.forkchoice();
        let res = bounded_call(
            ctx.cancellation(),
            budget,
            self.gateway.forkchoice_updated(fcs, None, version),
        )
        .await;

        let updated = match res {
            Ok(updated) => updated,
            Err(e) if e.is_input_error() => {
                ctx.controller_mut().set_backup_unsafe_head(L2BlockInfo::default(), false);
                ctx.emit(SyncEvent::from_task_error(&e));
                return;
            }
            Err(e) => {
                // Retry on the next attempt.
                ctx.controller_mut().set_backup_unsafe_head(backup, true);
                ctx.emit(SyncEvent::from_task_error(&e));
                return;
            }
        };

        if !updated.payload_status.status.is_valid() {
            ctx.controller_mut().set_backup_unsafe_head(L2BlockInfo::default(), false);
            let err = ForkchoiceError::BackupRejected {
                backup,
                status: updated.payload_status.status.to_string(),
            };
            ctx.emit(SyncEvent::from_task_error(&err));
            return;
        }

        let ec = ctx.controller_mut();
        ec.mark_el_sync_finished();
        let update = SyncEvent::ForkchoiceUpdate {
            unsafe_head: backup,
            safe: ec.safe_head(),
            finalized: ec.finalized_head(),
        };
        ec.set_unsafe_head(backup);
        ec.set_backup_unsafe_head(L2BlockInfo::default(), false);
        ec.set_needs_forkchoice_update(false);
        info!(target: "engine", unsafe_head = %backup, "Restored unsafe head from backup");
        ctx.emit(update);
    }

    async fn try_update_engine(
        &self,
        inserted: Option<InsertedPayload>,
        ctx: &mut DeriverContext<'_>,
    ) {
        if !ctx.controller().needs_forkchoice_update() {
            return;
        }
        if ctx.controller().is_engine_syncing() {
            warn!(target: "engine", "Updating forkchoice while the execution layer is syncing");
        }

        let (unsafe_head, finalized) =
            (ctx.controller().unsafe_head(), ctx.controller().finalized_head());
        if unsafe_head.number() < finalized.number() {
            let err = ForkchoiceError::UnsafeBehindFinalized { unsafe_head, finalized };
            ctx.emit(SyncEvent::from_task_error(&err));
            return;
        }

        let fcs = ctx.controller().forkchoice_state();
        let version = EngineForkchoiceVersion::from_cfg(ctx.cfg(), unsafe_head.timestamp());
        let budget = ctx.cfg().timeouts.forkchoice();
        let res = bounded_call(
            ctx.cancellation(),
            budget,
            self.gateway.forkchoice_updated(fcs, None, version),
        )
        .await;
        let updated = match res {
            Ok(updated) => updated,
            Err(e) => {
                ctx.emit(SyncEvent::from_task_error(&e));
                return;
            }
        };

        let ec = ctx.controller_mut();
        if updated.payload_status.status.is_valid() {
            ec.mark_el_sync_finished();
        }
        let pending_safe = ec.pending_safe_head();
        let safe = ec.safe_head();
        if unsafe_head == safe && safe == pending_safe {
            ec.set_backup_unsafe_head(L2BlockInfo::default(), false);
        }
        ec.set_needs_forkchoice_update(false);
        debug!(target: "engine", unsafe_head = %unsafe_head, safe = %safe, "Updated forkchoice");
        if let Some(inserted) = inserted {
            log_inserted(&inserted);
        }

        ctx.emit(SyncEvent::ForkchoiceUpdate { unsafe_head, safe, finalized });
    }

    fn invalidate_block(
        invalidated: BlockInfo,
        attributes: &AttributesWithParent,
        ctx: &mut DeriverContext<'_>,
    ) {
        if let Err(guard) = ctx.controller_mut().begin_interop_replacement() {
            let err = ForkchoiceError::RecoveryInProgress { invalidated: invalidated.hash, guard };
            warn!(target: "interop", %err, "Refusing block replacement");
            ctx.emit(SyncEvent::from_task_error(&err));
            return;
        }

        info!(
            target: "interop",
            %invalidated,
            parent = %attributes.parent,
            "Building deposits-only replacement block"
        );
        ctx.emit(SyncEvent::build_start(attributes.clone()));
    }
}

/// Logs a payload made canonical by a forkchoice update, with its build and insertion times.
fn log_inserted(inserted: &InsertedPayload) {
    let total = inserted.timing.build_started.unwrap_or(inserted.timing.insert_started).elapsed();
    let insert_duration = inserted.timing.insert_started.elapsed();
    let build_duration = total.saturating_sub(insert_duration);
    let mgas = inserted.gas_used as f64 / 1e6;
    info!(
        target: "engine",
        block = %inserted.block,
        txs = inserted.txs,
        concluding = inserted.concluding,
        derived_from = ?inserted.derived_from.map(|b| b.id()),
        build_duration = ?build_duration,
        insert_duration = ?insert_duration,
        total_duration = ?total,
        mgas,
        mgasps = mgas / total.as_secs_f64().max(f64::EPSILON),
        "Inserted new L2 unsafe block"
    );
}

#[async_trait]
impl Deriver for ResetDeriver {
    async fn on_event(&mut self, event: &SyncEvent, ctx: &mut DeriverContext<'_>) -> bool {
        match event {
            SyncEvent::ForceReset { local_unsafe, cross_unsafe, local_safe, cross_safe, finalized } => {
                Self::force_reset(
                    *local_unsafe,
                    *cross_unsafe,
                    *local_safe,
                    *cross_safe,
                    *finalized,
                    ctx,
                )
            }
            SyncEvent::TryBackupUnsafeReorg => self.try_backup_unsafe_reorg(ctx).await,
            SyncEvent::TryUpdateEngine { inserted } => self.try_update_engine(*inserted, ctx).await,
            SyncEvent::InteropInvalidateBlock { invalidated, attributes } => {
                Self::invalidate_block(*invalidated, attributes, ctx)
            }
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        EngineGatewayError, EventSystem, PayloadTiming, SyncConfig, SyncMode,
        test_utils::{
            EventRecorder, MockGateway, attributes, fcu_valid, init_test_tracing, l1_info_tx,
            l2_ref,
        },
    };
    use std::time::Instant;
    use alloy_rpc_types_engine::{ForkchoiceUpdated, PayloadStatusEnum};
    use rstest::rstest;
    use tokio_util::sync::CancellationToken;

    fn system(cfg: SyncConfig, gateway: MockGateway) -> (EventSystem, EventRecorder) {
        let (mut system, _tx) = EventSystem::new(Arc::new(cfg), CancellationToken::new());
        let recorder = EventRecorder::default();
        system.add_deriver(Box::new(recorder.clone()));
        system.add_deriver(Box::new(ResetDeriver::new(Arc::new(gateway))));
        (system, recorder)
    }

    fn reorged(number: u64) -> L2BlockInfo {
        let mut block = l2_ref(number);
        block.block_info.hash = B256::repeat_byte(0xbb);
        block
    }

    #[tokio::test]
    async fn test_force_reset_overwrites_every_head() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_forkchoice_updated()
            .withf(|fcs, attrs, _| fcs.head_block_hash == l2_ref(9).hash() && attrs.is_none())
            .times(1)
            .returning(|_, _, _| Ok(fcu_valid(None)));
        let (mut system, recorder) = system(SyncConfig::default(), gateway);
        let ec = system.controller_mut();
        ec.set_unsafe_head(l2_ref(12));
        ec.set_backup_unsafe_head(l2_ref(11), true);
        ec.set_pending_safe_head(l2_ref(10));

        system.emit(SyncEvent::ForceReset {
            local_unsafe: Some(l2_ref(9)),
            cross_unsafe: l2_ref(8),
            local_safe: l2_ref(7),
            cross_safe: l2_ref(6),
            finalized: l2_ref(5),
        });
        system
            .drain_until(|ev| matches!(ev, SyncEvent::ForceReset { .. }))
            .await
            .unwrap();

        let ec = system.controller();
        assert_eq!(ec.unsafe_head(), l2_ref(9));
        assert_eq!(ec.cross_unsafe_head(), l2_ref(8));
        assert_eq!(ec.local_safe_head(), l2_ref(7));
        assert_eq!(ec.pending_safe_head(), l2_ref(7));
        assert_eq!(ec.safe_head(), l2_ref(6));
        assert_eq!(ec.finalized_head(), l2_ref(5));
        assert!(ec.backup_unsafe_head().is_zero());
        assert!(!ec.backup_reorg_armed());
        assert_eq!(ec.recovery(), RecoveryGuard::Idle);

        system.drain().await.unwrap();
        assert_eq!(
            recorder.kinds(),
            vec!["force-reset", "try-update-engine", "engine-reset-confirmed", "forkchoice-update"]
        );
        assert!(!system.controller().needs_forkchoice_update());
    }

    #[rstest]
    #[case::omitted(None)]
    #[case::zero(Some(L2BlockInfo::default()))]
    #[tokio::test]
    async fn test_force_reset_keeps_unsafe_head(#[case] local_unsafe: Option<L2BlockInfo>) {
        let mut gateway = MockGateway::new();
        gateway.expect_forkchoice_updated().returning(|_, _, _| Ok(fcu_valid(None)));
        let (mut system, _) = system(SyncConfig::default(), gateway);
        system.controller_mut().set_unsafe_head(l2_ref(12));

        system.emit(SyncEvent::ForceReset {
            local_unsafe,
            cross_unsafe: l2_ref(8),
            local_safe: l2_ref(7),
            cross_safe: l2_ref(6),
            finalized: l2_ref(5),
        });
        system.drain().await.unwrap();

        assert_eq!(system.controller().unsafe_head(), l2_ref(12));
    }

    #[tokio::test]
    async fn test_backup_reorg_restores_unsafe_head() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_forkchoice_updated()
            .withf(|fcs, _, _| fcs.head_block_hash == l2_ref(5).hash())
            .times(1)
            .returning(|_, _, _| Ok(fcu_valid(None)));
        let (mut system, recorder) = system(SyncConfig::default(), gateway);
        system.controller_mut().set_unsafe_head(reorged(5));
        system.controller_mut().set_backup_unsafe_head(l2_ref(5), true);

        system.emit(SyncEvent::TryBackupUnsafeReorg);
        system.drain().await.unwrap();

        let ec = system.controller();
        assert_eq!(ec.unsafe_head(), l2_ref(5));
        assert!(ec.backup_unsafe_head().is_zero());
        assert_eq!(ec.recovery(), RecoveryGuard::Idle);
        assert_eq!(recorder.kinds(), vec!["try-backup-unsafe-reorg", "forkchoice-update"]);
    }

    #[tokio::test]
    async fn test_backup_reorg_requires_arming() {
        let (mut system, recorder) = system(SyncConfig::default(), MockGateway::new());
        system.controller_mut().set_backup_unsafe_head(l2_ref(5), false);

        system.emit(SyncEvent::TryBackupUnsafeReorg);
        system.drain().await.unwrap();

        assert_eq!(system.controller().backup_unsafe_head(), l2_ref(5));
        assert_eq!(recorder.kinds(), vec!["try-backup-unsafe-reorg"]);
    }

    #[tokio::test]
    async fn test_backup_reorg_waits_for_el_sync() {
        let cfg = SyncConfig { sync_mode: SyncMode::ExecutionLayer, ..Default::default() };
        let (mut system, _) = system(cfg, MockGateway::new());
        system.controller_mut().set_backup_unsafe_head(l2_ref(5), true);

        system.emit(SyncEvent::TryBackupUnsafeReorg);
        system.drain().await.unwrap();

        assert!(system.controller().backup_reorg_armed());
    }

    #[rstest]
    #[case::input(EngineGatewayError::InvalidForkchoiceState("bad".into()), "reset-request", false)]
    #[case::transport(EngineGatewayError::Transport("down".into()), "engine-temporary-error", true)]
    #[tokio::test]
    async fn test_backup_reorg_errors(
        #[case] err: EngineGatewayError,
        #[case] expected: &str,
        #[case] rearmed: bool,
    ) {
        let mut gateway = MockGateway::new();
        gateway.expect_forkchoice_updated().returning(move |_, _, _| Err(err.clone()));
        let (mut system, recorder) = system(SyncConfig::default(), gateway);
        system.controller_mut().set_unsafe_head(reorged(5));
        system.controller_mut().set_backup_unsafe_head(l2_ref(5), true);

        system.emit(SyncEvent::TryBackupUnsafeReorg);
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds()[1], expected);
        assert_eq!(system.controller().backup_reorg_armed(), rearmed);
        assert_eq!(system.controller().backup_unsafe_head().is_zero(), !rearmed);
        assert_eq!(system.controller().unsafe_head(), reorged(5));
    }

    #[tokio::test]
    async fn test_backup_reorg_rejected_by_engine() {
        let mut gateway = MockGateway::new();
        gateway.expect_forkchoice_updated().returning(|_, _, _| {
            Ok(ForkchoiceUpdated::from_status(PayloadStatusEnum::Invalid {
                validation_error: "unknown block".to_string(),
            }))
        });
        let (mut system, recorder) = system(SyncConfig::default(), gateway);
        system.controller_mut().set_backup_unsafe_head(l2_ref(5), true);

        system.emit(SyncEvent::TryBackupUnsafeReorg);
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds(), vec!["try-backup-unsafe-reorg", "engine-temporary-error"]);
        assert!(system.controller().backup_unsafe_head().is_zero());
    }

    #[tokio::test]
    async fn test_update_engine_only_when_needed() {
        let (mut system, recorder) = system(SyncConfig::default(), MockGateway::new());

        system.emit(SyncEvent::try_update_engine());
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds(), vec!["try-update-engine"]);
    }

    #[tokio::test]
    async fn test_update_engine_clears_backup_when_heads_converge() {
        let mut gateway = MockGateway::new();
        gateway.expect_forkchoice_updated().times(1).returning(|_, _, _| Ok(fcu_valid(None)));
        let (mut system, recorder) = system(SyncConfig::default(), gateway);
        let ec = system.controller_mut();
        ec.set_unsafe_head(l2_ref(4));
        ec.set_pending_safe_head(l2_ref(4));
        ec.set_safe_head(l2_ref(4));
        ec.set_backup_unsafe_head(l2_ref(6), false);

        system.emit(SyncEvent::try_update_engine());
        system.emit(SyncEvent::try_update_engine());
        system.drain().await.unwrap();

        assert!(system.controller().backup_unsafe_head().is_zero());
        assert_eq!(
            recorder.events()[2],
            SyncEvent::ForkchoiceUpdate {
                unsafe_head: l2_ref(4),
                safe: l2_ref(4),
                finalized: L2BlockInfo::default(),
            }
        );
    }

    #[rstest]
    #[case::pre_ecotone_head(l2_ref(4), EngineForkchoiceVersion::V2)]
    #[case::ecotone_head(l2_ref(6), EngineForkchoiceVersion::V3)]
    #[tokio::test]
    async fn test_update_engine_version_follows_unsafe_head(
        #[case] head: L2BlockInfo,
        #[case] expected: EngineForkchoiceVersion,
    ) {
        let mut gateway = MockGateway::new();
        gateway
            .expect_forkchoice_updated()
            .withf(move |_, attrs, version| attrs.is_none() && *version == expected)
            .times(1)
            .returning(|_, _, _| Ok(fcu_valid(None)));
        let mut cfg = SyncConfig::default();
        cfg.rollup.hardforks.ecotone_time = Some(10);
        let (mut system, recorder) = system(cfg, gateway);
        system.controller_mut().set_unsafe_head(head);

        system.emit(SyncEvent::try_update_engine());
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds(), vec!["try-update-engine", "forkchoice-update"]);
    }

    #[tokio::test]
    async fn test_update_engine_logs_inserted_payload() {
        init_test_tracing();
        let mut gateway = MockGateway::new();
        gateway.expect_forkchoice_updated().times(1).returning(|_, _, _| Ok(fcu_valid(None)));
        let (mut system, recorder) = system(SyncConfig::default(), gateway);
        system.controller_mut().set_unsafe_head(l2_ref(5));

        let build_started = Instant::now();
        let insert_started = Instant::now();
        system.emit(SyncEvent::TryUpdateEngine {
            inserted: Some(InsertedPayload {
                block: l2_ref(5),
                txs: 1,
                gas_used: 21_000,
                concluding: false,
                derived_from: None,
                timing: PayloadTiming { build_started: Some(build_started), insert_started },
            }),
        });
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds(), vec!["try-update-engine", "forkchoice-update"]);
        assert!(!system.controller().needs_forkchoice_update());
    }

    #[tokio::test]
    async fn test_update_engine_unsafe_behind_finalized_is_critical() {
        let (mut system, _) = system(SyncConfig::default(), MockGateway::new());
        system.controller_mut().set_unsafe_head(l2_ref(2));
        system.controller_mut().set_finalized_head(l2_ref(3));

        system.emit(SyncEvent::try_update_engine());
        assert!(matches!(system.drain().await, Err(crate::SyncError::Critical(_))));
    }

    #[tokio::test]
    async fn test_invalidate_block_refused_during_backup_reorg() {
        let (mut system, recorder) = system(SyncConfig::default(), MockGateway::new());
        system.controller_mut().set_backup_unsafe_head(l2_ref(5), true);

        system.emit(SyncEvent::InteropInvalidateBlock {
            invalidated: l2_ref(6).block_info,
            attributes: Box::new(attributes(l2_ref(5), vec![l1_info_tx()])),
        });
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds(), vec!["interop-invalidate-block", "engine-temporary-error"]);
        assert_eq!(system.controller().recovery(), RecoveryGuard::BackupUnsafeReorg);
    }

    #[tokio::test]
    async fn test_invalidate_block_starts_replacement_build() {
        let (mut system, recorder) = system(SyncConfig::default(), MockGateway::new());

        system.emit(SyncEvent::InteropInvalidateBlock {
            invalidated: l2_ref(6).block_info,
            attributes: Box::new(attributes(l2_ref(5), vec![l1_info_tx()])),
        });
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds(), vec!["interop-invalidate-block", "build-start"]);
        assert_eq!(system.controller().recovery(), RecoveryGuard::InteropReplacement);
    }
}
