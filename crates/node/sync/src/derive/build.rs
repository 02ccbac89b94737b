//! The block building lifecycle: start, seal, cancel, and rejected attributes.

use super::abandon_replacement;
use crate::{
    AttributesWithParent, BlockInfo, BlockRefExt, Deriver, DeriverContext,
    EngineForkchoiceVersion, EngineGateway, ErrorKind, FromPayloadError, L2BlockInfo, PayloadInfo, SyncEvent, SyncTaskError,
    attributes::is_deposit, bounded_call, l2_block_info,
};
use alloy_rpc_types_engine::{ForkchoiceState, PayloadStatusEnum};
use async_trait::async_trait;
use op_alloy_rpc_types_engine::OpExecutionPayloadEnvelope;
use std::{sync::Arc, time::Instant};
use thiserror::Error;

/// An error raised while building a block.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The parent of the attributes is behind the finalized head.
    #[error("Cannot build on {parent}, it is behind the finalized head {finalized}")]
    ParentBehindFinalized {
        /// The parent of the attributes.
        parent: L2BlockInfo,
        /// The finalized head.
        finalized: L2BlockInfo,
    },
    /// The engine accepted the attributes without returning a payload ID.
    #[error("Engine did not return a payload ID")]
    MissingPayloadId,
    /// The engine answered the build request with an unexpected status.
    #[error("Unexpected forkchoice status while starting a build: {0}")]
    UnexpectedStatus(String),
    /// The sealed payload has no transactions.
    #[error("Sealed payload has no transactions")]
    EmptyPayload,
    /// The first transaction of the sealed payload is not the L1 info deposit.
    #[error("First transaction of sealed payload is not a deposit")]
    FirstTxNotDeposit,
    /// A deposit follows a user transaction in the sealed payload.
    #[error("Deposit at index {0} follows a user transaction")]
    DepositAfterUserTx(usize),
    /// The block reference of the sealed payload could not be derived.
    #[error(transparent)]
    BlockInfo(#[from] FromPayloadError),
    /// Deposits-only attributes were rejected.
    #[error("Deposits-only attributes on {parent} were rejected: {err}")]
    DepositsOnlyRejected {
        /// The parent of the attributes.
        parent: L2BlockInfo,
        /// The rejection cause.
        err: String,
    },
}

impl SyncTaskError for BuildError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ParentBehindFinalized { .. } | Self::DepositsOnlyRejected { .. } => {
                ErrorKind::Critical
            }
            _ => ErrorKind::Temporary,
        }
    }
}

/// Drives block building on the engine.
#[derive(Debug, Clone)]
pub struct BuildDeriver {
    gateway: Arc<dyn EngineGateway>,
}

impl BuildDeriver {
    /// Creates a new [`BuildDeriver`].
    pub const fn new(gateway: Arc<dyn EngineGateway>) -> Self {
        Self { gateway }
    }

    async fn start(&self, attributes: &AttributesWithParent, ctx: &mut DeriverContext<'_>) {
        let ec = ctx.controller();
        let parent = attributes.parent;
        let (safe, finalized) = (ec.safe_head(), ec.finalized_head());

        if parent.number() < finalized.number() {
            let err = BuildError::ParentBehindFinalized { parent, finalized };
            ctx.emit(SyncEvent::from_task_error(&err));
            return;
        }

        let state = ForkchoiceState {
            head_block_hash: parent.hash(),
            safe_block_hash: safe.hash(),
            finalized_block_hash: finalized.hash(),
        };
        let version = EngineForkchoiceVersion::from_cfg(ctx.cfg(), attributes.timestamp());
        let budget = ctx.cfg().timeouts.build_start();
        let start = Instant::now();
        let res = bounded_call(
            ctx.cancellation(),
            budget,
            self.gateway.forkchoice_updated(state, Some(attributes.attributes.clone()), version),
        )
        .await;

        let updated = match res {
            Ok(updated) => updated,
            Err(e) if e.is_invalid_payload_attributes() => {
                ctx.emit(SyncEvent::BuildInvalid {
                    attributes: Box::new(attributes.clone()),
                    err: e.to_string(),
                });
                return;
            }
            Err(e) => {
                warn!(target: "engine_builder", parent = %parent, error = %e, "Failed to start block build");
                abandon_replacement(ctx, attributes.derived_from);
                ctx.emit(SyncEvent::from_task_error(&e));
                return;
            }
        };

        match updated.payload_status.status {
            PayloadStatusEnum::Valid => {
                let Some(id) = updated.payload_id else {
                    abandon_replacement(ctx, attributes.derived_from);
                    ctx.emit(SyncEvent::from_task_error(&BuildError::MissingPayloadId));
                    return;
                };
                ctx.controller_mut().mark_el_sync_finished();

                let info = PayloadInfo { id, timestamp: attributes.timestamp() };
                debug!(
                    target: "engine_builder",
                    %info,
                    parent = %parent,
                    derived = attributes.is_derived(),
                    elapsed = ?start.elapsed(),
                    "Started block build"
                );
                ctx.emit(SyncEvent::ForkchoiceUpdate { unsafe_head: parent, safe, finalized });
                ctx.emit(SyncEvent::BuildStarted {
                    info,
                    attributes: Box::new(attributes.clone()),
                    build_started: start,
                });
            }
            PayloadStatusEnum::Invalid { validation_error } => {
                ctx.emit(SyncEvent::BuildInvalid {
                    attributes: Box::new(attributes.clone()),
                    err: validation_error,
                });
            }
            status => {
                abandon_replacement(ctx, attributes.derived_from);
                let err = BuildError::UnexpectedStatus(status.to_string());
                ctx.emit(SyncEvent::from_task_error(&err));
            }
        }
    }

    async fn seal(
        &self,
        info: PayloadInfo,
        concluding: bool,
        derived_from: Option<BlockInfo>,
        build_started: Option<Instant>,
        ctx: &mut DeriverContext<'_>,
    ) {
        let budget = ctx.cfg().timeouts.build_seal();
        let start = Instant::now();
        let res = bounded_call(ctx.cancellation(), budget, self.gateway.get_payload(info)).await;

        let envelope = match res {
            Ok(envelope) => envelope,
            Err(e) if e.is_unknown_payload() => {
                ctx.emit(SyncEvent::PayloadSealInvalid {
                    info,
                    err: e.to_string(),
                    concluding,
                    derived_from,
                });
                return;
            }
            Err(e) => {
                ctx.emit(SyncEvent::PayloadSealExpired {
                    info,
                    err: e.to_string(),
                    concluding,
                    derived_from,
                });
                return;
            }
        };

        let block = match check_sealed_payload(&envelope).and_then(|_| {
            l2_block_info(&envelope, ctx.cfg().genesis()).map_err(BuildError::from)
        }) {
            Ok(block) => block,
            Err(e) => {
                ctx.emit(SyncEvent::PayloadSealInvalid {
                    info,
                    err: e.to_string(),
                    concluding,
                    derived_from,
                });
                return;
            }
        };

        info!(
            target: "engine_builder",
            block = %block,
            txs = envelope.execution_payload.as_v1().transactions.len(),
            elapsed = ?start.elapsed(),
            "Sealed block"
        );
        ctx.emit(SyncEvent::BuildSealed {
            info,
            envelope: Box::new(envelope),
            block,
            concluding,
            derived_from,
            build_started,
        });
    }

    fn invalid(attributes: &AttributesWithParent, err: &str, ctx: &mut DeriverContext<'_>) {
        if attributes.is_deposits_only() {
            let err =
                BuildError::DepositsOnlyRejected { parent: attributes.parent, err: err.to_string() };
            error!(target: "engine_builder", error = %err, "Deposits-only attributes rejected");
            ctx.emit(SyncEvent::from_task_error(&err));
            return;
        }

        // Holocene is gated on the L1 block the attributes were derived from.
        if let Some(derived_from) = attributes.derived_from {
            if ctx.cfg().is_holocene_active(derived_from.timestamp) {
                warn!(
                    target: "engine_builder",
                    parent = %attributes.parent,
                    %derived_from,
                    %err,
                    "Derived attributes rejected, requesting deposits-only attributes"
                );
                ctx.emit(SyncEvent::DepositsOnlyPayloadAttributesRequest {
                    parent: attributes.parent.id(),
                    derived_from,
                });
                return;
            }
        }

        warn!(
            target: "engine_builder",
            parent = %attributes.parent,
            %err,
            "Attributes rejected, dropping them and rolling back pending safe head"
        );
        let ec = ctx.controller_mut();
        let safe = ec.safe_head();
        ec.set_pending_safe_head(safe);
        let backup = ec.backup_unsafe_head();
        let restore = !backup.is_zero();
        if restore {
            ec.set_backup_unsafe_head(backup, true);
        }

        ctx.emit(SyncEvent::InvalidPayloadAttributes {
            attributes: Box::new(attributes.clone()),
            err: err.to_string(),
        });
        if restore {
            ctx.emit(SyncEvent::TryBackupUnsafeReorg);
        }
    }

    async fn cancel(&self, info: PayloadInfo, force: bool, ctx: &mut DeriverContext<'_>) {
        let budget = ctx.cfg().timeouts.build_cancel();
        match bounded_call(ctx.cancellation(), budget, self.gateway.get_payload(info)).await {
            Ok(_) => info!(target: "engine_builder", %info, "Cancelled block build"),
            Err(e) if e.is_unknown_payload() => {
                debug!(target: "engine_builder", %info, "Build already gone, nothing to cancel")
            }
            Err(e) if force => {
                warn!(target: "engine_builder", %info, error = %e, "Failed to cancel block build")
            }
            Err(e) => ctx.emit(SyncEvent::from_task_error(&e)),
        }
    }
}

/// Checks the transaction layout of a sealed payload: deposits first, starting with the L1 info
/// deposit.
pub(crate) fn check_sealed_payload(envelope: &OpExecutionPayloadEnvelope) -> Result<(), BuildError> {
    let txs = &envelope.execution_payload.as_v1().transactions;
    let first = txs.first().ok_or(BuildError::EmptyPayload)?;
    if !is_deposit(first) {
        return Err(BuildError::FirstTxNotDeposit);
    }
    let user_start = txs.iter().position(|tx| !is_deposit(tx)).unwrap_or(txs.len());
    if let Some(offset) = txs[user_start..].iter().position(is_deposit) {
        return Err(BuildError::DepositAfterUserTx(user_start + offset));
    }
    Ok(())
}

#[async_trait]
impl Deriver for BuildDeriver {
    async fn on_event(&mut self, event: &SyncEvent, ctx: &mut DeriverContext<'_>) -> bool {
        match event {
            SyncEvent::BuildStart { attributes } => self.start(attributes, ctx).await,
            SyncEvent::BuildStarted { info, attributes, build_started } => {
                // Sequencer builds are sealed by the sequencer once the slot is over.
                if attributes.is_derived() {
                    ctx.emit(SyncEvent::BuildSeal {
                        info: *info,
                        concluding: attributes.concluding,
                        derived_from: attributes.derived_from,
                        build_started: Some(*build_started),
                    });
                }
            }
            SyncEvent::BuildSeal { info, concluding, derived_from, build_started } => {
                self.seal(*info, *concluding, *derived_from, *build_started, ctx).await
            }
            SyncEvent::BuildSealed {
                envelope,
                block,
                concluding,
                derived_from,
                build_started,
                ..
            } => {
                if derived_from.is_some() {
                    ctx.emit(SyncEvent::PayloadProcess {
                        envelope: envelope.clone(),
                        block: *block,
                        concluding: *concluding,
                        derived_from: *derived_from,
                        build_started: *build_started,
                    });
                }
            }
            SyncEvent::BuildInvalid { attributes, err } => Self::invalid(attributes, err, ctx),
            SyncEvent::BuildCancel { info, force } => self.cancel(*info, *force, ctx).await,
            SyncEvent::PayloadSealInvalid { info, err, derived_from, .. } => {
                warn!(target: "engine_builder", %info, %err, "Sealed payload is invalid");
                abandon_replacement(ctx, *derived_from);
                if derived_from.is_some() {
                    let ec = ctx.controller_mut();
                    let safe = ec.safe_head();
                    ec.set_pending_safe_head(safe);
                    let unsafe_head = ec.unsafe_head();
                    ctx.emit(SyncEvent::PendingSafeUpdate { pending_safe: safe, unsafe_head });
                }
            }
            SyncEvent::PayloadSealExpired { info, err, derived_from, .. } => {
                warn!(target: "engine_builder", %info, %err, "Failed to seal payload");
                abandon_replacement(ctx, *derived_from);
                ctx.emit(SyncEvent::EngineTemporaryError { err: err.clone() });
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
        EngineGatewayError, EventSystem, SyncConfig,
        test_utils::{
            EventRecorder, MockGateway, attributes, derived_attributes, envelope_with_txs,
            fcu_valid, l1_info_tx, l2_ref,
        },
    };
    use alloy_primitives::{B256, Bytes};
    use alloy_rpc_types_engine::{ForkchoiceUpdated, PayloadId};
    use rstest::rstest;
    use tokio_util::sync::CancellationToken;

    fn system(cfg: SyncConfig, gateway: MockGateway) -> (EventSystem, EventRecorder) {
        let (mut system, _tx) = EventSystem::new(Arc::new(cfg), CancellationToken::new());
        let recorder = EventRecorder::default();
        system.add_deriver(Box::new(recorder.clone()));
        system.add_deriver(Box::new(BuildDeriver::new(Arc::new(gateway))));
        (system, recorder)
    }

    #[tokio::test]
    async fn test_build_start_emits_started() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_forkchoice_updated()
            .withf(|state, attrs, version| {
                state.head_block_hash == l2_ref(4).hash()
                    && attrs.is_some()
                    && *version == EngineForkchoiceVersion::V2
            })
            .times(1)
            .returning(|_, _, _| Ok(fcu_valid(Some(PayloadId::new([1; 8])))));
        let (mut system, recorder) = system(SyncConfig::default(), gateway);

        let attrs = attributes(l2_ref(4), vec![l1_info_tx()]);
        system.emit(SyncEvent::build_start(attrs));
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds(), vec!["build-start", "forkchoice-update", "build-started"]);
    }

    #[rstest]
    #[case::invalid_fcs(EngineGatewayError::InvalidForkchoiceState("bad".into()), "reset-request")]
    #[case::invalid_attributes(EngineGatewayError::InvalidPayloadAttributes("bad".into()), "build-invalid")]
    #[case::transport(EngineGatewayError::Transport("down".into()), "engine-temporary-error")]
    #[tokio::test]
    async fn test_build_start_errors(#[case] err: EngineGatewayError, #[case] expected: &str) {
        let mut gateway = MockGateway::new();
        gateway.expect_forkchoice_updated().returning(move |_, _, _| Err(err.clone()));
        let (mut system, recorder) = system(SyncConfig::default(), gateway);

        system.emit(SyncEvent::build_start(attributes(l2_ref(4), vec![l1_info_tx()])));
        let _ = system.drain().await;

        assert_eq!(recorder.kinds()[1], expected);
    }

    #[tokio::test]
    async fn test_build_start_invalid_status() {
        let mut gateway = MockGateway::new();
        gateway.expect_forkchoice_updated().returning(|_, _, _| {
            Ok(ForkchoiceUpdated::from_status(PayloadStatusEnum::Invalid {
                validation_error: "bad tx".to_string(),
            }))
        });
        let (mut system, recorder) = system(SyncConfig::default(), gateway);

        system.emit(SyncEvent::build_start(attributes(
            l2_ref(4),
            vec![l1_info_tx(), Bytes::from_static(&[0x02, 0xc0])],
        )));
        system.drain().await.unwrap();

        assert_eq!(
            recorder.kinds(),
            vec!["build-start", "build-invalid", "invalid-payload-attributes"]
        );
    }

    #[tokio::test]
    async fn test_build_start_behind_finalized_is_critical() {
        let (mut system, recorder) = system(SyncConfig::default(), MockGateway::new());
        system.controller_mut().set_safe_head(l2_ref(5));
        system.controller_mut().set_finalized_head(l2_ref(5));

        system.emit(SyncEvent::build_start(attributes(l2_ref(4), vec![l1_info_tx()])));
        assert!(matches!(system.drain().await, Err(crate::SyncError::Critical(_))));
        assert_eq!(recorder.kinds(), vec!["build-start", "critical-error"]);
    }

    #[tokio::test]
    async fn test_deposits_only_rejection_is_critical() {
        let (mut system, recorder) = system(SyncConfig::default(), MockGateway::new());

        let attrs = derived_attributes(l2_ref(4), vec![l1_info_tx()], true);
        system.emit(SyncEvent::BuildInvalid { attributes: Box::new(attrs), err: "no".into() });

        assert!(matches!(system.drain().await, Err(crate::SyncError::Critical(_))));
        assert_eq!(recorder.kinds(), vec!["build-invalid", "critical-error"]);
    }

    #[tokio::test]
    async fn test_invalid_derived_attributes_after_holocene_request_deposits_only() {
        let mut cfg = SyncConfig::default();
        cfg.rollup.hardforks.holocene_time = Some(0);
        let (mut system, recorder) = system(cfg, MockGateway::new());

        let attrs = derived_attributes(
            l2_ref(4),
            vec![l1_info_tx(), Bytes::from_static(&[0x02, 0xc0])],
            false,
        );
        let derived_from = attrs.derived_from.unwrap();
        system.emit(SyncEvent::BuildInvalid { attributes: Box::new(attrs), err: "no".into() });
        system.drain().await.unwrap();

        assert_eq!(
            recorder.events().last(),
            Some(&SyncEvent::DepositsOnlyPayloadAttributesRequest {
                parent: l2_ref(4).id(),
                derived_from,
            })
        );
    }

    #[rstest]
    #[case::l1_source_active(l2_ref(4), 1_200, "deposits-only-payload-attributes-request")]
    #[case::only_l2_active(l2_ref(600), 500, "invalid-payload-attributes")]
    #[tokio::test]
    async fn test_holocene_gate_follows_l1_source_time(
        #[case] parent: L2BlockInfo,
        #[case] l1_time: u64,
        #[case] outcome: &'static str,
    ) {
        let mut cfg = SyncConfig::default();
        cfg.rollup.hardforks.holocene_time = Some(1_000);
        let (mut system, recorder) = system(cfg, MockGateway::new());

        let mut attrs =
            derived_attributes(parent, vec![l1_info_tx(), Bytes::from_static(&[0x02, 0xc0])], false);
        attrs.derived_from =
            Some(BlockInfo::new(B256::repeat_byte(0xaa), 100, B256::repeat_byte(0xa9), l1_time));
        system.emit(SyncEvent::BuildInvalid { attributes: Box::new(attrs), err: "no".into() });
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds().last().copied(), Some(outcome));
    }

    #[tokio::test]
    async fn test_invalid_attributes_roll_back_pending_safe() {
        let (mut system, recorder) = system(SyncConfig::default(), MockGateway::new());
        let ec = system.controller_mut();
        ec.set_unsafe_head(l2_ref(6));
        ec.set_pending_safe_head(l2_ref(5));
        ec.set_safe_head(l2_ref(3));

        let attrs = derived_attributes(
            l2_ref(5),
            vec![l1_info_tx(), Bytes::from_static(&[0x02, 0xc0])],
            false,
        );
        system.emit(SyncEvent::BuildInvalid { attributes: Box::new(attrs), err: "no".into() });
        system.drain().await.unwrap();

        assert_eq!(system.controller().pending_safe_head(), l2_ref(3));
        assert_eq!(recorder.kinds(), vec!["build-invalid", "invalid-payload-attributes"]);
        assert!(!system.controller().backup_reorg_armed());
    }

    #[tokio::test]
    async fn test_seal_emits_sealed() {
        let mut gateway = MockGateway::new();
        gateway.expect_get_payload().times(1).returning(|_| {
            Ok(envelope_with_txs(5, B256::repeat_byte(5), l2_ref(4).hash(), vec![l1_info_tx()]))
        });
        let (mut system, recorder) = system(SyncConfig::default(), gateway);

        let info = PayloadInfo { id: PayloadId::new([1; 8]), timestamp: 10 };
        system.emit(SyncEvent::BuildSeal {
            info,
            concluding: false,
            derived_from: None,
            build_started: None,
        });
        system.drain().await.unwrap();

        let events = recorder.events();
        let SyncEvent::BuildSealed { block, .. } = &events[1] else {
            panic!("expected build-sealed, got {}", events[1].kind());
        };
        assert_eq!(block.number(), 5);
        assert_eq!(events.len(), 2);
    }

    #[rstest]
    #[case::unknown(EngineGatewayError::UnknownPayload, "payload-seal-invalid")]
    #[case::timeout(EngineGatewayError::Timeout(std::time::Duration::from_secs(1)), "payload-seal-expired")]
    #[tokio::test]
    async fn test_seal_errors(#[case] err: EngineGatewayError, #[case] expected: &str) {
        let mut gateway = MockGateway::new();
        gateway.expect_get_payload().returning(move |_| Err(err.clone()));
        let (mut system, recorder) = system(SyncConfig::default(), gateway);

        let info = PayloadInfo { id: PayloadId::new([1; 8]), timestamp: 10 };
        system.emit(SyncEvent::BuildSeal {
            info,
            concluding: false,
            derived_from: None,
            build_started: None,
        });
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds()[1], expected);
    }

    #[rstest]
    #[case::empty(vec![], Err(BuildError::EmptyPayload))]
    #[case::user_first(vec![Bytes::from_static(&[0x02, 0xc0])], Err(BuildError::FirstTxNotDeposit))]
    #[case::deposit_after_user(
        vec![l1_info_tx(), Bytes::from_static(&[0x02, 0xc0]), l1_info_tx()],
        Err(BuildError::DepositAfterUserTx(2))
    )]
    #[case::ok(vec![l1_info_tx(), l1_info_tx(), Bytes::from_static(&[0x02, 0xc0])], Ok(()))]
    fn test_check_sealed_payload(
        #[case] txs: Vec<Bytes>,
        #[case] expected: Result<(), BuildError>,
    ) {
        let envelope = envelope_with_txs(5, B256::repeat_byte(5), B256::ZERO, txs);
        assert_eq!(check_sealed_payload(&envelope), expected);
    }

    #[rstest]
    #[case::unknown_payload(EngineGatewayError::UnknownPayload, false, vec!["build-cancel"])]
    #[case::forced(EngineGatewayError::Transport("down".into()), true, vec!["build-cancel"])]
    #[case::unforced(
        EngineGatewayError::Transport("down".into()),
        false,
        vec!["build-cancel", "engine-temporary-error"]
    )]
    #[tokio::test]
    async fn test_cancel(
        #[case] err: EngineGatewayError,
        #[case] force: bool,
        #[case] expected: Vec<&str>,
    ) {
        let mut gateway = MockGateway::new();
        gateway.expect_get_payload().returning(move |_| Err(err.clone()));
        let (mut system, recorder) = system(SyncConfig::default(), gateway);

        let info = PayloadInfo { id: PayloadId::new([1; 8]), timestamp: 10 };
        system.emit(SyncEvent::BuildCancel { info, force });
        system.drain().await.unwrap();

        assert_eq!(recorder.kinds(), expected);
    }

    #[test]
    fn test_build_error_kinds() {
        assert_eq!(BuildError::MissingPayloadId.kind(), ErrorKind::Temporary);
        assert_eq!(
            BuildError::DepositsOnlyRejected { parent: l2_ref(1), err: String::new() }.kind(),
            ErrorKind::Critical
        );
    }
}
