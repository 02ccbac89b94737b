//! Payload insertion into the engine.

use super::abandon_replacement;
use crate::{
    BlockInfo, BlockRefExt, Deriver, DeriverContext, EngineGateway, ErrorKind, FromPayloadError,
    InsertedPayload, L2BlockInfo, PayloadTiming, REPLACE_BLOCK_SOURCE, SyncEvent, SyncTaskError,
    bounded_call, l2_block_info,
};
use alloy_rpc_types_engine::PayloadStatusEnum;
use async_trait::async_trait;
use op_alloy_rpc_types_engine::OpExecutionPayloadEnvelope;
use std::{sync::Arc, time::Instant};
use thiserror::Error;

/// An error raised while inserting a payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// The engine answered with a status other than valid or invalid.
    #[error("Unexpected payload status for {block}: {status}")]
    UnexpectedStatus {
        /// The block of the payload.
        block: L2BlockInfo,
        /// The status.
        status: String,
    },
    /// A received payload has no valid block reference.
    #[error("Failed to decode L2 block ref from payload: {0}")]
    BlockInfo(#[from] FromPayloadError),
}

impl SyncTaskError for PayloadError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Temporary
    }
}

/// Validates and inserts payloads, and promotes them on success.
#[derive(Debug, Clone)]
pub struct PayloadDeriver {
    gateway: Arc<dyn EngineGateway>,
}

impl PayloadDeriver {
    /// Creates a new [`PayloadDeriver`].
    pub const fn new(gateway: Arc<dyn EngineGateway>) -> Self {
        Self { gateway }
    }

    async fn process(
        &self,
        envelope: &OpExecutionPayloadEnvelope,
        block: L2BlockInfo,
        concluding: bool,
        derived_from: Option<BlockInfo>,
        build_started: Option<Instant>,
        ctx: &mut DeriverContext<'_>,
    ) {
        let budget = ctx.cfg().timeouts.payload_process();
        let start = Instant::now();
        let res =
            bounded_call(ctx.cancellation(), budget, self.gateway.new_payload(envelope)).await;

        let status = match res {
            Ok(status) => status,
            Err(e) => {
                warn!(target: "engine", block = %block, error = %e, "Failed to insert payload");
                abandon_replacement(ctx, derived_from);
                ctx.emit(SyncEvent::from_task_error(&e));
                return;
            }
        };

        match status.status {
            PayloadStatusEnum::Valid => {
                ctx.controller_mut().mark_el_sync_finished();
                debug!(target: "engine", block = %block, elapsed = ?start.elapsed(), "Inserted payload");
                ctx.emit(SyncEvent::PayloadSuccess {
                    envelope: Box::new(envelope.clone()),
                    block,
                    concluding,
                    derived_from,
                    timing: PayloadTiming { build_started, insert_started: start },
                });
            }
            PayloadStatusEnum::Invalid { validation_error } => {
                match derived_from {
                    // Holocene is gated on the L1 block the payload was derived from.
                    Some(source)
                        if source != REPLACE_BLOCK_SOURCE
                            && ctx.cfg().is_holocene_active(source.timestamp) =>
                    {
                        warn!(
                            target: "engine",
                            block = %block,
                            %source,
                            err = %validation_error,
                            "Derived payload is invalid, requesting deposits-only attributes"
                        );
                        ctx.emit(SyncEvent::DepositsOnlyPayloadAttributesRequest {
                            parent: block.parent_id(),
                            derived_from: source,
                        });
                    }
                    _ => {
                        warn!(target: "engine", block = %block, err = %validation_error, "Payload is invalid");
                        abandon_replacement(ctx, derived_from);
                        ctx.emit(SyncEvent::PayloadInvalid {
                            envelope: Box::new(envelope.clone()),
                            err: validation_error,
                        });
                    }
                }
            }
            status => {
                abandon_replacement(ctx, derived_from);
                let err = PayloadError::UnexpectedStatus { block, status: status.to_string() };
                ctx.emit(SyncEvent::from_task_error(&err));
            }
        }
    }

    fn success(
        envelope: &OpExecutionPayloadEnvelope,
        block: L2BlockInfo,
        concluding: bool,
        derived_from: Option<BlockInfo>,
        timing: PayloadTiming,
        ctx: &mut DeriverContext<'_>,
    ) {
        if derived_from == Some(REPLACE_BLOCK_SOURCE) {
            // The replaced block was cross-safe, so its replacement is too.
            info!(target: "interop", replacement = %block, "Inserted interop replacement block");
            let finalized = ctx.controller().finalized_head();
            ctx.emit(SyncEvent::ForceReset {
                local_unsafe: Some(block),
                cross_unsafe: block,
                local_safe: block,
                cross_safe: block,
                finalized,
            });
            ctx.emit(SyncEvent::InteropReplacedBlock {
                replacement: block,
                envelope: Box::new(envelope.clone()),
            });
            ctx.emit(SyncEvent::try_update_engine());
            return;
        }

        let payload = envelope.execution_payload.as_v1();
        debug!(
            target: "engine",
            block = %block,
            derived = derived_from.is_some(),
            concluding,
            "Payload accepted, promoting"
        );
        ctx.emit(SyncEvent::PromoteUnsafe { block });
        if let Some(source) = derived_from {
            ctx.emit(SyncEvent::PromotePendingSafe { block, concluding, source });
        }
        ctx.emit(SyncEvent::TryUpdateEngine {
            inserted: Some(InsertedPayload {
                block,
                txs: payload.transactions.len(),
                gas_used: payload.gas_used,
                concluding,
                derived_from,
                timing,
            }),
        });
    }

    fn receive(envelope: &OpExecutionPayloadEnvelope, ctx: &mut DeriverContext<'_>) {
        let block = match l2_block_info(envelope, ctx.cfg().genesis()) {
            Ok(block) => block,
            Err(e) => {
                ctx.emit(SyncEvent::from_task_error(&PayloadError::from(e)));
                return;
            }
        };

        if block == ctx.controller().unsafe_head() {
            debug!(target: "engine", block = %block, "Ignoring payload of current unsafe head");
            return;
        }

        ctx.emit(SyncEvent::PayloadProcess {
            envelope: Box::new(envelope.clone()),
            block,
            concluding: false,
            derived_from: None,
            build_started: None,
        });
    }
}

#[async_trait]
impl Deriver for PayloadDeriver {
    async fn on_event(&mut self, event: &SyncEvent, ctx: &mut DeriverContext<'_>) -> bool {
        match event {
            SyncEvent::PayloadProcess {
                envelope,
                block,
                concluding,
                derived_from,
                build_started,
            } => {
                self.process(envelope, *block, *concluding, *derived_from, *build_started, ctx)
                    .await
            }
            SyncEvent::PayloadSuccess { envelope, block, concluding, derived_from, timing } => {
                Self::success(envelope, *block, *concluding, *derived_from, *timing, ctx)
            }
            SyncEvent::ProcessUnsafePayload { envelope } => Self::receive(envelope, ctx),
            _ => return false,
        }
        true
    }
}
