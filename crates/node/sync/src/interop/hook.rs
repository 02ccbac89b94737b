//! Forwards local head changes to the supervisor.

use crate::{
    BlockReplacement, Deriver, DeriverContext, DerivedRefPair, ManagedEvent, SyncEvent,
    decode_invalidated_block,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An observer deriver that turns sync events into [`ManagedEvent`]s for the supervisor.
///
/// Register it ahead of the engine derivers. It never consumes events, and never waits on the
/// supervisor: when the queue is full the notification is dropped.
#[derive(Debug, Clone)]
pub struct ManagedModeHook {
    events: mpsc::Sender<ManagedEvent>,
}

impl ManagedModeHook {
    /// Creates a new [`ManagedModeHook`] sending on `events`.
    pub const fn new(events: mpsc::Sender<ManagedEvent>) -> Self {
        Self { events }
    }

    fn managed_event(event: &SyncEvent) -> Option<ManagedEvent> {
        let managed = match event {
            SyncEvent::ResetRequest { err } => {
                ManagedEvent { reset: Some(err.clone()), ..Default::default() }
            }
            SyncEvent::UnsafeUpdate { block } => {
                ManagedEvent { unsafe_block: Some(block.block_info), ..Default::default() }
            }
            SyncEvent::LocalSafeUpdate { block, source } => ManagedEvent {
                derivation_update: Some(DerivedRefPair {
                    source: *source,
                    derived: block.block_info,
                }),
                ..Default::default()
            },
            SyncEvent::InteropReplacedBlock { replacement, envelope } => {
                let txs = &envelope.execution_payload.as_v1().transactions;
                let invalidated = match decode_invalidated_block(txs) {
                    Ok(hash) => hash,
                    Err(e) => {
                        error!(
                            target: "interop",
                            replacement = %replacement,
                            error = %e,
                            "Failed to decode invalidated block from replacement"
                        );
                        return None;
                    }
                };
                ManagedEvent {
                    replace_block: Some(BlockReplacement {
                        replacement: replacement.block_info,
                        invalidated,
                    }),
                    ..Default::default()
                }
            }
            _ => return None,
        };
        Some(managed)
    }
}

#[async_trait]
impl Deriver for ManagedModeHook {
    async fn on_event(&mut self, event: &SyncEvent, _: &mut DeriverContext<'_>) -> bool {
        let Some(managed) = Self::managed_event(event) else {
            return false;
        };

        trace!(target: "interop", kind = event.kind(), "Forwarding event to supervisor");
        match self.events.try_send(managed) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    target: "interop",
                    kind = event.kind(),
                    "Supervisor event queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(
                    target: "interop",
                    kind = event.kind(),
                    "Supervisor event queue closed, dropping event"
                );
            }
        }
        false
    }
}
