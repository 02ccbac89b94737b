//! Promotion of blocks through the safety levels.

use crate::{BlockInfo, BlockRefExt, Deriver, DeriverContext, L2BlockInfo, SyncEvent};
use async_trait::async_trait;

/// Moves blocks up the safety ladder and answers head requests.
///
/// Before interop activates, cross-unsafe and safe promotions follow their local counterparts
/// directly. After activation they wait for the interop hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromoteDeriver;

impl PromoteDeriver {
    /// Creates a new [`PromoteDeriver`].
    pub const fn new() -> Self {
        Self
    }

    fn promote_unsafe(block: L2BlockInfo, ctx: &mut DeriverContext<'_>) {
        let current = ctx.controller().unsafe_head();
        if !current.is_zero() && current.number() >= block.number() {
            debug!(target: "engine", %current, new = %block, "Unsafe head reorg, keeping backup");
            ctx.controller_mut().set_backup_unsafe_head(current, false);
        }
        ctx.controller_mut().set_unsafe_head(block);
        ctx.emit(SyncEvent::UnsafeUpdate { block });
    }

    fn unsafe_update(block: L2BlockInfo, ctx: &mut DeriverContext<'_>) {
        if !ctx.cfg().is_interop_active(block.timestamp()) {
            ctx.emit(SyncEvent::PromoteCrossUnsafe { block });
        }
        ctx.emit(SyncEvent::try_update_engine());
    }

    fn promote_cross_unsafe(block: L2BlockInfo, ctx: &mut DeriverContext<'_>) {
        ctx.controller_mut().set_cross_unsafe_head(block);
        let local_unsafe = ctx.controller().unsafe_head();
        ctx.emit(SyncEvent::CrossUnsafeUpdate { cross_unsafe: block, local_unsafe });
    }

    fn promote_pending_safe(
        block: L2BlockInfo,
        concluding: bool,
        source: BlockInfo,
        ctx: &mut DeriverContext<'_>,
    ) {
        // Promotion never rewinds pending-safe. Resets do that.
        if block.number() > ctx.controller().pending_safe_head().number() {
            debug!(target: "engine", pending_safe = %block, concluding, "Updating pending safe");
            ctx.controller_mut().set_pending_safe_head(block);
            let unsafe_head = ctx.controller().unsafe_head();
            ctx.emit(SyncEvent::PendingSafeUpdate { pending_safe: block, unsafe_head });
        }

        if concluding && block.number() > ctx.controller().local_safe_head().number() {
            ctx.emit(SyncEvent::PromoteLocalSafe { block, source });
        }
    }

    fn promote_local_safe(block: L2BlockInfo, source: BlockInfo, ctx: &mut DeriverContext<'_>) {
        let current = ctx.controller().local_safe_head();
        if block.number() < current.number() {
            warn!(target: "engine", %current, new = %block, "Ignoring local-safe regression");
            return;
        }
        ctx.controller_mut().set_local_safe_head(block);
        ctx.emit(SyncEvent::LocalSafeUpdate { block, source });
    }

    fn local_safe_update(block: L2BlockInfo, source: BlockInfo, ctx: &mut DeriverContext<'_>) {
        if !ctx.cfg().is_interop_active(block.timestamp()) {
            ctx.emit(SyncEvent::PromoteSafe { block, source });
        }
    }

    fn promote_safe(block: L2BlockInfo, source: BlockInfo, ctx: &mut DeriverContext<'_>) {
        let current = ctx.controller().safe_head();
        if block.number() < current.number() {
            warn!(target: "engine", %current, new = %block, "Ignoring safe regression");
            return;
        }

        ctx.controller_mut().set_safe_head(block);
        let local_safe = ctx.controller().local_safe_head();
        ctx.emit(SyncEvent::SafeDerived { safe: block, source });
        ctx.emit(SyncEvent::CrossSafeUpdate { cross_safe: block, local_safe });

        if block.number() > ctx.controller().cross_unsafe_head().number() {
            ctx.controller_mut().set_cross_unsafe_head(block);
            let local_unsafe = ctx.controller().unsafe_head();
            ctx.emit(SyncEvent::CrossUnsafeUpdate { cross_unsafe: block, local_unsafe });
        }
        ctx.emit(SyncEvent::try_update_engine());
    }

    fn promote_finalized(block: L2BlockInfo, ctx: &mut DeriverContext<'_>) {
        let finalized = ctx.controller().finalized_head();
        let safe = ctx.controller().safe_head();
        if block.number() < finalized.number() {
            error!(target: "engine", %finalized, new = %block, "Cannot rewind finalized head");
            return;
        }
        if block.number() > safe.number() {
            error!(target: "engine", %safe, new = %block, "Block must be safe before it is finalized");
            return;
        }

        ctx.controller_mut().set_finalized_head(block);
        ctx.emit(SyncEvent::FinalizedUpdate { block });
        ctx.emit(SyncEvent::try_update_engine());
    }

    fn answer_cross(cross_unsafe: bool, cross_safe: bool, ctx: &mut DeriverContext<'_>) {
        let ec = ctx.controller();
        let (unsafe_head, cross_unsafe_head) = (ec.unsafe_head(), ec.cross_unsafe_head());
        let (safe, local_safe) = (ec.safe_head(), ec.local_safe_head());
        if cross_unsafe {
            ctx.emit(SyncEvent::CrossUnsafeUpdate {
                cross_unsafe: cross_unsafe_head,
                local_unsafe: unsafe_head,
            });
        }
        if cross_safe {
            ctx.emit(SyncEvent::CrossSafeUpdate { cross_safe: safe, local_safe });
        }
    }
}

#[async_trait]
impl Deriver for PromoteDeriver {
    async fn on_event(&mut self, event: &SyncEvent, ctx: &mut DeriverContext<'_>) -> bool {
        match event {
            SyncEvent::PromoteUnsafe { block } => Self::promote_unsafe(*block, ctx),
            SyncEvent::UnsafeUpdate { block } => Self::unsafe_update(*block, ctx),
            SyncEvent::PromoteCrossUnsafe { block } => Self::promote_cross_unsafe(*block, ctx),
            SyncEvent::PromotePendingSafe { block, concluding, source } => {
                Self::promote_pending_safe(*block, *concluding, *source, ctx)
            }
            SyncEvent::PromoteLocalSafe { block, source } => {
                Self::promote_local_safe(*block, *source, ctx)
            }
            SyncEvent::LocalSafeUpdate { block, source } => {
                Self::local_safe_update(*block, *source, ctx)
            }
            SyncEvent::PromoteSafe { block, source } => Self::promote_safe(*block, *source, ctx),
            SyncEvent::PromoteFinalized { block } => Self::promote_finalized(*block, ctx),
            SyncEvent::CrossUpdateRequest { cross_unsafe, cross_safe } => {
                Self::answer_cross(*cross_unsafe, *cross_safe, ctx)
            }
            SyncEvent::PendingSafeRequest => {
                let pending_safe = ctx.controller().pending_safe_head();
                let unsafe_head = ctx.controller().unsafe_head();
                ctx.emit(SyncEvent::PendingSafeUpdate { pending_safe, unsafe_head });
            }
            SyncEvent::FinalizedRequest => {
                let block = ctx.controller().finalized_head();
                ctx.emit(SyncEvent::FinalizedUpdate { block });
            }
            SyncEvent::ForkchoiceRequest => {
                let ec = ctx.controller();
                let event = SyncEvent::ForkchoiceUpdate {
                    unsafe_head: ec.unsafe_head(),
                    safe: ec.safe_head(),
                    finalized: ec.finalized_head(),
                };
                ctx.emit(event);
            }
            _ => return false,
        }
        true
    }
}
