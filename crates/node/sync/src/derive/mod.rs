//! The derivers of the sync core.
//!
//! Register them behind any observers, in the order of [`EventSystem::add_engine_derivers`].
//!
//! [`EventSystem::add_engine_derivers`]: crate::EventSystem::add_engine_derivers

mod build;
pub use build::{BuildDeriver, BuildError};

mod payload;
pub use payload::{PayloadDeriver, PayloadError};

mod promote;
pub use promote::PromoteDeriver;

mod reset;
pub use reset::{ForkchoiceError, ResetDeriver};

use crate::{BlockInfo, DeriverContext, REPLACE_BLOCK_SOURCE, RecoveryGuard};

/// Releases the recovery guard if the abandoned work was an interop replacement block.
fn abandon_replacement(ctx: &mut DeriverContext<'_>, derived_from: Option<BlockInfo>) {
    if derived_from == Some(REPLACE_BLOCK_SOURCE) &&
        ctx.controller().recovery() == RecoveryGuard::InteropReplacement
    {
        warn!(target: "interop", "Abandoning interop block replacement");
        ctx.controller_mut().release_recovery();
    }
}
