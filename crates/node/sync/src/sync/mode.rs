//! Contains the [`SyncMode`].

use derive_more::{Display, FromStr};
use serde::{Deserialize, Serialize};

/// How the node brings the execution engine up to the tip of the chain.
///
/// 1. Consensus Layer Sync: the node drives the execution client block by block, inserting every
///    unsafe block itself.
/// 2. Execution Layer Sync: the node points the execution client at the tip of the chain and lets
///    it sync on its own. Until the engine reports its first valid head, it is considered syncing,
///    and recovery work that depends on a stable canonical chain is deferred.
#[derive(
    Debug, Clone, Copy, Default, Display, FromStr, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Syncing the consensus layer
    #[default]
    #[display("consensus-layer")]
    ConsensusLayer,
    /// Syncing the execution layer
    #[display("execution-layer")]
    ExecutionLayer,
}
