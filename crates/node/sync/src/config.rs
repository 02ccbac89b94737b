//! Configuration of the sync core.

use crate::{BlockInfo, SyncMode};
use alloy_primitives::B256;
use kona_genesis::{ChainGenesis, RollupConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call budgets for engine API calls, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineTimeouts {
    /// Budget for the forkchoice update that starts a block build.
    pub build_start: u64,
    /// Budget for fetching a payload to discard it.
    pub build_cancel: u64,
    /// Budget for fetching a sealed payload.
    pub build_seal: u64,
    /// Budget for submitting a payload for validation.
    pub payload_process: u64,
    /// Budget for forkchoice updates without attributes.
    pub forkchoice: u64,
}

impl EngineTimeouts {
    /// The default budget for each call.
    pub const DEFAULT_MS: u64 = 10_000;

    /// Returns the build-start budget.
    pub const fn build_start(&self) -> Duration {
        Duration::from_millis(self.build_start)
    }

    /// Returns the build-cancel budget.
    pub const fn build_cancel(&self) -> Duration {
        Duration::from_millis(self.build_cancel)
    }

    /// Returns the build-seal budget.
    pub const fn build_seal(&self) -> Duration {
        Duration::from_millis(self.build_seal)
    }

    /// Returns the payload-process budget.
    pub const fn payload_process(&self) -> Duration {
        Duration::from_millis(self.payload_process)
    }

    /// Returns the forkchoice budget.
    pub const fn forkchoice(&self) -> Duration {
        Duration::from_millis(self.forkchoice)
    }
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            build_start: Self::DEFAULT_MS,
            build_cancel: Self::DEFAULT_MS,
            build_seal: Self::DEFAULT_MS,
            payload_process: Self::DEFAULT_MS,
            forkchoice: Self::DEFAULT_MS,
        }
    }
}

/// The configuration consumed by the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// The rollup config: genesis, block time and hardfork activations.
    pub rollup: RollupConfig,
    /// How the execution engine is synced.
    pub sync_mode: SyncMode,
    /// Engine call budgets.
    pub timeouts: EngineTimeouts,
    /// The maximum number of queued events before the event system gives up.
    pub max_queued_events: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(RollupConfig { block_time: 2, ..Default::default() })
    }
}

impl SyncConfig {
    /// Default bound on the event queue.
    pub const DEFAULT_MAX_QUEUED_EVENTS: usize = 10_000;

    /// Creates a [`SyncConfig`] for the given rollup with default sync settings.
    pub fn new(rollup: RollupConfig) -> Self {
        Self {
            rollup,
            sync_mode: SyncMode::default(),
            timeouts: EngineTimeouts::default(),
            max_queued_events: Self::DEFAULT_MAX_QUEUED_EVENTS,
        }
    }

    /// Returns the rollup genesis.
    pub const fn genesis(&self) -> &ChainGenesis {
        &self.rollup.genesis
    }

    /// Returns true if Ecotone is active at the given timestamp.
    pub fn is_ecotone_active(&self, timestamp: u64) -> bool {
        self.rollup.is_ecotone_active(timestamp)
    }

    /// Returns true if Holocene is active at the given timestamp.
    pub fn is_holocene_active(&self, timestamp: u64) -> bool {
        self.rollup.is_holocene_active(timestamp)
    }

    /// Returns true if Isthmus is active at the given timestamp.
    pub fn is_isthmus_active(&self, timestamp: u64) -> bool {
        self.rollup.is_isthmus_active(timestamp)
    }

    /// Returns true if Interop is active at the given timestamp.
    pub fn is_interop_active(&self, timestamp: u64) -> bool {
        self.rollup.is_interop_active(timestamp)
    }

    /// Returns the genesis anchor as an L1 [`BlockInfo`] with only the ID fields set.
    pub fn genesis_l1(&self) -> BlockInfo {
        let l1 = self.rollup.genesis.l1;
        BlockInfo::new(l1.hash, l1.number, B256::ZERO, 0)
    }
}
