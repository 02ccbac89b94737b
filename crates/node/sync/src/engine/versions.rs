//! Engine API version selection.
//!
//! Versions are chosen by timestamp against the hardfork activations in [`SyncConfig`]. Only the
//! method shape changes between versions; the semantics the sync core relies on do not.

use crate::SyncConfig;

/// Engine API version for `engine_forkchoiceUpdated` method calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineForkchoiceVersion {
    /// The `engine_forkchoiceUpdated` api version 2.
    V2,
    /// The `engine_forkchoiceUpdated` api version 3.
    V3,
}

impl EngineForkchoiceVersion {
    /// Returns the [`EngineForkchoiceVersion`] for attributes with the given timestamp.
    pub fn from_cfg(cfg: &SyncConfig, timestamp: u64) -> Self {
        if cfg.is_ecotone_active(timestamp) {
            // Cancun+
            Self::V3
        } else {
            // Bedrock, Canyon, Delta
            Self::V2
        }
    }
}

/// The method version for the `engine_newPayload` api.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineNewPayloadVersion {
    /// The `engine_newPayload` api version 2.
    V2,
    /// The `engine_newPayload` api version 3.
    V3,
    /// The `engine_newPayload` api version 4.
    V4,
}

impl EngineNewPayloadVersion {
    /// Returns the engine API method name of this version.
    pub const fn method_name(&self) -> &'static str {
        match self {
            Self::V2 => "engine_newPayloadV2",
            Self::V3 => "engine_newPayloadV3",
            Self::V4 => "engine_newPayloadV4",
        }
    }

    /// Returns the [`EngineNewPayloadVersion`] for a payload with the given timestamp.
    pub fn from_cfg(cfg: &SyncConfig, timestamp: u64) -> Self {
        if cfg.is_isthmus_active(timestamp) {
            Self::V4
        } else if cfg.is_ecotone_active(timestamp) {
            Self::V3
        } else {
            Self::V2
        }
    }
}

/// The method version for the `engine_getPayload` api.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineGetPayloadVersion {
    /// The `engine_getPayload` api version 2.
    V2,
    /// The `engine_getPayload` api version 3.
    V3,
    /// The `engine_getPayload` api version 4.
    V4,
}

impl EngineGetPayloadVersion {
    /// Returns the [`EngineGetPayloadVersion`] for a payload with the given timestamp.
    pub fn from_cfg(cfg: &SyncConfig, timestamp: u64) -> Self {
        if cfg.is_isthmus_active(timestamp) {
            Self::V4
        } else if cfg.is_ecotone_active(timestamp) {
            Self::V3
        } else {
            Self::V2
        }
    }
}
