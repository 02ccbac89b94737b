#![doc = include_str!("../README.md")]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/op-rs/kona/main/assets/square.png",
    html_favicon_url = "https://raw.githubusercontent.com/op-rs/kona/main/assets/favicon.ico"
)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

mod attributes;
pub use attributes::AttributesWithParent;

pub use kona_genesis::{ChainGenesis, HardForkConfig, RollupConfig};
pub use kona_protocol::{BlockInfo, L2BlockInfo, OutputRoot};

mod block;
pub use block::{BlockRefExt, FromPayloadError, l2_block_info, payload_block_info};

mod config;
pub use config::{EngineTimeouts, SyncConfig};

mod controller;
pub use controller::{EngineController, RecoveryGuard};

mod derive;
pub use derive::{
    BuildDeriver, BuildError, ForkchoiceError, PayloadDeriver, PayloadError, PromoteDeriver,
    ResetDeriver,
};

mod engine;
pub use engine::{
    EngineClient, EngineForkchoiceVersion, EngineGateway, EngineGatewayError,
    EngineGetPayloadVersion, EngineNewPayloadVersion, INVALID_PAYLOAD_ATTRIBUTES_CODE,
    PayloadInfo, UNKNOWN_PAYLOAD_CODE, bounded_call,
};

mod error;
pub use error::{ErrorKind, SyncError, SyncTaskError};

mod event;
pub use event::{InsertedPayload, PayloadTiming, REPLACE_BLOCK_SOURCE, SyncEvent};

mod interop;
pub use interop::{
    BLOCK_NOT_FOUND_CODE, BlockReplacement, BlockSeal, CONFLICTING_BLOCK_CODE, DerivedRefPair,
    INTERNAL_ERROR_CODE, InteropError, InteropL1Source, InteropL2Source, InteropSourceError,
    ManagedEvent, ManagedModeApi, ManagedModeHook, REPLACEMENT_GAS, REPLACEMENT_SENDER,
    decode_invalidated_block, replacement_attributes, replacement_deposit_tx,
};

mod metrics;
pub use metrics::Metrics;

mod state;
pub use state::{EngineSyncState, EngineSyncStateUpdate, HeadOrderingError};

mod sync;
pub use sync::SyncMode;

mod system;
pub use system::{
    Deriver, DeriverContext, DrainStatus, EventSender, EventSystem, INBOUND_CHANNEL_SIZE,
    spawn_interrupt_listener,
};

#[cfg(test)]
mod test_utils;
