//! The interop hook: supervisor notifications, supervisor-driven promotions and block
//! replacement.

mod api;
pub use api::ManagedModeApi;

mod error;
pub use error::{
    BLOCK_NOT_FOUND_CODE, CONFLICTING_BLOCK_CODE, INTERNAL_ERROR_CODE, InteropError,
    InteropSourceError,
};

mod hook;
pub use hook::ManagedModeHook;

mod replacement;
pub(crate) use replacement::decode_deposit;
pub use replacement::{
    REPLACEMENT_GAS, REPLACEMENT_SENDER, decode_invalidated_block, replacement_attributes,
    replacement_deposit_tx,
};

mod source;
pub use source::{InteropL1Source, InteropL2Source};

mod types;
pub use types::{BlockReplacement, BlockSeal, DerivedRefPair, ManagedEvent};
