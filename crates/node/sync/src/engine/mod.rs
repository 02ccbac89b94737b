//! Engine API access: the gateway contract, its HTTP client, and method version selection.

mod gateway;
pub use gateway::{
    EngineGateway, EngineGatewayError, INVALID_PAYLOAD_ATTRIBUTES_CODE, PayloadInfo,
    UNKNOWN_PAYLOAD_CODE, bounded_call,
};

mod client;
pub use client::EngineClient;

mod versions;
pub use versions::{EngineForkchoiceVersion, EngineGetPayloadVersion, EngineNewPayloadVersion};
