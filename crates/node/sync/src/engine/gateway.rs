//! The narrow contract the sync core uses to drive the execution engine.

use crate::{EngineForkchoiceVersion, ErrorKind, SyncTaskError};
use alloy_rpc_types_engine::{
    ForkchoiceState, ForkchoiceUpdated, INVALID_FORK_CHOICE_STATE_ERROR, PayloadId, PayloadStatus,
};
use alloy_transport::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use op_alloy_rpc_types_engine::{OpExecutionPayloadEnvelope, OpPayloadAttributes};
use std::{fmt::Debug, future::Future, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// JSON-RPC error code for a payload ID the engine does not know.
pub const UNKNOWN_PAYLOAD_CODE: i64 = -38001;

/// JSON-RPC error code for payload attributes the engine rejects.
pub const INVALID_PAYLOAD_ATTRIBUTES_CODE: i64 = -38003;

/// Identifies an in-flight block build on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("{id}@{timestamp}")]
pub struct PayloadInfo {
    /// The payload ID returned by the engine.
    pub id: PayloadId,
    /// The timestamp of the payload, used to pick the engine method version.
    pub timestamp: u64,
}

/// The engine API surface used by the sync core.
///
/// Implementations only translate calls. Timeouts and cancellation are applied by callers through
/// [`bounded_call`].
#[async_trait]
pub trait EngineGateway: Debug + Send + Sync {
    /// Submits a payload for validation and insertion.
    async fn new_payload(
        &self,
        envelope: &OpExecutionPayloadEnvelope,
    ) -> Result<PayloadStatus, EngineGatewayError>;

    /// Retrieves the payload of a build job, completing it.
    async fn get_payload(
        &self,
        info: PayloadInfo,
    ) -> Result<OpExecutionPayloadEnvelope, EngineGatewayError>;

    /// Updates the engine forkchoice, optionally starting a block build.
    ///
    /// `version` is picked by the caller from the timestamp of the attributes, or of the new head
    /// when there are none.
    async fn forkchoice_updated(
        &self,
        state: ForkchoiceState,
        attributes: Option<OpPayloadAttributes>,
        version: EngineForkchoiceVersion,
    ) -> Result<ForkchoiceUpdated, EngineGatewayError>;
}

/// An error returned by an [`EngineGateway`] call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineGatewayError {
    /// The engine rejected the forkchoice state.
    #[error("Invalid forkchoice state: {0}")]
    InvalidForkchoiceState(String),
    /// The engine rejected the payload attributes.
    #[error("Invalid payload attributes: {0}")]
    InvalidPayloadAttributes(String),
    /// The engine does not know the requested payload.
    #[error("Unknown payload")]
    UnknownPayload,
    /// The payload variant does not match the method version active at its timestamp.
    #[error("Payload version mismatch: expected {0}")]
    PayloadVersionMismatch(&'static str),
    /// Any other RPC or transport failure.
    #[error("Engine RPC error: {0}")]
    Transport(String),
    /// The call exceeded its budget.
    #[error("Engine call timed out after {0:?}")]
    Timeout(Duration),
    /// The call was aborted by shutdown.
    #[error("Engine call cancelled")]
    Cancelled,
}

impl EngineGatewayError {
    /// Classifies a JSON-RPC error response.
    pub fn from_error_code(code: i64, message: String) -> Self {
        match code {
            c if c == INVALID_FORK_CHOICE_STATE_ERROR as i64 => Self::InvalidForkchoiceState(message),
            INVALID_PAYLOAD_ATTRIBUTES_CODE => Self::InvalidPayloadAttributes(message),
            UNKNOWN_PAYLOAD_CODE => Self::UnknownPayload,
            _ => Self::Transport(format!("code {code}: {message}")),
        }
    }

    /// Returns `true` if the engine rejected the call's input, as opposed to failing to serve it.
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidForkchoiceState(_) | Self::InvalidPayloadAttributes(_) | Self::UnknownPayload
        )
    }

    /// Returns `true` if the engine rejected the forkchoice state.
    pub const fn is_invalid_forkchoice_state(&self) -> bool {
        matches!(self, Self::InvalidForkchoiceState(_))
    }

    /// Returns `true` if the engine rejected the payload attributes.
    pub const fn is_invalid_payload_attributes(&self) -> bool {
        matches!(self, Self::InvalidPayloadAttributes(_))
    }

    /// Returns `true` if the engine does not know the payload.
    pub const fn is_unknown_payload(&self) -> bool {
        matches!(self, Self::UnknownPayload)
    }
}

impl SyncTaskError for EngineGatewayError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidForkchoiceState(_) => ErrorKind::Reset,
            _ => ErrorKind::Temporary,
        }
    }
}

impl From<RpcError<TransportErrorKind>> for EngineGatewayError {
    fn from(e: RpcError<TransportErrorKind>) -> Self {
        e.as_error_resp()
            .map(|resp| Self::from_error_code(resp.code, resp.message.to_string()))
            .unwrap_or_else(|| Self::Transport(e.to_string()))
    }
}

/// Runs an engine call under a time budget, aborting early if `cancel` fires.
pub async fn bounded_call<T>(
    cancel: &CancellationToken,
    budget: Duration,
    call: impl Future<Output = Result<T, EngineGatewayError>>,
) -> Result<T, EngineGatewayError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineGatewayError::Cancelled),
        res = tokio::time::timeout(budget, call) => match res {
            Ok(inner) => inner,
            Err(_) => Err(EngineGatewayError::Timeout(budget)),
        },
    }
}
