//! An Engine API Client.

use crate::{
    EngineForkchoiceVersion, EngineGateway, EngineGatewayError, EngineGetPayloadVersion,
    EngineNewPayloadVersion, Metrics, PayloadInfo, SyncConfig,
};
use alloy_primitives::Bytes;
use alloy_provider::RootProvider;
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_engine::{
    ExecutionPayload, ExecutionPayloadInputV2, ForkchoiceState, ForkchoiceUpdated, JwtSecret,
    PayloadStatus,
};
use alloy_transport::TransportResult;
use alloy_transport_http::{
    AuthLayer, AuthService, Http, HyperClient,
    hyper_util::{
        client::legacy::{Client, connect::HttpConnector},
        rt::TokioExecutor,
    },
};
use async_trait::async_trait;
use http_body_util::Full;
use op_alloy_network::Optimism;
use op_alloy_provider::ext::engine::OpEngineApi;
use op_alloy_rpc_types_engine::{
    OpExecutionPayload, OpExecutionPayloadEnvelope, OpPayloadAttributes,
};
use std::{future::Future, sync::Arc, time::Instant};
use tower::ServiceBuilder;
use url::Url;

/// A Hyper HTTP client with a JWT authentication layer.
type HyperAuthClient<B = Full<Bytes>> = HyperClient<B, AuthService<Client<HttpConnector, B>>>;

/// The authenticated engine transport.
type EngineTransport = Http<HyperAuthClient>;

/// An Engine API client over JWT-authenticated HTTP.
///
/// Method versions are selected from the [`SyncConfig`] hardfork schedule and the payload
/// timestamp.
#[derive(Debug, Clone)]
pub struct EngineClient {
    /// The L2 engine provider for Engine API calls.
    engine: RootProvider<Optimism>,
    /// The [`SyncConfig`] for determining Engine API versions based on hardfork activations.
    cfg: Arc<SyncConfig>,
}

impl EngineClient {
    /// Creates a new RPC client for the given address and JWT secret.
    fn rpc_client(addr: Url, jwt: JwtSecret) -> RootProvider<Optimism> {
        let hyper_client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
        let auth_layer = AuthLayer::new(jwt);
        let service = ServiceBuilder::new().layer(auth_layer).service(hyper_client);
        let layer_transport = HyperClient::with_service(service);

        let http_hyper = Http::with_client(layer_transport, addr);
        let rpc_client = RpcClient::new(http_hyper, false);
        RootProvider::<Optimism>::new(rpc_client)
    }

    /// Creates a new [`EngineClient`] talking to the authenticated engine endpoint at `engine`.
    pub fn new_http(engine: Url, cfg: Arc<SyncConfig>, jwt: JwtSecret) -> Self {
        Self { engine: Self::rpc_client(engine, jwt), cfg }
    }

    /// Returns a reference to the inner L2 [`RootProvider`].
    pub const fn l2_engine(&self) -> &RootProvider<Optimism> {
        &self.engine
    }

    /// Returns a reference to the inner [`SyncConfig`].
    pub fn cfg(&self) -> &SyncConfig {
        self.cfg.as_ref()
    }
}

#[async_trait]
impl EngineGateway for EngineClient {
    async fn new_payload(
        &self,
        envelope: &OpExecutionPayloadEnvelope,
    ) -> Result<PayloadStatus, EngineGatewayError> {
        let payload = &envelope.execution_payload;
        let beacon_root = envelope.parent_beacon_block_root.unwrap_or_default();
        let version = EngineNewPayloadVersion::from_cfg(&self.cfg, payload.as_v1().timestamp);

        let call = async {
            let status = match (version, payload.clone()) {
                (EngineNewPayloadVersion::V4, OpExecutionPayload::V4(payload)) => {
                    <RootProvider<Optimism> as OpEngineApi<
                        Optimism,
                        EngineTransport,
                    >>::new_payload_v4(&self.engine, payload, beacon_root)
                    .await?
                }
                (EngineNewPayloadVersion::V3, OpExecutionPayload::V3(payload)) => {
                    <RootProvider<Optimism> as OpEngineApi<
                        Optimism,
                        EngineTransport,
                    >>::new_payload_v3(&self.engine, payload, beacon_root)
                    .await?
                }
                (EngineNewPayloadVersion::V2, OpExecutionPayload::V1(payload)) => {
                    let input =
                        ExecutionPayloadInputV2 { execution_payload: payload, withdrawals: None };
                    <RootProvider<Optimism> as OpEngineApi<
                        Optimism,
                        EngineTransport,
                    >>::new_payload_v2(&self.engine, input)
                    .await?
                }
                (EngineNewPayloadVersion::V2, OpExecutionPayload::V2(payload)) => {
                    let input = ExecutionPayloadInputV2 {
                        execution_payload: payload.payload_inner,
                        withdrawals: Some(payload.withdrawals),
                    };
                    <RootProvider<Optimism> as OpEngineApi<
                        Optimism,
                        EngineTransport,
                    >>::new_payload_v2(&self.engine, input)
                    .await?
                }
                _ => return Ok(None),
            };
            Ok(Some(status))
        };

        record_call_time(call, Metrics::NEW_PAYLOAD_METHOD)
            .await?
            .ok_or(EngineGatewayError::PayloadVersionMismatch(version.method_name()))
    }

    async fn get_payload(
        &self,
        info: PayloadInfo,
    ) -> Result<OpExecutionPayloadEnvelope, EngineGatewayError> {
        match EngineGetPayloadVersion::from_cfg(&self.cfg, info.timestamp) {
            EngineGetPayloadVersion::V4 => {
                let call = <RootProvider<Optimism> as OpEngineApi<
                    Optimism,
                    EngineTransport,
                >>::get_payload_v4(&self.engine, info.id);
                let payload = record_call_time(call, Metrics::GET_PAYLOAD_METHOD).await?;

                Ok(OpExecutionPayloadEnvelope {
                    parent_beacon_block_root: Some(payload.parent_beacon_block_root),
                    execution_payload: OpExecutionPayload::V4(payload.execution_payload),
                })
            }
            EngineGetPayloadVersion::V3 => {
                let call = <RootProvider<Optimism> as OpEngineApi<
                    Optimism,
                    EngineTransport,
                >>::get_payload_v3(&self.engine, info.id);
                let payload = record_call_time(call, Metrics::GET_PAYLOAD_METHOD).await?;

                Ok(OpExecutionPayloadEnvelope {
                    parent_beacon_block_root: Some(payload.parent_beacon_block_root),
                    execution_payload: OpExecutionPayload::V3(payload.execution_payload),
                })
            }
            EngineGetPayloadVersion::V2 => {
                let call = <RootProvider<Optimism> as OpEngineApi<
                    Optimism,
                    EngineTransport,
                >>::get_payload_v2(&self.engine, info.id);
                let payload = record_call_time(call, Metrics::GET_PAYLOAD_METHOD).await?;

                let execution_payload = match payload.execution_payload.into_payload() {
                    ExecutionPayload::V1(payload) => OpExecutionPayload::V1(payload),
                    ExecutionPayload::V2(payload) => OpExecutionPayload::V2(payload),
                    _ => {
                        return Err(EngineGatewayError::PayloadVersionMismatch(
                            "engine_getPayloadV2",
                        ));
                    }
                };
                Ok(OpExecutionPayloadEnvelope { parent_beacon_block_root: None, execution_payload })
            }
        }
    }

    async fn forkchoice_updated(
        &self,
        state: ForkchoiceState,
        attributes: Option<OpPayloadAttributes>,
        version: EngineForkchoiceVersion,
    ) -> Result<ForkchoiceUpdated, EngineGatewayError> {
        let call = async {
            match version {
                EngineForkchoiceVersion::V3 => {
                    <RootProvider<Optimism> as OpEngineApi<
                        Optimism,
                        EngineTransport,
                    >>::fork_choice_updated_v3(&self.engine, state, attributes)
                    .await
                }
                EngineForkchoiceVersion::V2 => {
                    <RootProvider<Optimism> as OpEngineApi<
                        Optimism,
                        EngineTransport,
                    >>::fork_choice_updated_v2(&self.engine, state, attributes)
                    .await
                }
            }
        };

        record_call_time(call, Metrics::FORKCHOICE_UPDATE_METHOD).await.map_err(Into::into)
    }
}

/// Wrapper to record the time taken for a call to the engine API and log the result as a metric.
async fn record_call_time<T>(
    f: impl Future<Output = TransportResult<T>>,
    metric_label: &'static str,
) -> TransportResult<T> {
    let start = Instant::now();
    let result = f.await?;
    let duration = start.elapsed();

    record!(
        histogram,
        Metrics::ENGINE_METHOD_REQUEST_DURATION,
        "method",
        metric_label,
        duration.as_secs_f64()
    );
    Ok(result)
}
