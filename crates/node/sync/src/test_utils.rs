//! Shared fixtures for unit tests.

use crate::{
    AttributesWithParent, BlockInfo, BlockRefExt, Deriver, DeriverContext, EngineForkchoiceVersion,
    EngineGateway, EngineGatewayError, EventSender, EventSystem, InteropL1Source, InteropL2Source,
    InteropSourceError, L2BlockInfo, OutputRoot, PayloadInfo, SyncConfig, SyncEvent,
};
use alloy_eips::BlockNumHash;
use alloy_primitives::{Address, B256, Bloom, Bytes, U256, hex};
use alloy_rpc_types_engine::{
    ExecutionPayloadV1, ExecutionPayloadV2, ExecutionPayloadV3, ForkchoiceState,
    ForkchoiceUpdated, PayloadAttributes, PayloadId, PayloadStatus, PayloadStatusEnum,
};
use async_trait::async_trait;
use mockall::mock;
use op_alloy_rpc_types_engine::{
    OpExecutionPayload, OpExecutionPayloadEnvelope, OpPayloadAttributes,
};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// A mainnet-shaped ecotone L1 info deposit, with L1 origin 7855060 and sequence number 4.
const ECOTONE_L1_INFO_TX: &str = "7ef8f8a042a8ae5ec231af3d0f90f68543ec8bca1da4f7edd712d5b51b490688355a6db794deaddeaddeaddeaddeaddeaddeaddeaddead00019442000000000000000000000000000000000000158080830f424080b8a4440a5e200000044d000a118b00000000000000040000000067cb7cb0000000000077dbd4000000000000000000000000000000000000000000000000000000000000000a00000000000000000000000000000000000000000000000000000000000000014edd27304108914dd6503b19b9eeb9956982ef197febbeeed8a9eac3dbaaabdf000000000000000000000000fc56e7272eebbba5bc6c544e159483c4a38f8ba3";

mock! {
    #[derive(Debug)]
    pub Gateway {}

    #[async_trait]
    impl EngineGateway for Gateway {
        async fn new_payload(&self, envelope: &OpExecutionPayloadEnvelope) -> Result<PayloadStatus, EngineGatewayError>;
        async fn get_payload(&self, info: PayloadInfo) -> Result<OpExecutionPayloadEnvelope, EngineGatewayError>;
        async fn forkchoice_updated(&self, state: ForkchoiceState, attributes: Option<OpPayloadAttributes>, version: EngineForkchoiceVersion) -> Result<ForkchoiceUpdated, EngineGatewayError>;
    }
}

mock! {
    #[derive(Debug)]
    pub L2Source {}

    #[async_trait]
    impl InteropL2Source for L2Source {
        async fn l2_block_ref_by_hash(&self, hash: B256) -> Result<L2BlockInfo, InteropSourceError>;
        async fn l2_block_ref_by_number(&self, number: u64) -> Result<L2BlockInfo, InteropSourceError>;
        async fn payload_by_hash(&self, hash: B256) -> Result<OpExecutionPayloadEnvelope, InteropSourceError>;
        async fn output_v0_at_block(&self, hash: B256) -> Result<OutputRoot, InteropSourceError>;
    }
}

mock! {
    #[derive(Debug)]
    pub L1Source {}

    #[async_trait]
    impl InteropL1Source for L1Source {
        async fn l1_block_ref_by_hash(&self, hash: B256) -> Result<BlockInfo, InteropSourceError>;
    }
}

/// Records every dispatched event without consuming any.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventRecorder {
    events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl EventRecorder {
    pub(crate) fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(SyncEvent::kind).collect()
    }
}

#[async_trait]
impl Deriver for EventRecorder {
    async fn on_event(&mut self, event: &SyncEvent, _: &mut DeriverContext<'_>) -> bool {
        self.events.lock().unwrap().push(event.clone());
        false
    }
}

pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An event system with a recorder in front of every engine deriver.
pub(crate) fn engine_system(
    cfg: SyncConfig,
    gateway: MockGateway,
) -> (EventSystem, EventSender, EventRecorder) {
    let (mut system, tx) = EventSystem::new(Arc::new(cfg), CancellationToken::new());
    let recorder = EventRecorder::default();
    system.add_deriver(Box::new(recorder.clone()));
    system.add_engine_derivers(Arc::new(gateway));
    (system, tx, recorder)
}

/// A deterministic L2 block reference at height `number`. Parent links hold across heights.
pub(crate) fn l2_ref(number: u64) -> L2BlockInfo {
    let hash = |n: u64| B256::left_padding_from(&(n + 1).to_be_bytes());
    let parent_hash = if number == 0 { B256::ZERO } else { hash(number - 1) };
    L2BlockInfo::new(
        BlockInfo::new(hash(number), number, parent_hash, number * 2),
        BlockNumHash { number: number / 4, hash: B256::repeat_byte(0x11) },
        number % 4,
    )
}

pub(crate) fn l1_info_tx() -> Bytes {
    Bytes::from(hex::decode(ECOTONE_L1_INFO_TX).unwrap())
}

pub(crate) fn l1_source() -> BlockInfo {
    BlockInfo::new(B256::repeat_byte(0xaa), 100, B256::repeat_byte(0xa9), 1_200)
}

/// Sequencer attributes on top of `parent`.
pub(crate) fn attributes(parent: L2BlockInfo, txs: Vec<Bytes>) -> AttributesWithParent {
    let attributes = OpPayloadAttributes {
        payload_attributes: PayloadAttributes {
            timestamp: parent.timestamp() + 2,
            prev_randao: B256::repeat_byte(0x42),
            suggested_fee_recipient: Address::ZERO,
            withdrawals: Some(Vec::new()),
            parent_beacon_block_root: Some(B256::ZERO),
        },
        transactions: Some(txs),
        no_tx_pool: Some(false),
        gas_limit: Some(30_000_000),
        ..Default::default()
    };
    AttributesWithParent::new(attributes, parent, None, false)
}

/// Attributes derived from [`l1_source`].
pub(crate) fn derived_attributes(
    parent: L2BlockInfo,
    txs: Vec<Bytes>,
    concluding: bool,
) -> AttributesWithParent {
    let mut attrs = attributes(parent, txs);
    attrs.derived_from = Some(l1_source());
    attrs.concluding = concluding;
    attrs
}

/// A V3 payload at height `number` with the given transactions.
pub(crate) fn envelope_with_txs(
    number: u64,
    hash: B256,
    parent_hash: B256,
    transactions: Vec<Bytes>,
) -> OpExecutionPayloadEnvelope {
    let v1 = ExecutionPayloadV1 {
        parent_hash,
        fee_recipient: Address::ZERO,
        state_root: B256::repeat_byte(0x5a),
        receipts_root: B256::ZERO,
        logs_bloom: Bloom::ZERO,
        prev_randao: B256::repeat_byte(0x42),
        block_number: number,
        gas_limit: 30_000_000,
        gas_used: 0,
        timestamp: number * 2,
        extra_data: Bytes::new(),
        base_fee_per_gas: U256::from(1_000_000_000u64),
        block_hash: hash,
        transactions,
    };
    OpExecutionPayloadEnvelope {
        parent_beacon_block_root: Some(B256::ZERO),
        execution_payload: OpExecutionPayload::V3(ExecutionPayloadV3 {
            payload_inner: ExecutionPayloadV2 { payload_inner: v1, withdrawals: Vec::new() },
            blob_gas_used: 0,
            excess_blob_gas: 0,
        }),
    }
}

pub(crate) fn fcu_valid(payload_id: Option<PayloadId>) -> ForkchoiceUpdated {
    ForkchoiceUpdated {
        payload_status: PayloadStatus::from_status(PayloadStatusEnum::Valid),
        payload_id,
    }
}
