//! Deposit-only replacement blocks for invalidated interop blocks.
//!
//! <https://specs.optimism.io/interop/derivation.html#optimistic-block-deposited-transaction>

use crate::{AttributesWithParent, InteropError, L2BlockInfo, SyncConfig, attributes::is_deposit};
use alloy_eips::{Decodable2718, Encodable2718};
use alloy_primitives::{Address, B64, B256, Bytes, TxKind, U256, address};
use alloy_rpc_types_engine::PayloadAttributes;
use kona_protocol::OutputRoot;
use op_alloy_consensus::{InteropBlockReplacementDepositSource, OpTxEnvelope, TxDeposit};
use op_alloy_rpc_types_engine::{OpExecutionPayloadEnvelope, OpPayloadAttributes};

/// The sender of the replacement deposit.
pub const REPLACEMENT_SENDER: Address = address!("deaddeaddeaddeaddeaddeaddeaddeaddead0002");

/// The gas limit of the replacement deposit.
pub const REPLACEMENT_GAS: u64 = 36000;

/// Decodes a V0 output root preimage.
///
/// Returns `None` on a length mismatch or an unsupported version.
fn decode_output_root(bytes: &[u8]) -> Option<OutputRoot> {
    if bytes.len() != OutputRoot::ENCODED_LENGTH || bytes[..32] != [0u8; 32] {
        return None;
    }
    Some(OutputRoot::from_parts(
        B256::from_slice(&bytes[32..64]),
        B256::from_slice(&bytes[64..96]),
        B256::from_slice(&bytes[96..128]),
    ))
}

/// Encodes the deposit that marks a block as the replacement of the block committed to by
/// `invalidated`.
pub fn replacement_deposit_tx(invalidated: &OutputRoot) -> Bytes {
    let source = InteropBlockReplacementDepositSource::new(invalidated.hash());
    let replacement_tx = OpTxEnvelope::Deposit(
        TxDeposit {
            source_hash: source.source_hash(),
            from: REPLACEMENT_SENDER,
            to: TxKind::Call(Address::ZERO),
            mint: 0,
            value: U256::ZERO,
            gas_limit: REPLACEMENT_GAS,
            is_system_transaction: false,
            input: invalidated.encode().into(),
        }
        .seal(),
    );

    replacement_tx.encoded_2718().into()
}

/// Builds the attributes of the block replacing `envelope`.
///
/// Only the deposits of the invalidated block are kept, followed by the replacement deposit. The
/// header fields the attributes control are copied so the replacement occupies the same slot.
pub fn replacement_attributes(
    cfg: &SyncConfig,
    envelope: &OpExecutionPayloadEnvelope,
    parent: L2BlockInfo,
    invalidated: &OutputRoot,
) -> Result<AttributesWithParent, InteropError> {
    let payload = envelope.execution_payload.as_v1();

    let mut transactions =
        payload.transactions.iter().filter(|tx| is_deposit(tx)).cloned().collect::<Vec<_>>();
    transactions.push(replacement_deposit_tx(invalidated));

    let eip_1559_params = cfg
        .is_holocene_active(payload.timestamp)
        .then(|| {
            payload
                .extra_data
                .get(1..9)
                .and_then(|s| B64::try_from(s).ok())
                .ok_or(InteropError::MissingEip1559Params)
        })
        .transpose()?;

    let attributes = OpPayloadAttributes {
        payload_attributes: PayloadAttributes {
            timestamp: payload.timestamp,
            prev_randao: payload.prev_randao,
            suggested_fee_recipient: payload.fee_recipient,
            withdrawals: envelope.execution_payload.as_v2().map(|_| Vec::new()),
            parent_beacon_block_root: envelope.parent_beacon_block_root,
        },
        transactions: Some(transactions),
        no_tx_pool: Some(true),
        gas_limit: Some(payload.gas_limit),
        eip_1559_params,
        ..Default::default()
    };

    Ok(AttributesWithParent::new(attributes, parent, Some(crate::REPLACE_BLOCK_SOURCE), true))
}

/// Decodes an EIP-2718 encoded deposit transaction.
pub(crate) fn decode_deposit(tx: &[u8]) -> Result<TxDeposit, InteropError> {
    match OpTxEnvelope::decode_2718(&mut &tx[..]) {
        Ok(OpTxEnvelope::Deposit(sealed)) => Ok(sealed.into_inner()),
        Ok(other) => Err(InteropError::NotDeposit(other.tx_type() as u8)),
        Err(e) => Err(InteropError::TxDecode(e.to_string())),
    }
}

/// Recovers the hash of the invalidated block from the transactions of its replacement.
///
/// The replacement deposit is always the last transaction.
pub fn decode_invalidated_block(transactions: &[Bytes]) -> Result<B256, InteropError> {
    let last = transactions.last().ok_or(InteropError::MissingReplacementTx)?;
    let deposit = decode_deposit(last)?;
    if deposit.from != REPLACEMENT_SENDER {
        return Err(InteropError::UnexpectedReplacementSender(deposit.from));
    }
    decode_output_root(&deposit.input)
        .map(|root| root.block_hash)
        .ok_or(InteropError::InvalidOutputRoot)
}
