//! Block references tracked by the sync core.

use alloy_eips::BlockNumHash;
use alloy_primitives::B256;
use kona_genesis::ChainGenesis;
use kona_protocol::{BlockInfo, DecodeError, L1BlockInfoTx, L2BlockInfo};
use op_alloy_consensus::OpTxType;
use op_alloy_rpc_types_engine::{OpExecutionPayload, OpExecutionPayloadEnvelope};
use thiserror::Error;

/// Accessors shared by the L1 and L2 block references the head registry tracks.
///
/// The all-zero reference is the "unset" sentinel.
pub trait BlockRefExt {
    /// Returns the block hash.
    fn hash(&self) -> B256;

    /// Returns the block number.
    fn number(&self) -> u64;

    /// Returns the block timestamp.
    fn timestamp(&self) -> u64;

    /// Returns the parent block hash.
    fn parent_hash(&self) -> B256;

    /// Returns the block ID.
    fn id(&self) -> BlockNumHash {
        BlockNumHash { hash: self.hash(), number: self.number() }
    }

    /// Returns the parent block ID.
    fn parent_id(&self) -> BlockNumHash {
        BlockNumHash { hash: self.parent_hash(), number: self.number().saturating_sub(1) }
    }

    /// Returns `true` if this is the zero-value sentinel.
    fn is_zero(&self) -> bool;
}

impl BlockRefExt for BlockInfo {
    fn hash(&self) -> B256 {
        self.hash
    }

    fn number(&self) -> u64 {
        self.number
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn parent_hash(&self) -> B256 {
        self.parent_hash
    }

    fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl BlockRefExt for L2BlockInfo {
    fn hash(&self) -> B256 {
        self.block_info.hash
    }

    fn number(&self) -> u64 {
        self.block_info.number
    }

    fn timestamp(&self) -> u64 {
        self.block_info.timestamp
    }

    fn parent_hash(&self) -> B256 {
        self.block_info.parent_hash
    }

    fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Returns the [`BlockInfo`] header fields of an execution payload.
pub fn payload_block_info(payload: &OpExecutionPayload) -> BlockInfo {
    let v1 = payload.as_v1();
    BlockInfo::new(v1.block_hash, v1.block_number, v1.parent_hash, v1.timestamp)
}

/// Derives the [`L2BlockInfo`] of an execution payload.
///
/// The block hash is taken from the payload as-is. Outside of genesis, the L1 origin and sequence
/// number are read from the L1 info deposit, which must be the first transaction of the block.
pub fn l2_block_info(
    envelope: &OpExecutionPayloadEnvelope,
    genesis: &ChainGenesis,
) -> Result<L2BlockInfo, FromPayloadError> {
    let block_info = payload_block_info(&envelope.execution_payload);

    if block_info.number == genesis.l2.number {
        if block_info.hash != genesis.l2.hash {
            return Err(FromPayloadError::InvalidGenesisHash(genesis.l2.hash, block_info.hash));
        }
        return Ok(L2BlockInfo::new(block_info, genesis.l1, 0));
    }

    let txs = &envelope.execution_payload.as_v1().transactions;
    let first = txs.first().ok_or(FromPayloadError::MissingL1InfoDeposit)?;
    match first.first() {
        Some(ty) if *ty == OpTxType::Deposit as u8 => {}
        ty => return Err(FromPayloadError::FirstTxNonDeposit(ty.copied().unwrap_or_default())),
    }
    let deposit = crate::interop::decode_deposit(first)
        .map_err(|_| FromPayloadError::MissingL1InfoDeposit)?;
    let info = L1BlockInfoTx::decode_calldata(deposit.input.as_ref())?;

    Ok(L2BlockInfo::new(block_info, info.id(), info.sequence_number()))
}

/// An error raised while deriving an [`L2BlockInfo`] from an execution payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FromPayloadError {
    /// The genesis block hash does not match the configured genesis.
    #[error("Invalid genesis hash. Expected {0}, got {1}")]
    InvalidGenesisHash(B256, B256),
    /// The block has no L1 info deposit.
    #[error("L2 block is missing L1 info deposit transaction")]
    MissingL1InfoDeposit,
    /// The first transaction is not a deposit.
    #[error("First payload transaction has unexpected type: {0}")]
    FirstTxNonDeposit(u8),
    /// The L1 info calldata could not be decoded.
    #[error("Failed to decode L1 info calldata: {0}")]
    L1Info(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        interop::replacement_deposit_tx,
        test_utils::{envelope_with_txs, l1_info_tx, l2_ref},
    };
    use alloy_primitives::{Bytes, b256};
    use kona_protocol::OutputRoot;
    use rstest::rstest;

    fn genesis() -> ChainGenesis {
        ChainGenesis {
            l1: BlockNumHash { number: 10, hash: B256::repeat_byte(0x11) },
            l2: BlockNumHash { number: 0, hash: B256::repeat_byte(0x22) },
            l2_time: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_l2_block_info_from_ecotone_payload() {
        let envelope =
            envelope_with_txs(5, B256::repeat_byte(5), B256::repeat_byte(4), vec![l1_info_tx()]);

        let info = l2_block_info(&envelope, &genesis()).unwrap();
        assert_eq!(info.hash(), B256::repeat_byte(5));
        assert_eq!(info.number(), 5);
        assert_eq!(info.l1_origin.number, 7_855_060);
        assert_eq!(
            info.l1_origin.hash,
            b256!("4edd27304108914dd6503b19b9eeb9956982ef197febbeeed8a9eac3dbaaabdf")
        );
        assert_eq!(info.seq_num, 4);
    }

    #[test]
    fn test_l2_block_info_at_genesis() {
        let envelope = envelope_with_txs(0, B256::repeat_byte(0x22), B256::ZERO, vec![]);
        let info = l2_block_info(&envelope, &genesis()).unwrap();
        assert_eq!(info.l1_origin, genesis().l1);
        assert_eq!(info.seq_num, 0);
    }

    #[rstest]
    #[case::wrong_genesis_hash(0, vec![], FromPayloadError::InvalidGenesisHash(B256::repeat_byte(0x22), B256::repeat_byte(9)))]
    #[case::no_txs(1, vec![], FromPayloadError::MissingL1InfoDeposit)]
    #[case::user_tx_first(1, vec![Bytes::from_static(&[0x02, 0xc0])], FromPayloadError::FirstTxNonDeposit(0x02))]
    fn test_l2_block_info_errors(
        #[case] number: u64,
        #[case] txs: Vec<Bytes>,
        #[case] expected: FromPayloadError,
    ) {
        let envelope = envelope_with_txs(number, B256::repeat_byte(9), B256::ZERO, txs);
        assert_eq!(l2_block_info(&envelope, &genesis()).unwrap_err(), expected);
    }

    #[test]
    fn test_first_deposit_must_carry_l1_info() {
        // A well-formed deposit whose calldata is an output root, not L1 info.
        let deposit = replacement_deposit_tx(&OutputRoot::from_parts(
            B256::repeat_byte(1),
            B256::repeat_byte(2),
            B256::repeat_byte(3),
        ));
        let envelope = envelope_with_txs(1, B256::repeat_byte(9), B256::ZERO, vec![deposit]);

        assert!(matches!(
            l2_block_info(&envelope, &genesis()),
            Err(FromPayloadError::L1Info(DecodeError::InvalidSelector))
        ));
    }

    #[test]
    fn test_block_ref_accessors() {
        assert!(L2BlockInfo::default().is_zero());
        assert!(BlockInfo::default().is_zero());
        assert!(!l2_ref(1).is_zero());
        assert_eq!(l2_ref(3).parent_id(), l2_ref(2).id());
        assert_eq!(l2_ref(3).block_info.id(), l2_ref(3).id());
    }
}
