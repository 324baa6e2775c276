//! Channel state ABI encoding (spec §4.6) and the custody contract's inline
//! interface.
//!
//! No ABI JSON artifact ships with this node; the custody contract's
//! minimal surface is declared inline with [`alloy::sol_types::sol`], the
//! same macro the rest of the EVM tooling in this lineage uses.

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolValue;

sol! {
    #[derive(Debug)]
    struct Allocation {
        address destination;
        address token;
        uint256 amount;
    }

    #[sol(rpc)]
    interface Custody {
        event Created(
            bytes32 indexed channelId,
            address indexed wallet,
            address[] participants,
            address adjudicator,
            uint64 challenge,
            uint64 nonce,
            address token,
            uint256 walletAmount,
            uint256 brokerAmount
        );
        event Joined(bytes32 indexed channelId, address indexed wallet);
        event Resized(bytes32 indexed channelId, int256[] deltas);
        event Closed(bytes32 indexed channelId, uint256 finalAmount);

        function join(bytes32 channelId, uint256 index, bytes calldata sig) external;
        function challenge(bytes32 channelId, bytes calldata candidateState, bytes[] calldata proofs) external;
        function getAccountInfo(address account, address token) external view returns (uint256 available, uint256 channelCount);
    }
}

/// Tag carried in a signed state; mirrors the custody contract's enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Intent {
    Operate = 0,
    Initialize = 1,
    Resize = 2,
    Finalize = 3,
}

/// ABI-packs `(bytes32 channel_id, uint8 intent, uint256 version, bytes data,
/// tuple[] allocations)`; the keccak256 of this pack is what the broker's
/// state co-signature is over.
pub fn encode_state(
    channel_id: B256,
    intent: Intent,
    version: U256,
    data: &[u8],
    allocations: &[Allocation],
) -> Vec<u8> {
    (
        channel_id,
        intent as u8,
        version,
        Bytes::copy_from_slice(data),
        allocations.to_vec(),
    )
        .abi_encode_params()
}

pub fn allocation(destination: Address, token: Address, amount: U256) -> Allocation {
    Allocation {
        destination,
        token,
        amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256, keccak256};

    #[test]
    fn encode_state_is_deterministic() {
        let channel_id = b256!("0x0101010101010101010101010101010101010101010101010101010101010101");
        let dest = address!("0000000000000000000000000000000000000001");
        let token = address!("0000000000000000000000000000000000000002");
        let allocs = vec![allocation(dest, token, U256::from(1300u64))];

        let a = encode_state(channel_id, Intent::Resize, U256::from(2u64), &[], &allocs);
        let b = encode_state(channel_id, Intent::Resize, U256::from(2u64), &[], &allocs);
        assert_eq!(a, b);
        assert_eq!(keccak256(&a), keccak256(&b));
    }

    #[test]
    fn intent_tags_match_spec_ordinals() {
        assert_eq!(Intent::Operate as u8, 0);
        assert_eq!(Intent::Initialize as u8, 1);
        assert_eq!(Intent::Resize as u8, 2);
        assert_eq!(Intent::Finalize as u8, 3);
    }
}
