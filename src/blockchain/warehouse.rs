//! Warehouse batching contract bindings.
//!
//! Phase 1 deposits ETH into the warehouse credited to the destination;
//! phase 2 asks the warehouse to release the destination's balance to it.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

use crate::blockchain::types::{BlockchainError, BlockchainResult, TxIntent};

sol! {
    interface IWarehouse {
        function depositETH(address owner) external payable;
        function getETHBalance(address account) external view returns (uint256);
        function withdraw(address account, uint256 withdrawETH, address[] tokens) external;
    }
}

/// Phase 1: move `amount` from `source` into the warehouse for `owner`.
pub fn deposit_intent(source: Address, warehouse: Address, owner: Address, amount: U256) -> TxIntent {
    let call = IWarehouse::depositETHCall { owner };
    TxIntent::call(source, warehouse, amount, call.abi_encode().into())
}

/// Phase 2: release `amount` of `account`'s warehouse balance to `account`.
pub fn withdraw_intent(sender: Address, warehouse: Address, account: Address, amount: U256) -> TxIntent {
    let call = IWarehouse::withdrawCall {
        account,
        withdrawETH: amount,
        tokens: Vec::new(),
    };
    TxIntent::call(sender, warehouse, U256::ZERO, call.abi_encode().into())
}

/// Calldata for `getETHBalance(owner)`.
pub fn balance_call(owner: Address) -> Bytes {
    IWarehouse::getETHBalanceCall { account: owner }
        .abi_encode()
        .into()
}

/// Decode the `getETHBalance` return value.
pub fn decode_balance(output: &[u8]) -> BlockchainResult<U256> {
    IWarehouse::getETHBalanceCall::abi_decode_returns(output).map_err(|e| {
        BlockchainError::ChainUnavailable {
            operation: "eth_call",
            reason: format!("bad getETHBalance response: {}", e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_carries_value_and_owner() {
        let owner = Address::repeat_byte(0x0d);
        let intent = deposit_intent(
            Address::repeat_byte(0x01),
            Address::repeat_byte(0x0e),
            owner,
            U256::from(5u64),
        );
        assert_eq!(intent.value, U256::from(5u64));
        assert_eq!(&intent.input[..4], IWarehouse::depositETHCall::SELECTOR.as_slice());

        let decoded = IWarehouse::depositETHCall::abi_decode(&intent.input).unwrap();
        assert_eq!(decoded.owner, owner);
    }

    #[test]
    fn test_withdraw_sends_no_value() {
        let account = Address::repeat_byte(0x0d);
        let intent = withdraw_intent(
            Address::repeat_byte(0x01),
            Address::repeat_byte(0x0e),
            account,
            U256::from(7u64),
        );
        assert_eq!(intent.value, U256::ZERO);

        let decoded = IWarehouse::withdrawCall::abi_decode(&intent.input).unwrap();
        assert_eq!(decoded.account, account);
        assert_eq!(decoded.withdrawETH, U256::from(7u64));
        assert!(decoded.tokens.is_empty());
    }

    #[test]
    fn test_balance_decode() {
        // uint256 returns are a single big-endian word
        let encoded = U256::from(42u64).to_be_bytes::<32>();
        assert_eq!(decode_balance(&encoded).unwrap(), U256::from(42u64));
        assert!(decode_balance(&[0u8; 3]).is_err());
    }
}
