//! `updateSwapStatus` call sent to the home chain

use crate::error::{RelayerError, RelayerResult};
use crate::state::Event;

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;

/// Status code written when the destination release succeeded
pub const STATUS_SUCCESS: u8 = 3;
/// Status code written when the destination release failed
pub const STATUS_FAILURE: u8 = 4;

const UPDATE_SIGNATURE: &str =
    "updateSwapStatus(uint64,bytes8,bytes8,bytes32,address,uint256,uint256,bytes,uint8)";

/// Arguments of one status report
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePayload {
    pub swap_id: String,
    pub deposit_nonce: u64,
    pub origin_chain_id: [u8; 8],
    pub destination_chain_id: [u8; 8],
    pub resource_id: [u8; 32],
    pub recipient: Address,
    pub out_amount: U256,
    pub in_amount: U256,
    pub params: Vec<u8>,
    pub status: u8,
}

impl UpdatePayload {
    /// Build a report for `event`.
    ///
    /// Fails when the swap is missing a field the contract needs, most
    /// commonly an amount that has not been observed yet.
    pub fn from_event(event: &Event, status: u8) -> RelayerResult<Self> {
        let invalid = |message: String| RelayerError::InvalidSwap {
            swap_id: event.swap_id.clone(),
            message,
        };

        if event.in_amount.is_empty() || event.out_amount.is_empty() {
            return Err(invalid(format!(
                "missing amount (in: {:?}, out: {:?})",
                event.in_amount, event.out_amount
            )));
        }
        let in_amount = U256::from_dec_str(&event.in_amount)
            .map_err(|e| invalid(format!("bad in amount {}: {}", event.in_amount, e)))?;
        let out_amount = U256::from_dec_str(&event.out_amount)
            .map_err(|e| invalid(format!("bad out amount {}: {}", event.out_amount, e)))?;

        let recipient: Address = event
            .receiver_addr
            .parse()
            .map_err(|e| invalid(format!("bad recipient {}: {}", event.receiver_addr, e)))?;

        let params = if event.params.is_empty() {
            Vec::new()
        } else {
            decode_hex(&event.params).map_err(invalid)?
        };

        Ok(Self {
            swap_id: event.swap_id.clone(),
            deposit_nonce: event.deposit_nonce,
            origin_chain_id: fixed_hex(&event.origin_chain_id).map_err(invalid)?,
            destination_chain_id: fixed_hex(&event.destination_chain_id).map_err(invalid)?,
            resource_id: fixed_hex(&event.resource_id).map_err(invalid)?,
            recipient,
            out_amount,
            in_amount,
            params,
            status,
        })
    }

    /// ABI-encoded call data including the function selector
    pub fn calldata(&self) -> Bytes {
        let mut data = id(UPDATE_SIGNATURE).to_vec();
        data.extend(abi::encode(&[
            Token::Uint(U256::from(self.deposit_nonce)),
            Token::FixedBytes(self.origin_chain_id.to_vec()),
            Token::FixedBytes(self.destination_chain_id.to_vec()),
            Token::FixedBytes(self.resource_id.to_vec()),
            Token::Address(self.recipient),
            Token::Uint(self.out_amount),
            Token::Uint(self.in_amount),
            Token::Bytes(self.params.clone()),
            Token::Uint(U256::from(self.status)),
        ]));
        Bytes::from(data)
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>, String> {
    hex::decode(value.trim_start_matches("0x")).map_err(|e| format!("bad hex {}: {}", value, e))
}

fn fixed_hex<const N: usize>(value: &str) -> Result<[u8; N], String> {
    let bytes = decode_hex(value)?;
    bytes
        .try_into()
        .map_err(|_| format!("expected {} bytes in {}", N, value))
}
