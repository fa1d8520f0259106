//! Bridge contract events and parsing
//!
//! Decodes `Deposit` and `ProposalEvent` logs emitted by the bridge contracts
//! into a closed set of event variants, each convertible into a [`TxLog`].

use crate::error::{RelayerError, RelayerResult};
use crate::state::{TxLog, TxLogStatus, TxType};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Log, H256, U256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tracing::{debug, warn};

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use ethers::types::H256;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref DEPOSIT: H256 =
            "0x3cdf0bc4e2723a2132944314ba37022e8f01ee627cbbc3c834065f80f8b2b04f"
                .parse()
                .expect("valid topic");
        pub static ref PROPOSAL: H256 =
            "0x98515ff66d46eef043e6e17beb65b19f71802dc829ff974ca92d66d61019286d"
                .parse()
                .expect("valid topic");
    }
}

/// Deterministic swap identifier: keccak256 over origin id, destination id
/// and the decimal deposit nonce.
pub fn swap_id(origin_chain_id: &[u8; 8], destination_chain_id: &[u8; 8], deposit_nonce: u64) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(hex::encode(origin_chain_id).as_bytes());
    hasher.update(hex::encode(destination_chain_id).as_bytes());
    hasher.update(deposit_nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Asset deposited on an origin chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub origin_chain_id: [u8; 8],
    pub destination_chain_id: [u8; 8],
    pub resource_id: [u8; 32],
    pub deposit_nonce: u64,
    pub depositor: Address,
    pub recipient: Address,
    pub token: Address,
    pub amount: U256,
    pub params: [u8; 32],
}

/// Proposal progress reported by the home chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalEvent {
    pub origin_chain_id: [u8; 8],
    pub destination_chain_id: [u8; 8],
    pub recipient: Address,
    pub amount: U256,
    pub deposit_nonce: u64,
    pub status: u8,
    pub resource_id: [u8; 32],
}

impl ProposalEvent {
    /// Transaction type implied by the proposal status code
    pub fn tx_type(&self) -> Option<TxType> {
        match self.status {
            1 => Some(TxType::Claim),
            2 => Some(TxType::Passed),
            3 => Some(TxType::Spend),
            4 => Some(TxType::Expired),
            _ => None,
        }
    }
}

/// Decoded bridge event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeEvent {
    Deposit(DepositEvent),
    Proposal(ProposalEvent),
}

/// Where a log was found
#[derive(Debug, Clone, PartialEq)]
pub struct LogPosition {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_height: u64,
}

impl BridgeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::Deposit(_) => "deposit",
            BridgeEvent::Proposal(_) => "proposal",
        }
    }

    pub fn swap_id(&self) -> String {
        match self {
            BridgeEvent::Deposit(ev) => {
                swap_id(&ev.origin_chain_id, &ev.destination_chain_id, ev.deposit_nonce)
            }
            BridgeEvent::Proposal(ev) => {
                swap_id(&ev.origin_chain_id, &ev.destination_chain_id, ev.deposit_nonce)
            }
        }
    }

    /// Build the unconfirmed log row for this event.
    ///
    /// Returns `None` for proposals whose status carries no transition.
    pub fn to_tx_log(&self, chain: &str, position: &LogPosition, now: i64) -> Option<TxLog> {
        let mut log = TxLog {
            id: 0,
            chain: chain.to_string(),
            tx_type: TxType::Deposit,
            tx_hash: position.tx_hash.clone(),
            log_index: position.log_index,
            block_height: position.block_height,
            swap_id: self.swap_id(),
            origin_chain_id: String::new(),
            destination_chain_id: String::new(),
            resource_id: String::new(),
            deposit_nonce: 0,
            sender_addr: String::new(),
            receiver_addr: String::new(),
            in_amount: String::new(),
            out_amount: String::new(),
            params: String::new(),
            swap_status: 0,
            confirmed_num: 0,
            status: TxLogStatus::Init,
            create_time: now,
            update_time: now,
        };

        match self {
            BridgeEvent::Deposit(ev) => {
                log.origin_chain_id = hex::encode(ev.origin_chain_id);
                log.destination_chain_id = hex::encode(ev.destination_chain_id);
                log.resource_id = hex::encode(ev.resource_id);
                log.deposit_nonce = ev.deposit_nonce;
                log.sender_addr = to_checksum(&ev.depositor, None);
                log.receiver_addr = to_checksum(&ev.recipient, None);
                log.in_amount = ev.amount.to_string();
                log.params = hex::encode(ev.params);
            }
            BridgeEvent::Proposal(ev) => {
                log.tx_type = ev.tx_type()?;
                log.origin_chain_id = hex::encode(ev.origin_chain_id);
                log.destination_chain_id = hex::encode(ev.destination_chain_id);
                log.resource_id = hex::encode(ev.resource_id);
                log.deposit_nonce = ev.deposit_nonce;
                log.receiver_addr = to_checksum(&ev.recipient, None);
                log.out_amount = ev.amount.to_string();
                log.swap_status = ev.status;
            }
        }

        Some(log)
    }
}

/// Event parser for one chain's bridge contract
pub struct EventParser {
    chain: String,
    /// Home chain packs every deposit field into data and emits proposals
    is_home: bool,
}

impl EventParser {
    pub fn new(chain: &str, is_home: bool) -> Self {
        Self {
            chain: chain.to_string(),
            is_home,
        }
    }

    /// Position of a mined log
    pub fn position(&self, log: &Log) -> RelayerResult<LogPosition> {
        let block_height = log
            .block_number
            .ok_or_else(|| RelayerError::EventParsing("log has no block number".to_string()))?
            .as_u64();
        let tx_hash = log
            .transaction_hash
            .ok_or_else(|| RelayerError::EventParsing("log has no transaction hash".to_string()))?;
        let log_index = log
            .log_index
            .ok_or_else(|| RelayerError::EventParsing("log has no log index".to_string()))
            .and_then(|i| bounded(i, u64::MAX, "log index"))?;

        Ok(LogPosition {
            tx_hash: format!("{:?}", tx_hash),
            log_index,
            block_height,
        })
    }

    /// Parse a log entry; `Ok(None)` for logs this relayer does not track
    pub fn parse_log(&self, log: &Log) -> RelayerResult<Option<BridgeEvent>> {
        if log.removed == Some(true) {
            return Ok(None);
        }
        let Some(topic) = log.topics.first() else {
            return Ok(None);
        };

        if *topic == *topics::DEPOSIT {
            let event = if self.is_home {
                self.parse_packed_deposit(log)?
            } else {
                self.parse_indexed_deposit(log)?
            };
            return Ok(Some(BridgeEvent::Deposit(event)));
        }

        if *topic == *topics::PROPOSAL {
            if !self.is_home {
                debug!("Chain {}: ignoring proposal event off the home chain", self.chain);
                return Ok(None);
            }
            let event = self.parse_proposal(log)?;
            if event.tx_type().is_none() {
                warn!(
                    "Chain {}: proposal for nonce {} has untracked status {}",
                    self.chain, event.deposit_nonce, event.status
                );
            }
            return Ok(Some(BridgeEvent::Proposal(event)));
        }

        Ok(None)
    }

    /// Home chain deposit: every field is in data
    fn parse_packed_deposit(&self, log: &Log) -> RelayerResult<DepositEvent> {
        let tokens = decode(
            &[
                ParamType::FixedBytes(8),
                ParamType::FixedBytes(8),
                ParamType::FixedBytes(32),
                ParamType::Uint(64),
                ParamType::Address,
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::FixedBytes(32),
            ],
            &log.data,
        )?;
        let mut tokens = tokens.into_iter();

        Ok(DepositEvent {
            origin_chain_id: fixed_bytes(tokens.next())?,
            destination_chain_id: fixed_bytes(tokens.next())?,
            resource_id: fixed_bytes(tokens.next())?,
            deposit_nonce: bounded(uint(tokens.next())?, u64::MAX, "deposit nonce")?,
            depositor: address(tokens.next())?,
            recipient: address(tokens.next())?,
            token: address(tokens.next())?,
            amount: uint(tokens.next())?,
            params: fixed_bytes(tokens.next())?,
        })
    }

    /// Foreign chain deposit: destination, resource id and nonce are indexed
    fn parse_indexed_deposit(&self, log: &Log) -> RelayerResult<DepositEvent> {
        if log.topics.len() < 4 {
            return Err(RelayerError::EventParsing(format!(
                "deposit log has {} topics, expected 4",
                log.topics.len()
            )));
        }

        let tokens = decode(
            &[
                ParamType::FixedBytes(8),
                ParamType::Address,
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::FixedBytes(32),
            ],
            &log.data,
        )?;
        let mut tokens = tokens.into_iter();

        let mut destination_chain_id = [0u8; 8];
        destination_chain_id.copy_from_slice(&log.topics[1].as_bytes()[..8]);
        let nonce = bounded(
            U256::from_big_endian(log.topics[3].as_bytes()),
            u64::MAX,
            "deposit nonce",
        )?;

        Ok(DepositEvent {
            origin_chain_id: fixed_bytes(tokens.next())?,
            destination_chain_id,
            resource_id: topic_bytes(&log.topics[2]),
            deposit_nonce: nonce,
            depositor: address(tokens.next())?,
            recipient: address(tokens.next())?,
            token: address(tokens.next())?,
            amount: uint(tokens.next())?,
            params: fixed_bytes(tokens.next())?,
        })
    }

    fn parse_proposal(&self, log: &Log) -> RelayerResult<ProposalEvent> {
        let tokens = decode(
            &[
                ParamType::FixedBytes(8),
                ParamType::FixedBytes(8),
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(64),
                ParamType::Uint(8),
                ParamType::FixedBytes(32),
            ],
            &log.data,
        )?;
        let mut tokens = tokens.into_iter();

        Ok(ProposalEvent {
            origin_chain_id: fixed_bytes(tokens.next())?,
            destination_chain_id: fixed_bytes(tokens.next())?,
            recipient: address(tokens.next())?,
            amount: uint(tokens.next())?,
            deposit_nonce: bounded(uint(tokens.next())?, u64::MAX, "deposit nonce")?,
            status: bounded(uint(tokens.next())?, u8::MAX.into(), "proposal status")?
                as u8,
            resource_id: fixed_bytes(tokens.next())?,
        })
    }
}

fn decode(types: &[ParamType], data: &[u8]) -> RelayerResult<Vec<Token>> {
    abi::decode(types, data).map_err(|e| RelayerError::EventParsing(e.to_string()))
}

fn fixed_bytes<const N: usize>(token: Option<Token>) -> RelayerResult<[u8; N]> {
    let bytes = token
        .and_then(Token::into_fixed_bytes)
        .ok_or_else(|| RelayerError::EventParsing("expected fixed bytes".to_string()))?;
    bytes
        .try_into()
        .map_err(|_| RelayerError::EventParsing(format!("expected bytes{}", N)))
}

fn uint(token: Option<Token>) -> RelayerResult<U256> {
    token
        .and_then(Token::into_uint)
        .ok_or_else(|| RelayerError::EventParsing("expected uint".to_string()))
}

/// Narrow an ABI word, rejecting values above `max`
fn bounded(value: U256, max: u64, field: &str) -> RelayerResult<u64> {
    if value > U256::from(max) {
        return Err(RelayerError::EventParsing(format!("{} {} overflows", field, value)));
    }
    Ok(value.as_u64())
}

fn address(token: Option<Token>) -> RelayerResult<Address> {
    token
        .and_then(Token::into_address)
        .ok_or_else(|| RelayerError::EventParsing("expected address".to_string()))
}

fn topic_bytes(topic: &H256) -> [u8; 32] {
    topic.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ethers::types::{Bytes, U64};

    pub(crate) const HOME: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];
    pub(crate) const FOREIGN: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 2];

    fn mined(topics: Vec<H256>, data: Vec<u8>, block: u64) -> Log {
        Log {
            topics,
            data: Bytes::from(data),
            block_number: Some(U64::from(block)),
            transaction_hash: Some(H256::from_low_u64_be(block)),
            log_index: Some(U256::from(1)),
            ..Default::default()
        }
    }

    pub(crate) fn foreign_deposit_log(nonce: u64, amount: u64, block: u64) -> Log {
        let mut dest_topic = [0u8; 32];
        dest_topic[..8].copy_from_slice(&HOME);
        let data = abi::encode(&[
            Token::FixedBytes(FOREIGN.to_vec()),
            Token::Address(Address::repeat_byte(0x11)),
            Token::Address(Address::repeat_byte(0x22)),
            Token::Address(Address::repeat_byte(0x33)),
            Token::Uint(U256::from(amount)),
            Token::FixedBytes(vec![0u8; 32]),
        ]);
        mined(
            vec![
                *topics::DEPOSIT,
                H256(dest_topic),
                H256::repeat_byte(0xaa),
                H256::from_low_u64_be(nonce),
            ],
            data,
            block,
        )
    }

    pub(crate) fn proposal_log(nonce: u64, status: u8, block: u64) -> Log {
        let data = abi::encode(&[
            Token::FixedBytes(FOREIGN.to_vec()),
            Token::FixedBytes(HOME.to_vec()),
            Token::Address(Address::repeat_byte(0x22)),
            Token::Uint(U256::from(990u64)),
            Token::Uint(U256::from(nonce)),
            Token::Uint(U256::from(status)),
            Token::FixedBytes(vec![0xaa; 32]),
        ]);
        mined(vec![*topics::PROPOSAL], data, block)
    }

    #[test]
    fn test_swap_id_is_deterministic() {
        let a = swap_id(&FOREIGN, &HOME, 5);
        assert_eq!(a, swap_id(&FOREIGN, &HOME, 5));
        assert_ne!(a, swap_id(&FOREIGN, &HOME, 6));
        assert_ne!(a, swap_id(&HOME, &FOREIGN, 5));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_parse_foreign_deposit() {
        let parser = EventParser::new("ETH", false);
        let log = foreign_deposit_log(5, 1000, 42);

        let event = parser.parse_log(&log).unwrap().unwrap();
        let BridgeEvent::Deposit(deposit) = &event else {
            panic!("expected deposit");
        };
        assert_eq!(deposit.origin_chain_id, FOREIGN);
        assert_eq!(deposit.destination_chain_id, HOME);
        assert_eq!(deposit.deposit_nonce, 5);
        assert_eq!(deposit.resource_id, [0xaa; 32]);

        let position = parser.position(&log).unwrap();
        let tx_log = event.to_tx_log("ETH", &position, 7).unwrap();
        assert_eq!(tx_log.tx_type, TxType::Deposit);
        assert_eq!(tx_log.swap_id, swap_id(&FOREIGN, &HOME, 5));
        assert_eq!(tx_log.in_amount, "1000");
        assert_eq!(tx_log.block_height, 42);
        assert_eq!(tx_log.log_index, 1);
        assert_eq!(tx_log.status, TxLogStatus::Init);
        assert_eq!(tx_log.origin_chain_id, "0000000000000002");
    }

    #[test]
    fn test_parse_packed_deposit_on_home_chain() {
        let data = abi::encode(&[
            Token::FixedBytes(HOME.to_vec()),
            Token::FixedBytes(FOREIGN.to_vec()),
            Token::FixedBytes(vec![0xbb; 32]),
            Token::Uint(U256::from(9u64)),
            Token::Address(Address::repeat_byte(0x11)),
            Token::Address(Address::repeat_byte(0x22)),
            Token::Address(Address::repeat_byte(0x33)),
            Token::Uint(U256::from(77u64)),
            Token::FixedBytes(vec![0u8; 32]),
        ]);
        let log = mined(vec![*topics::DEPOSIT], data, 10);

        let event = EventParser::new("LA", true).parse_log(&log).unwrap().unwrap();
        assert_eq!(event.swap_id(), swap_id(&HOME, &FOREIGN, 9));
    }

    #[test]
    fn test_out_of_range_words_are_rejected() {
        let data = abi::encode(&[
            Token::FixedBytes(HOME.to_vec()),
            Token::FixedBytes(FOREIGN.to_vec()),
            Token::FixedBytes(vec![0xbb; 32]),
            Token::Uint(U256::from(u64::MAX) + 1),
            Token::Address(Address::repeat_byte(0x11)),
            Token::Address(Address::repeat_byte(0x22)),
            Token::Address(Address::repeat_byte(0x33)),
            Token::Uint(U256::from(77u64)),
            Token::FixedBytes(vec![0u8; 32]),
        ]);
        let log = mined(vec![*topics::DEPOSIT], data, 10);
        assert!(EventParser::new("LA", true).parse_log(&log).is_err());

        let data = abi::encode(&[
            Token::FixedBytes(FOREIGN.to_vec()),
            Token::FixedBytes(HOME.to_vec()),
            Token::Address(Address::repeat_byte(0x22)),
            Token::Uint(U256::from(990u64)),
            Token::Uint(U256::from(5u64)),
            Token::Uint(U256::from(257u64)),
            Token::FixedBytes(vec![0xaa; 32]),
        ]);
        let log = mined(vec![*topics::PROPOSAL], data, 20);
        assert!(EventParser::new("LA", true).parse_log(&log).is_err());

        let mut log = foreign_deposit_log(5, 1000, 42);
        log.topics[3] = H256::repeat_byte(0xff);
        assert!(EventParser::new("ETH", false).parse_log(&log).is_err());
    }

    #[test]
    fn test_log_without_index_is_unmined() {
        let parser = EventParser::new("ETH", false);
        let mut log = foreign_deposit_log(5, 1000, 42);
        log.log_index = None;
        assert!(parser.parse_log(&log).unwrap().is_some());
        assert!(parser.position(&log).is_err());
    }

    #[test]
    fn test_proposal_status_maps_to_tx_type() {
        let parser = EventParser::new("LA", true);
        let cases = [
            (1, Some(TxType::Claim)),
            (2, Some(TxType::Passed)),
            (3, Some(TxType::Spend)),
            (4, Some(TxType::Expired)),
            (0, None),
        ];
        for (status, expected) in cases {
            let log = proposal_log(5, status, 20);
            let event = parser.parse_log(&log).unwrap().unwrap();
            let position = parser.position(&log).unwrap();
            let tx_log = event.to_tx_log("LA", &position, 0);
            assert_eq!(tx_log.map(|l| l.tx_type), expected, "status {}", status);
        }
    }

    #[test]
    fn test_proposal_and_deposit_share_swap_id() {
        let deposit = EventParser::new("ETH", false)
            .parse_log(&foreign_deposit_log(5, 1000, 42))
            .unwrap()
            .unwrap();
        let proposal = EventParser::new("LA", true)
            .parse_log(&proposal_log(5, 1, 50))
            .unwrap()
            .unwrap();
        assert_eq!(deposit.swap_id(), proposal.swap_id());
    }

    #[test]
    fn test_unknown_and_malformed_logs() {
        let parser = EventParser::new("ETH", false);
        let unknown = mined(vec![H256::repeat_byte(0x01)], vec![], 1);
        assert!(parser.parse_log(&unknown).unwrap().is_none());

        let proposal_off_home = proposal_log(1, 1, 1);
        assert!(parser.parse_log(&proposal_off_home).unwrap().is_none());

        let truncated = mined(vec![*topics::DEPOSIT], vec![0u8; 10], 1);
        assert!(parser.parse_log(&truncated).is_err());
    }
}
