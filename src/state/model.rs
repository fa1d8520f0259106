//! Persisted record kinds: swap events, observed logs and sent transactions

use crate::error::RelayerError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    DepositConfirmed,
    ClaimConfirmed,
    PassedInit,
    PassedSent,
    PassedSentFailed,
    PassedConfirmed,
    PassedFailed,
    SpendConfirmed,
    ExpiredConfirmed,
    UpdateConfirmed,
    UpdateFailed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::DepositConfirmed => "deposit_confirmed",
            EventStatus::ClaimConfirmed => "claim_confirmed",
            EventStatus::PassedInit => "passed_init",
            EventStatus::PassedSent => "passed_sent",
            EventStatus::PassedSentFailed => "passed_sent_failed",
            EventStatus::PassedConfirmed => "passed_confirmed",
            EventStatus::PassedFailed => "passed_failed",
            EventStatus::SpendConfirmed => "spend_confirmed",
            EventStatus::ExpiredConfirmed => "expired_confirmed",
            EventStatus::UpdateConfirmed => "update_confirmed",
            EventStatus::UpdateFailed => "update_failed",
        }
    }

    /// Outcome has been reported back to the origin chain
    pub fn is_reported(&self) -> bool {
        matches!(self, EventStatus::UpdateConfirmed | EventStatus::UpdateFailed)
    }

    /// No further progress is expected from the destination chain
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            EventStatus::SpendConfirmed
                | EventStatus::ExpiredConfirmed
                | EventStatus::UpdateConfirmed
                | EventStatus::UpdateFailed
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "deposit_confirmed" => EventStatus::DepositConfirmed,
            "claim_confirmed" => EventStatus::ClaimConfirmed,
            "passed_init" => EventStatus::PassedInit,
            "passed_sent" => EventStatus::PassedSent,
            "passed_sent_failed" => EventStatus::PassedSentFailed,
            "passed_confirmed" => EventStatus::PassedConfirmed,
            "passed_failed" => EventStatus::PassedFailed,
            "spend_confirmed" => EventStatus::SpendConfirmed,
            "expired_confirmed" => EventStatus::ExpiredConfirmed,
            "update_confirmed" => EventStatus::UpdateConfirmed,
            "update_failed" => EventStatus::UpdateFailed,
            other => return Err(RelayerError::Store(format!("unknown event status {}", other))),
        })
    }
}

/// Kind of on-chain transaction, observed or sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Deposit,
    Claim,
    Passed,
    Spend,
    Expired,
    Update,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "deposit",
            TxType::Claim => "claim",
            TxType::Passed => "passed",
            TxType::Spend => "spend",
            TxType::Expired => "expired",
            TxType::Update => "update",
        }
    }

    /// Position in the swap lifecycle, used to order replays
    pub fn lifecycle_rank(&self) -> u8 {
        match self {
            TxType::Deposit => 0,
            TxType::Claim => 1,
            TxType::Passed => 2,
            TxType::Spend => 3,
            TxType::Expired => 4,
            TxType::Update => 5,
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxType {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "deposit" => TxType::Deposit,
            "claim" => TxType::Claim,
            "passed" => TxType::Passed,
            "spend" => TxType::Spend,
            "expired" => TxType::Expired,
            "update" => TxType::Update,
            other => return Err(RelayerError::Store(format!("unknown tx type {}", other))),
        })
    }
}

/// Status of an observed log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxLogStatus {
    Init,
    Confirmed,
}

impl TxLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxLogStatus::Init => "init",
            TxLogStatus::Confirmed => "confirmed",
        }
    }
}

impl FromStr for TxLogStatus {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(TxLogStatus::Init),
            "confirmed" => Ok(TxLogStatus::Confirmed),
            other => Err(RelayerError::Store(format!("unknown tx log status {}", other))),
        }
    }
}

/// Status of a transaction the relayer submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxSentStatus {
    Init,
    Pending,
    NotFound,
    Confirmed,
    Failed,
}

impl TxSentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxSentStatus::Init => "init",
            TxSentStatus::Pending => "pending",
            TxSentStatus::NotFound => "not_found",
            TxSentStatus::Confirmed => "confirmed",
            TxSentStatus::Failed => "failed",
        }
    }

    /// Still waiting on a receipt
    pub fn is_unsettled(&self) -> bool {
        matches!(
            self,
            TxSentStatus::Init | TxSentStatus::Pending | TxSentStatus::NotFound
        )
    }
}

impl FromStr for TxSentStatus {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "init" => TxSentStatus::Init,
            "pending" => TxSentStatus::Pending,
            "not_found" => TxSentStatus::NotFound,
            "confirmed" => TxSentStatus::Confirmed,
            "failed" => TxSentStatus::Failed,
            other => return Err(RelayerError::Store(format!("unknown tx sent status {}", other))),
        })
    }
}

/// Canonical record of one swap, keyed by `swap_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub swap_id: String,
    pub origin_chain_id: String,
    pub destination_chain_id: String,
    pub resource_id: String,
    pub deposit_nonce: u64,
    pub sender_addr: String,
    pub receiver_addr: String,
    pub in_amount: String,
    pub out_amount: String,
    pub params: String,
    pub status: Option<EventStatus>,
    /// Unix time at which the stuck-swap sweep should look at this swap
    pub check_deadline: Option<i64>,
    pub create_time: i64,
    pub update_time: i64,
}

impl Event {
    /// Overwrite fields with the non-empty fields of `incoming`.
    ///
    /// Status and deadline are left untouched.
    pub fn merge_from(&mut self, incoming: &Event) {
        fn take(dst: &mut String, src: &str) {
            if !src.is_empty() {
                *dst = src.to_string();
            }
        }

        take(&mut self.origin_chain_id, &incoming.origin_chain_id);
        take(&mut self.destination_chain_id, &incoming.destination_chain_id);
        take(&mut self.resource_id, &incoming.resource_id);
        take(&mut self.sender_addr, &incoming.sender_addr);
        take(&mut self.receiver_addr, &incoming.receiver_addr);
        take(&mut self.in_amount, &incoming.in_amount);
        take(&mut self.out_amount, &incoming.out_amount);
        take(&mut self.params, &incoming.params);
        if incoming.deposit_nonce != 0 {
            self.deposit_nonce = incoming.deposit_nonce;
        }
        self.update_time = self.update_time.max(incoming.update_time);
    }
}

/// One relevant log observed on a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxLog {
    /// Surrogate id, 0 until persisted
    pub id: i64,
    pub chain: String,
    pub tx_type: TxType,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_height: u64,
    pub swap_id: String,
    pub origin_chain_id: String,
    pub destination_chain_id: String,
    pub resource_id: String,
    pub deposit_nonce: u64,
    pub sender_addr: String,
    pub receiver_addr: String,
    pub in_amount: String,
    pub out_amount: String,
    pub params: String,
    /// Raw proposal status code, 0 for deposits
    pub swap_status: u8,
    pub confirmed_num: u64,
    pub status: TxLogStatus,
    pub create_time: i64,
    pub update_time: i64,
}

impl TxLog {
    /// Event fields carried by this log, with no status
    pub fn to_event(&self, now: i64) -> Event {
        Event {
            swap_id: self.swap_id.clone(),
            origin_chain_id: self.origin_chain_id.clone(),
            destination_chain_id: self.destination_chain_id.clone(),
            resource_id: self.resource_id.clone(),
            deposit_nonce: self.deposit_nonce,
            sender_addr: self.sender_addr.clone(),
            receiver_addr: self.receiver_addr.clone(),
            in_amount: self.in_amount.clone(),
            out_amount: self.out_amount.clone(),
            params: self.params.clone(),
            status: None,
            check_deadline: None,
            create_time: now,
            update_time: now,
        }
    }

    /// Ordering key used when applying logs of one swap
    pub fn lifecycle_key(&self) -> (u8, u64, u64) {
        (self.tx_type.lifecycle_rank(), self.block_height, self.log_index)
    }
}

/// A bridge log that matched a known signature but could not be decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedLog {
    pub chain: String,
    pub tx_hash: String,
    pub log_index: Option<u64>,
    pub block_height: Option<u64>,
    pub reason: String,
    pub create_time: i64,
}

/// One transaction submitted by the relayer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxSent {
    pub id: i64,
    pub chain: String,
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub swap_id: String,
    pub tx_hash: String,
    pub nonce: u64,
    pub status: TxSentStatus,
    pub err_msg: String,
    pub create_time: i64,
    pub update_time: i64,
}

/// A TxSent row about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewTxSent {
    pub chain: String,
    pub tx_type: TxType,
    pub swap_id: String,
    pub tx_hash: String,
    pub nonce: u64,
    pub status: TxSentStatus,
    pub err_msg: String,
}

impl NewTxSent {
    pub fn into_row(self, id: i64, now: i64) -> TxSent {
        TxSent {
            id,
            chain: self.chain,
            tx_type: self.tx_type,
            swap_id: self.swap_id,
            tx_hash: self.tx_hash,
            nonce: self.nonce,
            status: self.status,
            err_msg: self.err_msg,
            create_time: now,
            update_time: now,
        }
    }
}

/// Result of a submission, written onto the row recorded before it went out
#[derive(Debug, Clone, PartialEq)]
pub struct SentResult {
    pub tx_hash: String,
    pub nonce: u64,
    pub status: TxSentStatus,
    pub err_msg: String,
}

impl SentResult {
    pub fn apply(&self, row: &mut TxSent, now: i64) {
        row.tx_hash = self.tx_hash.clone();
        row.nonce = self.nonce;
        row.status = self.status;
        row.err_msg = self.err_msg.clone();
        row.update_time = now;
    }
}

/// TxSent write carried by a report settlement
#[derive(Debug, Clone, PartialEq)]
pub enum SentWrite {
    Insert(NewTxSent),
    /// Complete the row with this id
    Finish(i64, SentResult),
}
