//! Planning of one confirmation batch
//!
//! Store backends load the rows a batch touches inside their transaction,
//! hand them to [`plan_batch`] and write the returned plan back before
//! committing. Keeping the planning pure means every backend applies the
//! exact same transition rules.

use super::machine::{self, Transition};
use super::model::{Event, EventStatus, TxLog, TxType};

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// A status change decided for one swap
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTransition {
    pub swap_id: String,
    pub tx_type: TxType,
    pub from: Option<EventStatus>,
    pub to: EventStatus,
    /// Fired while replaying logs confirmed in an earlier batch
    pub replayed: bool,
}

/// Everything a backend must write for one batch
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    /// TxLog ids to mark confirmed
    pub confirmed_log_ids: Vec<i64>,
    /// Final event rows for every swap the batch touched
    pub events: Vec<Event>,
    /// Swaps that had no event row before the batch
    pub created: HashSet<String>,
    pub transitions: Vec<AppliedTransition>,
    pub late_arrivals: Vec<(String, TxType)>,
}

/// Outcome of a committed batch, as reported to the engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub confirmed_logs: usize,
    pub events_created: usize,
    pub events_touched: usize,
    pub transitions: Vec<AppliedTransition>,
    pub late_arrivals: usize,
}

impl From<&BatchPlan> for BatchReport {
    fn from(plan: &BatchPlan) -> Self {
        Self {
            confirmed_logs: plan.confirmed_log_ids.len(),
            events_created: plan.created.len(),
            events_touched: plan.events.len(),
            transitions: plan.transitions.clone(),
            late_arrivals: plan.late_arrivals.len(),
        }
    }
}

/// Plan the confirmation of `logs`.
///
/// * `existing` holds the current event row of every swap in `logs` that has one.
/// * `prior_confirmed` holds logs of those swaps confirmed in earlier batches.
pub fn plan_batch(
    logs: &[TxLog],
    existing: &HashMap<String, Event>,
    prior_confirmed: &[TxLog],
    now: i64,
    stuck_timeout_secs: i64,
) -> BatchPlan {
    let mut plan = BatchPlan {
        confirmed_log_ids: logs.iter().map(|l| l.id).collect(),
        ..Default::default()
    };

    let mut by_swap: BTreeMap<&str, Vec<&TxLog>> = BTreeMap::new();
    for log in logs {
        by_swap.entry(log.swap_id.as_str()).or_default().push(log);
    }

    let batch_ids: HashSet<i64> = plan.confirmed_log_ids.iter().copied().collect();

    for (swap_id, mut swap_logs) in by_swap {
        swap_logs.sort_by_key(|l| l.lifecycle_key());

        let mut event = match existing.get(swap_id) {
            Some(event) => event.clone(),
            None => {
                plan.created.insert(swap_id.to_string());
                swap_logs[0].to_event(now)
            }
        };
        for log in &swap_logs {
            event.merge_from(&log.to_event(now));
        }

        let status_before = event.status;
        for log in &swap_logs {
            apply_log(&mut plan, &mut event, log.tx_type, false, now);
        }

        // Destination-side logs confirmed before the deposit were no-ops.
        if status_before.is_none() && event.status.is_some() {
            let mut earlier: Vec<&TxLog> = prior_confirmed
                .iter()
                .filter(|l| l.swap_id == swap_id && !batch_ids.contains(&l.id))
                .collect();
            earlier.sort_by_key(|l| l.lifecycle_key());
            for log in earlier {
                apply_log(&mut plan, &mut event, log.tx_type, true, now);
            }
        }

        let reached_claim = plan
            .transitions
            .iter()
            .any(|t| t.swap_id == swap_id && t.to == EventStatus::ClaimConfirmed);
        if reached_claim && event.check_deadline.is_none() {
            event.check_deadline = Some(now + stuck_timeout_secs);
        }

        plan.events.push(event);
    }

    plan
}

fn apply_log(plan: &mut BatchPlan, event: &mut Event, tx_type: TxType, replayed: bool, now: i64) {
    let current = event.status;
    let transition = machine::apply(tx_type, current);

    match transition {
        Transition::Advance(next) => {
            debug!(
                "Swap {}: {} moves {:?} -> {}",
                event.swap_id, tx_type, current, next
            );
            event.status = Some(next);
            event.update_time = now;
            plan.transitions.push(AppliedTransition {
                swap_id: event.swap_id.clone(),
                tx_type,
                from: current,
                to: next,
                replayed,
            });
        }
        Transition::Ignore(reason) => {
            if machine::is_late_arrival(current, transition) {
                warn!(
                    "Late {} for swap {} already at {:?}, ignoring",
                    tx_type, event.swap_id, current
                );
                plan.late_arrivals.push((event.swap_id.clone(), tx_type));
            } else {
                debug!(
                    "Swap {}: {} ignored at {:?} ({:?})",
                    event.swap_id, tx_type, current, reason
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::state::model::TxLogStatus;

    pub(crate) fn log(id: i64, swap_id: &str, tx_type: TxType) -> TxLog {
        TxLog {
            id,
            chain: "ETH".to_string(),
            tx_type,
            tx_hash: format!("0x{:064x}", id),
            log_index: 0,
            block_height: 100 + id as u64,
            swap_id: swap_id.to_string(),
            origin_chain_id: "0000000000000002".to_string(),
            destination_chain_id: "0000000000000001".to_string(),
            resource_id: "00".repeat(32),
            deposit_nonce: 5,
            sender_addr: String::new(),
            receiver_addr: String::new(),
            in_amount: if tx_type == TxType::Deposit { "1000".to_string() } else { String::new() },
            out_amount: if tx_type == TxType::Deposit { String::new() } else { "990".to_string() },
            params: String::new(),
            swap_status: 0,
            confirmed_num: 10,
            status: TxLogStatus::Init,
            create_time: 0,
            update_time: 0,
        }
    }

    #[test]
    fn test_new_deposit_creates_event() {
        let plan = plan_batch(&[log(1, "a", TxType::Deposit)], &HashMap::new(), &[], 50, 300);
        assert_eq!(plan.confirmed_log_ids, vec![1]);
        assert!(plan.created.contains("a"));
        assert_eq!(plan.events.len(), 1);
        assert_eq!(plan.events[0].status, Some(EventStatus::DepositConfirmed));
        assert_eq!(plan.events[0].in_amount, "1000");
    }

    #[test]
    fn test_order_within_batch_does_not_matter() {
        let forward = plan_batch(
            &[log(1, "a", TxType::Deposit), log(2, "a", TxType::Claim)],
            &HashMap::new(),
            &[],
            50,
            300,
        );
        let backward = plan_batch(
            &[log(2, "a", TxType::Claim), log(1, "a", TxType::Deposit)],
            &HashMap::new(),
            &[],
            50,
            300,
        );
        assert_eq!(forward.events[0].status, Some(EventStatus::ClaimConfirmed));
        assert_eq!(backward.events[0].status, Some(EventStatus::ClaimConfirmed));
        assert_eq!(forward.events[0].check_deadline, Some(350));
    }

    #[test]
    fn test_destination_first_is_replayed() {
        // Claim confirmed earlier while the event had no status.
        let claim = log(1, "a", TxType::Claim);
        let mut existing = HashMap::new();
        existing.insert("a".to_string(), claim.to_event(10));

        let plan = plan_batch(&[log(2, "a", TxType::Deposit)], &existing, &[claim], 50, 300);
        assert_eq!(plan.events[0].status, Some(EventStatus::ClaimConfirmed));
        assert!(plan.transitions.iter().any(|t| t.replayed && t.tx_type == TxType::Claim));
        assert!(plan.created.is_empty());
    }

    #[test]
    fn test_late_arrival_counted() {
        let mut event = log(1, "a", TxType::Deposit).to_event(10);
        event.status = Some(EventStatus::UpdateConfirmed);
        let mut existing = HashMap::new();
        existing.insert("a".to_string(), event);

        let plan = plan_batch(&[log(2, "a", TxType::Claim)], &existing, &[], 50, 300);
        assert_eq!(plan.events[0].status, Some(EventStatus::UpdateConfirmed));
        assert_eq!(plan.late_arrivals, vec![("a".to_string(), TxType::Claim)]);
        assert!(plan.transitions.is_empty());
    }
}
