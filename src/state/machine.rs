//! Guarded status transitions for swap events
//!
//! Every transaction type carries an allow-set (statuses it may fire from)
//! and a deny-set (statuses that block it even when allowed). Anything not
//! permitted is ignored rather than treated as an error, so redelivered or
//! out-of-order logs never move a swap backwards.

use super::model::{EventStatus, TxType};

use EventStatus::*;

/// Statuses a rule may fire from
#[derive(Debug, Clone, Copy)]
enum Allow {
    /// Only an event with no status yet
    Initial,
    From(&'static [EventStatus]),
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    allow: Allow,
    deny: &'static [EventStatus],
    next: EventStatus,
}

const DEPOSIT: Rule = Rule {
    allow: Allow::Initial,
    deny: &[
        ClaimConfirmed,
        PassedInit,
        PassedConfirmed,
        SpendConfirmed,
        ExpiredConfirmed,
        UpdateConfirmed,
        UpdateFailed,
    ],
    next: DepositConfirmed,
};

const CLAIM: Rule = Rule {
    allow: Allow::From(&[DepositConfirmed, ClaimConfirmed]),
    deny: &[
        PassedInit,
        PassedConfirmed,
        SpendConfirmed,
        ExpiredConfirmed,
        UpdateConfirmed,
        UpdateFailed,
    ],
    next: ClaimConfirmed,
};

const PASSED: Rule = Rule {
    allow: Allow::From(&[ClaimConfirmed, DepositConfirmed, PassedInit]),
    deny: &[
        PassedSent,
        PassedSentFailed,
        PassedConfirmed,
        PassedFailed,
        SpendConfirmed,
        ExpiredConfirmed,
        UpdateConfirmed,
        UpdateFailed,
    ],
    next: PassedInit,
};

const SPEND: Rule = Rule {
    allow: Allow::From(&[
        DepositConfirmed,
        ClaimConfirmed,
        PassedInit,
        PassedConfirmed,
        PassedSent,
        UpdateConfirmed,
        UpdateFailed,
    ]),
    deny: &[ExpiredConfirmed, PassedFailed],
    next: SpendConfirmed,
};

const EXPIRED: Rule = Rule {
    allow: Allow::From(&[
        DepositConfirmed,
        ClaimConfirmed,
        PassedInit,
        PassedSent,
        PassedSentFailed,
        PassedFailed,
        UpdateConfirmed,
        UpdateFailed,
    ]),
    deny: &[SpendConfirmed, PassedConfirmed],
    next: ExpiredConfirmed,
};

fn rule_for(tx_type: TxType) -> Option<&'static Rule> {
    match tx_type {
        TxType::Deposit => Some(&DEPOSIT),
        TxType::Claim => Some(&CLAIM),
        TxType::Passed => Some(&PASSED),
        TxType::Spend => Some(&SPEND),
        TxType::Expired => Some(&EXPIRED),
        TxType::Update => None,
    }
}

/// Why a transition did not fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// Current status is in the deny-set
    Denied,
    /// Current status is not in the allow-set
    NotAllowed,
    /// Transition would not change the status
    Unchanged,
    /// Transaction type has no rule
    NoRule,
}

/// Result of applying a transaction type to a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advance(EventStatus),
    Ignore(Ignored),
}

impl Transition {
    pub fn next(&self) -> Option<EventStatus> {
        match self {
            Transition::Advance(status) => Some(*status),
            Transition::Ignore(_) => None,
        }
    }
}

/// Decide the next status for an event currently at `current`
pub fn apply(tx_type: TxType, current: Option<EventStatus>) -> Transition {
    let Some(rule) = rule_for(tx_type) else {
        return Transition::Ignore(Ignored::NoRule);
    };

    if let Some(status) = current {
        if rule.deny.contains(&status) {
            return Transition::Ignore(Ignored::Denied);
        }
    }

    let allowed = match (rule.allow, current) {
        (Allow::Initial, None) => true,
        (Allow::Initial, Some(_)) => false,
        (Allow::From(_), None) => false,
        (Allow::From(set), Some(status)) => set.contains(&status),
    };
    if !allowed {
        return Transition::Ignore(Ignored::NotAllowed);
    }

    if current == Some(rule.next) {
        return Transition::Ignore(Ignored::Unchanged);
    }

    Transition::Advance(rule.next)
}

/// A rejected transition on a swap that was already reported back
pub fn is_late_arrival(current: Option<EventStatus>, transition: Transition) -> bool {
    matches!(
        (current, transition),
        (Some(status), Transition::Ignore(Ignored::Denied | Ignored::NotAllowed)) if status.is_reported()
    )
}
