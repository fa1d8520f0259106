//! Transaction submission: status report encoding and signed broadcast

mod sender;
mod update;

pub use sender::{SubmittedTx, TransactionSender};
pub use update::{UpdatePayload, STATUS_FAILURE, STATUS_SUCCESS};

#[cfg(test)]
pub(crate) use update::tests::reportable_event;
