pub mod allocation;
pub mod standard;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::charge::Charge;
use crate::errors::Result;
use crate::installment::Installment;
use crate::money::{Currency, Money};
use crate::transaction::Transaction;
use crate::types::TransactionId;

pub use allocation::{AllocationPriority, AllocationRule};
pub use standard::StandardProcessor;

/// outcome of a full reprocessing pass
#[derive(Debug, Default)]
pub struct ChangedTransactionDetail {
    /// transactions whose recomputed split changed: the reversed original's
    /// id mapped to its replacement, which the ledger must append
    pub new_transaction_mappings: BTreeMap<TransactionId, Transaction>,
    /// cumulative overpaid balance left after the pass
    pub overpaid_balance: Option<Money>,
}

impl ChangedTransactionDetail {
    pub fn new() -> Self {
        Self::default()
    }
}

/// allocation strategy seam: consumes the ordered transaction stream and
/// mutates installment and charge paid/waived state
pub trait TransactionProcessor {
    /// full replay from the disbursement date; the correctness reference
    fn reprocess(
        &self,
        disbursement_date: NaiveDate,
        currency: Currency,
        transactions: &mut [Transaction],
        installments: &mut [Installment],
        charges: &mut [Charge],
    ) -> Result<ChangedTransactionDetail>;

    /// cheap path: apply only the newest transaction to the live schedule;
    /// callers must have established it is chronologically latest
    fn process_latest(
        &self,
        transaction: &mut Transaction,
        installments: &mut [Installment],
        charges: &mut [Charge],
        overpaid_balance: &mut Money,
    ) -> Result<()>;

    /// whether the cheap path may be taken for this transaction
    fn can_fast_apply(&self, transaction: &Transaction, installments: &[Installment]) -> bool;
}
