use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::{Currency, Money};
use crate::types::{ChargeId, TransactionId, TransactionKind};

/// link from a transaction to a charge it paid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargePaidBy {
    pub charge_id: ChargeId,
    pub amount: Money,
    pub installment_number: Option<u32>,
}

/// how a transaction's amount landed on one installment; used by undo and
/// adjustment to know what to reverse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleMapping {
    pub installment_number: u32,
    pub principal_portion: Money,
    pub interest_portion: Money,
    pub fee_portion: Money,
    pub penalty_portion: Money,
}

impl ScheduleMapping {
    pub fn total(&self) -> Money {
        self.principal_portion + self.interest_portion + self.fee_portion + self.penalty_portion
    }
}

/// an immutable-once-posted monetary event against the loan
///
/// Never deleted: reversal flags the row and excludes it from every derived
/// total, keeping the audit trail intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub date: NaiveDate,
    /// insertion timestamp, the first tie-break for same-date ordering
    pub created_at: DateTime<Utc>,
    /// append-order stamp assigned by the ledger; the final tie-break, so
    /// same-date same-instant entries replay in insertion order
    #[serde(default)]
    pub sequence: u64,
    pub amount: Money,
    pub principal_portion: Money,
    pub interest_portion: Money,
    pub fee_portion: Money,
    pub penalty_portion: Money,
    pub overpayment_portion: Money,
    /// income forgiven by a waiver before it was ever accrued
    pub unrecognized_income_portion: Money,
    pub reversed: bool,
    pub manually_adjusted: bool,
    pub charges_paid: Vec<ChargePaidBy>,
    pub schedule_mappings: Vec<ScheduleMapping>,
}

impl Transaction {
    pub fn new(
        kind: TransactionKind,
        amount: Money,
        date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Self {
        let zero = Money::zero(amount.currency());
        Self {
            id: Uuid::new_v4(),
            kind,
            date,
            created_at,
            sequence: 0,
            amount,
            principal_portion: zero,
            interest_portion: zero,
            fee_portion: zero,
            penalty_portion: zero,
            overpayment_portion: zero,
            unrecognized_income_portion: zero,
            reversed: false,
            manually_adjusted: false,
            charges_paid: Vec::new(),
            schedule_mappings: Vec::new(),
        }
    }

    pub fn disbursement(amount: Money, date: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Transaction::new(TransactionKind::Disbursement, amount, date, created_at)
    }

    pub fn repayment(amount: Money, date: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Transaction::new(TransactionKind::Repayment, amount, date, created_at)
    }

    pub fn repayment_at_disbursement(
        amount: Money,
        date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Self {
        Transaction::new(
            TransactionKind::RepaymentAtDisbursement,
            amount,
            date,
            created_at,
        )
    }

    pub fn waive_interest(amount: Money, date: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Transaction::new(TransactionKind::WaiveInterest, amount, date, created_at)
    }

    pub fn charge_payment(amount: Money, date: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Transaction::new(TransactionKind::ChargePayment, amount, date, created_at)
    }

    pub fn write_off(amount: Money, date: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Transaction::new(TransactionKind::WriteOff, amount, date, created_at)
    }

    pub fn recovery_repayment(amount: Money, date: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Transaction::new(TransactionKind::RecoveryRepayment, amount, date, created_at)
    }

    pub fn refund(amount: Money, date: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Transaction::new(TransactionKind::Refund, amount, date, created_at)
    }

    pub fn accrual(amount: Money, date: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Transaction::new(TransactionKind::Accrual, amount, date, created_at)
    }

    pub fn income_posting(amount: Money, date: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Transaction::new(TransactionKind::IncomePosting, amount, date, created_at)
    }

    pub fn currency(&self) -> Currency {
        self.amount.currency()
    }

    /// flag the transaction reversed; idempotent, effects excluded everywhere
    pub fn reverse(&mut self) {
        self.reversed = true;
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn is_repayment_like(&self) -> bool {
        self.kind.is_repayment_like()
    }

    pub fn is_interest_waiver(&self) -> bool {
        self.kind == TransactionKind::WaiveInterest
    }

    pub fn is_write_off(&self) -> bool {
        self.kind == TransactionKind::WriteOff
    }

    pub fn is_recovery_repayment(&self) -> bool {
        self.kind == TransactionKind::RecoveryRepayment
    }

    pub fn is_disbursement(&self) -> bool {
        self.kind == TransactionKind::Disbursement
    }

    /// whether this transaction's amount should be attributed to the
    /// schedule when checking conservation and summary totals
    pub fn counts_against_schedule(&self) -> bool {
        !self.reversed
            && matches!(
                self.kind,
                TransactionKind::Repayment
                    | TransactionKind::RepaymentAtDisbursement
                    | TransactionKind::ChargePayment
                    | TransactionKind::RefundForActiveLoan
            )
    }

    /// zero every derived portion and mapping before reallocation
    pub fn reset_derived_components(&mut self) {
        let zero = Money::zero(self.currency());
        self.principal_portion = zero;
        self.interest_portion = zero;
        self.fee_portion = zero;
        self.penalty_portion = zero;
        self.overpayment_portion = zero;
        self.unrecognized_income_portion = zero;
        self.charges_paid.clear();
        self.schedule_mappings.clear();
    }

    /// whether this transaction has ever been through an allocation pass
    pub fn is_unprocessed(&self) -> bool {
        self.schedule_mappings.is_empty()
            && self.principal_portion.is_zero()
            && self.interest_portion.is_zero()
            && self.fee_portion.is_zero()
            && self.penalty_portion.is_zero()
            && self.overpayment_portion.is_zero()
            && self.unrecognized_income_portion.is_zero()
    }

    /// component sum for cash transactions must equal the amount
    pub fn components_total(&self) -> Money {
        self.principal_portion
            + self.interest_portion
            + self.fee_portion
            + self.penalty_portion
            + self.overpayment_portion
    }

    /// a working copy for reallocation: same identity-relevant fields, fresh
    /// derived state
    pub fn reallocation_copy(&self) -> Transaction {
        let mut copy = self.clone();
        copy.reset_derived_components();
        copy
    }

    /// whether two allocations of the same transaction landed identically
    pub fn allocation_matches(&self, other: &Transaction) -> bool {
        self.amount == other.amount
            && self.principal_portion == other.principal_portion
            && self.interest_portion == other.interest_portion
            && self.fee_portion == other.fee_portion
            && self.penalty_portion == other.penalty_portion
            && self.overpayment_portion == other.overpayment_portion
    }
}
