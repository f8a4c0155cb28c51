use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// unique identifier for a loan
pub type LoanId = Uuid;

/// unique identifier for a transaction
pub type TransactionId = Uuid;

/// unique identifier for a charge
pub type ChargeId = Uuid;

/// loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    /// submitted, waiting for approval
    PendingApproval,
    /// approved but not yet disbursed
    Approved,
    /// disbursed and being repaid
    Active,
    /// all scheduled obligations repaid or waived
    ClosedObligationsMet,
    /// written off as a loss
    ClosedWrittenOff,
    /// closed because the loan was rescheduled into a new one
    ClosedReschedule,
    /// paid beyond total scheduled obligations
    Overpaid,
    /// rejected before approval
    Rejected,
    /// withdrawn by the applicant before approval
    Withdrawn,
}

impl LoanStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, LoanStatus::Active)
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            LoanStatus::ClosedObligationsMet
                | LoanStatus::ClosedWrittenOff
                | LoanStatus::ClosedReschedule
                | LoanStatus::Rejected
                | LoanStatus::Withdrawn
        )
    }

    pub fn is_overpaid(&self) -> bool {
        matches!(self, LoanStatus::Overpaid)
    }
}

/// orthogonal sub-status, set while the main status stays a closed variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanSubStatus {
    Foreclosed,
}

/// monetary transaction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Disbursement,
    Repayment,
    /// collection of disbursement-time charges, netted off the payout
    RepaymentAtDisbursement,
    WaiveInterest,
    WaiveCharges,
    ChargePayment,
    Accrual,
    /// periodic compounded-income posting under interest recalculation
    IncomePosting,
    WriteOff,
    RecoveryRepayment,
    /// refund of an overpaid credit balance
    Refund,
    RefundForActiveLoan,
    InitiateTransfer,
    ApproveTransfer,
    WithdrawTransfer,
    Contra,
}

impl TransactionKind {
    /// cash received that is allocated across the schedule
    pub fn is_repayment_like(&self) -> bool {
        matches!(
            self,
            TransactionKind::Repayment | TransactionKind::RepaymentAtDisbursement
        )
    }

    pub fn is_waiver(&self) -> bool {
        matches!(
            self,
            TransactionKind::WaiveInterest | TransactionKind::WaiveCharges
        )
    }

    /// kinds the allocation replay skips entirely
    pub fn is_outside_allocation(&self) -> bool {
        matches!(
            self,
            TransactionKind::Disbursement
                | TransactionKind::Contra
                | TransactionKind::Accrual
                | TransactionKind::IncomePosting
                | TransactionKind::InitiateTransfer
                | TransactionKind::ApproveTransfer
                | TransactionKind::WithdrawTransfer
        )
    }
}

/// how a charge amount is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeCalculation {
    Flat,
    PercentOfAmount,
    PercentOfAmountAndInterest,
    PercentOfInterest,
    PercentOfDisbursementAmount,
}

impl ChargeCalculation {
    pub fn is_percentage_based(&self) -> bool {
        !matches!(self, ChargeCalculation::Flat)
    }
}

/// when a charge falls due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeTime {
    Disbursement,
    SpecifiedDueDate,
    InstallmentFee,
    Overdue,
    TrancheDisbursement,
}

/// the four monetary components of an installment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationComponent {
    Penalty,
    Fee,
    Interest,
    Principal,
}
