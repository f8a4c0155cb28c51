use chrono::NaiveDate;
use thiserror::Error;

use crate::lifecycle::LoanEvent;
use crate::money::{CurrencyCode, Money};
use crate::types::{ChargeId, LoanStatus, TransactionId};

#[derive(Error, Debug)]
pub enum LoanError {
    #[error("{event:?} not allowed while loan status is {status:?}")]
    InvalidStateTransition {
        event: LoanEvent,
        status: LoanStatus,
    },

    #[error("transaction date {date} is after the business date {business_date}")]
    FutureDate {
        date: NaiveDate,
        business_date: NaiveDate,
    },

    #[error("date {date} is before the disbursement date {disbursement_date}")]
    DateBeforeDisbursement {
        date: NaiveDate,
        disbursement_date: NaiveDate,
    },

    #[error("amount {requested} exceeds the approved principal {approved}")]
    AmountExceedsApprovedPrincipal {
        approved: Money,
        requested: Money,
    },

    #[error("currency mismatch: loan is in {expected}, got {actual}")]
    CurrencyMismatch {
        expected: CurrencyCode,
        actual: CurrencyCode,
    },

    #[error("invalid amount: {amount}")]
    InvalidAmount {
        amount: Money,
    },

    #[error("charge due date {due_date} falls outside the repayment schedule")]
    ChargeOutsideScheduleRange {
        due_date: NaiveDate,
    },

    #[error("charge not found: {id}")]
    ChargeNotFound {
        id: ChargeId,
    },

    #[error("charge {id} is already paid")]
    ChargeAlreadyPaid {
        id: ChargeId,
    },

    #[error("charge {id} is inactive or fully waived")]
    ChargeNotPayable {
        id: ChargeId,
    },

    #[error("transaction not found: {id}")]
    TransactionNotFound {
        id: TransactionId,
    },

    #[error("transaction {id} is already reversed")]
    TransactionAlreadyReversed {
        id: TransactionId,
    },

    #[error("loan has no repayment schedule")]
    NoSchedule,

    #[error("loan still has outstanding obligations: {outstanding}")]
    ObligationsOutstanding {
        outstanding: Money,
    },

    #[error("no overpaid balance to refund: requested {requested}, overpaid {overpaid}")]
    NothingToRefund {
        requested: Money,
        overpaid: Money,
    },

    #[error("schedule generation failed: {message}")]
    ScheduleGeneration {
        message: String,
    },

    #[error("date {date} is not a working day")]
    NonWorkingDay {
        date: NaiveDate,
    },
}

pub type Result<T> = std::result::Result<T, LoanError>;
