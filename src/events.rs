use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::types::{ChargeId, LoanId, LoanStatus, TransactionId};

/// all events emitted by ledger operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // lifecycle events
    LoanApproved {
        loan_id: LoanId,
        approved_principal: Money,
        approved_on: NaiveDate,
    },
    ApprovalUndone {
        loan_id: LoanId,
    },
    LoanRejected {
        loan_id: LoanId,
        rejected_on: NaiveDate,
    },
    LoanWithdrawn {
        loan_id: LoanId,
        withdrawn_on: NaiveDate,
    },
    LoanDisbursed {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        disbursed_on: NaiveDate,
    },
    DisbursalUndone {
        loan_id: LoanId,
    },
    LoanClosed {
        loan_id: LoanId,
        status: LoanStatus,
        closed_on: NaiveDate,
    },
    LoanForeclosed {
        loan_id: LoanId,
        payoff_amount: Money,
        foreclosed_on: NaiveDate,
    },
    LoanOverpaid {
        loan_id: LoanId,
        overpaid_amount: Money,
    },
    StatusChanged {
        loan_id: LoanId,
        old_status: LoanStatus,
        new_status: LoanStatus,
    },

    // repayment events
    RepaymentReceived {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        principal_portion: Money,
        interest_portion: Money,
        fee_portion: Money,
        penalty_portion: Money,
        overpayment_portion: Money,
        received_on: NaiveDate,
    },
    InterestWaived {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        waived_on: NaiveDate,
    },
    TransactionReversed {
        loan_id: LoanId,
        transaction_id: TransactionId,
        replaced_by: Option<TransactionId>,
    },
    RefundIssued {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        refunded_on: NaiveDate,
    },

    // charge events
    ChargeAdded {
        loan_id: LoanId,
        charge_id: ChargeId,
        amount: Money,
    },
    ChargeUpdated {
        loan_id: LoanId,
        charge_id: ChargeId,
        old_amount: Money,
        new_amount: Money,
    },
    ChargeWaived {
        loan_id: LoanId,
        charge_id: ChargeId,
        amount: Money,
        installment_number: Option<u32>,
    },
    ChargeRemoved {
        loan_id: LoanId,
        charge_id: ChargeId,
    },
    ChargePaid {
        loan_id: LoanId,
        charge_id: ChargeId,
        transaction_id: TransactionId,
        amount: Money,
    },

    // write-off and recovery events
    LoanWrittenOff {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        written_off_on: NaiveDate,
    },
    WriteOffUndone {
        loan_id: LoanId,
    },
    RecoveryPaymentReceived {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        received_on: NaiveDate,
    },

    // schedule events
    ScheduleRegenerated {
        loan_id: LoanId,
        from_date: NaiveDate,
        installment_count: usize,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
