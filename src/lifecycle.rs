use serde::{Deserialize, Serialize};

use crate::errors::{LoanError, Result};
use crate::types::LoanStatus;

/// loan events that drive status transitions and operation guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanEvent {
    Approve,
    UndoApproval,
    Reject,
    Withdraw,
    Disburse,
    UndoDisbursal,
    Repay,
    AdjustTransaction,
    WaiveInterest,
    AddCharge,
    UpdateCharge,
    WaiveCharge,
    RemoveCharge,
    PayCharge,
    WriteOff,
    UndoWriteOff,
    RecoveryPayment,
    Refund,
    Close,
    CloseAsRescheduled,
    Foreclose,
    Overpay,
}

/// status transition table for loan events
///
/// The two-step protocol: `transition` returns the unchanged status when the
/// event is inapplicable, and the caller compares old vs new to detect a
/// no-op. Preconditions are checked up front via `ensure_allowed` using the
/// event -> allowed-states table.
pub struct LifecycleStateMachine;

impl LifecycleStateMachine {
    /// states a loan must be in for the event to apply
    pub fn allowed_states(event: LoanEvent) -> &'static [LoanStatus] {
        use LoanStatus::*;
        match event {
            LoanEvent::Approve => &[PendingApproval],
            LoanEvent::UndoApproval => &[Approved],
            LoanEvent::Reject => &[PendingApproval],
            LoanEvent::Withdraw => &[PendingApproval],
            LoanEvent::Disburse => &[Approved, Active],
            LoanEvent::UndoDisbursal => &[Active],
            LoanEvent::Repay => &[Active, Overpaid],
            LoanEvent::AdjustTransaction => &[Active, Overpaid, ClosedObligationsMet],
            LoanEvent::WaiveInterest => &[Active],
            LoanEvent::AddCharge => &[Active],
            LoanEvent::UpdateCharge => &[Active],
            LoanEvent::WaiveCharge => &[Active],
            LoanEvent::RemoveCharge => &[Active],
            LoanEvent::PayCharge => &[Active],
            LoanEvent::WriteOff => &[Active],
            LoanEvent::UndoWriteOff => &[ClosedWrittenOff],
            LoanEvent::RecoveryPayment => &[ClosedWrittenOff],
            LoanEvent::Refund => &[Overpaid],
            LoanEvent::Close => &[Active, Overpaid],
            LoanEvent::CloseAsRescheduled => &[Active],
            LoanEvent::Foreclose => &[Active],
            LoanEvent::Overpay => &[Active, ClosedObligationsMet],
        }
    }

    /// raise `InvalidStateTransition` unless the event applies to the status
    pub fn ensure_allowed(event: LoanEvent, status: LoanStatus) -> Result<()> {
        if Self::allowed_states(event).contains(&status) {
            Ok(())
        } else {
            Err(LoanError::InvalidStateTransition { event, status })
        }
    }

    /// compute the status after an event; inapplicable events return the
    /// current status unchanged
    pub fn transition(event: LoanEvent, current: LoanStatus) -> LoanStatus {
        use LoanStatus::*;
        match (event, current) {
            (LoanEvent::Approve, PendingApproval) => Approved,
            (LoanEvent::UndoApproval, Approved) => PendingApproval,
            (LoanEvent::Reject, PendingApproval) => Rejected,
            (LoanEvent::Withdraw, PendingApproval) => Withdrawn,
            (LoanEvent::Disburse, Approved) => Active,
            (LoanEvent::UndoDisbursal, Active) => Approved,
            (LoanEvent::WriteOff, Active) => ClosedWrittenOff,
            (LoanEvent::UndoWriteOff, ClosedWrittenOff) => Active,
            (LoanEvent::Close, Active | Overpaid) => ClosedObligationsMet,
            (LoanEvent::CloseAsRescheduled, Active) => ClosedReschedule,
            (LoanEvent::Foreclose, Active) => ClosedObligationsMet,
            (LoanEvent::Overpay, Active | ClosedObligationsMet) => Overpaid,
            // a repayment that clears the overpaid balance reopens the loan
            (LoanEvent::Repay, Overpaid) => Active,
            (_, unchanged) => unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let s = LoanStatus::PendingApproval;
        let s = LifecycleStateMachine::transition(LoanEvent::Approve, s);
        assert_eq!(s, LoanStatus::Approved);
        let s = LifecycleStateMachine::transition(LoanEvent::Disburse, s);
        assert_eq!(s, LoanStatus::Active);
        let s = LifecycleStateMachine::transition(LoanEvent::Close, s);
        assert_eq!(s, LoanStatus::ClosedObligationsMet);
    }

    #[test]
    fn test_inapplicable_event_returns_same_state() {
        let s = LifecycleStateMachine::transition(LoanEvent::WriteOff, LoanStatus::PendingApproval);
        assert_eq!(s, LoanStatus::PendingApproval);
    }

    #[test]
    fn test_terminal_states_only_from_pending() {
        assert_eq!(
            LifecycleStateMachine::transition(LoanEvent::Reject, LoanStatus::PendingApproval),
            LoanStatus::Rejected
        );
        assert_eq!(
            LifecycleStateMachine::transition(LoanEvent::Reject, LoanStatus::Active),
            LoanStatus::Active
        );
    }

    #[test]
    fn test_guard_table_rejects_repayment_on_closed_loan() {
        let err = LifecycleStateMachine::ensure_allowed(
            LoanEvent::Repay,
            LoanStatus::ClosedObligationsMet,
        )
        .unwrap_err();
        match err {
            LoanError::InvalidStateTransition { event, status } => {
                assert_eq!(event, LoanEvent::Repay);
                assert_eq!(status, LoanStatus::ClosedObligationsMet);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_write_off_round_trip() {
        let s = LifecycleStateMachine::transition(LoanEvent::WriteOff, LoanStatus::Active);
        assert_eq!(s, LoanStatus::ClosedWrittenOff);
        let s = LifecycleStateMachine::transition(LoanEvent::UndoWriteOff, s);
        assert_eq!(s, LoanStatus::Active);
    }
}
