use std::collections::BTreeSet;

use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::charge::{Charge, ChargeBasis};
use crate::errors::{LoanError, Result};
use crate::events::{Event, EventStore};
use crate::installment::Installment;
use crate::lifecycle::{LifecycleStateMachine, LoanEvent};
use crate::money::{Currency, Money};
use crate::processor::{AllocationRule, StandardProcessor, TransactionProcessor};
use crate::schedule::{
    RecalculationEngine, ScheduleGenerator, ScheduleTerms, TermChanges, WorkingDayValidator,
};
use crate::summary::{derive_accounting_bridge_data, AccountingBridgeData, Summary};
use crate::transaction::{ChargePaidBy, Transaction};
use crate::types::{
    ChargeId, LoanId, LoanStatus, LoanSubStatus, TransactionId, TransactionKind,
};

/// aggregate root for one loan account. Owns the schedule, the charges, the
/// append-only transaction stream, and the derived summary. Every operation
/// validates against the lifecycle guard table and the injected clock before
/// committing, then replays or fast-applies, refreshes the summary, and runs
/// the post-transaction status checks.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoanLedger {
    pub id: LoanId,
    pub currency: Currency,
    pub status: LoanStatus,
    pub sub_status: Option<LoanSubStatus>,
    pub terms: ScheduleTerms,
    pub approved_principal: Option<Money>,
    pub expected_disbursement_date: NaiveDate,
    pub disbursement_date: Option<NaiveDate>,
    pub closed_on: Option<NaiveDate>,
    pub interest_recalculation_enabled: bool,
    pub allocation_rule: AllocationRule,
    pub installments: Vec<Installment>,
    pub charges: Vec<Charge>,
    pub transactions: Vec<Transaction>,
    pub summary: Summary,
    pub overpaid_balance: Money,
    /// transaction ids already handed to the journal-entry writer
    pub journaled_ids: BTreeSet<TransactionId>,
    pub journaled_reversed_ids: BTreeSet<TransactionId>,
    #[serde(skip)]
    pub events: EventStore,
}

impl LoanLedger {
    /// submit a new loan application, pending approval
    pub fn submit(
        terms: ScheduleTerms,
        interest_recalculation_enabled: bool,
        allocation_rule: AllocationRule,
    ) -> Self {
        let currency = terms.principal.currency();
        Self {
            id: Uuid::new_v4(),
            currency,
            status: LoanStatus::PendingApproval,
            sub_status: None,
            expected_disbursement_date: terms.start_date,
            terms,
            approved_principal: None,
            disbursement_date: None,
            closed_on: None,
            interest_recalculation_enabled,
            allocation_rule,
            installments: Vec::new(),
            charges: Vec::new(),
            transactions: Vec::new(),
            summary: Summary::empty(currency),
            overpaid_balance: Money::zero(currency),
            journaled_ids: BTreeSet::new(),
            journaled_reversed_ids: BTreeSet::new(),
            events: EventStore::new(),
        }
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// approve the application, optionally for a different principal
    pub fn approve(
        &mut self,
        approved_principal: Option<Money>,
        approved_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::Approve, self.status)?;
        self.validate_not_future(approved_on, time_provider)?;
        let principal = approved_principal.unwrap_or(self.terms.principal);
        self.validate_currency(principal)?;
        if !principal.is_greater_than_zero() {
            return Err(LoanError::InvalidAmount { amount: principal });
        }

        self.approved_principal = Some(principal);
        self.terms.principal = principal;
        self.transition(LoanEvent::Approve);
        self.events.emit(Event::LoanApproved {
            loan_id: self.id,
            approved_principal: principal,
            approved_on,
        });
        Ok(())
    }

    pub fn undo_approval(&mut self) -> Result<()> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::UndoApproval, self.status)?;
        self.approved_principal = None;
        self.transition(LoanEvent::UndoApproval);
        self.events.emit(Event::ApprovalUndone { loan_id: self.id });
        Ok(())
    }

    pub fn reject(&mut self, rejected_on: NaiveDate, time_provider: &SafeTimeProvider) -> Result<()> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::Reject, self.status)?;
        self.validate_not_future(rejected_on, time_provider)?;
        self.closed_on = Some(rejected_on);
        self.transition(LoanEvent::Reject);
        self.events.emit(Event::LoanRejected {
            loan_id: self.id,
            rejected_on,
        });
        Ok(())
    }

    pub fn withdraw(
        &mut self,
        withdrawn_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::Withdraw, self.status)?;
        self.validate_not_future(withdrawn_on, time_provider)?;
        self.closed_on = Some(withdrawn_on);
        self.transition(LoanEvent::Withdraw);
        self.events.emit(Event::LoanWithdrawn {
            loan_id: self.id,
            withdrawn_on,
        });
        Ok(())
    }

    /// disburse funds. The first disbursement anchors the schedule on the
    /// actual date; a later one is a tranche that regenerates from its date.
    /// Charges due at disbursement are collected in the same breath.
    pub fn disburse(
        &mut self,
        amount: Money,
        disbursed_on: NaiveDate,
        generator: &dyn ScheduleGenerator,
        calendar: &dyn WorkingDayValidator,
        time_provider: &SafeTimeProvider,
    ) -> Result<TransactionId> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::Disburse, self.status)?;
        self.validate_currency(amount)?;
        if !amount.is_greater_than_zero() {
            return Err(LoanError::InvalidAmount { amount });
        }
        self.validate_not_future(disbursed_on, time_provider)?;
        calendar.validate(disbursed_on)?;

        let approved = self.approved_principal.unwrap_or(self.terms.principal);
        let already_disbursed = self.total_disbursed();
        if already_disbursed + amount > approved {
            return Err(LoanError::AmountExceedsApprovedPrincipal {
                approved,
                requested: already_disbursed + amount,
            });
        }

        let first_tranche = self.disbursement_date.is_none();
        let transaction =
            Transaction::disbursement(amount, disbursed_on, time_provider.now());
        let transaction_id = transaction.id;
        self.push_transaction(transaction);

        let engine = self.recalculation_engine();
        let changes = TermChanges {
            expected_disbursement_date: Some(self.expected_disbursement_date),
            actual_disbursement_date: Some(disbursed_on),
            tranches_changed: !first_tranche,
            ..TermChanges::default()
        };
        if first_tranche {
            self.disbursement_date = Some(disbursed_on);
            self.terms.start_date = disbursed_on;
            self.installments = generator.generate(&self.terms)?;
        } else if engine.regeneration_reason(&changes).is_some() {
            // tranche: rebuild the tail from the tranche date onward
            let terms = self.terms.clone();
            engine.recalculate_from(disbursed_on, &terms, generator, &mut self.installments)?;
            let anchor = disbursed_on;
            let reversed = engine.reverse_income_transactions_after(anchor, &mut self.transactions);
            for id in reversed {
                self.events.emit(Event::TransactionReversed {
                    loan_id: self.id,
                    transaction_id: id,
                    replaced_by: None,
                });
            }
        }
        self.events.emit(Event::ScheduleRegenerated {
            loan_id: self.id,
            from_date: disbursed_on,
            installment_count: self.installments.len(),
        });

        self.reevaluate_charges();
        self.collect_disbursement_charges(amount, disbursed_on, time_provider)?;

        self.transition(LoanEvent::Disburse);
        self.events.emit(Event::LoanDisbursed {
            loan_id: self.id,
            transaction_id,
            amount,
            disbursed_on,
        });

        if !first_tranche {
            self.run_full_replay()?;
        }
        self.finish(disbursed_on);
        Ok(transaction_id)
    }

    /// roll the disbursement back entirely: every transaction is reversed,
    /// the schedule is dropped, and the loan returns to approved
    pub fn undo_disbursal(&mut self) -> Result<()> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::UndoDisbursal, self.status)?;
        for transaction in self.transactions.iter_mut() {
            if !transaction.is_reversed() {
                transaction.reverse();
                self.events.emit(Event::TransactionReversed {
                    loan_id: self.id,
                    transaction_id: transaction.id,
                    replaced_by: None,
                });
            }
        }
        for charge in self.charges.iter_mut() {
            charge.reset_paid_state();
        }
        self.installments.clear();
        self.disbursement_date = None;
        self.overpaid_balance = Money::zero(self.currency);
        self.transition(LoanEvent::UndoDisbursal);
        self.events.emit(Event::DisbursalUndone { loan_id: self.id });
        self.refresh_summary();
        Ok(())
    }

    // ------------------------------------------------------------------
    // repayments
    // ------------------------------------------------------------------

    /// record a repayment. Takes the cheap single-transaction path only when
    /// the payment is chronologically latest, matches the current outstanding
    /// due exactly, and interest recalculation is off; otherwise the full
    /// replay is the reference
    pub fn repay(
        &mut self,
        amount: Money,
        received_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<TransactionId> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::Repay, self.status)?;
        self.validate_transaction_date(received_on, time_provider)?;
        self.validate_currency(amount)?;
        if !amount.is_greater_than_zero() {
            return Err(LoanError::InvalidAmount { amount });
        }

        let mut transaction = Transaction::repayment(amount, received_on, time_provider.now());
        let transaction_id = transaction.id;
        let processor = self.processor();

        let fast = !self.interest_recalculation_enabled
            && self.overpaid_balance.is_zero()
            && self.is_chronologically_latest(received_on)
            && processor.can_fast_apply(&transaction, &self.installments);
        if fast {
            let mut overpaid = self.overpaid_balance;
            processor.process_latest(
                &mut transaction,
                &mut self.installments,
                &mut self.charges,
                &mut overpaid,
            )?;
            self.overpaid_balance = overpaid;
            self.push_transaction(transaction);
        } else {
            self.push_transaction(transaction);
            self.run_full_replay()?;
        }

        self.transition(LoanEvent::Repay);
        self.emit_repayment_event(transaction_id);
        self.finish(received_on);
        Ok(transaction_id)
    }

    /// reverse a transaction and substitute a corrected amount, then replay
    /// history. A zero new amount is a plain reversal.
    pub fn adjust_transaction(
        &mut self,
        transaction_id: TransactionId,
        new_amount: Money,
        adjusted_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<Option<TransactionId>> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::AdjustTransaction, self.status)?;
        self.validate_transaction_date(adjusted_on, time_provider)?;
        self.validate_currency(new_amount)?;

        let original = self
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
            .ok_or(LoanError::TransactionNotFound { id: transaction_id })?;
        if original.is_reversed() {
            return Err(LoanError::TransactionAlreadyReversed { id: transaction_id });
        }
        let kind = original.kind;
        original.reverse();
        original.manually_adjusted = true;

        let replacement_id = if new_amount.is_greater_than_zero() {
            let replacement =
                Transaction::new(kind, new_amount, adjusted_on, time_provider.now());
            let id = replacement.id;
            self.push_transaction(replacement);
            Some(id)
        } else {
            None
        };
        self.events.emit(Event::TransactionReversed {
            loan_id: self.id,
            transaction_id,
            replaced_by: replacement_id,
        });

        self.run_full_replay()?;
        self.finish(adjusted_on);
        Ok(replacement_id)
    }

    /// waive interest instead of collecting it
    pub fn waive_interest(
        &mut self,
        amount: Money,
        waived_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<TransactionId> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::WaiveInterest, self.status)?;
        self.validate_transaction_date(waived_on, time_provider)?;
        self.validate_currency(amount)?;
        if !amount.is_greater_than_zero() {
            return Err(LoanError::InvalidAmount { amount });
        }

        let transaction = Transaction::waive_interest(amount, waived_on, time_provider.now());
        let transaction_id = transaction.id;
        self.push_transaction(transaction);
        self.run_full_replay()?;
        self.events.emit(Event::InterestWaived {
            loan_id: self.id,
            transaction_id,
            amount,
            waived_on,
        });
        self.finish(waived_on);
        Ok(transaction_id)
    }

    // ------------------------------------------------------------------
    // charges
    // ------------------------------------------------------------------

    /// attach a fee or penalty to the loan
    pub fn add_charge(&mut self, mut charge: Charge) -> Result<ChargeId> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::AddCharge, self.status)?;
        if charge.currency() != self.currency {
            return Err(LoanError::CurrencyMismatch {
                expected: self.currency.code(),
                actual: charge.currency().code(),
            });
        }
        if let Some(due_date) = charge.due_date {
            let last_due = self
                .installments
                .last()
                .map(|ins| ins.due_date)
                .ok_or(LoanError::NoSchedule)?;
            let first_from = self.installments[0].from_date;
            if due_date < first_from || due_date > last_due {
                return Err(LoanError::ChargeOutsideScheduleRange { due_date });
            }
        }

        charge.recalculate_amount(self.charge_basis(), self.installments.len() as u32);
        charge.generate_installment_charges(&self.installments);
        let charge_id = charge.id;
        let amount = charge.amount;
        self.charges.push(charge);

        self.run_full_replay()?;
        self.events.emit(Event::ChargeAdded {
            loan_id: self.id,
            charge_id,
            amount,
        });
        self.refresh_summary();
        Ok(charge_id)
    }

    /// change a charge's configured amount or percentage and re-derive
    pub fn update_charge(
        &mut self,
        charge_id: ChargeId,
        amount_or_percentage: Decimal,
    ) -> Result<()> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::UpdateCharge, self.status)?;
        let basis = self.charge_basis();
        let installment_count = self.installments.len() as u32;
        let charge = self
            .charges
            .iter_mut()
            .find(|c| c.id == charge_id && c.active)
            .ok_or(LoanError::ChargeNotFound { id: charge_id })?;
        let old_amount = charge.amount;
        charge.amount_or_percentage = amount_or_percentage;
        charge.recalculate_amount(basis, installment_count);
        let new_amount = charge.amount;
        charge.generate_installment_charges(&self.installments);

        self.run_full_replay()?;
        self.events.emit(Event::ChargeUpdated {
            loan_id: self.id,
            charge_id,
            old_amount,
            new_amount,
        });
        self.refresh_summary();
        Ok(())
    }

    /// forgive a charge's outstanding balance without cash
    pub fn waive_charge(
        &mut self,
        charge_id: ChargeId,
        installment_number: Option<u32>,
        waived_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<TransactionId> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::WaiveCharge, self.status)?;
        self.validate_transaction_date(waived_on, time_provider)?;

        let charge = self
            .charges
            .iter_mut()
            .find(|c| c.id == charge_id)
            .ok_or(LoanError::ChargeNotFound { id: charge_id })?;
        let is_penalty = charge.penalty;
        let (waived, waived_installment) = charge.waive(installment_number)?;

        let mut transaction =
            Transaction::new(TransactionKind::WaiveCharges, waived, waived_on, time_provider.now());
        if is_penalty {
            transaction.penalty_portion = waived;
        } else {
            transaction.fee_portion = waived;
        }
        transaction.charges_paid.push(ChargePaidBy {
            charge_id,
            amount: waived,
            installment_number: waived_installment,
        });
        let transaction_id = transaction.id;
        self.push_transaction(transaction);

        self.run_full_replay()?;
        self.events.emit(Event::ChargeWaived {
            loan_id: self.id,
            charge_id,
            amount: waived,
            installment_number: waived_installment,
        });
        self.finish(waived_on);
        Ok(transaction_id)
    }

    /// deactivate an unpaid charge; the row is kept for audit
    pub fn remove_charge(&mut self, charge_id: ChargeId) -> Result<()> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::RemoveCharge, self.status)?;
        let charge = self
            .charges
            .iter_mut()
            .find(|c| c.id == charge_id && c.active)
            .ok_or(LoanError::ChargeNotFound { id: charge_id })?;
        if charge.amount_paid.is_greater_than_zero() {
            return Err(LoanError::ChargeAlreadyPaid { id: charge_id });
        }
        charge.deactivate();

        self.run_full_replay()?;
        self.events.emit(Event::ChargeRemoved {
            loan_id: self.id,
            charge_id,
        });
        self.refresh_summary();
        Ok(())
    }

    /// collect a specific charge in cash, outside the regular waterfall
    pub fn pay_charge(
        &mut self,
        charge_id: ChargeId,
        amount: Money,
        paid_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<TransactionId> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::PayCharge, self.status)?;
        self.validate_transaction_date(paid_on, time_provider)?;
        self.validate_currency(amount)?;
        if !amount.is_greater_than_zero() {
            return Err(LoanError::InvalidAmount { amount });
        }
        let charge = self
            .charges
            .iter()
            .find(|c| c.id == charge_id)
            .ok_or(LoanError::ChargeNotFound { id: charge_id })?;
        if !charge.active || charge.waived {
            return Err(LoanError::ChargeNotPayable { id: charge_id });
        }
        if charge.is_fully_paid() {
            return Err(LoanError::ChargeAlreadyPaid { id: charge_id });
        }

        let mut transaction =
            Transaction::charge_payment(amount, paid_on, time_provider.now());
        // seed the link; the replay derives the actual paid split from it
        transaction.charges_paid.push(ChargePaidBy {
            charge_id,
            amount,
            installment_number: None,
        });
        let transaction_id = transaction.id;
        self.push_transaction(transaction);

        self.run_full_replay()?;
        let paid = self
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .map(|t| t.fee_portion + t.penalty_portion)
            .unwrap_or_else(|| Money::zero(self.currency));
        self.events.emit(Event::ChargePaid {
            loan_id: self.id,
            charge_id,
            transaction_id,
            amount: paid,
        });
        self.finish(paid_on);
        Ok(transaction_id)
    }

    // ------------------------------------------------------------------
    // write-off, closure, recovery
    // ------------------------------------------------------------------

    /// write off everything still outstanding and close the loan
    pub fn write_off(
        &mut self,
        written_off_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<TransactionId> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::WriteOff, self.status)?;
        self.validate_transaction_date(written_off_on, time_provider)?;

        let transaction = Transaction::write_off(
            Money::zero(self.currency),
            written_off_on,
            time_provider.now(),
        );
        let transaction_id = transaction.id;
        self.push_transaction(transaction);
        self.run_full_replay()?;

        let amount = self
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .map(|t| t.amount)
            .unwrap_or_else(|| Money::zero(self.currency));
        self.closed_on = Some(written_off_on);
        self.transition(LoanEvent::WriteOff);
        self.events.emit(Event::LoanWrittenOff {
            loan_id: self.id,
            transaction_id,
            amount,
            written_off_on,
        });
        self.refresh_summary();
        Ok(transaction_id)
    }

    /// reverse the write-off transaction and reopen the loan
    pub fn undo_write_off(&mut self) -> Result<()> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::UndoWriteOff, self.status)?;
        let write_off = self
            .transactions
            .iter_mut()
            .rev()
            .find(|t| t.is_write_off() && !t.is_reversed())
            .ok_or(LoanError::TransactionNotFound { id: Uuid::nil() })?;
        let transaction_id = write_off.id;
        write_off.reverse();
        self.events.emit(Event::TransactionReversed {
            loan_id: self.id,
            transaction_id,
            replaced_by: None,
        });

        self.closed_on = None;
        self.transition(LoanEvent::UndoWriteOff);
        self.events.emit(Event::WriteOffUndone { loan_id: self.id });
        self.run_full_replay()?;
        self.refresh_summary();
        Ok(())
    }

    /// close a fully settled loan
    pub fn close(&mut self, closed_on: NaiveDate, time_provider: &SafeTimeProvider) -> Result<()> {
        self.close_with(LoanEvent::Close, closed_on, time_provider)
    }

    /// close a loan whose remaining balance moves to a rescheduled account
    pub fn close_as_rescheduled(
        &mut self,
        closed_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        self.close_with(LoanEvent::CloseAsRescheduled, closed_on, time_provider)
    }

    fn close_with(
        &mut self,
        event: LoanEvent,
        closed_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        LifecycleStateMachine::ensure_allowed(event, self.status)?;
        self.validate_transaction_date(closed_on, time_provider)?;
        let outstanding = self.total_outstanding();
        if outstanding.is_greater_than_zero() {
            return Err(LoanError::ObligationsOutstanding { outstanding });
        }
        self.closed_on = Some(closed_on);
        self.transition(event);
        self.events.emit(Event::LoanClosed {
            loan_id: self.id,
            status: self.status,
            closed_on,
        });
        self.refresh_summary();
        Ok(())
    }

    /// settle everything outstanding in one payment and close, marking the
    /// account as foreclosed
    pub fn foreclose(
        &mut self,
        foreclosed_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<TransactionId> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::Foreclose, self.status)?;
        self.validate_transaction_date(foreclosed_on, time_provider)?;

        let payoff = self.total_outstanding();
        if !payoff.is_greater_than_zero() {
            return Err(LoanError::InvalidAmount { amount: payoff });
        }
        let transaction = Transaction::repayment(payoff, foreclosed_on, time_provider.now());
        let transaction_id = transaction.id;
        self.push_transaction(transaction);
        self.run_full_replay()?;

        self.closed_on = Some(foreclosed_on);
        self.sub_status = Some(LoanSubStatus::Foreclosed);
        self.transition(LoanEvent::Foreclose);
        self.events.emit(Event::LoanForeclosed {
            loan_id: self.id,
            payoff_amount: payoff,
            foreclosed_on,
        });
        self.refresh_summary();
        Ok(transaction_id)
    }

    /// cash received against a written-off loan; the schedule stays closed
    pub fn recovery_payment(
        &mut self,
        amount: Money,
        received_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<TransactionId> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::RecoveryPayment, self.status)?;
        self.validate_transaction_date(received_on, time_provider)?;
        self.validate_currency(amount)?;
        if !amount.is_greater_than_zero() {
            return Err(LoanError::InvalidAmount { amount });
        }

        let transaction =
            Transaction::recovery_repayment(amount, received_on, time_provider.now());
        let transaction_id = transaction.id;
        self.push_transaction(transaction);
        self.events.emit(Event::RecoveryPaymentReceived {
            loan_id: self.id,
            transaction_id,
            amount,
            received_on,
        });
        self.refresh_summary();
        Ok(transaction_id)
    }

    /// pay back part of the overpaid balance
    pub fn refund(
        &mut self,
        amount: Money,
        refunded_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<TransactionId> {
        LifecycleStateMachine::ensure_allowed(LoanEvent::Refund, self.status)?;
        self.validate_transaction_date(refunded_on, time_provider)?;
        self.validate_currency(amount)?;
        if !amount.is_greater_than_zero() || amount > self.overpaid_balance {
            return Err(LoanError::NothingToRefund {
                requested: amount,
                overpaid: self.overpaid_balance,
            });
        }

        let mut transaction = Transaction::refund(amount, refunded_on, time_provider.now());
        transaction.overpayment_portion = amount;
        let transaction_id = transaction.id;
        self.push_transaction(transaction);
        self.overpaid_balance -= amount;

        self.events.emit(Event::RefundIssued {
            loan_id: self.id,
            transaction_id,
            amount,
            refunded_on,
        });
        self.finish(refunded_on);
        Ok(transaction_id)
    }

    // ------------------------------------------------------------------
    // accounting bridge
    // ------------------------------------------------------------------

    /// hand unjournaled transactions to the journal-entry writer exactly
    /// once, along with previously journaled ones reversed since the last
    /// call
    pub fn derive_accounting_bridge_data(
        &mut self,
        is_account_transfer: bool,
    ) -> AccountingBridgeData {
        let bridge = derive_accounting_bridge_data(
            self.currency,
            &self.transactions,
            &self.journaled_ids,
            &self.journaled_reversed_ids,
            is_account_transfer,
        );
        for transaction in &bridge.new_transactions {
            self.journaled_ids.insert(transaction.id);
        }
        for transaction in &bridge.newly_reversed {
            self.journaled_reversed_ids.insert(transaction.id);
        }
        bridge
    }

    // ------------------------------------------------------------------
    // derived accessors
    // ------------------------------------------------------------------

    pub fn total_outstanding(&self) -> Money {
        self.installments
            .iter()
            .fold(Money::zero(self.currency), |acc, ins| {
                acc + ins.total_outstanding()
            })
            + self.unsettled_specified_charges()
    }

    pub fn total_disbursed(&self) -> Money {
        self.transactions
            .iter()
            .filter(|t| t.is_disbursement() && !t.is_reversed())
            .fold(Money::zero(self.currency), |acc, t| acc + t.amount)
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn processor(&self) -> StandardProcessor {
        StandardProcessor::new(self.allocation_rule)
    }

    /// append with the next insertion stamp. Replay replacements bypass this
    /// and keep the stamp of the transaction they substitute.
    fn push_transaction(&mut self, mut transaction: Transaction) {
        transaction.sequence = self
            .transactions
            .iter()
            .map(|t| t.sequence)
            .max()
            .map_or(0, |s| s + 1);
        self.transactions.push(transaction);
    }

    fn recalculation_engine(&self) -> RecalculationEngine {
        RecalculationEngine::new(self.interest_recalculation_enabled)
    }

    /// charges due at disbursement live outside the period buckets
    fn unsettled_specified_charges(&self) -> Money {
        self.charges
            .iter()
            .filter(|c| c.active && c.is_due_at_disbursement())
            .fold(Money::zero(self.currency), |acc, c| acc + c.outstanding())
    }

    fn charge_basis(&self) -> ChargeBasis {
        let total_interest = self
            .installments
            .iter()
            .fold(Money::zero(self.currency), |acc, ins| {
                acc + ins.interest.charged
            });
        ChargeBasis {
            principal: self.terms.principal,
            total_interest,
            disbursed: self.total_disbursed(),
        }
    }

    fn reevaluate_charges(&mut self) {
        let Some(disbursement_date) = self.disbursement_date else {
            return;
        };
        let engine = self.recalculation_engine();
        let basis = self.charge_basis();
        engine.reevaluate_charges(
            basis,
            disbursement_date,
            &mut self.installments,
            &mut self.charges,
        );
    }

    /// collect charges due at disbursement in a single repayment-at-
    /// disbursement transaction
    fn collect_disbursement_charges(
        &mut self,
        disbursed: Money,
        disbursed_on: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        let basis = ChargeBasis {
            principal: self.terms.principal,
            total_interest: self
                .installments
                .iter()
                .fold(Money::zero(self.currency), |acc, ins| {
                    acc + ins.interest.charged
                }),
            disbursed,
        };
        let mut total = Money::zero(self.currency);
        let mut fee_total = Money::zero(self.currency);
        let mut penalty_total = Money::zero(self.currency);
        let mut links = Vec::new();
        let mut paid_events = Vec::new();

        for charge in self.charges.iter_mut() {
            if !charge.active || !charge.is_due_at_disbursement() || charge.is_fully_paid() {
                continue;
            }
            charge.recalculate_amount(basis, 1);
            let (paid, _) = charge.pay(charge.amount_outstanding, None);
            if !paid.is_greater_than_zero() {
                continue;
            }
            total += paid;
            if charge.penalty {
                penalty_total += paid;
            } else {
                fee_total += paid;
            }
            links.push(ChargePaidBy {
                charge_id: charge.id,
                amount: paid,
                installment_number: None,
            });
            paid_events.push((charge.id, paid));
        }

        if total.is_greater_than_zero() {
            let mut transaction =
                Transaction::repayment_at_disbursement(total, disbursed_on, time_provider.now());
            transaction.fee_portion = fee_total;
            transaction.penalty_portion = penalty_total;
            transaction.charges_paid = links;
            let transaction_id = transaction.id;
            self.push_transaction(transaction);
            for (charge_id, amount) in paid_events {
                self.events.emit(Event::ChargePaid {
                    loan_id: self.id,
                    charge_id,
                    transaction_id,
                    amount,
                });
            }
        }
        Ok(())
    }

    fn run_full_replay(&mut self) -> Result<()> {
        let disbursement_date = self.disbursement_date.ok_or(LoanError::NoSchedule)?;
        let processor = self.processor();
        let detail = processor.reprocess(
            disbursement_date,
            self.currency,
            &mut self.transactions,
            &mut self.installments,
            &mut self.charges,
        )?;
        if let Some(balance) = detail.overpaid_balance {
            self.overpaid_balance = balance;
        }
        for (original_id, replacement) in detail.new_transaction_mappings {
            self.events.emit(Event::TransactionReversed {
                loan_id: self.id,
                transaction_id: original_id,
                replaced_by: Some(replacement.id),
            });
            self.transactions.push(replacement);
        }
        Ok(())
    }

    fn emit_repayment_event(&mut self, transaction_id: TransactionId) {
        // the originating id may have been replaced during the replay
        let transaction = self
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .cloned();
        if let Some(t) = transaction {
            self.events.emit(Event::RepaymentReceived {
                loan_id: self.id,
                transaction_id: t.id,
                amount: t.amount,
                principal_portion: t.principal_portion,
                interest_portion: t.interest_portion,
                fee_portion: t.fee_portion,
                penalty_portion: t.penalty_portion,
                overpayment_portion: t.overpayment_portion,
                received_on: t.date,
            });
        }
    }

    /// post-transaction status checks and the wholesale summary refresh
    fn finish(&mut self, date: NaiveDate) {
        self.post_transaction_checks(date);
        self.refresh_summary();
    }

    fn post_transaction_checks(&mut self, date: NaiveDate) {
        let checkable = matches!(
            self.status,
            LoanStatus::Active | LoanStatus::Overpaid | LoanStatus::ClosedObligationsMet
        );
        if !checkable || self.installments.is_empty() {
            return;
        }
        let settled = self.total_outstanding().is_zero();
        let charges_settled = self
            .charges
            .iter()
            .filter(|c| c.active)
            .all(|c| c.outstanding().is_zero());

        if self.overpaid_balance.is_greater_than_zero() {
            if self.status != LoanStatus::Overpaid {
                self.transition(LoanEvent::Overpay);
                self.events.emit(Event::LoanOverpaid {
                    loan_id: self.id,
                    overpaid_amount: self.overpaid_balance,
                });
            }
        } else if settled && charges_settled {
            if self.status != LoanStatus::ClosedObligationsMet {
                self.closed_on = Some(date);
                self.transition(LoanEvent::Close);
                self.events.emit(Event::LoanClosed {
                    loan_id: self.id,
                    status: self.status,
                    closed_on: date,
                });
            }
        } else if self.status == LoanStatus::Overpaid {
            // overpayment drained while obligations remain: back to active
            self.transition(LoanEvent::Repay);
        } else if self.status == LoanStatus::ClosedObligationsMet {
            // a replay resurfaced outstanding obligations: reopen
            self.closed_on = None;
            self.set_status(LoanStatus::Active);
        }
    }

    fn refresh_summary(&mut self) {
        self.summary = Summary::recompute(
            self.currency,
            &self.installments,
            &self.charges,
            &self.transactions,
            self.overpaid_balance,
        );
    }

    fn transition(&mut self, event: LoanEvent) {
        let next = LifecycleStateMachine::transition(event, self.status);
        self.set_status(next);
    }

    fn set_status(&mut self, next: LoanStatus) {
        if next != self.status {
            self.events.emit(Event::StatusChanged {
                loan_id: self.id,
                old_status: self.status,
                new_status: next,
            });
            self.status = next;
        }
    }

    fn validate_not_future(
        &self,
        date: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        let business_date = time_provider.now().date_naive();
        if date > business_date {
            return Err(LoanError::FutureDate {
                date,
                business_date,
            });
        }
        Ok(())
    }

    fn validate_transaction_date(
        &self,
        date: NaiveDate,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        self.validate_not_future(date, time_provider)?;
        if let Some(disbursement_date) = self.disbursement_date {
            if date < disbursement_date {
                return Err(LoanError::DateBeforeDisbursement {
                    date,
                    disbursement_date,
                });
            }
        }
        Ok(())
    }

    fn validate_currency(&self, amount: Money) -> Result<()> {
        if amount.currency() != self.currency {
            return Err(LoanError::CurrencyMismatch {
                expected: self.currency.code(),
                actual: amount.currency().code(),
            });
        }
        Ok(())
    }

    /// latest means later than every transaction the replay would allocate,
    /// waivers included; otherwise the fast path would apply against state
    /// the replay derives differently
    fn is_chronologically_latest(&self, date: NaiveDate) -> bool {
        self.transactions
            .iter()
            .filter(|t| !t.is_reversed() && !t.kind.is_outside_allocation())
            .all(|t| t.date <= date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::testing::FlatScheduleGenerator;
    use crate::schedule::EveryDayWorking;
    use crate::types::{ChargeCalculation, ChargeTime};
    use chrono::{TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::new("USD", 2).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn money(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, usd())
    }

    fn clock() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap(),
        ))
    }

    fn terms(principal: i64, count: u32) -> ScheduleTerms {
        ScheduleTerms {
            principal: Money::from_major(principal, usd()),
            annual_interest_rate: dec!(12),
            number_of_installments: count,
            repayment_every_days: 30,
            start_date: date(2024, 1, 1),
        }
    }

    fn generator() -> FlatScheduleGenerator {
        FlatScheduleGenerator::default()
    }

    /// submitted, approved, and disbursed on 2024-01-01
    fn active_loan(principal: i64, count: u32) -> LoanLedger {
        let time = clock();
        let mut loan = LoanLedger::submit(terms(principal, count), false, AllocationRule::standard());
        loan.approve(None, date(2024, 1, 1), &time).unwrap();
        loan.disburse(
            Money::from_major(principal, usd()),
            date(2024, 1, 1),
            &generator(),
            &EveryDayWorking,
            &time,
        )
        .unwrap();
        loan
    }

    #[test]
    fn test_submit_approve_disburse_lifecycle() {
        let time = clock();
        let mut loan = LoanLedger::submit(terms(9000, 3), false, AllocationRule::standard());
        assert_eq!(loan.status, LoanStatus::PendingApproval);

        loan.approve(None, date(2024, 1, 1), &time).unwrap();
        assert_eq!(loan.status, LoanStatus::Approved);
        assert_eq!(loan.approved_principal, Some(Money::from_major(9000, usd())));

        loan.disburse(
            Money::from_major(9000, usd()),
            date(2024, 1, 5),
            &generator(),
            &EveryDayWorking,
            &time,
        )
        .unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        // the schedule anchors on the actual disbursement date
        assert_eq!(loan.disbursement_date, Some(date(2024, 1, 5)));
        assert_eq!(loan.installments[0].from_date, date(2024, 1, 5));
        assert_eq!(loan.installments.len(), 3);
        assert_eq!(loan.summary.total_disbursed, Money::from_major(9000, usd()));
    }

    #[test]
    fn test_disburse_beyond_approved_principal_rejected() {
        let time = clock();
        let mut loan = LoanLedger::submit(terms(9000, 3), false, AllocationRule::standard());
        loan.approve(None, date(2024, 1, 1), &time).unwrap();
        let err = loan
            .disburse(
                Money::from_major(10000, usd()),
                date(2024, 1, 5),
                &generator(),
                &EveryDayWorking,
                &time,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            LoanError::AmountExceedsApprovedPrincipal { .. }
        ));
    }

    #[test]
    fn test_repayment_before_disbursement_rejected() {
        let time = clock();
        let mut loan = active_loan(9000, 3);
        let err = loan
            .repay(money(dec!(100)), date(2023, 12, 25), &time)
            .unwrap_err();
        assert!(matches!(err, LoanError::DateBeforeDisbursement { .. }));
    }

    #[test]
    fn test_future_dated_repayment_rejected() {
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap(),
        ));
        let mut loan = active_loan(9000, 3);
        let err = loan
            .repay(money(dec!(100)), date(2024, 2, 2), &time)
            .unwrap_err();
        assert!(matches!(err, LoanError::FutureDate { .. }));
    }

    #[test]
    fn test_exact_repayments_close_the_loan() {
        let time = clock();
        let mut loan = active_loan(9000, 3);
        let per_installment = money(dec!(3050));
        loan.repay(per_installment, date(2024, 1, 31), &time).unwrap();
        loan.repay(per_installment, date(2024, 3, 1), &time).unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        loan.repay(per_installment, date(2024, 3, 31), &time).unwrap();
        assert_eq!(loan.status, LoanStatus::ClosedObligationsMet);
        assert!(loan.summary.is_fully_settled());
        assert_eq!(loan.closed_on, Some(date(2024, 3, 31)));
    }

    #[test]
    fn test_overpayment_marks_loan_overpaid_and_refund_closes() {
        let time = clock();
        let mut loan = active_loan(3000, 1);
        loan.repay(money(dec!(3250)), date(2024, 1, 31), &time).unwrap();
        assert_eq!(loan.status, LoanStatus::Overpaid);
        assert_eq!(loan.overpaid_balance, money(dec!(200)));
        assert_eq!(loan.summary.total_overpaid, money(dec!(200)));

        let err = loan
            .refund(money(dec!(500)), date(2024, 2, 1), &time)
            .unwrap_err();
        assert!(matches!(err, LoanError::NothingToRefund { .. }));

        loan.refund(money(dec!(200)), date(2024, 2, 1), &time).unwrap();
        assert_eq!(loan.overpaid_balance, money(dec!(0)));
        assert_eq!(loan.status, LoanStatus::ClosedObligationsMet);
    }

    #[test]
    fn test_backdated_repayment_triggers_replay() {
        let time = clock();
        let mut loan = active_loan(3000, 1);
        loan.repay(money(dec!(3050)), date(2024, 1, 31), &time).unwrap();
        assert_eq!(loan.status, LoanStatus::ClosedObligationsMet);

        // an earlier payment surfaces: the first one now overpays
        loan.adjust_transaction(
            loan.transactions[1].id,
            money(dec!(0)),
            date(2024, 1, 31),
            &time,
        )
        .unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.total_outstanding(), money(dec!(3050)));
    }

    #[test]
    fn test_adjust_transaction_substitutes_amount() {
        let time = clock();
        let mut loan = active_loan(9000, 3);
        let original = loan.repay(money(dec!(3050)), date(2024, 1, 31), &time).unwrap();

        let replacement = loan
            .adjust_transaction(original, money(dec!(1000)), date(2024, 1, 31), &time)
            .unwrap()
            .expect("replacement id");

        let original_txn = loan.transactions.iter().find(|t| t.id == original).unwrap();
        assert!(original_txn.is_reversed());
        assert!(original_txn.manually_adjusted);
        let replacement_txn = loan
            .transactions
            .iter()
            .find(|t| t.id == replacement)
            .unwrap();
        assert_eq!(replacement_txn.amount, money(dec!(1000)));
        // 9150 total due, 1000 paid
        assert_eq!(loan.total_outstanding(), money(dec!(8150)));
    }

    #[test]
    fn test_adjusted_history_matches_date_ordered_entry() {
        let time = clock();
        // loan A: payments entered in date order
        let mut ordered = active_loan(9000, 3);
        ordered.repay(money(dec!(1000)), date(2024, 1, 20), &time).unwrap();
        ordered.repay(money(dec!(2000)), date(2024, 2, 10), &time).unwrap();

        // loan B: the later payment entered first, then the earlier one
        let mut adjusted = active_loan(9000, 3);
        adjusted.repay(money(dec!(2000)), date(2024, 2, 10), &time).unwrap();
        adjusted.repay(money(dec!(1000)), date(2024, 1, 20), &time).unwrap();

        assert_eq!(ordered.installments, adjusted.installments);
        assert_eq!(ordered.summary, adjusted.summary);
    }

    #[test]
    fn test_same_date_payments_replay_in_entry_order_under_frozen_clock() {
        // a test clock stamps every transaction with the same instant, so
        // only the append-order stamp separates these two payments
        let time = clock();
        let mut loan = active_loan(3000, 1);
        loan.repay(money(dec!(2000)), date(2024, 2, 1), &time).unwrap();
        loan.repay(money(dec!(1100)), date(2024, 2, 1), &time).unwrap();

        // entry order: 2000 settles interest 50 + principal 1950, then 1100
        // covers the remaining 1050 and spills 50 over
        let first = loan
            .transactions
            .iter()
            .find(|t| t.amount == money(dec!(2000)) && !t.is_reversed())
            .unwrap();
        assert_eq!(first.interest_portion, money(dec!(50)));
        assert_eq!(first.principal_portion, money(dec!(1950)));
        assert_eq!(first.overpayment_portion, money(dec!(0)));
        let second = loan
            .transactions
            .iter()
            .find(|t| t.amount == money(dec!(1100)) && !t.is_reversed())
            .unwrap();
        assert_eq!(second.principal_portion, money(dec!(1050)));
        assert_eq!(second.overpayment_portion, money(dec!(50)));
        assert_eq!(loan.overpaid_balance, money(dec!(50)));
        assert_eq!(loan.status, LoanStatus::Overpaid);
    }

    #[test]
    fn test_waive_interest() {
        let time = clock();
        let mut loan = active_loan(3000, 1);
        loan.waive_interest(money(dec!(50)), date(2024, 1, 15), &time)
            .unwrap();
        assert_eq!(loan.installments[0].interest.waived, money(dec!(50)));
        assert_eq!(loan.total_outstanding(), money(dec!(3000)));
        assert_eq!(loan.summary.interest.waived, money(dec!(50)));
    }

    #[test]
    fn test_repayment_backdated_before_waiver_takes_replay_path() {
        let time = clock();
        let mut loan = active_loan(2000, 2);
        loan.waive_interest(money(dec!(50)), date(2024, 3, 1), &time)
            .unwrap();
        assert_eq!(loan.installments[0].interest.waived, money(dec!(50)));

        // dated before the waiver, and its amount matches what period 1 has
        // outstanding after it; the replay must still win, putting the cash
        // against the interest and pushing the waiver onto period 2
        loan.repay(money(dec!(1000)), date(2024, 1, 31), &time)
            .unwrap();

        assert_eq!(loan.installments[0].interest.paid, money(dec!(50)));
        assert_eq!(loan.installments[0].interest.waived, money(dec!(0)));
        assert_eq!(loan.installments[0].principal.paid, money(dec!(950)));
        assert_eq!(loan.installments[1].interest.waived, money(dec!(50)));
    }

    #[test]
    fn test_charge_lifecycle_add_update_waive() {
        let time = clock();
        let mut loan = active_loan(9000, 3);
        let charge_id = loan
            .add_charge(Charge::new(
                "late fee",
                ChargeCalculation::Flat,
                ChargeTime::SpecifiedDueDate,
                dec!(40),
                usd(),
                Some(date(2024, 2, 15)),
                true,
            ))
            .unwrap();
        assert_eq!(loan.installments[1].penalty.charged, money(dec!(40)));
        assert_eq!(loan.total_outstanding(), money(dec!(9190)));

        loan.update_charge(charge_id, dec!(60)).unwrap();
        assert_eq!(loan.installments[1].penalty.charged, money(dec!(60)));

        loan.waive_charge(charge_id, None, date(2024, 2, 20), &time)
            .unwrap();
        assert_eq!(loan.installments[1].penalty.waived, money(dec!(60)));
        assert_eq!(loan.total_outstanding(), money(dec!(9150)));
        assert!(loan.charges[0].waived);
    }

    #[test]
    fn test_charge_outside_schedule_rejected() {
        let mut loan = active_loan(9000, 3);
        let err = loan
            .add_charge(Charge::new(
                "stale fee",
                ChargeCalculation::Flat,
                ChargeTime::SpecifiedDueDate,
                dec!(40),
                usd(),
                Some(date(2025, 6, 1)),
                false,
            ))
            .unwrap_err();
        assert!(matches!(err, LoanError::ChargeOutsideScheduleRange { .. }));
    }

    #[test]
    fn test_remove_paid_charge_rejected() {
        let time = clock();
        let mut loan = active_loan(3000, 1);
        let charge_id = loan
            .add_charge(Charge::new(
                "fee",
                ChargeCalculation::Flat,
                ChargeTime::SpecifiedDueDate,
                dec!(25),
                usd(),
                Some(date(2024, 1, 20)),
                false,
            ))
            .unwrap();
        loan.pay_charge(charge_id, money(dec!(25)), date(2024, 1, 20), &time)
            .unwrap();
        assert_eq!(loan.charges[0].amount_paid, money(dec!(25)));
        let err = loan.remove_charge(charge_id).unwrap_err();
        assert!(matches!(err, LoanError::ChargeAlreadyPaid { .. }));
    }

    #[test]
    fn test_disbursement_charge_collected_up_front() {
        let time = clock();
        let mut loan = LoanLedger::submit(terms(9000, 3), false, AllocationRule::standard());
        loan.approve(None, date(2024, 1, 1), &time).unwrap();
        loan.charges.push(Charge::new(
            "processing",
            ChargeCalculation::PercentOfDisbursementAmount,
            ChargeTime::Disbursement,
            dec!(1),
            usd(),
            None,
            false,
        ));
        loan.disburse(
            Money::from_major(9000, usd()),
            date(2024, 1, 1),
            &generator(),
            &EveryDayWorking,
            &time,
        )
        .unwrap();

        assert!(loan.charges[0].is_fully_paid());
        assert_eq!(loan.charges[0].amount_paid, money(dec!(90)));
        let at_disbursement = loan
            .transactions
            .iter()
            .find(|t| t.kind == TransactionKind::RepaymentAtDisbursement)
            .unwrap();
        assert_eq!(at_disbursement.amount, money(dec!(90)));
        assert_eq!(at_disbursement.fee_portion, money(dec!(90)));
        // the collected fee is visible in the rollup, not only on the charge
        assert_eq!(loan.summary.fee.charged, money(dec!(90)));
        assert_eq!(loan.summary.fee.paid, money(dec!(90)));
    }

    #[test]
    fn test_write_off_undo_round_trip() {
        let time = clock();
        let mut loan = active_loan(9000, 3);
        loan.repay(money(dec!(3050)), date(2024, 1, 31), &time).unwrap();

        loan.write_off(date(2024, 6, 1), &time).unwrap();
        assert_eq!(loan.status, LoanStatus::ClosedWrittenOff);
        assert_eq!(loan.total_outstanding(), money(dec!(0)));
        assert_eq!(loan.summary.principal.written_off, money(dec!(6000)));

        loan.undo_write_off().unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.total_outstanding(), money(dec!(6100)));
        assert_eq!(loan.summary.principal.written_off, money(dec!(0)));
    }

    #[test]
    fn test_recovery_payment_leaves_schedule_closed() {
        let time = clock();
        let mut loan = active_loan(3000, 1);
        loan.write_off(date(2024, 6, 1), &time).unwrap();

        loan.recovery_payment(money(dec!(500)), date(2024, 7, 1), &time)
            .unwrap();
        assert_eq!(loan.status, LoanStatus::ClosedWrittenOff);
        assert_eq!(loan.summary.total_recovered, money(dec!(500)));
        assert_eq!(loan.installments[0].principal.paid, money(dec!(0)));
    }

    #[test]
    fn test_foreclosure_closes_with_sub_status() {
        let time = clock();
        let mut loan = active_loan(9000, 3);
        loan.repay(money(dec!(3050)), date(2024, 1, 31), &time).unwrap();

        loan.foreclose(date(2024, 2, 15), &time).unwrap();
        assert_eq!(loan.status, LoanStatus::ClosedObligationsMet);
        assert_eq!(loan.sub_status, Some(LoanSubStatus::Foreclosed));
        assert_eq!(loan.total_outstanding(), money(dec!(0)));
    }

    #[test]
    fn test_close_with_outstanding_rejected() {
        let time = clock();
        let mut loan = active_loan(9000, 3);
        let err = loan.close(date(2024, 2, 1), &time).unwrap_err();
        assert!(matches!(err, LoanError::ObligationsOutstanding { .. }));
    }

    #[test]
    fn test_undo_disbursal_resets_to_approved() {
        let time = clock();
        let mut loan = active_loan(9000, 3);
        loan.repay(money(dec!(500)), date(2024, 1, 15), &time).unwrap();

        loan.undo_disbursal().unwrap();
        assert_eq!(loan.status, LoanStatus::Approved);
        assert!(loan.installments.is_empty());
        assert!(loan.disbursement_date.is_none());
        assert!(loan.transactions.iter().all(|t| t.is_reversed()));
    }

    #[test]
    fn test_tranche_disbursement_regenerates_tail() {
        let time = clock();
        let mut loan = LoanLedger::submit(terms(9000, 3), false, AllocationRule::standard());
        loan.approve(None, date(2024, 1, 1), &time).unwrap();
        loan.disburse(
            Money::from_major(6000, usd()),
            date(2024, 1, 1),
            &generator(),
            &EveryDayWorking,
            &time,
        )
        .unwrap();
        loan.disburse(
            Money::from_major(3000, usd()),
            date(2024, 2, 15),
            &generator(),
            &EveryDayWorking,
            &time,
        )
        .unwrap();

        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.total_disbursed(), Money::from_major(9000, usd()));
        // the full approved principal is amortized across the rebuilt schedule
        let scheduled: Money = loan
            .installments
            .iter()
            .fold(Money::zero(usd()), |acc, ins| acc + ins.principal.charged);
        assert_eq!(scheduled, Money::from_major(9000, usd()));
    }

    #[test]
    fn test_guard_table_blocks_operations_on_pending_loan() {
        let time = clock();
        let mut loan = LoanLedger::submit(terms(9000, 3), false, AllocationRule::standard());
        let err = loan
            .repay(money(dec!(100)), date(2024, 1, 5), &time)
            .unwrap_err();
        assert!(matches!(err, LoanError::InvalidStateTransition { .. }));
        let err = loan.write_off(date(2024, 1, 5), &time).unwrap_err();
        assert!(matches!(err, LoanError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_accounting_bridge_reports_once_and_sees_reversals() {
        let time = clock();
        let mut loan = active_loan(9000, 3);
        let repayment = loan.repay(money(dec!(3050)), date(2024, 1, 31), &time).unwrap();

        let first = loan.derive_accounting_bridge_data(false);
        // disbursement + repayment
        assert_eq!(first.new_transactions.len(), 2);
        let second = loan.derive_accounting_bridge_data(false);
        assert!(second.new_transactions.is_empty());

        loan.adjust_transaction(repayment, money(dec!(0)), date(2024, 1, 31), &time)
            .unwrap();
        let third = loan.derive_accounting_bridge_data(false);
        assert_eq!(third.newly_reversed.len(), 1);
        assert_eq!(third.newly_reversed[0].id, repayment);
    }

    #[test]
    fn test_events_emitted_for_full_lifecycle() {
        let time = clock();
        let mut loan = active_loan(3000, 1);
        loan.take_events();
        loan.repay(money(dec!(3050)), date(2024, 1, 31), &time).unwrap();
        let events = loan.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::RepaymentReceived { .. })));
        assert!(events.iter().any(|e| matches!(e, Event::LoanClosed { .. })));
        assert!(loan.take_events().is_empty());
    }
}
