use chrono::NaiveDate;
use uuid::Uuid;

use crate::charge::{reprocess_charges, Charge};
use crate::errors::Result;
use crate::installment::Installment;
use crate::money::{Currency, Money};
use crate::transaction::{ChargePaidBy, ScheduleMapping, Transaction};
use crate::types::{AllocationComponent, ChargeId, TransactionKind};

use super::{AllocationRule, ChangedTransactionDetail, TransactionProcessor};

/// default allocation engine: replays the chronological transaction stream
/// against the schedule, splitting each transaction across components in the
/// configured precedence order with spill-over to later installments
#[derive(Debug, Clone, Default)]
pub struct StandardProcessor {
    rule: AllocationRule,
}

impl StandardProcessor {
    pub fn new(rule: AllocationRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> AllocationRule {
        self.rule
    }

    /// allocate a cash transaction across installments and components,
    /// booking any residue as overpayment
    fn allocate_payment(
        &self,
        transaction: &mut Transaction,
        installments: &mut [Installment],
        charges: &mut [Charge],
        overpaid_balance: &mut Money,
    ) {
        transaction.reset_derived_components();
        let currency = transaction.currency();
        let zero = Money::zero(currency);
        let mut remaining = transaction.amount;
        let mut totals = ComponentTotals::zero(currency);

        for installment in installments.iter_mut() {
            if !remaining.is_greater_than_zero() {
                break;
            }
            let number = installment.number;
            let from_date = installment.from_date;
            let due_date = installment.due_date;
            let mut mapping = ScheduleMapping {
                installment_number: number,
                principal_portion: zero,
                interest_portion: zero,
                fee_portion: zero,
                penalty_portion: zero,
            };

            for component in self.rule.ordered_components() {
                if !remaining.is_greater_than_zero() {
                    break;
                }
                let applied = installment.pay_component(component, transaction.date, remaining);
                if applied.is_zero() {
                    continue;
                }
                remaining -= applied;
                match component {
                    AllocationComponent::Penalty => {
                        mapping.penalty_portion += applied;
                        totals.penalty += applied;
                        settle_charges(
                            charges,
                            number,
                            from_date,
                            due_date,
                            applied,
                            true,
                            &mut transaction.charges_paid,
                        );
                    }
                    AllocationComponent::Fee => {
                        mapping.fee_portion += applied;
                        totals.fee += applied;
                        settle_charges(
                            charges,
                            number,
                            from_date,
                            due_date,
                            applied,
                            false,
                            &mut transaction.charges_paid,
                        );
                    }
                    AllocationComponent::Interest => {
                        mapping.interest_portion += applied;
                        totals.interest += applied;
                    }
                    AllocationComponent::Principal => {
                        mapping.principal_portion += applied;
                        totals.principal += applied;
                    }
                }
            }

            if mapping.total().is_greater_than_zero() {
                transaction.schedule_mappings.push(mapping);
            }
        }

        totals.store(transaction);
        if remaining.is_greater_than_zero() {
            transaction.overpayment_portion = remaining;
            *overpaid_balance += remaining;
        }
    }

    /// an interest waiver reduces interest outstanding instead of acting as
    /// cash; anything beyond the outstanding is income never accrued
    fn apply_interest_waiver(&self, transaction: &mut Transaction, installments: &mut [Installment]) {
        transaction.reset_derived_components();
        let currency = transaction.currency();
        let zero = Money::zero(currency);
        let mut remaining = transaction.amount;
        let mut waived_total = zero;

        for installment in installments.iter_mut() {
            if !remaining.is_greater_than_zero() {
                break;
            }
            let waived = installment.waive_interest(transaction.date, remaining);
            if waived.is_greater_than_zero() {
                remaining -= waived;
                waived_total += waived;
                transaction.schedule_mappings.push(ScheduleMapping {
                    installment_number: installment.number,
                    principal_portion: zero,
                    interest_portion: waived,
                    fee_portion: zero,
                    penalty_portion: zero,
                });
            }
        }

        transaction.interest_portion = waived_total;
        transaction.unrecognized_income_portion = remaining;
    }

    /// replay a charge payment against its linked charges
    fn apply_charge_payment(
        &self,
        transaction: &mut Transaction,
        linked_charges: &[ChargeId],
        installments: &mut [Installment],
        charges: &mut [Charge],
        overpaid_balance: &mut Money,
    ) {
        transaction.reset_derived_components();
        let currency = transaction.currency();
        let zero = Money::zero(currency);
        let mut remaining = transaction.amount;

        for charge_id in linked_charges {
            if !remaining.is_greater_than_zero() {
                break;
            }
            let Some(charge) = charges.iter_mut().find(|c| c.id == *charge_id) else {
                continue;
            };
            let is_penalty = charge.penalty;
            let charge_due = charge.due_date;
            let (applied, installment_number) = charge.pay(remaining, None);
            if !applied.is_greater_than_zero() {
                continue;
            }
            remaining -= applied;
            transaction.charges_paid.push(ChargePaidBy {
                charge_id: *charge_id,
                amount: applied,
                installment_number,
            });

            let component = if is_penalty {
                AllocationComponent::Penalty
            } else {
                AllocationComponent::Fee
            };
            let target = installments.iter_mut().find(|ins| match installment_number {
                Some(number) => ins.number == number,
                None => charge_due
                    .map(|due| due > ins.from_date && due <= ins.due_date || ins.number == 1 && due >= ins.from_date && due <= ins.due_date)
                    .unwrap_or(false),
            });
            if let Some(installment) = target {
                let booked = installment.pay_component(component, transaction.date, applied);
                transaction.schedule_mappings.push(ScheduleMapping {
                    installment_number: installment.number,
                    principal_portion: zero,
                    interest_portion: zero,
                    fee_portion: if is_penalty { zero } else { booked },
                    penalty_portion: if is_penalty { booked } else { zero },
                });
            }
            if is_penalty {
                transaction.penalty_portion += applied;
            } else {
                transaction.fee_portion += applied;
            }
        }

        if remaining.is_greater_than_zero() {
            transaction.overpayment_portion = remaining;
            *overpaid_balance += remaining;
        }
    }

    /// move every remaining outstanding amount across the schedule into
    /// written-off; the transaction amount is derived, not allocated
    fn handle_write_off(
        &self,
        transaction: &mut Transaction,
        installments: &mut [Installment],
        charges: &mut [Charge],
    ) {
        transaction.reset_derived_components();
        let currency = transaction.currency();
        let mut totals = ComponentTotals::zero(currency);

        for installment in installments.iter_mut() {
            let written_off = installment.write_off_outstanding(transaction.date);
            if written_off.total().is_greater_than_zero() {
                totals.principal += written_off.principal;
                totals.interest += written_off.interest;
                totals.fee += written_off.fee;
                totals.penalty += written_off.penalty;
                transaction.schedule_mappings.push(ScheduleMapping {
                    installment_number: installment.number,
                    principal_portion: written_off.principal,
                    interest_portion: written_off.interest,
                    fee_portion: written_off.fee,
                    penalty_portion: written_off.penalty,
                });
            }
        }

        for charge in charges.iter_mut() {
            if charge.active && !charge.is_due_at_disbursement() {
                charge.write_off_outstanding();
            }
        }

        totals.store(transaction);
        transaction.amount = totals.total();
    }

    /// a refund on an active loan gives cash back by un-paying principal and
    /// interest from the latest installments backwards
    fn handle_refund_for_active(
        &self,
        transaction: &mut Transaction,
        installments: &mut [Installment],
    ) {
        transaction.reset_derived_components();
        let currency = transaction.currency();
        let zero = Money::zero(currency);
        let mut remaining = transaction.amount;
        let mut totals = ComponentTotals::zero(currency);

        for installment in installments.iter_mut().rev() {
            if !remaining.is_greater_than_zero() {
                break;
            }
            let mut mapping = ScheduleMapping {
                installment_number: installment.number,
                principal_portion: zero,
                interest_portion: zero,
                fee_portion: zero,
                penalty_portion: zero,
            };
            for component in self.rule.ordered_components().into_iter().rev() {
                if matches!(
                    component,
                    AllocationComponent::Fee | AllocationComponent::Penalty
                ) {
                    continue;
                }
                let refunded =
                    installment.refund_component(component, transaction.date, remaining);
                if refunded.is_greater_than_zero() {
                    remaining -= refunded;
                    match component {
                        AllocationComponent::Principal => {
                            mapping.principal_portion += refunded;
                            totals.principal += refunded;
                        }
                        AllocationComponent::Interest => {
                            mapping.interest_portion += refunded;
                            totals.interest += refunded;
                        }
                        _ => unreachable!(),
                    }
                }
            }
            if mapping.total().is_greater_than_zero() {
                transaction.schedule_mappings.push(mapping);
            }
        }

        totals.store(transaction);
    }

    /// re-run an allocation and detect whether an existing transaction's
    /// split changed: unchanged splits just refresh their mappings, changed
    /// ones reverse the original and produce a replacement
    fn replay_with_detection<F>(
        &self,
        transaction: &mut Transaction,
        detail: &mut ChangedTransactionDetail,
        apply: F,
    ) where
        F: FnOnce(&Self, &mut Transaction),
    {
        if transaction.is_unprocessed() {
            apply(self, transaction);
            return;
        }
        let mut working = transaction.reallocation_copy();
        apply(self, &mut working);
        if transaction.allocation_matches(&working) {
            transaction.schedule_mappings = working.schedule_mappings;
            transaction.charges_paid = working.charges_paid;
        } else {
            transaction.reverse();
            working.id = Uuid::new_v4();
            detail
                .new_transaction_mappings
                .insert(transaction.id, working);
        }
    }
}

impl TransactionProcessor for StandardProcessor {
    fn reprocess(
        &self,
        disbursement_date: NaiveDate,
        currency: Currency,
        transactions: &mut [Transaction],
        installments: &mut [Installment],
        charges: &mut [Charge],
    ) -> Result<ChangedTransactionDetail> {
        let mut detail = ChangedTransactionDetail::new();

        for charge in charges.iter_mut() {
            charge.reset_paid_state();
        }
        for installment in installments.iter_mut() {
            installment.reset_derived_components();
        }
        reprocess_charges(disbursement_date, installments, charges);

        // chronological order; creation instant then the append-order stamp
        // break same-date ties, so same-instant entries under a frozen clock
        // still replay in insertion order
        let mut order: Vec<usize> = (0..transactions.len()).collect();
        order.sort_by(|&a, &b| {
            let ta = &transactions[a];
            let tb = &transactions[b];
            ta.date
                .cmp(&tb.date)
                .then(ta.created_at.cmp(&tb.created_at))
                .then(ta.sequence.cmp(&tb.sequence))
        });

        let mut overpaid_balance = Money::zero(currency);
        for index in order {
            let transaction = &mut transactions[index];
            if transaction.is_reversed() || transaction.kind.is_outside_allocation() {
                continue;
            }
            match transaction.kind {
                // settled against charges that keep their state across replays
                TransactionKind::RepaymentAtDisbursement | TransactionKind::WaiveCharges => {}
                TransactionKind::Repayment => {
                    self.replay_with_detection(transaction, &mut detail, |processor, txn| {
                        processor.allocate_payment(
                            txn,
                            installments,
                            charges,
                            &mut overpaid_balance,
                        );
                    });
                }
                TransactionKind::WaiveInterest => {
                    self.replay_with_detection(transaction, &mut detail, |processor, txn| {
                        processor.apply_interest_waiver(txn, installments);
                    });
                }
                TransactionKind::ChargePayment => {
                    let linked: Vec<ChargeId> = transaction
                        .charges_paid
                        .iter()
                        .map(|link| link.charge_id)
                        .collect();
                    self.replay_with_detection(transaction, &mut detail, |processor, txn| {
                        processor.apply_charge_payment(
                            txn,
                            &linked,
                            installments,
                            charges,
                            &mut overpaid_balance,
                        );
                    });
                }
                TransactionKind::WriteOff => {
                    self.handle_write_off(transaction, installments, charges);
                }
                // booked to the recovered total, never against the schedule
                TransactionKind::RecoveryRepayment => {}
                TransactionKind::Refund => {
                    let drawn = transaction.amount.min(overpaid_balance);
                    transaction.reset_derived_components();
                    transaction.overpayment_portion = drawn;
                    overpaid_balance -= drawn;
                }
                TransactionKind::RefundForActiveLoan => {
                    self.handle_refund_for_active(transaction, installments);
                }
                _ => {}
            }
        }

        detail.overpaid_balance = Some(overpaid_balance);
        Ok(detail)
    }

    fn process_latest(
        &self,
        transaction: &mut Transaction,
        installments: &mut [Installment],
        charges: &mut [Charge],
        overpaid_balance: &mut Money,
    ) -> Result<()> {
        self.allocate_payment(transaction, installments, charges, overpaid_balance);
        Ok(())
    }

    fn can_fast_apply(&self, transaction: &Transaction, installments: &[Installment]) -> bool {
        if transaction.kind != TransactionKind::Repayment {
            return false;
        }
        installments
            .iter()
            .find(|ins| ins.total_outstanding().is_greater_than_zero())
            .map(|current| transaction.amount == current.total_outstanding())
            .unwrap_or(false)
    }
}

/// running component totals for one transaction's allocation
struct ComponentTotals {
    principal: Money,
    interest: Money,
    fee: Money,
    penalty: Money,
}

impl ComponentTotals {
    fn zero(currency: Currency) -> Self {
        let zero = Money::zero(currency);
        Self {
            principal: zero,
            interest: zero,
            fee: zero,
            penalty: zero,
        }
    }

    fn total(&self) -> Money {
        self.principal + self.interest + self.fee + self.penalty
    }

    fn store(&self, transaction: &mut Transaction) {
        transaction.principal_portion = self.principal;
        transaction.interest_portion = self.interest;
        transaction.fee_portion = self.fee;
        transaction.penalty_portion = self.penalty;
    }
}

/// pay down charges matching the component just settled on an installment,
/// recording the charge-payment links on the transaction
fn settle_charges(
    charges: &mut [Charge],
    installment_number: u32,
    from_date: NaiveDate,
    due_date: NaiveDate,
    amount: Money,
    penalty: bool,
    links: &mut Vec<ChargePaidBy>,
) {
    let first_period = installment_number == 1;
    let mut remaining = amount;
    for charge in charges.iter_mut() {
        if !remaining.is_greater_than_zero() {
            break;
        }
        if !charge.active || charge.penalty != penalty || charge.is_due_at_disbursement() {
            continue;
        }
        let (applied, number) = if charge.is_instalment_fee() {
            charge.pay(remaining, Some(installment_number))
        } else if charge.is_due_in_period(from_date, due_date, first_period) {
            charge.pay(remaining, None)
        } else {
            continue;
        };
        if applied.is_greater_than_zero() {
            remaining -= applied;
            links.push(ChargePaidBy {
                charge_id: charge.id,
                amount: applied,
                installment_number: number.or(Some(installment_number)),
            });
        }
    }
}
