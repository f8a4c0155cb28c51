use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{LoanError, Result};
use crate::installment::Installment;
use crate::money::{Currency, Money};
use crate::types::{ChargeCalculation, ChargeId, ChargeTime};

/// per-installment slice of an instalment-fee charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentCharge {
    pub installment_number: u32,
    pub amount: Money,
    pub amount_paid: Money,
    pub amount_waived: Money,
    pub amount_outstanding: Money,
}

impl InstallmentCharge {
    fn new(installment_number: u32, amount: Money) -> Self {
        let zero = Money::zero(amount.currency());
        Self {
            installment_number,
            amount,
            amount_paid: zero,
            amount_waived: zero,
            amount_outstanding: amount,
        }
    }

    /// keep paid/waived state, re-derive amount and outstanding
    fn update_amount(&mut self, installment_number: u32, amount: Money) {
        self.installment_number = installment_number;
        self.amount = amount;
        self.amount_outstanding =
            (amount - self.amount_paid - self.amount_waived).max(Money::zero(amount.currency()));
    }
}

/// basis amounts for percentage charge calculation
#[derive(Debug, Clone, Copy)]
pub struct ChargeBasis {
    pub principal: Money,
    pub total_interest: Money,
    /// tranche amount for disbursement-percentage charges
    pub disbursed: Money,
}

/// a fee or penalty attached to the loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub id: ChargeId,
    pub name: String,
    pub calculation: ChargeCalculation,
    pub time: ChargeTime,
    /// configured flat amount, or percentage for percent-based kinds
    pub amount_or_percentage: Decimal,
    pub due_date: Option<NaiveDate>,
    pub min_cap: Option<Decimal>,
    pub max_cap: Option<Decimal>,
    /// books into the penalty component instead of the fee component
    pub penalty: bool,
    /// deactivated charges are kept for audit, never hard-deleted
    pub active: bool,
    pub waived: bool,
    pub amount: Money,
    pub amount_paid: Money,
    pub amount_waived: Money,
    pub amount_written_off: Money,
    pub amount_outstanding: Money,
    pub installment_charges: Vec<InstallmentCharge>,
}

impl Charge {
    pub fn new(
        name: impl Into<String>,
        calculation: ChargeCalculation,
        time: ChargeTime,
        amount_or_percentage: Decimal,
        currency: Currency,
        due_date: Option<NaiveDate>,
        penalty: bool,
    ) -> Self {
        let zero = Money::zero(currency);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            calculation,
            time,
            amount_or_percentage,
            due_date,
            min_cap: None,
            max_cap: None,
            penalty,
            active: true,
            waived: false,
            amount: zero,
            amount_paid: zero,
            amount_waived: zero,
            amount_written_off: zero,
            amount_outstanding: zero,
            installment_charges: Vec::new(),
        }
    }

    pub fn with_caps(mut self, min_cap: Option<Decimal>, max_cap: Option<Decimal>) -> Self {
        self.min_cap = min_cap;
        self.max_cap = max_cap;
        self
    }

    pub fn currency(&self) -> Currency {
        self.amount.currency()
    }

    pub fn is_instalment_fee(&self) -> bool {
        self.time == ChargeTime::InstallmentFee
    }

    pub fn is_due_at_disbursement(&self) -> bool {
        matches!(
            self.time,
            ChargeTime::Disbursement | ChargeTime::TrancheDisbursement
        )
    }

    pub fn is_fee(&self) -> bool {
        !self.penalty
    }

    pub fn is_fully_paid(&self) -> bool {
        self.amount_outstanding.is_zero() && self.amount_paid.is_greater_than_zero()
    }

    pub fn is_paid_or_waived(&self) -> bool {
        self.amount_outstanding.is_zero()
    }

    pub fn outstanding(&self) -> Money {
        self.amount_outstanding
    }

    /// `amount == paid + waived + written_off + outstanding` at all times
    fn rebalance_outstanding(&mut self) {
        self.amount_outstanding = (self.amount
            - self.amount_paid
            - self.amount_waived
            - self.amount_written_off)
            .max(Money::zero(self.currency()));
    }

    /// compute the charge amount from its calculation kind, apply min/max
    /// caps and round to the currency scale
    pub fn recalculate_amount(&mut self, basis: ChargeBasis, installment_count: u32) {
        let currency = self.currency();
        let computed = match self.calculation {
            ChargeCalculation::Flat => {
                if self.is_instalment_fee() {
                    self.amount_or_percentage * Decimal::from(installment_count)
                } else {
                    self.amount_or_percentage
                }
            }
            ChargeCalculation::PercentOfAmount => {
                self.apply_caps(basis.principal.percentage_of(self.amount_or_percentage).amount())
            }
            ChargeCalculation::PercentOfAmountAndInterest => self.apply_caps(
                (basis.principal + basis.total_interest)
                    .percentage_of(self.amount_or_percentage)
                    .amount(),
            ),
            ChargeCalculation::PercentOfInterest => self.apply_caps(
                basis
                    .total_interest
                    .percentage_of(self.amount_or_percentage)
                    .amount(),
            ),
            ChargeCalculation::PercentOfDisbursementAmount => {
                self.apply_caps(basis.disbursed.percentage_of(self.amount_or_percentage).amount())
            }
        };
        self.amount = Money::new(computed, currency);
        self.rebalance_outstanding();
    }

    fn apply_caps(&self, computed: Decimal) -> Decimal {
        if let Some(min) = self.min_cap {
            if computed < min {
                return min;
            }
        }
        if let Some(max) = self.max_cap {
            if computed > max {
                return max;
            }
        }
        computed
    }

    /// spread an instalment-fee charge across the schedule, reconciling an
    /// existing allocation list positionally by sorted installment number so
    /// paid/waived sub-state on unaffected periods is never lost
    pub fn generate_installment_charges(&mut self, installments: &[Installment]) {
        if !self.is_instalment_fee() {
            return;
        }
        let currency = self.currency();
        let desired: Vec<(u32, Money)> = installments
            .iter()
            .map(|ins| {
                let amount = match self.calculation {
                    ChargeCalculation::Flat => Money::new(self.amount_or_percentage, currency),
                    ChargeCalculation::PercentOfAmount
                    | ChargeCalculation::PercentOfDisbursementAmount => ins
                        .principal
                        .charged
                        .percentage_of(self.amount_or_percentage),
                    ChargeCalculation::PercentOfInterest => {
                        ins.interest.charged.percentage_of(self.amount_or_percentage)
                    }
                    ChargeCalculation::PercentOfAmountAndInterest => (ins.principal.charged
                        + ins.interest.charged)
                        .percentage_of(self.amount_or_percentage),
                };
                (ins.number, amount)
            })
            .collect();

        self.installment_charges
            .sort_by_key(|ic| ic.installment_number);
        for (position, (number, amount)) in desired.iter().enumerate() {
            if let Some(existing) = self.installment_charges.get_mut(position) {
                existing.update_amount(*number, *amount);
            } else {
                self.installment_charges
                    .push(InstallmentCharge::new(*number, *amount));
            }
        }
        // shrinking removes trailing entries
        self.installment_charges.truncate(desired.len());

        self.amount = self
            .installment_charges
            .iter()
            .fold(Money::zero(currency), |acc, ic| acc + ic.amount);
        self.rebalance_outstanding();
    }

    /// pay the charge, returning the portion applied and the installment it
    /// was applied against for instalment fees
    pub fn pay(&mut self, available: Money, installment_number: Option<u32>) -> (Money, Option<u32>) {
        if self.is_instalment_fee() {
            let target = match installment_number {
                Some(number) => self
                    .installment_charges
                    .iter_mut()
                    .find(|ic| ic.installment_number == number),
                None => self
                    .installment_charges
                    .iter_mut()
                    .find(|ic| ic.amount_outstanding.is_greater_than_zero()),
            };
            let Some(allocation) = target else {
                return (Money::zero(self.currency()), None);
            };
            let portion = available.min(allocation.amount_outstanding);
            allocation.amount_paid += portion;
            allocation.amount_outstanding -= portion;
            let number = allocation.installment_number;
            self.amount_paid += portion;
            self.rebalance_outstanding();
            (portion, Some(number))
        } else {
            let portion = available.min(self.amount_outstanding);
            self.amount_paid += portion;
            self.rebalance_outstanding();
            (portion, None)
        }
    }

    /// waive the outstanding balance; for instalment fees only the allocation
    /// bound to the given installment number (or the earliest unpaid one)
    pub fn waive(&mut self, installment_number: Option<u32>) -> Result<(Money, Option<u32>)> {
        if !self.active {
            return Err(LoanError::ChargeNotPayable { id: self.id });
        }
        if self.amount_outstanding.is_zero() {
            return Err(LoanError::ChargeAlreadyPaid { id: self.id });
        }
        let (waived, number) = if self.is_instalment_fee() {
            let target = match installment_number {
                Some(number) => self
                    .installment_charges
                    .iter_mut()
                    .find(|ic| ic.installment_number == number),
                None => self
                    .installment_charges
                    .iter_mut()
                    .find(|ic| ic.amount_outstanding.is_greater_than_zero()),
            };
            let Some(allocation) = target else {
                return Err(LoanError::ChargeAlreadyPaid { id: self.id });
            };
            let portion = allocation.amount_outstanding;
            allocation.amount_waived += portion;
            allocation.amount_outstanding = Money::zero(portion.currency());
            (portion, Some(allocation.installment_number))
        } else {
            (self.amount_outstanding, None)
        };
        self.amount_waived += waived;
        self.rebalance_outstanding();
        // waiving never reduces paid; fully waived without cash means waived
        self.waived =
            self.amount_outstanding.is_zero() && self.amount_waived.is_greater_than_zero();
        Ok((waived, number))
    }

    /// clear the transaction-derived state (paid and written-off) before a
    /// full replay; disbursement-time charges keep theirs because they are
    /// settled outside the schedule
    pub fn reset_paid_state(&mut self) {
        if self.is_due_at_disbursement() {
            return;
        }
        let zero = Money::zero(self.currency());
        self.amount_paid = zero;
        self.amount_written_off = zero;
        for allocation in &mut self.installment_charges {
            allocation.amount_paid = zero;
            allocation.amount_outstanding =
                (allocation.amount - allocation.amount_waived).max(zero);
        }
        self.rebalance_outstanding();
    }

    /// move the outstanding balance to written-off (loan write-off pass)
    pub fn write_off_outstanding(&mut self) -> Money {
        let outstanding = self.amount_outstanding;
        if outstanding.is_greater_than_zero() {
            self.amount_written_off += outstanding;
            self.rebalance_outstanding();
        }
        outstanding
    }

    /// mark the charge removed; the row is kept for audit
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// whether the charge falls due in the period ending at `due`; the first
    /// period includes its start date
    pub fn is_due_in_period(&self, from: NaiveDate, due: NaiveDate, first_period: bool) -> bool {
        match self.due_date {
            Some(date) => {
                if first_period {
                    date >= from && date <= due
                } else {
                    date > from && date <= due
                }
            }
            None => false,
        }
    }
}

/// re-derive every installment's fee/penalty charged and waived amounts from
/// the charge set, after charges changed or before a replay
pub fn reprocess_charges(
    disbursement_date: NaiveDate,
    installments: &mut [Installment],
    charges: &[Charge],
) {
    let mut period_start = disbursement_date;
    for (index, installment) in installments.iter_mut().enumerate() {
        let first_period = index == 0;
        let currency = installment.currency();
        let mut fee_charged = Money::zero(currency);
        let mut fee_waived = Money::zero(currency);
        let mut penalty_charged = Money::zero(currency);
        let mut penalty_waived = Money::zero(currency);

        for charge in charges.iter().filter(|c| c.active) {
            if charge.is_due_at_disbursement() {
                continue;
            }
            let (charged, waived) = if charge.is_instalment_fee() {
                match charge
                    .installment_charges
                    .iter()
                    .find(|ic| ic.installment_number == installment.number)
                {
                    Some(ic) => (ic.amount, ic.amount_waived),
                    None => continue,
                }
            } else if charge.is_due_in_period(period_start, installment.due_date, first_period) {
                (charge.amount, charge.amount_waived)
            } else {
                continue;
            };

            if charge.penalty {
                penalty_charged += charged;
                penalty_waived += waived;
            } else {
                fee_charged += charged;
                fee_waived += waived;
            }
        }

        installment.set_fee_charged(fee_charged, fee_waived);
        installment.set_penalty_charged(penalty_charged, penalty_waived);
        period_start = installment.due_date;
    }
}
