use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::money::{Currency, Money};
use crate::types::AllocationComponent;

/// one component of an installment, split into the four derived buckets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentBucket {
    pub charged: Money,
    pub paid: Money,
    pub waived: Money,
    pub written_off: Money,
}

impl ComponentBucket {
    pub fn new(currency: Currency) -> Self {
        let zero = Money::zero(currency);
        Self {
            charged: zero,
            paid: zero,
            waived: zero,
            written_off: zero,
        }
    }

    pub fn with_charged(charged: Money) -> Self {
        let mut bucket = Self::new(charged.currency());
        bucket.charged = charged;
        bucket
    }

    pub fn outstanding(&self) -> Money {
        let net = self.charged - self.paid - self.waived - self.written_off;
        debug_assert!(
            !net.is_negative(),
            "allocation left negative outstanding: {net}"
        );
        net.max(Money::zero(self.charged.currency()))
    }

    /// apply a payment up to outstanding, returns the portion consumed
    fn pay(&mut self, available: Money) -> Money {
        let portion = available.min(self.outstanding());
        if portion.is_greater_than_zero() {
            self.paid += portion;
        }
        portion
    }

    /// waive up to outstanding, returns the portion waived
    fn waive(&mut self, available: Money) -> Money {
        let portion = available.min(self.outstanding());
        if portion.is_greater_than_zero() {
            self.waived += portion;
        }
        portion
    }

    /// move the entire outstanding into written-off
    fn write_off(&mut self) -> Money {
        let outstanding = self.outstanding();
        if outstanding.is_greater_than_zero() {
            self.written_off += outstanding;
        }
        outstanding
    }

    /// clear everything derived from transactions, keep the charged amount
    fn reset_derived(&mut self) {
        let zero = Money::zero(self.charged.currency());
        self.paid = zero;
        self.waived = zero;
        self.written_off = zero;
    }
}

/// compounded-income record attached under interest recalculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundingDetail {
    pub effective_date: NaiveDate,
    pub amount: Money,
}

/// amounts moved to written-off by a write-off pass, per component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WrittenOffAmounts {
    pub principal: Money,
    pub interest: Money,
    pub fee: Money,
    pub penalty: Money,
}

impl WrittenOffAmounts {
    pub fn total(&self) -> Money {
        self.principal + self.interest + self.fee + self.penalty
    }
}

/// one scheduled repayment period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    /// 1-based position in the schedule
    pub number: u32,
    pub from_date: NaiveDate,
    pub due_date: NaiveDate,
    pub principal: ComponentBucket,
    pub interest: ComponentBucket,
    pub fee: ComponentBucket,
    pub penalty: ComponentBucket,
    /// synthetic interest-only period inserted by recalculation
    pub recalculated_interest_component: bool,
    pub obligations_met: bool,
    pub obligations_met_on: Option<NaiveDate>,
    pub compounding_details: Vec<CompoundingDetail>,
}

impl Installment {
    pub fn new(
        number: u32,
        from_date: NaiveDate,
        due_date: NaiveDate,
        principal: Money,
        interest: Money,
    ) -> Self {
        debug_assert!(from_date < due_date, "installment period is inverted");
        let currency = principal.currency();
        Self {
            number,
            from_date,
            due_date,
            principal: ComponentBucket::with_charged(principal),
            interest: ComponentBucket::with_charged(interest),
            fee: ComponentBucket::new(currency),
            penalty: ComponentBucket::new(currency),
            recalculated_interest_component: false,
            obligations_met: false,
            obligations_met_on: None,
            compounding_details: Vec::new(),
        }
    }

    pub fn currency(&self) -> Currency {
        self.principal.charged.currency()
    }

    pub fn component(&self, component: AllocationComponent) -> &ComponentBucket {
        match component {
            AllocationComponent::Penalty => &self.penalty,
            AllocationComponent::Fee => &self.fee,
            AllocationComponent::Interest => &self.interest,
            AllocationComponent::Principal => &self.principal,
        }
    }

    fn component_mut(&mut self, component: AllocationComponent) -> &mut ComponentBucket {
        match component {
            AllocationComponent::Penalty => &mut self.penalty,
            AllocationComponent::Fee => &mut self.fee,
            AllocationComponent::Interest => &mut self.interest,
            AllocationComponent::Principal => &mut self.principal,
        }
    }

    pub fn total_charged(&self) -> Money {
        self.principal.charged + self.interest.charged + self.fee.charged + self.penalty.charged
    }

    pub fn total_outstanding(&self) -> Money {
        self.principal.outstanding()
            + self.interest.outstanding()
            + self.fee.outstanding()
            + self.penalty.outstanding()
    }

    pub fn total_paid(&self) -> Money {
        self.principal.paid + self.interest.paid + self.fee.paid + self.penalty.paid
    }

    pub fn total_waived(&self) -> Money {
        self.principal.waived + self.interest.waived + self.fee.waived + self.penalty.waived
    }

    pub fn total_written_off(&self) -> Money {
        self.principal.written_off
            + self.interest.written_off
            + self.fee.written_off
            + self.penalty.written_off
    }

    pub fn is_overdue_on(&self, date: NaiveDate) -> bool {
        date > self.due_date && self.total_outstanding().is_greater_than_zero()
    }

    /// apply a payment to one component, tracking the obligations-met date
    pub fn pay_component(
        &mut self,
        component: AllocationComponent,
        date: NaiveDate,
        available: Money,
    ) -> Money {
        let portion = self.component_mut(component).pay(available);
        self.track_obligations_met(date);
        portion
    }

    /// waive part of the interest outstanding
    pub fn waive_interest(&mut self, date: NaiveDate, available: Money) -> Money {
        let portion = self.interest.waive(available);
        self.track_obligations_met(date);
        portion
    }

    /// waive part of the fee outstanding (driven by charge waivers)
    pub fn waive_fee(&mut self, date: NaiveDate, available: Money) -> Money {
        let portion = self.fee.waive(available);
        self.track_obligations_met(date);
        portion
    }

    /// waive part of the penalty outstanding (driven by charge waivers)
    pub fn waive_penalty(&mut self, date: NaiveDate, available: Money) -> Money {
        let portion = self.penalty.waive(available);
        self.track_obligations_met(date);
        portion
    }

    /// give back part of a component's paid amount (active-loan refunds)
    pub fn refund_component(
        &mut self,
        component: AllocationComponent,
        date: NaiveDate,
        available: Money,
    ) -> Money {
        let bucket = self.component_mut(component);
        let portion = available.min(bucket.paid);
        if portion.is_greater_than_zero() {
            bucket.paid -= portion;
        }
        self.track_obligations_met(date);
        portion
    }

    /// move every remaining outstanding amount into written-off
    pub fn write_off_outstanding(&mut self, date: NaiveDate) -> WrittenOffAmounts {
        let amounts = WrittenOffAmounts {
            principal: self.principal.write_off(),
            interest: self.interest.write_off(),
            fee: self.fee.write_off(),
            penalty: self.penalty.write_off(),
        };
        self.track_obligations_met(date);
        amounts
    }

    /// zero out everything derived from transactions before a replay
    pub fn reset_derived_components(&mut self) {
        self.principal.reset_derived();
        self.interest.reset_derived();
        self.fee.reset_derived();
        self.penalty.reset_derived();
        self.obligations_met = false;
        self.obligations_met_on = None;
    }

    /// the charged amounts of fee/penalty are re-derived from the charge set
    pub fn set_fee_charged(&mut self, charged: Money, waived: Money) {
        self.fee.charged = charged;
        self.fee.waived = waived;
    }

    pub fn set_penalty_charged(&mut self, charged: Money, waived: Money) {
        self.penalty.charged = charged;
        self.penalty.waived = waived;
    }

    fn track_obligations_met(&mut self, date: NaiveDate) {
        if self.total_outstanding().is_zero() {
            if !self.obligations_met {
                self.obligations_met = true;
                self.obligations_met_on = Some(date);
            }
        } else {
            self.obligations_met = false;
            self.obligations_met_on = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::new("USD", 2).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn installment() -> Installment {
        Installment::new(
            1,
            date(2024, 1, 1),
            date(2024, 2, 1),
            Money::new(dec!(1000), usd()),
            Money::new(dec!(50), usd()),
        )
    }

    #[test]
    fn test_pay_caps_at_outstanding() {
        let mut ins = installment();
        let applied = ins.pay_component(
            AllocationComponent::Principal,
            date(2024, 2, 1),
            Money::new(dec!(1500), usd()),
        );
        assert_eq!(applied, Money::new(dec!(1000), usd()));
        assert_eq!(ins.principal.outstanding(), Money::zero(usd()));
    }

    #[test]
    fn test_obligations_met_tracks_date() {
        let mut ins = installment();
        ins.pay_component(
            AllocationComponent::Interest,
            date(2024, 1, 15),
            Money::new(dec!(50), usd()),
        );
        assert!(!ins.obligations_met);

        ins.pay_component(
            AllocationComponent::Principal,
            date(2024, 2, 1),
            Money::new(dec!(1000), usd()),
        );
        assert!(ins.obligations_met);
        assert_eq!(ins.obligations_met_on, Some(date(2024, 2, 1)));
    }

    #[test]
    fn test_write_off_moves_outstanding_not_paid() {
        let mut ins = installment();
        ins.pay_component(
            AllocationComponent::Principal,
            date(2024, 1, 20),
            Money::new(dec!(800), usd()),
        );

        let amounts = ins.write_off_outstanding(date(2024, 3, 1));
        assert_eq!(amounts.principal, Money::new(dec!(200), usd()));
        assert_eq!(amounts.interest, Money::new(dec!(50), usd()));
        assert_eq!(ins.total_outstanding(), Money::zero(usd()));
        assert_eq!(ins.principal.paid, Money::new(dec!(800), usd()));
    }

    #[test]
    fn test_reset_clears_derived_but_not_charged() {
        let mut ins = installment();
        ins.pay_component(
            AllocationComponent::Principal,
            date(2024, 2, 1),
            Money::new(dec!(1000), usd()),
        );
        ins.waive_interest(date(2024, 2, 1), Money::new(dec!(50), usd()));
        assert!(ins.obligations_met);

        ins.reset_derived_components();
        assert_eq!(ins.principal.charged, Money::new(dec!(1000), usd()));
        assert_eq!(ins.principal.paid, Money::zero(usd()));
        assert_eq!(ins.interest.waived, Money::zero(usd()));
        assert!(!ins.obligations_met);
    }

    #[test]
    fn test_overdue_check() {
        let ins = installment();
        assert!(!ins.is_overdue_on(date(2024, 2, 1)));
        assert!(ins.is_overdue_on(date(2024, 2, 2)));
    }
}
