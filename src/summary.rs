use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::charge::Charge;
use crate::installment::Installment;
use crate::money::{Currency, Money};
use crate::transaction::Transaction;
use crate::types::{TransactionId, TransactionKind};

/// charged / paid / waived / written-off rollup for one component
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub charged: Money,
    pub paid: Money,
    pub waived: Money,
    pub written_off: Money,
}

impl ComponentSummary {
    fn zero(currency: Currency) -> Self {
        let zero = Money::zero(currency);
        Self {
            charged: zero,
            paid: zero,
            waived: zero,
            written_off: zero,
        }
    }

    pub fn outstanding(&self) -> Money {
        let zero = Money::zero(self.charged.currency());
        (self.charged - self.paid - self.waived - self.written_off).max(zero)
    }
}

/// derived totals cache. Always recomputed wholesale from the schedule,
/// charges, and the transaction stream, never patched incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub principal: ComponentSummary,
    pub interest: ComponentSummary,
    pub fee: ComponentSummary,
    pub penalty: ComponentSummary,
    pub total_disbursed: Money,
    pub total_outstanding: Money,
    pub total_overpaid: Money,
    pub total_recovered: Money,
}

impl Summary {
    pub fn empty(currency: Currency) -> Self {
        let zero = Money::zero(currency);
        Self {
            principal: ComponentSummary::zero(currency),
            interest: ComponentSummary::zero(currency),
            fee: ComponentSummary::zero(currency),
            penalty: ComponentSummary::zero(currency),
            total_disbursed: zero,
            total_outstanding: zero,
            total_overpaid: zero,
            total_recovered: zero,
        }
    }

    pub fn recompute(
        currency: Currency,
        installments: &[Installment],
        charges: &[Charge],
        transactions: &[Transaction],
        overpaid: Money,
    ) -> Self {
        let mut summary = Self::empty(currency);

        for installment in installments {
            accumulate(&mut summary.principal, &installment.principal);
            accumulate(&mut summary.interest, &installment.interest);
            accumulate(&mut summary.fee, &installment.fee);
            accumulate(&mut summary.penalty, &installment.penalty);
        }

        // charges due at disbursement never land in a period bucket, so the
        // charge rows themselves carry their rollup
        for charge in charges.iter().filter(|c| c.active && c.is_due_at_disbursement()) {
            let bucket = if charge.penalty {
                &mut summary.penalty
            } else {
                &mut summary.fee
            };
            bucket.charged += charge.amount;
            bucket.paid += charge.amount_paid;
            bucket.waived += charge.amount_waived;
            bucket.written_off += charge.amount_written_off;
        }

        summary.total_outstanding = summary.principal.outstanding()
            + summary.interest.outstanding()
            + summary.fee.outstanding()
            + summary.penalty.outstanding();
        summary.total_overpaid = overpaid;

        for transaction in transactions.iter().filter(|t| !t.is_reversed()) {
            match transaction.kind {
                TransactionKind::Disbursement => summary.total_disbursed += transaction.amount,
                TransactionKind::RecoveryRepayment => {
                    summary.total_recovered += transaction.amount
                }
                _ => {}
            }
        }

        summary
    }

    pub fn total_repaid(&self) -> Money {
        self.principal.paid + self.interest.paid + self.fee.paid + self.penalty.paid
    }

    pub fn is_fully_settled(&self) -> bool {
        self.total_outstanding.is_zero()
    }
}

fn accumulate(summary: &mut ComponentSummary, bucket: &crate::installment::ComponentBucket) {
    summary.charged += bucket.charged;
    summary.paid += bucket.paid;
    summary.waived += bucket.waived;
    summary.written_off += bucket.written_off;
}

/// transactions the journal-entry writer has not seen yet, plus previously
/// seen ones that have since been reversed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingBridgeData {
    pub currency: Currency,
    pub is_account_transfer: bool,
    pub new_transactions: Vec<Transaction>,
    pub newly_reversed: Vec<Transaction>,
}

pub fn derive_accounting_bridge_data(
    currency: Currency,
    transactions: &[Transaction],
    seen_ids: &BTreeSet<TransactionId>,
    seen_reversed_ids: &BTreeSet<TransactionId>,
    is_account_transfer: bool,
) -> AccountingBridgeData {
    let mut new_transactions = Vec::new();
    let mut newly_reversed = Vec::new();
    for transaction in transactions {
        if !seen_ids.contains(&transaction.id) {
            if !transaction.is_reversed() {
                new_transactions.push(transaction.clone());
            }
        } else if transaction.is_reversed() && !seen_reversed_ids.contains(&transaction.id) {
            newly_reversed.push(transaction.clone());
        }
    }
    AccountingBridgeData {
        currency,
        is_account_transfer,
        new_transactions,
        newly_reversed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use chrono::{NaiveDate, TimeZone, Utc};
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

    fn created() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_recompute_rolls_up_schedule_and_stream() {
        let mut installment = Installment::new(
            1,
            date(2024, 1, 1),
            date(2024, 2, 1),
            money(dec!(1000)),
            money(dec!(50)),
        );
        installment.pay_component(
            crate::types::AllocationComponent::Principal,
            date(2024, 1, 20),
            money(dec!(400)),
        );
        let transactions = vec![
            Transaction::disbursement(money(dec!(1000)), date(2024, 1, 1), created()),
            Transaction::recovery_repayment(money(dec!(25)), date(2024, 3, 1), created()),
        ];

        let summary = Summary::recompute(
            usd(),
            &[installment],
            &[],
            &transactions,
            Money::zero(usd()),
        );

        assert_eq!(summary.principal.charged, money(dec!(1000)));
        assert_eq!(summary.principal.paid, money(dec!(400)));
        assert_eq!(summary.total_outstanding, money(dec!(650)));
        assert_eq!(summary.total_disbursed, money(dec!(1000)));
        assert_eq!(summary.total_recovered, money(dec!(25)));
        assert!(!summary.is_fully_settled());
    }

    #[test]
    fn test_reversed_transactions_excluded_from_totals() {
        let mut disbursement =
            Transaction::disbursement(money(dec!(1000)), date(2024, 1, 1), created());
        disbursement.reverse();
        let summary = Summary::recompute(usd(), &[], &[], &[disbursement], Money::zero(usd()));
        assert_eq!(summary.total_disbursed, money(dec!(0)));
    }

    #[test]
    fn test_disbursement_charge_rolls_into_fee_summary() {
        use crate::charge::ChargeBasis;
        use crate::types::{ChargeCalculation, ChargeTime};

        let mut charge = Charge::new(
            "processing",
            ChargeCalculation::PercentOfDisbursementAmount,
            ChargeTime::Disbursement,
            dec!(1),
            usd(),
            None,
            false,
        );
        charge.recalculate_amount(
            ChargeBasis {
                principal: money(dec!(9000)),
                total_interest: money(dec!(150)),
                disbursed: money(dec!(9000)),
            },
            1,
        );
        charge.pay(charge.amount_outstanding, None);

        let summary = Summary::recompute(
            usd(),
            &[],
            std::slice::from_ref(&charge),
            &[],
            Money::zero(usd()),
        );

        assert_eq!(summary.fee.charged, money(dec!(90)));
        assert_eq!(summary.fee.paid, money(dec!(90)));
        assert_eq!(summary.total_outstanding, money(dec!(0)));
    }

    #[test]
    fn test_unpaid_disbursement_charge_counts_as_outstanding() {
        use crate::charge::ChargeBasis;
        use crate::types::{ChargeCalculation, ChargeTime};

        let mut charge = Charge::new(
            "processing",
            ChargeCalculation::Flat,
            ChargeTime::Disbursement,
            dec!(75),
            usd(),
            None,
            false,
        );
        charge.recalculate_amount(
            ChargeBasis {
                principal: money(dec!(9000)),
                total_interest: money(dec!(150)),
                disbursed: money(dec!(9000)),
            },
            1,
        );

        let summary = Summary::recompute(
            usd(),
            &[],
            std::slice::from_ref(&charge),
            &[],
            Money::zero(usd()),
        );

        assert_eq!(summary.fee.outstanding(), money(dec!(75)));
        assert_eq!(summary.total_outstanding, money(dec!(75)));
    }

    #[test]
    fn test_bridge_reports_each_transaction_once() {
        let repayment = Transaction::repayment(money(dec!(100)), date(2024, 2, 1), created());
        let mut seen = BTreeSet::new();
        let seen_reversed = BTreeSet::new();

        let first = derive_accounting_bridge_data(
            usd(),
            std::slice::from_ref(&repayment),
            &seen,
            &seen_reversed,
            false,
        );
        assert_eq!(first.new_transactions.len(), 1);

        seen.insert(repayment.id);
        let second = derive_accounting_bridge_data(
            usd(),
            std::slice::from_ref(&repayment),
            &seen,
            &seen_reversed,
            false,
        );
        assert!(second.new_transactions.is_empty());
        assert!(second.newly_reversed.is_empty());
    }

    #[test]
    fn test_bridge_reports_reversal_of_seen_transaction() {
        let mut repayment = Transaction::repayment(money(dec!(100)), date(2024, 2, 1), created());
        let mut seen = BTreeSet::new();
        seen.insert(repayment.id);
        repayment.reverse();

        let bridge = derive_accounting_bridge_data(
            usd(),
            std::slice::from_ref(&repayment),
            &seen,
            &BTreeSet::new(),
            false,
        );
        assert!(bridge.new_transactions.is_empty());
        assert_eq!(bridge.newly_reversed.len(), 1);
    }
}
