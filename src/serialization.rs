/// serialization support for loan ledgers
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ledger::LoanLedger;
use crate::money::Money;
use crate::types::{LoanId, LoanStatus, LoanSubStatus};

/// full aggregate snapshot for persistence; pending events are not part of
/// the snapshot and must be drained before saving
pub fn save_snapshot(ledger: &LoanLedger) -> Result<String, serde_json::Error> {
    serde_json::to_string(ledger)
}

pub fn restore_snapshot(json: &str) -> Result<LoanLedger, serde_json::Error> {
    serde_json::from_str(json)
}

/// serializable view of a loan's state
#[derive(Debug, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub status: LoanStatus,
    pub sub_status: Option<LoanSubStatus>,
    pub currency: String,
    pub principal: Money,
    pub disbursement_date: Option<NaiveDate>,
    pub closed_on: Option<NaiveDate>,
    pub financial: FinancialView,
    pub schedule: ScheduleView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinancialView {
    pub total_disbursed: Money,
    pub total_outstanding: Money,
    pub total_repaid: Money,
    pub total_overpaid: Money,
    pub total_recovered: Money,
    pub principal_outstanding: Money,
    pub interest_outstanding: Money,
    pub fee_outstanding: Money,
    pub penalty_outstanding: Money,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleView {
    pub installment_count: usize,
    pub installments_met: usize,
    pub next_due_date: Option<NaiveDate>,
    pub next_due_amount: Option<Money>,
    pub active_charge_count: usize,
    pub transaction_count: usize,
}

impl LoanView {
    pub fn from_ledger(ledger: &LoanLedger) -> Self {
        let next_unmet = ledger
            .installments
            .iter()
            .find(|ins| ins.total_outstanding().is_greater_than_zero());
        LoanView {
            id: ledger.id,
            status: ledger.status,
            sub_status: ledger.sub_status,
            currency: ledger.currency.code().to_string(),
            principal: ledger.terms.principal,
            disbursement_date: ledger.disbursement_date,
            closed_on: ledger.closed_on,
            financial: FinancialView {
                total_disbursed: ledger.summary.total_disbursed,
                total_outstanding: ledger.summary.total_outstanding,
                total_repaid: ledger.summary.total_repaid(),
                total_overpaid: ledger.summary.total_overpaid,
                total_recovered: ledger.summary.total_recovered,
                principal_outstanding: ledger.summary.principal.outstanding(),
                interest_outstanding: ledger.summary.interest.outstanding(),
                fee_outstanding: ledger.summary.fee.outstanding(),
                penalty_outstanding: ledger.summary.penalty.outstanding(),
            },
            schedule: ScheduleView {
                installment_count: ledger.installments.len(),
                installments_met: ledger
                    .installments
                    .iter()
                    .filter(|ins| ins.obligations_met)
                    .count(),
                next_due_date: next_unmet.map(|ins| ins.due_date),
                next_due_amount: next_unmet.map(|ins| ins.total_outstanding()),
                active_charge_count: ledger.charges.iter().filter(|c| c.active).count(),
                transaction_count: ledger.transactions.len(),
            },
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use crate::processor::AllocationRule;
    use crate::schedule::testing::FlatScheduleGenerator;
    use crate::schedule::{EveryDayWorking, ScheduleTerms};
    use chrono::TimeZone;
    use chrono::Utc;
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::new("USD", 2).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_loan() -> LoanLedger {
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        let terms = ScheduleTerms {
            principal: Money::from_major(9000, usd()),
            annual_interest_rate: dec!(12),
            number_of_installments: 3,
            repayment_every_days: 30,
            start_date: date(2024, 1, 1),
        };
        let mut loan = LoanLedger::submit(terms, false, AllocationRule::standard());
        loan.approve(None, date(2024, 1, 1), &time).unwrap();
        loan.disburse(
            Money::from_major(9000, usd()),
            date(2024, 1, 1),
            &FlatScheduleGenerator::default(),
            &EveryDayWorking,
            &time,
        )
        .unwrap();
        loan.repay(Money::new(dec!(3050), usd()), date(2024, 1, 31), &time)
            .unwrap();
        loan
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut loan = sample_loan();
        loan.take_events();

        let json = save_snapshot(&loan).unwrap();
        let restored = restore_snapshot(&json).unwrap();

        assert_eq!(restored.id, loan.id);
        assert_eq!(restored.status, loan.status);
        assert_eq!(restored.installments, loan.installments);
        assert_eq!(restored.transactions, loan.transactions);
        assert_eq!(restored.charges, loan.charges);
        assert_eq!(restored.summary, loan.summary);
        assert_eq!(restored.overpaid_balance, loan.overpaid_balance);
        assert!(restored.events.events().is_empty());
    }

    #[test]
    fn test_restored_ledger_accepts_operations() {
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        let loan = sample_loan();
        let mut restored = restore_snapshot(&save_snapshot(&loan).unwrap()).unwrap();

        restored
            .repay(Money::new(dec!(3050), usd()), date(2024, 3, 1), &time)
            .unwrap();
        assert_eq!(
            restored.total_outstanding(),
            Money::new(dec!(3050), usd())
        );
    }

    #[test]
    fn test_view_reflects_summary() {
        let loan = sample_loan();
        let view = LoanView::from_ledger(&loan);

        assert_eq!(view.currency, "USD");
        assert_eq!(view.schedule.installment_count, 3);
        assert_eq!(view.schedule.installments_met, 1);
        assert_eq!(view.schedule.next_due_date, Some(date(2024, 3, 1)));
        assert_eq!(view.financial.total_repaid, Money::new(dec!(3050), usd()));

        let json = view.to_json_pretty().unwrap();
        assert!(json.contains("\"installment_count\": 3"));
    }
}
