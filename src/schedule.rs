use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::charge::{reprocess_charges, Charge, ChargeBasis};
use crate::errors::{LoanError, Result};
use crate::installment::Installment;
use crate::money::Money;
use crate::transaction::Transaction;
use crate::types::{TransactionId, TransactionKind};

/// terms the generator needs to produce a repayment schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTerms {
    pub principal: Money,
    /// nominal annual rate as a percentage
    pub annual_interest_rate: Decimal,
    pub number_of_installments: u32,
    pub repayment_every_days: u32,
    /// interest starts accruing here; the first period opens on this date
    pub start_date: NaiveDate,
}

/// amortization seam: the engine never computes installment amounts itself
pub trait ScheduleGenerator {
    fn generate(&self, terms: &ScheduleTerms) -> Result<Vec<Installment>>;
}

/// calendar seam for due-date validation
pub trait WorkingDayValidator {
    fn is_working_day(&self, date: NaiveDate) -> bool;

    fn validate(&self, date: NaiveDate) -> Result<()> {
        if self.is_working_day(date) {
            Ok(())
        } else {
            Err(LoanError::NonWorkingDay { date })
        }
    }
}

/// default calendar: every date is a working day
#[derive(Debug, Clone, Copy, Default)]
pub struct EveryDayWorking;

impl WorkingDayValidator for EveryDayWorking {
    fn is_working_day(&self, _date: NaiveDate) -> bool {
        true
    }
}

/// why a schedule must be rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegenerationReason {
    DisbursementDateChanged,
    PrincipalAdjusted,
    TermVariation,
    TrancheChanged,
}

/// term-level deltas inspected for regeneration triggers
#[derive(Debug, Clone, Copy, Default)]
pub struct TermChanges {
    pub expected_disbursement_date: Option<NaiveDate>,
    pub actual_disbursement_date: Option<NaiveDate>,
    pub principal_adjusted: bool,
    pub emi_or_due_date_varied: bool,
    pub tranches_changed: bool,
}

/// decides when the schedule must be rebuilt and splices regenerated
/// installments in from an anchor date, leaving settled periods untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalculationEngine {
    pub interest_recalculation_enabled: bool,
}

impl RecalculationEngine {
    pub fn new(interest_recalculation_enabled: bool) -> Self {
        Self {
            interest_recalculation_enabled,
        }
    }

    pub fn regeneration_reason(&self, changes: &TermChanges) -> Option<RegenerationReason> {
        if changes.tranches_changed {
            return Some(RegenerationReason::TrancheChanged);
        }
        if let (Some(expected), Some(actual)) = (
            changes.expected_disbursement_date,
            changes.actual_disbursement_date,
        ) {
            if expected != actual {
                return Some(RegenerationReason::DisbursementDateChanged);
            }
        }
        if changes.principal_adjusted {
            return Some(RegenerationReason::PrincipalAdjusted);
        }
        if changes.emi_or_due_date_varied {
            return Some(RegenerationReason::TermVariation);
        }
        None
    }

    /// rebuild the schedule from the anchor forward. installments due on or
    /// before the anchor are kept as-is; the generator produces the tail from
    /// the principal those periods have not yet amortized
    pub fn recalculate_from(
        &self,
        anchor: NaiveDate,
        terms: &ScheduleTerms,
        generator: &dyn ScheduleGenerator,
        installments: &mut Vec<Installment>,
    ) -> Result<()> {
        let currency = terms.principal.currency();
        let retained: Vec<Installment> = installments
            .iter()
            .filter(|ins| ins.due_date <= anchor)
            .cloned()
            .collect();
        let amortized = retained
            .iter()
            .fold(Money::zero(currency), |acc, ins| acc + ins.principal.charged);
        let remaining_principal = terms.principal - amortized;
        if remaining_principal.is_negative() {
            return Err(LoanError::ScheduleGeneration {
                message: format!(
                    "retained periods amortize {} against a principal of {}",
                    amortized.amount(),
                    terms.principal.amount()
                ),
            });
        }

        let remaining_count = terms
            .number_of_installments
            .saturating_sub(retained.len() as u32);
        let mut rebuilt = retained;
        if remaining_count > 0 && remaining_principal.is_greater_than_zero() {
            let tail_start = rebuilt
                .last()
                .map(|ins| ins.due_date)
                .unwrap_or(terms.start_date);
            let tail_terms = ScheduleTerms {
                principal: remaining_principal,
                number_of_installments: remaining_count,
                start_date: tail_start,
                ..terms.clone()
            };
            let mut tail = generator.generate(&tail_terms)?;
            let mut number = rebuilt.len() as u32;
            for installment in &mut tail {
                number += 1;
                installment.number = number;
            }
            rebuilt.extend(tail);
        }

        if rebuilt.is_empty() {
            return Err(LoanError::ScheduleGeneration {
                message: "regeneration produced an empty schedule".to_string(),
            });
        }
        *installments = rebuilt;
        Ok(())
    }

    /// percentage bases may have shifted with the schedule: recompute every
    /// active non-disbursement charge and push the result onto the periods
    pub fn reevaluate_charges(
        &self,
        basis: ChargeBasis,
        disbursement_date: NaiveDate,
        installments: &mut [Installment],
        charges: &mut [Charge],
    ) {
        let installment_count = installments.len() as u32;
        for charge in charges.iter_mut().filter(|c| c.active) {
            if charge.is_due_at_disbursement() {
                continue;
            }
            charge.recalculate_amount(basis, installment_count);
            charge.generate_installment_charges(installments);
        }
        reprocess_charges(disbursement_date, installments, charges);
    }

    /// accruals and income postings booked after the anchor describe a
    /// schedule that no longer exists; reverse them for re-derivation
    pub fn reverse_income_transactions_after(
        &self,
        anchor: NaiveDate,
        transactions: &mut [Transaction],
    ) -> Vec<TransactionId> {
        let mut reversed = Vec::new();
        for transaction in transactions.iter_mut() {
            if transaction.is_reversed() {
                continue;
            }
            let income_kind = matches!(
                transaction.kind,
                TransactionKind::Accrual | TransactionKind::IncomePosting
            );
            if income_kind && transaction.date > anchor {
                transaction.reverse();
                reversed.push(transaction.id);
            }
        }
        reversed
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::Days;
    use rust_decimal_macros::dec;

    /// equal-principal generator with flat per-period interest, good enough
    /// to exercise the recalculation plumbing
    pub struct FlatScheduleGenerator {
        pub interest_per_period: Decimal,
    }

    impl ScheduleGenerator for FlatScheduleGenerator {
        fn generate(&self, terms: &ScheduleTerms) -> Result<Vec<Installment>> {
            if terms.number_of_installments == 0 {
                return Err(LoanError::ScheduleGeneration {
                    message: "zero installments requested".to_string(),
                });
            }
            let currency = terms.principal.currency();
            let count = Decimal::from(terms.number_of_installments);
            let per_period = Money::new(terms.principal.amount() / count, currency);
            let interest = Money::new(self.interest_per_period, currency);

            let mut installments = Vec::new();
            let mut from = terms.start_date;
            let mut allocated = Money::zero(currency);
            for number in 1..=terms.number_of_installments {
                let due = from
                    .checked_add_days(Days::new(u64::from(terms.repayment_every_days)))
                    .ok_or_else(|| LoanError::ScheduleGeneration {
                        message: "due date overflow".to_string(),
                    })?;
                // last period absorbs the rounding remainder
                let principal = if number == terms.number_of_installments {
                    terms.principal - allocated
                } else {
                    per_period
                };
                allocated += principal;
                installments.push(Installment::new(number, from, due, principal, interest));
                from = due;
            }
            Ok(installments)
        }
    }

    impl Default for FlatScheduleGenerator {
        fn default() -> Self {
            Self {
                interest_per_period: dec!(50),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FlatScheduleGenerator;
    use super::*;
    use crate::money::Currency;
    use crate::types::{ChargeCalculation, ChargeTime};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::new("USD", 2).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
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

    fn engine() -> RecalculationEngine {
        RecalculationEngine::new(true)
    }

    #[test]
    fn test_generator_covers_full_principal() {
        let generator = FlatScheduleGenerator::default();
        let installments = generator.generate(&terms(10000, 3)).unwrap();
        assert_eq!(installments.len(), 3);
        let total = installments
            .iter()
            .fold(Money::zero(usd()), |acc, ins| acc + ins.principal.charged);
        assert_eq!(total, Money::from_major(10000, usd()));
        assert_eq!(installments[0].from_date, date(2024, 1, 1));
        assert_eq!(installments[0].due_date, date(2024, 1, 31));
        assert_eq!(installments[1].from_date, date(2024, 1, 31));
    }

    #[test]
    fn test_regeneration_reason_precedence() {
        let engine = engine();
        assert_eq!(engine.regeneration_reason(&TermChanges::default()), None);
        assert_eq!(
            engine.regeneration_reason(&TermChanges {
                expected_disbursement_date: Some(date(2024, 1, 1)),
                actual_disbursement_date: Some(date(2024, 1, 5)),
                ..Default::default()
            }),
            Some(RegenerationReason::DisbursementDateChanged)
        );
        assert_eq!(
            engine.regeneration_reason(&TermChanges {
                principal_adjusted: true,
                emi_or_due_date_varied: true,
                ..Default::default()
            }),
            Some(RegenerationReason::PrincipalAdjusted)
        );
        assert_eq!(
            engine.regeneration_reason(&TermChanges {
                tranches_changed: true,
                ..Default::default()
            }),
            Some(RegenerationReason::TrancheChanged)
        );
    }

    #[test]
    fn test_recalculate_retains_settled_periods() {
        let generator = FlatScheduleGenerator::default();
        let loan_terms = terms(9000, 3);
        let mut installments = generator.generate(&loan_terms).unwrap();
        let settled_due = installments[0].due_date;
        installments[0].obligations_met = true;

        // anchor after the first due date: period 1 survives untouched
        engine()
            .recalculate_from(settled_due, &loan_terms, &generator, &mut installments)
            .unwrap();

        assert_eq!(installments.len(), 3);
        assert!(installments[0].obligations_met);
        assert_eq!(installments[0].due_date, settled_due);
        assert_eq!(installments[1].number, 2);
        assert_eq!(installments[1].from_date, settled_due);
        // the tail re-amortizes the remaining 6000 over two periods
        assert_eq!(
            installments[1].principal.charged + installments[2].principal.charged,
            Money::from_major(6000, usd())
        );
    }

    #[test]
    fn test_recalculate_rejects_over_amortized_retained_periods() {
        let generator = FlatScheduleGenerator::default();
        let mut installments = generator.generate(&terms(9000, 3)).unwrap();
        let anchor = installments[2].due_date;
        let shrunk_terms = terms(5000, 3);
        let result =
            engine().recalculate_from(anchor, &shrunk_terms, &generator, &mut installments);
        assert!(matches!(
            result,
            Err(LoanError::ScheduleGeneration { .. })
        ));
    }

    #[test]
    fn test_reevaluate_percentage_charge_after_regeneration() {
        let generator = FlatScheduleGenerator::default();
        let mut installments = generator.generate(&terms(10000, 2)).unwrap();
        let mut charges = vec![Charge::new(
            "origination",
            ChargeCalculation::PercentOfAmount,
            ChargeTime::SpecifiedDueDate,
            dec!(2),
            usd(),
            Some(date(2024, 1, 15)),
            false,
        )];
        let basis = ChargeBasis {
            principal: Money::from_major(10000, usd()),
            total_interest: Money::from_major(100, usd()),
            disbursed: Money::from_major(10000, usd()),
        };
        engine().reevaluate_charges(basis, date(2024, 1, 1), &mut installments, &mut charges);

        assert_eq!(charges[0].amount, Money::from_major(200, usd()));
        assert_eq!(installments[0].fee.charged, Money::from_major(200, usd()));
        assert_eq!(installments[1].fee.charged, Money::from_major(0, usd()));
    }

    #[test]
    fn test_accruals_after_anchor_are_reversed() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut transactions = vec![
            Transaction::accrual(Money::from_major(10, usd()), date(2024, 1, 20), created),
            Transaction::accrual(Money::from_major(10, usd()), date(2024, 2, 20), created),
            Transaction::repayment(Money::from_major(500, usd()), date(2024, 2, 25), created),
        ];

        let reversed =
            engine().reverse_income_transactions_after(date(2024, 1, 31), &mut transactions);

        assert_eq!(reversed, vec![transactions[1].id]);
        assert!(!transactions[0].is_reversed());
        assert!(transactions[1].is_reversed());
        assert!(!transactions[2].is_reversed());
    }

    #[test]
    fn test_non_working_day_rejected() {
        struct WeekdaysOnly;
        impl WorkingDayValidator for WeekdaysOnly {
            fn is_working_day(&self, date: NaiveDate) -> bool {
                use chrono::Datelike;
                !matches!(
                    date.weekday(),
                    chrono::Weekday::Sat | chrono::Weekday::Sun
                )
            }
        }
        // 2024-01-06 is a saturday
        assert!(matches!(
            WeekdaysOnly.validate(date(2024, 1, 6)),
            Err(LoanError::NonWorkingDay { .. })
        ));
        assert!(WeekdaysOnly.validate(date(2024, 1, 8)).is_ok());
    }
}
