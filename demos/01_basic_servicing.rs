/// basic servicing - approve, disburse, collect repayments, close
use chrono::{NaiveDate, TimeZone, Utc};
use loan_ledger_rs::schedule::{EveryDayWorking, ScheduleGenerator};
use loan_ledger_rs::{
    AllocationRule, Currency, Installment, LoanLedger, LoanView, Money, Result, SafeTimeProvider,
    ScheduleTerms, TimeSource,
};
use rust_decimal_macros::dec;

/// equal-principal amortization with a flat $50 interest per period
struct EqualPrincipal;

impl ScheduleGenerator for EqualPrincipal {
    fn generate(&self, terms: &ScheduleTerms) -> Result<Vec<Installment>> {
        let currency = terms.principal.currency();
        let count = rust_decimal::Decimal::from(terms.number_of_installments);
        let per_period = Money::new(terms.principal.amount() / count, currency);
        let interest = Money::new(dec!(50), currency);

        let mut installments = Vec::new();
        let mut from = terms.start_date;
        let mut allocated = Money::zero(currency);
        for number in 1..=terms.number_of_installments {
            let due = from + chrono::Days::new(u64::from(terms.repayment_every_days));
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

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    ));
    let usd = Currency::new("USD", 2)?;
    let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();

    // a $9,000 loan over three monthly installments
    let terms = ScheduleTerms {
        principal: Money::from_major(9_000, usd),
        annual_interest_rate: dec!(12),
        number_of_installments: 3,
        repayment_every_days: 30,
        start_date: date(2024, 1, 1),
    };
    let mut loan = LoanLedger::submit(terms, false, AllocationRule::standard());

    loan.approve(None, date(2024, 1, 1), &time)?;
    loan.disburse(
        Money::from_major(9_000, usd),
        date(2024, 1, 1),
        &EqualPrincipal,
        &EveryDayWorking,
        &time,
    )?;

    // collect each installment on its due date
    for installment in 0..3 {
        let due = loan.installments[installment].due_date;
        loan.repay(Money::new(dec!(3050), usd), due, &time)?;
        println!(
            "paid installment {} on {due}, outstanding {}",
            installment + 1,
            loan.total_outstanding()
        );
    }

    println!("final status: {:?}", loan.status);
    println!("{}", LoanView::from_ledger(&loan).to_json_pretty()?);
    Ok(())
}
