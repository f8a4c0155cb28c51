/// backdated repayment - a late-keyed payment triggers a full replay and
/// reverses transactions whose component split changed
use chrono::{NaiveDate, TimeZone, Utc};
use loan_ledger_rs::schedule::{EveryDayWorking, ScheduleGenerator};
use loan_ledger_rs::{
    AllocationRule, Currency, Event, Installment, LoanLedger, Money, Result, SafeTimeProvider,
    ScheduleTerms, TimeSource,
};
use rust_decimal_macros::dec;

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

    let terms = ScheduleTerms {
        principal: Money::from_major(3_000, usd),
        annual_interest_rate: dec!(12),
        number_of_installments: 1,
        repayment_every_days: 30,
        start_date: date(2024, 1, 1),
    };
    let mut loan = LoanLedger::submit(terms, false, AllocationRule::standard());
    loan.approve(None, date(2024, 1, 1), &time)?;
    loan.disburse(
        Money::from_major(3_000, usd),
        date(2024, 1, 1),
        &EqualPrincipal,
        &EveryDayWorking,
        &time,
    )?;
    loan.take_events();

    // a large payment lands and is keyed against the schedule
    loan.repay(Money::new(dec!(3000), usd), date(2024, 3, 1), &time)?;
    println!("after march payment: outstanding {}", loan.total_outstanding());

    // a january branch payment surfaces late; the replay lets it absorb the
    // schedule first, so the payoff's split changes and it is reversed and
    // replaced with a mostly-overpayment transaction
    loan.repay(Money::new(dec!(1000), usd), date(2024, 1, 31), &time)?;
    println!("after backdated payment: overpaid {}", loan.overpaid_balance);
    println!("status: {:?}", loan.status);

    for event in loan.take_events() {
        if let Event::TransactionReversed {
            transaction_id,
            replaced_by,
            ..
        } = event
        {
            println!("reversed {transaction_id}, replaced by {replaced_by:?}");
        }
    }

    for transaction in &loan.transactions {
        println!(
            "{:?} {} on {} reversed={}",
            transaction.kind, transaction.amount, transaction.date, transaction.reversed
        );
    }
    Ok(())
}
