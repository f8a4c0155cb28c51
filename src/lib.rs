pub mod charge;
pub mod errors;
pub mod events;
pub mod installment;
pub mod ledger;
pub mod lifecycle;
pub mod money;
pub mod processor;
pub mod schedule;
pub mod serialization;
pub mod summary;
pub mod transaction;
pub mod types;

// re-export key types
pub use charge::{Charge, ChargeBasis, InstallmentCharge};
pub use errors::{LoanError, Result};
pub use events::{Event, EventStore};
pub use installment::{ComponentBucket, Installment};
pub use ledger::LoanLedger;
pub use lifecycle::{LifecycleStateMachine, LoanEvent};
pub use money::{Currency, CurrencyCode, Money};
pub use processor::{
    AllocationPriority, AllocationRule, ChangedTransactionDetail, StandardProcessor,
    TransactionProcessor,
};
pub use schedule::{
    EveryDayWorking, RecalculationEngine, RegenerationReason, ScheduleGenerator, ScheduleTerms,
    TermChanges, WorkingDayValidator,
};
pub use serialization::{restore_snapshot, save_snapshot, LoanView};
pub use summary::{AccountingBridgeData, ComponentSummary, Summary};
pub use transaction::{ChargePaidBy, ScheduleMapping, Transaction};
pub use types::{
    AllocationComponent, ChargeCalculation, ChargeId, ChargeTime, LoanId, LoanStatus,
    LoanSubStatus, TransactionId, TransactionKind,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
