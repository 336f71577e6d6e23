//! Usage metering — plan quotas, trial state, and the ledger the pipeline
//! consults before every invocation.

pub mod ledger;
pub mod plan;

pub use ledger::{EmailUsageCheck, UsageCheck, UsageLedger};
pub use plan::{Plan, TrialStatus, UsageRecord, UNLIMITED};
