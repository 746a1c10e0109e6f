pub mod account;
pub mod classification;
pub mod money;
pub mod period;
pub mod reconcile;
pub mod record;
pub mod transaction;

pub use account::{account_for_currency, GlobPattern, PatternError};
pub use classification::{sort_for_display, Classification, ClassifiedRecord, Severity, Source};
pub use money::Money;
pub use period::DateRange;
pub use reconcile::{
    shift_offsets, EmptyBatchError, PendingBatch, ReconcileError, Reconciler, Reconciliation,
    ReconciliationWindow, StatementIndex, Summary, DEFAULT_EPSILON,
};
pub use record::{MatchKey, TransactionRecord};
pub use transaction::{
    plan_imports, Split, TransactionError, UnvalidatedTransaction, ValidatedTransaction,
};
