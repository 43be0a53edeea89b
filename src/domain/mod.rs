//! Framework-agnostic ledger model.

pub mod query;
pub mod split;
pub mod summary;
pub mod transaction;

pub use query::{DateRange, Page, PageRequest, SortBy, SortDirection, SortSpec, TransactionFilter};
pub use split::{
    split, Split, SplitCalculator, SplitError, DEFAULT_FEE_RATE_BPS, MAX_AMOUNT_CENTS,
};
pub use summary::{
    Granularity, Growth, PeriodBucket, PlatformRevenueSummary, SummaryRequest, TeacherPayoutBalance,
    TeacherTotals, TopTeacher,
};
pub use transaction::{Parties, Transaction, TransactionStatus, TransactionType};
