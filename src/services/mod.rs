pub mod aggregator;
pub mod gateway;
pub mod integrity;
pub mod ledger;
pub mod payout;

pub use aggregator::PayoutAggregator;
pub use gateway::QueryGateway;
pub use integrity::{IntegrityAlert, IntegrityMonitor, IntegrityViolation};
pub use ledger::{LedgerService, RecordPayment, RecordRefund};
pub use payout::{AutoPayoutReport, PayoutOutcome, PayoutProcessor, PayoutRequest};
