pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod validation;

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

use crate::adapters::BoundedStore;
use crate::config::Config;
use crate::domain::{SplitCalculator, SplitError};
use crate::ports::TransactionStore;
use crate::services::{
    IntegrityMonitor, LedgerService, PayoutAggregator, PayoutProcessor, QueryGateway,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn TransactionStore>,
    pub ledger: Arc<LedgerService>,
    pub aggregator: Arc<PayoutAggregator>,
    pub payouts: Arc<PayoutProcessor>,
    pub gateway: Arc<QueryGateway>,
    pub integrity: IntegrityMonitor,
    pub started_at: Instant,
}

impl AppState {
    /// Wire every service over `store`, bounding each store call by the
    /// configured timeout.
    pub fn new(store: Arc<dyn TransactionStore>, config: Config) -> Result<Self, SplitError> {
        let calculator = SplitCalculator::new(config.fee_rate_bps)?;
        let store: Arc<dyn TransactionStore> =
            Arc::new(BoundedStore::new(store, config.store_timeout));
        let integrity = IntegrityMonitor::default();
        let aggregator = Arc::new(PayoutAggregator::new(
            store.clone(),
            integrity.clone(),
            config.cache_ttl,
        ));

        Ok(Self {
            ledger: Arc::new(LedgerService::new(
                store.clone(),
                calculator,
                aggregator.clone(),
            )),
            payouts: Arc::new(PayoutProcessor::new(store.clone(), aggregator.clone())),
            gateway: Arc::new(QueryGateway::new(store.clone())),
            aggregator,
            integrity,
            store,
            config: Arc::new(config),
            started_at: Instant::now(),
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments", post(handlers::transactions::record_payment))
        .route("/refunds", post(handlers::transactions::record_refund))
        .route("/transactions", get(handlers::transactions::list_transactions))
        .route(
            "/transactions/export",
            get(handlers::transactions::export_transactions),
        )
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route(
            "/transactions/:id/status",
            patch(handlers::transactions::update_status),
        )
        .route(
            "/teachers/:teacher_ref/balance",
            get(handlers::teachers::get_balance),
        )
        .route("/summary", get(handlers::summary::platform_summary))
        .route("/payouts", post(handlers::payouts::request_payout))
        .route("/integrity/alerts", get(handlers::integrity_alerts))
        .layer(axum::middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .with_state(state)
}
