//! Payout requests: validated against a fresh balance, idempotent per
//! caller-supplied key, at most one in flight per teacher.
//!
//! Stages: `requested -> validated -> pending`. The payout-execution
//! collaborator later moves the withdrawal to `completed` or `failed` through
//! `LedgerService::update_status`.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::{Transaction, TransactionType, MAX_AMOUNT_CENTS};
use crate::error::AppError;
use crate::ports::{ConflictKind, StoreError, TransactionStore};
use crate::services::aggregator::PayoutAggregator;
use crate::validation::{
    clean_optional, validate_idempotency_key, validate_ref, DESCRIPTION_MAX_LEN,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub teacher_ref: String,
    pub amount_cents: i64,
    pub description: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Created(Transaction),
    /// The key was already used for this exact payout; nothing new was written.
    Replayed(Transaction),
}

impl PayoutOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            PayoutOutcome::Created(tx) | PayoutOutcome::Replayed(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            PayoutOutcome::Created(tx) | PayoutOutcome::Replayed(tx) => tx,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, PayoutOutcome::Replayed(_))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoPayoutReport {
    pub created: Vec<Transaction>,
    pub replayed: usize,
    pub skipped: Vec<SkippedTeacher>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedTeacher {
    pub teacher_ref: String,
    pub reason: String,
}

type HeldTeachers = Arc<Mutex<HashSet<String>>>;

/// Marks a teacher as having a payout in progress in this process. Released
/// on drop, so an abandoned request never leaves it held.
struct TeacherGuard {
    held: HeldTeachers,
    teacher_ref: String,
}

impl TeacherGuard {
    fn acquire(held: &HeldTeachers, teacher_ref: &str) -> Option<Self> {
        let mut set = held.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(teacher_ref.to_string()) {
            return None;
        }
        Some(Self {
            held: held.clone(),
            teacher_ref: teacher_ref.to_string(),
        })
    }
}

impl Drop for TeacherGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.teacher_ref);
    }
}

pub struct PayoutProcessor {
    store: Arc<dyn TransactionStore>,
    aggregator: Arc<PayoutAggregator>,
    held: HeldTeachers,
}

impl PayoutProcessor {
    pub fn new(store: Arc<dyn TransactionStore>, aggregator: Arc<PayoutAggregator>) -> Self {
        Self {
            store,
            aggregator,
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn request_payout(&self, request: PayoutRequest) -> Result<PayoutOutcome, AppError> {
        validate_ref("teacher_ref", &request.teacher_ref)?;
        validate_idempotency_key(&request.idempotency_key)?;
        if request.amount_cents <= 0 {
            return Err(AppError::InvalidAmount(format!(
                "amount_cents must be greater than zero, got {}",
                request.amount_cents
            )));
        }
        if request.amount_cents > MAX_AMOUNT_CENTS {
            return Err(AppError::InvalidAmount(format!(
                "amount_cents must not exceed {}, got {}",
                MAX_AMOUNT_CENTS, request.amount_cents
            )));
        }
        let description =
            clean_optional("description", request.description.as_deref(), DESCRIPTION_MAX_LEN)?;

        tracing::info!(
            stage = "requested",
            teacher_ref = %request.teacher_ref,
            amount_cents = request.amount_cents,
            idempotency_key = %request.idempotency_key,
            "payout requested"
        );

        if let Some(outcome) = self.replay(&request).await? {
            return Ok(outcome);
        }

        let guard = TeacherGuard::acquire(&self.held, &request.teacher_ref).ok_or_else(|| {
            tracing::warn!(teacher_ref = %request.teacher_ref, "payout already being processed");
            AppError::ConcurrentPayout(request.teacher_ref.clone())
        })?;

        // The first holder may have finished with this key while we waited.
        if let Some(outcome) = self.replay(&request).await? {
            return Ok(outcome);
        }

        let balance = self
            .aggregator
            .fresh_teacher_balance(&request.teacher_ref)
            .await?;
        if balance.in_flight_amount > 0 {
            tracing::warn!(
                teacher_ref = %request.teacher_ref,
                in_flight_amount = balance.in_flight_amount,
                "withdrawal already pending"
            );
            return Err(AppError::ConcurrentPayout(request.teacher_ref));
        }
        if request.amount_cents > balance.pending_amount {
            tracing::info!(
                teacher_ref = %request.teacher_ref,
                amount_cents = request.amount_cents,
                pending_amount = balance.pending_amount,
                "payout exceeds pending balance"
            );
            return Err(AppError::InsufficientBalance {
                requested: request.amount_cents,
                available: balance.pending_amount,
            });
        }

        tracing::info!(
            stage = "validated",
            teacher_ref = %request.teacher_ref,
            amount_cents = request.amount_cents,
            pending_amount = balance.pending_amount,
            "payout validated"
        );

        let withdrawal = Transaction::withdrawal(
            request.teacher_ref.clone(),
            request.amount_cents,
            request.idempotency_key.clone(),
            description,
            Utc::now(),
        )?;

        let saved = match self.store.append(&withdrawal).await {
            Ok(saved) => saved,
            Err(StoreError::Conflict(ConflictKind::InFlightWithdrawal { teacher_ref })) => {
                // Another process won the race.
                return Err(AppError::ConcurrentPayout(teacher_ref));
            }
            Err(StoreError::Conflict(ConflictKind::IdempotencyKey(key))) => {
                return match self.replay(&request).await? {
                    Some(outcome) => Ok(outcome),
                    None => Err(AppError::IdempotencyConflict(key)),
                };
            }
            Err(e) => return Err(e.into()),
        };

        drop(guard);
        self.aggregator.invalidate_teacher(&saved.teacher_ref).await;

        tracing::info!(
            stage = "pending",
            transaction_id = %saved.id,
            teacher_ref = %saved.teacher_ref,
            amount_cents = saved.gross_amount,
            "payout withdrawal created"
        );

        Ok(PayoutOutcome::Created(saved))
    }

    /// Request a payout of the full pending balance for every teacher holding at
    /// least `min_cents`. Keys are derived from the teacher and `day`, so
    /// running the sweep twice on one day creates nothing new.
    pub async fn run_auto_payouts(
        &self,
        min_cents: i64,
        day: NaiveDate,
    ) -> Result<AutoPayoutReport, AppError> {
        if min_cents <= 0 {
            return Err(AppError::InvalidAmount(format!(
                "min_cents must be greater than zero, got {}",
                min_cents
            )));
        }

        let mut report = AutoPayoutReport::default();
        for teacher_ref in self.aggregator.teacher_refs().await? {
            let balance = match self.aggregator.fresh_teacher_balance(&teacher_ref).await {
                Ok(balance) => balance,
                Err(e) => {
                    tracing::error!(
                        teacher_ref = %teacher_ref,
                        error = %e,
                        "auto payout balance read failed"
                    );
                    report.skipped.push(SkippedTeacher {
                        teacher_ref,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let key = auto_payout_key(&teacher_ref, day);
            if balance.pending_amount < min_cents {
                // A payout already made today leaves less than the minimum; let it replay.
                if self.store.find_by_idempotency_key(&key).await?.is_some() {
                    report.replayed += 1;
                } else {
                    tracing::debug!(
                        teacher_ref = %teacher_ref,
                        pending_amount = balance.pending_amount,
                        "below auto payout minimum"
                    );
                }
                continue;
            }

            let request = PayoutRequest {
                teacher_ref: teacher_ref.clone(),
                amount_cents: balance.pending_amount,
                description: Some("automatic payout".to_string()),
                idempotency_key: key,
            };
            match self.request_payout(request).await {
                Ok(PayoutOutcome::Created(tx)) => report.created.push(tx),
                Ok(PayoutOutcome::Replayed(_)) => report.replayed += 1,
                Err(e) => {
                    tracing::warn!(teacher_ref = %teacher_ref, error = %e, "auto payout skipped");
                    report.skipped.push(SkippedTeacher {
                        teacher_ref,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            created = report.created.len(),
            replayed = report.replayed,
            skipped = report.skipped.len(),
            "auto payout sweep finished"
        );
        Ok(report)
    }

    /// `Some` when the key already produced a withdrawal. Errors when that
    /// withdrawal was for a different teacher or amount.
    async fn replay(&self, request: &PayoutRequest) -> Result<Option<PayoutOutcome>, AppError> {
        let Some(existing) = self
            .store
            .find_by_idempotency_key(&request.idempotency_key)
            .await?
        else {
            return Ok(None);
        };

        if existing.kind != TransactionType::Withdrawal
            || existing.teacher_ref != request.teacher_ref
            || existing.gross_amount != request.amount_cents
        {
            tracing::warn!(
                idempotency_key = %request.idempotency_key,
                existing_id = %existing.id,
                "idempotency key reused for a different payout"
            );
            return Err(AppError::IdempotencyConflict(
                request.idempotency_key.clone(),
            ));
        }

        tracing::info!(
            transaction_id = %existing.id,
            idempotency_key = %request.idempotency_key,
            "payout replayed"
        );
        Ok(Some(PayoutOutcome::Replayed(existing)))
    }
}

pub fn auto_payout_key(teacher_ref: &str, day: NaiveDate) -> String {
    format!("auto:{}:{}", teacher_ref, day.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTransactionStore;
    use crate::domain::{Parties, TransactionStatus};
    use crate::services::integrity::IntegrityMonitor;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryTransactionStore>,
        processor: PayoutProcessor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTransactionStore::new());
        let aggregator = Arc::new(PayoutAggregator::new(
            store.clone(),
            IntegrityMonitor::default(),
            Duration::from_secs(30),
        ));
        let processor = PayoutProcessor::new(store.clone(), aggregator);
        Fixture { store, processor }
    }

    async fn earn(store: &InMemoryTransactionStore, teacher: &str, gross: i64) {
        let tx = Transaction::payment(
            gross,
            1_000,
            Parties::teacher(teacher),
            TransactionStatus::Completed,
            None,
            Utc::now(),
        )
        .unwrap();
        store.append(&tx).await.unwrap();
    }

    fn request(teacher: &str, amount: i64, key: &str) -> PayoutRequest {
        PayoutRequest {
            teacher_ref: teacher.to_string(),
            amount_cents: amount,
            description: Some("manual payout".to_string()),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn creates_pending_withdrawal() {
        let f = fixture();
        earn(&f.store, "t-1", 10_000).await;

        let outcome = f.processor.request_payout(request("t-1", 9_000, "k-1")).await.unwrap();
        let tx = outcome.transaction();
        assert!(!outcome.is_replay());
        assert_eq!(tx.kind, TransactionType::Withdrawal);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!((tx.admin_amount, tx.teacher_amount), (0, 9_000));
        assert_eq!(tx.idempotency_key.as_deref(), Some("k-1"));
    }

    #[tokio::test]
    async fn rejects_more_than_pending_balance() {
        let f = fixture();
        earn(&f.store, "t-1", 10_000).await;

        let err = f
            .processor
            .request_payout(request("t-1", 9_001, "k-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientBalance {
                requested: 9_001,
                available: 9_000
            }
        ));
        // Nothing remembered: the key can be reused with a valid amount.
        assert!(f.processor.request_payout(request("t-1", 9_000, "k-1")).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_non_positive_amount() {
        let f = fixture();
        let err = f.processor.request_payout(request("t-1", 0, "k-1")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn rejects_amount_over_the_limit() {
        let f = fixture();
        // Pending balance covers the request; only the limit rejects it.
        earn(&f.store, "t-1", MAX_AMOUNT_CENTS).await;
        earn(&f.store, "t-1", MAX_AMOUNT_CENTS).await;
        let err = f
            .processor
            .request_payout(request("t-1", MAX_AMOUNT_CENTS + 1, "k-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidAmount(_)));
        assert_eq!(f.store.len().await, 2);
    }

    #[tokio::test]
    async fn replays_same_key() {
        let f = fixture();
        earn(&f.store, "t-1", 10_000).await;

        let first = f.processor.request_payout(request("t-1", 5_000, "k-1")).await.unwrap();
        let second = f.processor.request_payout(request("t-1", 5_000, "k-1")).await.unwrap();
        assert!(second.is_replay());
        assert_eq!(first.transaction().id, second.transaction().id);
        assert_eq!(f.store.len().await, 2);
    }

    #[tokio::test]
    async fn same_key_different_amount_conflicts() {
        let f = fixture();
        earn(&f.store, "t-1", 10_000).await;

        f.processor.request_payout(request("t-1", 5_000, "k-1")).await.unwrap();
        let err = f
            .processor
            .request_payout(request("t-1", 4_000, "k-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict(_)));
    }

    #[tokio::test]
    async fn second_payout_waits_for_first_to_resolve() {
        let f = fixture();
        earn(&f.store, "t-1", 10_000).await;

        let first = f.processor.request_payout(request("t-1", 1_000, "k-1")).await.unwrap();
        let err = f
            .processor
            .request_payout(request("t-1", 1_000, "k-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConcurrentPayout(_)));

        f.store
            .update_status(first.transaction().id, TransactionStatus::Completed, Utc::now())
            .await
            .unwrap();
        assert!(f.processor.request_payout(request("t-1", 1_000, "k-2")).await.is_ok());
    }

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let held: HeldTeachers = Arc::default();
        let guard = TeacherGuard::acquire(&held, "t-1").unwrap();
        assert!(TeacherGuard::acquire(&held, "t-1").is_none());
        assert!(TeacherGuard::acquire(&held, "t-2").is_some());
        drop(guard);
        assert!(TeacherGuard::acquire(&held, "t-1").is_some());
    }

    #[tokio::test]
    async fn auto_sweep_pays_full_balance_once_per_day() {
        let f = fixture();
        earn(&f.store, "t-1", 10_000).await;
        earn(&f.store, "t-2", 500).await;
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        let report = f.processor.run_auto_payouts(1_000, day).await.unwrap();
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].teacher_ref, "t-1");
        assert_eq!(report.created[0].gross_amount, 9_000);
        assert_eq!(
            report.created[0].idempotency_key.as_deref(),
            Some("auto:t-1:2026-10-18")
        );

        let again = f.processor.run_auto_payouts(1_000, day).await.unwrap();
        assert!(again.created.is_empty());
        assert_eq!(again.replayed, 1);
    }
}
