//! Storage port for the ledger. Services depend on this trait only; adapters
//! live in `crate::adapters`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Page, PageRequest, SortSpec, TeacherTotals, Transaction, TransactionFilter, TransactionStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The teacher already has a withdrawal in `pending`.
    InFlightWithdrawal { teacher_ref: String },
    /// A withdrawal with this idempotency key already exists.
    IdempotencyKey(String),
    /// The payment already has a pending or completed refund.
    LiveRefund { original_transaction_id: Uuid },
    DuplicateId(Uuid),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction {0} not found")]
    NotFound(Uuid),

    #[error("invalid split: {0}")]
    InvalidSplit(String),

    #[error("transaction {id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("conflict: {0:?}")]
    Conflict(ConflictKind),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored row is unreadable: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-mostly transaction table.
///
/// Implementations must make `append` and `update_status` atomic per row and
/// must read `query`, `scan` and `teacher_totals` from a single snapshot.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a new row. Rejects negative amounts and splits that do not
    /// re-derive from `gross_amount` and `fee_rate_bps`.
    async fn append(&self, tx: &Transaction) -> StoreResult<Transaction>;

    /// Move a `pending` row into a terminal status.
    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<Transaction>;

    async fn get(&self, id: Uuid) -> StoreResult<Transaction>;

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Transaction>>;

    /// The pending or completed refund of `original_id`, if any.
    async fn find_live_refund(&self, original_id: Uuid) -> StoreResult<Option<Transaction>>;

    async fn query(
        &self,
        filter: &TransactionFilter,
        page: &PageRequest,
        sort: &SortSpec,
    ) -> StoreResult<Page<Transaction>>;

    /// Every matching row, oldest first.
    async fn scan(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>>;

    async fn teacher_totals(&self, teacher_ref: &str) -> StoreResult<TeacherTotals>;

    /// Teachers with at least one completed payment, ascending.
    async fn teacher_refs(&self) -> StoreResult<Vec<String>>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Checks shared by every adapter before a row is written.
pub fn check_new_transaction(tx: &Transaction) -> StoreResult<()> {
    if tx.gross_amount < 0 || tx.admin_amount < 0 || tx.teacher_amount < 0 {
        return Err(StoreError::InvalidSplit(format!(
            "transaction {} has a negative amount",
            tx.id
        )));
    }
    tx.verify_split().map_err(StoreError::InvalidSplit)?;
    if tx.teacher_ref.trim().is_empty() {
        return Err(StoreError::InvalidSplit(format!(
            "transaction {} has no teacher_ref",
            tx.id
        )));
    }
    if (tx.status == TransactionStatus::Pending) != tx.completed_at.is_none() {
        return Err(StoreError::InvalidSplit(format!(
            "transaction {} completed_at does not match status {}",
            tx.id, tx.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Parties;

    #[test]
    fn rejects_inconsistent_split() {
        let mut tx = Transaction::payment(
            10_000,
            1_000,
            Parties::teacher("t-1"),
            TransactionStatus::Completed,
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(check_new_transaction(&tx).is_ok());

        tx.admin_amount += 1;
        tx.teacher_amount -= 1;
        assert!(matches!(check_new_transaction(&tx), Err(StoreError::InvalidSplit(_))));
    }

    #[test]
    fn rejects_negative_gross() {
        let mut tx = Transaction::payment(
            0,
            1_000,
            Parties::teacher("t-1"),
            TransactionStatus::Pending,
            None,
            Utc::now(),
        )
        .unwrap();
        tx.gross_amount = -100;
        tx.teacher_amount = -100;
        assert!(matches!(check_new_transaction(&tx), Err(StoreError::InvalidSplit(_))));
    }
}
