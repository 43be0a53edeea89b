//! In-process implementation of TransactionStore.
//!
//! Backs `STORE_BACKEND=memory` and the test suites. A single `RwLock` gives
//! every call a consistent snapshot and makes writes atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    Page, PageRequest, SortSpec, TeacherTotals, Transaction, TransactionFilter, TransactionStatus,
    TransactionType,
};
use crate::ports::{
    check_new_transaction, ConflictKind, StoreError, StoreResult, TransactionStore,
};

#[derive(Default)]
struct Inner {
    rows: HashMap<Uuid, Transaction>,
    by_idempotency_key: HashMap<String, Uuid>,
}

impl Inner {
    fn conflict_for(&self, tx: &Transaction) -> Option<ConflictKind> {
        if self.rows.contains_key(&tx.id) {
            return Some(ConflictKind::DuplicateId(tx.id));
        }
        if let Some(key) = &tx.idempotency_key {
            if self.by_idempotency_key.contains_key(key) {
                return Some(ConflictKind::IdempotencyKey(key.clone()));
            }
        }
        match tx.kind {
            TransactionType::Withdrawal if tx.status == TransactionStatus::Pending => self
                .rows
                .values()
                .any(|row| {
                    row.kind == TransactionType::Withdrawal
                        && row.status == TransactionStatus::Pending
                        && row.teacher_ref == tx.teacher_ref
                })
                .then(|| ConflictKind::InFlightWithdrawal {
                    teacher_ref: tx.teacher_ref.clone(),
                }),
            TransactionType::Refund => {
                let original = tx.original_transaction_id?;
                self.live_refund(original).map(|_| ConflictKind::LiveRefund {
                    original_transaction_id: original,
                })
            }
            _ => None,
        }
    }

    fn live_refund(&self, original_id: Uuid) -> Option<&Transaction> {
        self.rows.values().find(|row| {
            row.kind == TransactionType::Refund
                && row.original_transaction_id == Some(original_id)
                && matches!(
                    row.status,
                    TransactionStatus::Pending | TransactionStatus::Completed
                )
        })
    }
}

#[derive(Default)]
pub struct InMemoryTransactionStore {
    inner: RwLock<Inner>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row without the append-time checks. Lets tests model rows
    /// written by an older or misbehaving writer.
    #[doc(hidden)]
    pub async fn insert_unchecked(&self, tx: Transaction) {
        let mut inner = self.inner.write().await;
        if let Some(key) = &tx.idempotency_key {
            inner.by_idempotency_key.insert(key.clone(), tx.id);
        }
        inner.rows.insert(tx.id, tx);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn append(&self, tx: &Transaction) -> StoreResult<Transaction> {
        check_new_transaction(tx)?;

        let mut inner = self.inner.write().await;
        if let Some(original_id) = tx.original_transaction_id {
            if !inner.rows.contains_key(&original_id) {
                return Err(StoreError::NotFound(original_id));
            }
        }
        if let Some(conflict) = inner.conflict_for(tx) {
            return Err(StoreError::Conflict(conflict));
        }

        if let Some(key) = &tx.idempotency_key {
            inner.by_idempotency_key.insert(key.clone(), tx.id);
        }
        inner.rows.insert(tx.id, tx.clone());
        Ok(tx.clone())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<Transaction> {
        let mut inner = self.inner.write().await;
        let row = inner.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if !row.status.can_transition_to(status) {
            return Err(StoreError::InvalidStateTransition {
                id,
                from: row.status,
                to: status,
            });
        }

        row.status = status;
        row.completed_at = Some(completed_at);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Transaction> {
        self.inner
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Transaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_idempotency_key
            .get(key)
            .and_then(|id| inner.rows.get(id))
            .cloned())
    }

    async fn find_live_refund(&self, original_id: Uuid) -> StoreResult<Option<Transaction>> {
        Ok(self.inner.read().await.live_refund(original_id).cloned())
    }

    async fn query(
        &self,
        filter: &TransactionFilter,
        page: &PageRequest,
        sort: &SortSpec,
    ) -> StoreResult<Page<Transaction>> {
        let inner = self.inner.read().await;
        let needle = filter.search_needle();
        let mut matching: Vec<&Transaction> = inner
            .rows
            .values()
            .filter(|tx| filter.matches(tx, needle.as_deref()))
            .collect();
        matching.sort_by(|a, b| sort.compare(a, b));

        let total = matching.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(page.limit as usize)
            .cloned()
            .collect();

        Ok(Page::new(items, total, *page))
    }

    async fn scan(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>> {
        let needle = filter.search_needle();
        let inner = self.inner.read().await;
        let mut rows: Vec<Transaction> = inner
            .rows
            .values()
            .filter(|tx| filter.matches(tx, needle.as_deref()))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn teacher_totals(&self, teacher_ref: &str) -> StoreResult<TeacherTotals> {
        let inner = self.inner.read().await;
        let totals = inner
            .rows
            .values()
            .filter(|tx| tx.teacher_ref == teacher_ref)
            .try_fold(TeacherTotals::default(), |acc, tx| acc.checked_add_row(tx));
        totals.ok_or_else(|| {
            StoreError::Corrupt(format!("totals for teacher {} overflow", teacher_ref))
        })
    }

    async fn teacher_refs(&self) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        let refs: BTreeSet<&String> = inner
            .rows
            .values()
            .filter(|tx| tx.is_completed(TransactionType::Payment))
            .map(|tx| &tx.teacher_ref)
            .collect();
        Ok(refs.into_iter().cloned().collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
