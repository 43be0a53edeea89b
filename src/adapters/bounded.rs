//! Deadline wrapper: every store call either finishes within the configured
//! limit or fails with `StoreError::Unavailable`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Page, PageRequest, SortSpec, TeacherTotals, Transaction, TransactionFilter, TransactionStatus,
};
use crate::ports::{StoreError, StoreResult, TransactionStore};

#[derive(Clone)]
pub struct BoundedStore {
    inner: Arc<dyn TransactionStore>,
    limit: Duration,
}

impl BoundedStore {
    pub fn new(inner: Arc<dyn TransactionStore>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn run<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = StoreResult<T>> + Send,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation = op,
                    limit_ms = self.limit.as_millis() as u64,
                    "store call timed out"
                );
                Err(StoreError::Unavailable(format!(
                    "{} did not finish within {:?}",
                    op, self.limit
                )))
            }
        }
    }
}

#[async_trait]
impl TransactionStore for BoundedStore {
    async fn append(&self, tx: &Transaction) -> StoreResult<Transaction> {
        self.run("append", self.inner.append(tx)).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<Transaction> {
        self.run("update_status", self.inner.update_status(id, status, completed_at))
            .await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Transaction> {
        self.run("get", self.inner.get(id)).await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Transaction>> {
        self.run("find_by_idempotency_key", self.inner.find_by_idempotency_key(key))
            .await
    }

    async fn find_live_refund(&self, original_id: Uuid) -> StoreResult<Option<Transaction>> {
        self.run("find_live_refund", self.inner.find_live_refund(original_id))
            .await
    }

    async fn query(
        &self,
        filter: &TransactionFilter,
        page: &PageRequest,
        sort: &SortSpec,
    ) -> StoreResult<Page<Transaction>> {
        self.run("query", self.inner.query(filter, page, sort)).await
    }

    async fn scan(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>> {
        self.run("scan", self.inner.scan(filter)).await
    }

    async fn teacher_totals(&self, teacher_ref: &str) -> StoreResult<TeacherTotals> {
        self.run("teacher_totals", self.inner.teacher_totals(teacher_ref))
            .await
    }

    async fn teacher_refs(&self) -> StoreResult<Vec<String>> {
        self.run("teacher_refs", self.inner.teacher_refs()).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.run("ping", self.inner.ping()).await
    }
}
