//! Postgres implementation of TransactionStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::domain::{
    Page, PageRequest, SortSpec, TeacherTotals, Transaction, TransactionFilter, TransactionStatus,
};
use crate::ports::{check_new_transaction, ConflictKind, StoreError, StoreResult, TransactionStore};

const COLUMNS: &str = "id, kind, status, gross_amount, admin_amount, teacher_amount, fee_rate_bps, \
     teacher_ref, course_ref, student_ref, teacher_name, course_title, student_name, \
     original_transaction_id, idempotency_key, description, created_at, updated_at, completed_at";

/// Postgres-backed ledger store over the `ledger_transactions` table.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn append(&self, tx: &Transaction) -> StoreResult<Transaction> {
        check_new_transaction(tx)?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO ledger_transactions ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(tx.id)
        .bind(tx.kind.as_str())
        .bind(tx.status.as_str())
        .bind(tx.gross_amount)
        .bind(tx.admin_amount)
        .bind(tx.teacher_amount)
        .bind(tx.fee_rate_bps)
        .bind(&tx.teacher_ref)
        .bind(&tx.course_ref)
        .bind(&tx.student_ref)
        .bind(&tx.teacher_name)
        .bind(&tx.course_title)
        .bind(&tx.student_name)
        .bind(tx.original_transaction_id)
        .bind(&tx.idempotency_key)
        .bind(&tx.description)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.completed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, tx))?;

        row.into_domain()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<Transaction> {
        if !TransactionStatus::Pending.can_transition_to(status) {
            let current = self.get(id).await?;
            return Err(StoreError::InvalidStateTransition {
                id,
                from: current.status,
                to: status,
            });
        }

        // The status guard in the WHERE clause makes the transition a single
        // compare-and-set; a concurrent caller sees zero rows updated.
        let updated = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            UPDATE ledger_transactions
            SET status = $2, completed_at = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(completed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        match updated {
            Some(row) => row.into_domain(),
            None => {
                let current = self.get(id).await?;
                Err(StoreError::InvalidStateTransition {
                    id,
                    from: current.status,
                    to: status,
                })
            }
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {COLUMNS} FROM ledger_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.ok_or(StoreError::NotFound(id))?.into_domain()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Transaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {COLUMNS} FROM ledger_transactions WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?
        .map(TransactionRow::into_domain)
        .transpose()
    }

    async fn find_live_refund(&self, original_id: Uuid) -> StoreResult<Option<Transaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM ledger_transactions
            WHERE kind = 'refund'
              AND original_transaction_id = $1
              AND status IN ('pending', 'completed')
            "#
        ))
        .bind(original_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?
        .map(TransactionRow::into_domain)
        .transpose()
    }

    async fn query(
        &self,
        filter: &TransactionFilter,
        page: &PageRequest,
        sort: &SortSpec,
    ) -> StoreResult<Page<Transaction>> {
        // Count and page must agree, so both run in one read-only snapshot.
        let mut snapshot = self.pool.begin().await.map_err(StoreError::from)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *snapshot)
            .await
            .map_err(StoreError::from)?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ledger_transactions");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&mut *snapshot)
            .await
            .map_err(StoreError::from)?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM ledger_transactions"));
        push_filter(&mut select, filter);
        push_order(&mut select, sort);
        select
            .push(" LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(i64::try_from(page.offset()).unwrap_or(i64::MAX));
        let rows = select
            .build_query_as::<TransactionRow>()
            .fetch_all(&mut *snapshot)
            .await
            .map_err(StoreError::from)?;

        snapshot.commit().await.map_err(StoreError::from)?;

        let items = rows
            .into_iter()
            .map(TransactionRow::into_domain)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page::new(items, u64::try_from(total).unwrap_or_default(), *page))
    }

    async fn scan(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>> {
        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM ledger_transactions"));
        push_filter(&mut select, filter);
        select.push(" ORDER BY created_at ASC, id ASC");

        select
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?
            .into_iter()
            .map(TransactionRow::into_domain)
            .collect()
    }

    async fn teacher_totals(&self, teacher_ref: &str) -> StoreResult<TeacherTotals> {
        let (earned, refunded, paid_out, in_flight_amount, in_flight_count) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
                r#"
                SELECT
                    COALESCE(SUM(teacher_amount)
                        FILTER (WHERE kind = 'payment' AND status = 'completed'), 0)::BIGINT,
                    COALESCE(SUM(teacher_amount)
                        FILTER (WHERE kind = 'refund' AND status = 'completed'), 0)::BIGINT,
                    COALESCE(SUM(gross_amount)
                        FILTER (WHERE kind = 'withdrawal' AND status = 'completed'), 0)::BIGINT,
                    COALESCE(SUM(gross_amount)
                        FILTER (WHERE kind = 'withdrawal' AND status = 'pending'), 0)::BIGINT,
                    COUNT(*) FILTER (WHERE kind = 'withdrawal' AND status = 'pending')
                FROM ledger_transactions
                WHERE teacher_ref = $1
                "#,
            )
            .bind(teacher_ref)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;

        Ok(TeacherTotals {
            earned,
            refunded,
            paid_out,
            in_flight_amount,
            in_flight_count,
        })
    }

    async fn teacher_refs(&self) -> StoreResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT teacher_ref FROM ledger_transactions
            WHERE kind = 'payment' AND status = 'completed'
            ORDER BY teacher_ref
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &TransactionFilter) {
    builder.push(" WHERE TRUE");

    if let Some(kind) = filter.kind {
        builder.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(teacher_ref) = &filter.teacher_ref {
        builder.push(" AND teacher_ref = ").push_bind(teacher_ref.clone());
    }
    if let Some(student_ref) = &filter.student_ref {
        builder.push(" AND student_ref = ").push_bind(student_ref.clone());
    }
    if let Some(course_ref) = &filter.course_ref {
        builder.push(" AND course_ref = ").push_bind(course_ref.clone());
    }
    if let Some(from) = filter.range.from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.range.to {
        builder.push(" AND created_at < ").push_bind(to);
    }
    if let Some(needle) = filter.search_needle() {
        let pattern = format!("%{}%", escape_like(&needle));
        builder
            .push(" AND (course_title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR teacher_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR student_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_order(builder: &mut QueryBuilder<'_, Postgres>, sort: &SortSpec) {
    let direction = sort.direction.keyword();
    builder.push(format!(
        " ORDER BY {} {direction}, id {direction}",
        sort.by.column()
    ));
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn map_write_error(error: sqlx::Error, tx: &Transaction) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        let constraint = db.constraint().unwrap_or_default();
        match db.code().as_deref() {
            Some("23505") => {
                let kind = match constraint {
                    "uq_ledger_in_flight_withdrawal" => ConflictKind::InFlightWithdrawal {
                        teacher_ref: tx.teacher_ref.clone(),
                    },
                    "uq_ledger_idempotency_key" => {
                        ConflictKind::IdempotencyKey(tx.idempotency_key.clone().unwrap_or_default())
                    }
                    "uq_ledger_live_refund" => ConflictKind::LiveRefund {
                        original_transaction_id: tx.original_transaction_id.unwrap_or_default(),
                    },
                    _ => ConflictKind::DuplicateId(tx.id),
                };
                return StoreError::Conflict(kind);
            }
            Some("23514") => return StoreError::InvalidSplit(db.message().to_string()),
            Some("23503") => {
                return StoreError::NotFound(tx.original_transaction_id.unwrap_or_default())
            }
            _ => {}
        }
    }
    StoreError::from(error)
}

const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => {
                StoreError::Unavailable("row unexpectedly missing".to_string())
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_) => StoreError::Corrupt(error.to_string()),
            // An aggregate no longer fits in BIGINT; retrying cannot help.
            sqlx::Error::Database(ref db)
                if db.code().as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE) =>
            {
                StoreError::Corrupt(db.message().to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    kind: String,
    status: String,
    gross_amount: i64,
    admin_amount: i64,
    teacher_amount: i64,
    fee_rate_bps: i32,
    teacher_ref: String,
    course_ref: Option<String>,
    student_ref: Option<String>,
    teacher_name: Option<String>,
    course_title: Option<String>,
    student_name: Option<String>,
    original_transaction_id: Option<Uuid>,
    idempotency_key: Option<String>,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            kind: self.kind.parse().map_err(StoreError::Corrupt)?,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            gross_amount: self.gross_amount,
            admin_amount: self.admin_amount,
            teacher_amount: self.teacher_amount,
            fee_rate_bps: self.fee_rate_bps,
            teacher_ref: self.teacher_ref,
            course_ref: self.course_ref,
            student_ref: self.student_ref,
            teacher_name: self.teacher_name,
            course_title: self.course_title,
            student_name: self.student_name,
            original_transaction_id: self.original_transaction_id,
            idempotency_key: self.idempotency_key,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}
