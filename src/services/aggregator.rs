//! Per-teacher balances and the platform revenue summary, derived on read from
//! completed transactions with a bounded-staleness cache.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::domain::{
    DateRange, Granularity, Growth, PeriodBucket, PlatformRevenueSummary, SummaryRequest,
    TeacherPayoutBalance, TopTeacher, Transaction, TransactionFilter, TransactionStatus,
    TransactionType,
};
use crate::error::AppError;
use crate::ports::TransactionStore;
use crate::services::integrity::{IntegrityMonitor, IntegrityViolation};
use crate::validation::validate_timestamp;

pub const MAX_PERIOD_BUCKETS: usize = 1_000;

type SummaryKey = (Granularity, DateRange, usize);

struct Cached<T> {
    value: T,
    stored_at: Instant,
}

pub struct PayoutAggregator {
    store: Arc<dyn TransactionStore>,
    monitor: IntegrityMonitor,
    ttl: Duration,
    balances: RwLock<HashMap<String, Cached<TeacherPayoutBalance>>>,
    summaries: RwLock<HashMap<SummaryKey, Cached<PlatformRevenueSummary>>>,
    /// Bumped on every invalidation. A computation that started under an older
    /// epoch must not repopulate the cache.
    epoch: AtomicU64,
}

impl PayoutAggregator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        monitor: IntegrityMonitor,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            monitor,
            ttl,
            balances: RwLock::new(HashMap::new()),
            summaries: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Balance served from cache when younger than the configured TTL.
    pub async fn teacher_balance(
        &self,
        teacher_ref: &str,
    ) -> Result<TeacherPayoutBalance, AppError> {
        if let Some(hit) = self.cached_balance(teacher_ref).await {
            return Ok(hit);
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        let balance = self.fresh_teacher_balance(teacher_ref).await?;

        if !self.ttl.is_zero() {
            let mut balances = self.balances.write().await;
            if self.epoch.load(Ordering::Acquire) == epoch {
                balances.insert(
                    teacher_ref.to_string(),
                    Cached {
                        value: balance.clone(),
                        stored_at: Instant::now(),
                    },
                );
            }
        }

        Ok(balance)
    }

    /// Always reads the store. Used before any money moves.
    pub async fn fresh_teacher_balance(
        &self,
        teacher_ref: &str,
    ) -> Result<TeacherPayoutBalance, AppError> {
        let totals = self.store.teacher_totals(teacher_ref).await?;
        let balance = TeacherPayoutBalance::from_totals(teacher_ref, &totals, Utc::now());

        if let Some(deficit) = balance.integrity_deficit {
            self.monitor
                .raise(IntegrityViolation::NegativeBalance {
                    teacher_ref: teacher_ref.to_string(),
                    deficit,
                })
                .await;
        }

        Ok(balance)
    }

    pub async fn platform_summary(
        &self,
        request: SummaryRequest,
    ) -> Result<PlatformRevenueSummary, AppError> {
        if let Some(from) = request.range.from {
            validate_timestamp("from", from)?;
        }
        if let Some(to) = request.range.to {
            validate_timestamp("to", to)?;
        }
        if let Some(as_of) = request.as_of {
            validate_timestamp("as_of", as_of)?;
        }
        if request.range.is_empty() {
            return Err(AppError::Validation(
                "range: from must be earlier than to".to_string(),
            ));
        }

        let key = (request.granularity, request.range, request.top);
        let cacheable = request.as_of.is_none() && !self.ttl.is_zero();

        if cacheable {
            let summaries = self.summaries.read().await;
            if let Some(hit) = summaries.get(&key) {
                if hit.stored_at.elapsed() < self.ttl {
                    return Ok(hit.value.clone());
                }
            }
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        let summary = self.compute_summary(&request).await?;

        if cacheable {
            let mut summaries = self.summaries.write().await;
            if self.epoch.load(Ordering::Acquire) == epoch {
                summaries.insert(
                    key,
                    Cached {
                        value: summary.clone(),
                        stored_at: Instant::now(),
                    },
                );
            }
        }

        Ok(summary)
    }

    /// Drop the teacher's cached balance and every cached summary.
    pub async fn invalidate_teacher(&self, teacher_ref: &str) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.balances.write().await.remove(teacher_ref);
        self.summaries.write().await.clear();
        tracing::debug!(teacher_ref, "aggregates invalidated");
    }

    /// Teachers with at least one completed payment.
    pub async fn teacher_refs(&self) -> Result<Vec<String>, AppError> {
        Ok(self.store.teacher_refs().await?)
    }

    async fn cached_balance(&self, teacher_ref: &str) -> Option<TeacherPayoutBalance> {
        if self.ttl.is_zero() {
            return None;
        }
        let balances = self.balances.read().await;
        balances
            .get(teacher_ref)
            .filter(|hit| hit.stored_at.elapsed() < self.ttl)
            .map(|hit| hit.value.clone())
    }

    async fn compute_summary(
        &self,
        request: &SummaryRequest,
    ) -> Result<PlatformRevenueSummary, AppError> {
        let as_of = request.as_of.unwrap_or_else(Utc::now);

        // One scan so payments and refunds come from the same snapshot.
        let filter = TransactionFilter {
            status: Some(TransactionStatus::Completed),
            ..TransactionFilter::default()
        }
        .in_range(request.range);
        let rows = self.store.scan(&filter).await?;

        let mut integrity_violations = Vec::new();
        for row in &rows {
            if let Err(detail) = row.verify_split() {
                integrity_violations.push(row.id);
                self.monitor
                    .raise(IntegrityViolation::SplitMismatch {
                        transaction_id: row.id,
                        detail,
                    })
                    .await;
            }
        }

        let payments: Vec<&Transaction> = rows
            .iter()
            .filter(|tx| tx.kind == TransactionType::Payment)
            .collect();
        let total_refunded = checked_total(
            "total_refunded",
            rows.iter()
                .filter(|tx| tx.kind == TransactionType::Refund)
                .map(|tx| tx.gross_amount),
        )?;
        let total_gross_revenue =
            checked_total("total_gross_revenue", payments.iter().map(|tx| tx.gross_amount))?;
        let total_admin_revenue =
            checked_total("total_admin_revenue", payments.iter().map(|tx| tx.admin_amount))?;
        let total_teacher_payouts =
            checked_total("total_teacher_payouts", payments.iter().map(|tx| tx.teacher_amount))?;

        let period_buckets = bucketize(&payments, request.granularity, request.range, as_of)?;
        let growth = growth_of(&period_buckets, as_of);
        let top_teachers = rank_teachers(&payments, request.top)?;

        tracing::debug!(
            granularity = %request.granularity,
            rows = rows.len(),
            buckets = period_buckets.len(),
            violations = integrity_violations.len(),
            "platform summary computed"
        );

        Ok(PlatformRevenueSummary {
            granularity: request.granularity,
            range: request.range,
            total_gross_revenue,
            total_admin_revenue,
            total_teacher_payouts,
            total_refunded,
            payment_count: payments.len() as u64,
            period_buckets,
            growth,
            top_teachers,
            integrity_violations,
            generated_at: Utc::now(),
        })
    }
}

fn overflow(what: &str) -> AppError {
    AppError::Integrity(format!("{} overflows a 64-bit cent amount", what))
}

fn checked_total(what: &str, mut amounts: impl Iterator<Item = i64>) -> Result<i64, AppError> {
    amounts
        .try_fold(0i64, |total, amount| total.checked_add(amount))
        .ok_or_else(|| overflow(what))
}

/// Contiguous, zero-filled buckets from the range start (or first payment) to
/// the bucket holding the later of `min(as_of, range end)` and the last payment.
/// Only the most recent `MAX_PERIOD_BUCKETS` are kept. The last bucket of
/// the representable calendar ends at `DateTime::<Utc>::MAX_UTC`.
fn bucketize(
    payments: &[&Transaction],
    granularity: Granularity,
    range: DateRange,
    as_of: DateTime<Utc>,
) -> Result<Vec<PeriodBucket>, AppError> {
    let first_payment = payments.iter().map(|tx| tx.created_at).min();
    let Some(start) = range.from.or(first_payment) else {
        return Ok(Vec::new());
    };

    let mut last = match range.to {
        Some(to) => as_of.min(to - ChronoDuration::nanoseconds(1)),
        None => as_of,
    };
    if let Some(latest) = payments.iter().map(|tx| tx.created_at).max() {
        last = last.max(latest);
    }
    if last < start {
        return Ok(Vec::new());
    }

    let mut buckets = VecDeque::new();
    let mut cursor = granularity.bucket_start(start);
    while let Some(bucket_start) = cursor.filter(|at| *at <= last) {
        let next = granularity.next_start(bucket_start);
        let end = next.unwrap_or(DateTime::<Utc>::MAX_UTC);
        buckets.push_back(PeriodBucket::empty(bucket_start, end));
        if buckets.len() > MAX_PERIOD_BUCKETS {
            buckets.pop_front();
        }
        cursor = next;
    }
    let mut buckets = Vec::from(buckets);

    for tx in payments {
        let idx = buckets.partition_point(|bucket| bucket.start <= tx.created_at);
        if idx == 0 {
            continue;
        }
        let bucket = &mut buckets[idx - 1];
        if tx.created_at < bucket.end {
            bucket.gross_amount = bucket
                .gross_amount
                .checked_add(tx.gross_amount)
                .ok_or_else(|| overflow("period gross"))?;
            bucket.admin_amount = bucket
                .admin_amount
                .checked_add(tx.admin_amount)
                .ok_or_else(|| overflow("period admin share"))?;
            bucket.teacher_amount = bucket
                .teacher_amount
                .checked_add(tx.teacher_amount)
                .ok_or_else(|| overflow("period teacher share"))?;
            bucket.payment_count += 1;
        }
    }

    Ok(buckets)
}

/// Latest complete bucket against the one before it. A missing predecessor
/// counts as zero revenue.
fn growth_of(buckets: &[PeriodBucket], as_of: DateTime<Utc>) -> Growth {
    let mut complete = buckets.iter().rev().filter(|bucket| bucket.end <= as_of);
    let current = complete.next().map_or(0, |bucket| bucket.gross_amount);
    let previous = complete.next().map_or(0, |bucket| bucket.gross_amount);
    Growth::between(previous, current)
}

#[derive(Default)]
struct TeacherAccumulator<'a> {
    teacher_name: Option<&'a str>,
    earned: i64,
    gross: i64,
    payments: u64,
    students: HashSet<&'a str>,
}

fn rank_teachers(payments: &[&Transaction], top: usize) -> Result<Vec<TopTeacher>, AppError> {
    let mut by_teacher: HashMap<&str, TeacherAccumulator<'_>> = HashMap::new();
    for tx in payments {
        let acc = by_teacher.entry(tx.teacher_ref.as_str()).or_default();
        if tx.teacher_name.is_some() {
            acc.teacher_name = tx.teacher_name.as_deref();
        }
        acc.earned = acc
            .earned
            .checked_add(tx.teacher_amount)
            .ok_or_else(|| overflow("teacher earnings"))?;
        acc.gross = acc
            .gross
            .checked_add(tx.gross_amount)
            .ok_or_else(|| overflow("teacher gross"))?;
        acc.payments += 1;
        if let Some(student) = tx.student_ref.as_deref() {
            acc.students.insert(student);
        }
    }

    let mut ranked: Vec<TopTeacher> = by_teacher
        .into_iter()
        .map(|(teacher_ref, acc)| TopTeacher {
            teacher_ref: teacher_ref.to_string(),
            teacher_name: acc.teacher_name.map(str::to_string),
            earned_amount: acc.earned,
            gross_amount: acc.gross,
            payment_count: acc.payments,
            distinct_students: acc.students.len() as u64,
            rating: None,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.earned_amount
            .cmp(&a.earned_amount)
            .then_with(|| a.teacher_ref.cmp(&b.teacher_ref))
    });
    ranked.truncate(top);
    Ok(ranked)
}
