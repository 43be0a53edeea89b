//! Derived views over the ledger: per-teacher balances and the platform
//! revenue summary.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::query::DateRange;
use super::transaction::{Transaction, TransactionStatus, TransactionType};

/// Raw per-teacher sums read from one store snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeacherTotals {
    /// Teacher share of completed payments.
    pub earned: i64,
    /// Teacher share of completed refunds.
    pub refunded: i64,
    /// Gross of completed withdrawals.
    pub paid_out: i64,
    /// Gross of pending withdrawals.
    pub in_flight_amount: i64,
    pub in_flight_count: i64,
}

impl TeacherTotals {
    /// May be negative; callers decide how to surface that.
    pub fn raw_pending(&self) -> i64 {
        self.earned
            .saturating_sub(self.refunded)
            .saturating_sub(self.paid_out)
    }

    /// Fold one of the teacher's rows in. `None` when a sum would overflow.
    pub fn checked_add_row(mut self, tx: &Transaction) -> Option<Self> {
        match (tx.kind, tx.status) {
            (TransactionType::Payment, TransactionStatus::Completed) => {
                self.earned = self.earned.checked_add(tx.teacher_amount)?;
            }
            (TransactionType::Refund, TransactionStatus::Completed) => {
                self.refunded = self.refunded.checked_add(tx.teacher_amount)?;
            }
            (TransactionType::Withdrawal, TransactionStatus::Completed) => {
                self.paid_out = self.paid_out.checked_add(tx.gross_amount)?;
            }
            (TransactionType::Withdrawal, TransactionStatus::Pending) => {
                self.in_flight_amount = self.in_flight_amount.checked_add(tx.gross_amount)?;
                self.in_flight_count += 1;
            }
            _ => {}
        }
        Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherPayoutBalance {
    pub teacher_ref: String,
    pub pending_amount: i64,
    pub lifetime_earned: i64,
    pub lifetime_refunded: i64,
    pub lifetime_paid_out: i64,
    pub in_flight_amount: i64,
    /// Set only when paid-out plus refunded exceeds earnings. `pending_amount` is
    /// reported as 0 in that case and an integrity alert has been raised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_deficit: Option<i64>,
    pub computed_at: DateTime<Utc>,
}

impl TeacherPayoutBalance {
    pub fn from_totals(
        teacher_ref: &str,
        totals: &TeacherTotals,
        computed_at: DateTime<Utc>,
    ) -> Self {
        let raw = totals.raw_pending();
        Self {
            teacher_ref: teacher_ref.to_string(),
            pending_amount: raw.max(0),
            lifetime_earned: totals.earned,
            lifetime_refunded: totals.refunded,
            lifetime_paid_out: totals.paid_out,
            in_flight_amount: totals.in_flight_amount,
            integrity_deficit: (raw < 0).then(|| raw.saturating_neg()),
            computed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    /// Start (UTC midnight) of the bucket containing `at`. Weeks start on Monday.
    /// `None` only at the edge of the representable calendar.
    pub fn bucket_start(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = at.date_naive();
        let start = match self {
            Granularity::Day => Some(date),
            Granularity::Week => date.checked_sub_days(Days::new(u64::from(
                date.weekday().num_days_from_monday(),
            ))),
            Granularity::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
            Granularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
        };
        start.map(midnight)
    }

    /// Start of the bucket following the one that starts at `start`, or `None`
    /// when it would fall past the last representable date.
    pub fn next_start(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = start.date_naive();
        let next = match self {
            Granularity::Day => date.checked_add_days(Days::new(1)),
            Granularity::Week => date.checked_add_days(Days::new(7)),
            Granularity::Month => date.checked_add_months(Months::new(1)),
            Granularity::Year => date.checked_add_months(Months::new(12)),
        };
        next.map(midnight)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub gross_amount: i64,
    pub admin_amount: i64,
    pub teacher_amount: i64,
    pub payment_count: u64,
}

impl PeriodBucket {
    pub fn empty(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            gross_amount: 0,
            admin_amount: 0,
            teacher_amount: 0,
            payment_count: 0,
        }
    }
}

/// Gross revenue growth of the latest complete bucket over the one before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Growth {
    /// Percentage with two decimals. `0.00` when both buckets are empty.
    Percent { value: BigDecimal },
    /// The previous bucket had no revenue and the current one has some.
    New,
}

impl Growth {
    pub fn between(previous: i64, current: i64) -> Self {
        if previous == 0 {
            return if current > 0 {
                Growth::New
            } else {
                Growth::Percent {
                    value: BigDecimal::from(0).with_scale(2),
                }
            };
        }

        // Hundredths of a percent, rounded half away from zero.
        let numerator = (i128::from(current) - i128::from(previous)) * 10_000;
        let denominator = i128::from(previous);
        let half = denominator.abs() / 2;
        let hundredths = if (numerator < 0) == (denominator < 0) {
            (numerator.abs() + half) / denominator.abs()
        } else {
            -((numerator.abs() + half) / denominator.abs())
        };
        let hundredths = i64::try_from(hundredths).unwrap_or(if hundredths < 0 {
            i64::MIN
        } else {
            i64::MAX
        });

        Growth::Percent {
            value: (BigDecimal::from(hundredths) / BigDecimal::from(100)).with_scale(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopTeacher {
    pub teacher_ref: String,
    pub teacher_name: Option<String>,
    pub earned_amount: i64,
    pub gross_amount: i64,
    pub payment_count: u64,
    pub distinct_students: u64,
    /// Ratings live with course content, which this service does not own.
    pub rating: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub granularity: Granularity,
    pub range: DateRange,
    pub top: usize,
    /// Point in time that decides which buckets are complete. `None` means now;
    /// only those requests are served from cache.
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for SummaryRequest {
    fn default() -> Self {
        Self {
            granularity: Granularity::Month,
            range: DateRange::default(),
            top: 5,
            as_of: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformRevenueSummary {
    pub granularity: Granularity,
    pub range: DateRange,
    pub total_gross_revenue: i64,
    pub total_admin_revenue: i64,
    pub total_teacher_payouts: i64,
    pub total_refunded: i64,
    pub payment_count: u64,
    pub period_buckets: Vec<PeriodBucket>,
    pub growth: Growth,
    pub top_teachers: Vec<TopTeacher>,
    /// Rows whose stored split does not re-derive from their gross and rate.
    pub integrity_violations: Vec<Uuid>,
    pub generated_at: DateTime<Utc>,
}
