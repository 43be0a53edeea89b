//! Transaction domain entity.
//! Framework-agnostic representation of a monetary event and its revenue split.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::split::{self, Split, SplitError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Withdrawal,
    Refund,
}

impl TransactionType {
    pub const ALL: [TransactionType; 3] = [
        TransactionType::Payment,
        TransactionType::Withdrawal,
        TransactionType::Refund,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Refund => "refund",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 4] = [
        TransactionStatus::Pending,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
        TransactionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Only `pending` rows move, and only into a terminal status.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(self, TransactionStatus::Pending) && next.is_terminal()
    }
}

macro_rules! text_enum {
    ($ty:ty, $label:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|candidate| candidate.as_str() == s)
                    .ok_or_else(|| format!("unknown {} '{}'", $label, s))
            }
        }
    };
}

text_enum!(TransactionType, "transaction type");
text_enum!(TransactionStatus, "transaction status");

/// References to records owned by other services, plus the display names the
/// dashboards search on. None of these are validated here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parties {
    pub teacher_ref: String,
    pub course_ref: Option<String>,
    pub student_ref: Option<String>,
    pub teacher_name: Option<String>,
    pub course_title: Option<String>,
    pub student_name: Option<String>,
}

impl Parties {
    pub fn teacher(teacher_ref: impl Into<String>) -> Self {
        Self {
            teacher_ref: teacher_ref.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub gross_amount: i64,
    pub admin_amount: i64,
    pub teacher_amount: i64,
    pub fee_rate_bps: i32,
    pub teacher_ref: String,
    pub course_ref: Option<String>,
    pub student_ref: Option<String>,
    pub teacher_name: Option<String>,
    pub course_title: Option<String>,
    pub student_name: Option<String>,
    pub original_transaction_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    fn with_split(
        kind: TransactionType,
        status: TransactionStatus,
        gross_amount: i64,
        fee_rate_bps: i32,
        split: Split,
        parties: Parties,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status,
            gross_amount,
            admin_amount: split.admin_amount,
            teacher_amount: split.teacher_amount,
            fee_rate_bps,
            teacher_ref: parties.teacher_ref,
            course_ref: parties.course_ref,
            student_ref: parties.student_ref,
            teacher_name: parties.teacher_name,
            course_title: parties.course_title,
            student_name: parties.student_name,
            original_transaction_id: None,
            idempotency_key: None,
            description,
            created_at,
            updated_at: created_at,
            completed_at: status.is_terminal().then_some(created_at),
        }
    }

    /// A student's charge, split at `fee_rate_bps`. The payment collaborator may
    /// report it already settled (`completed`) or still `pending`.
    pub fn payment(
        gross_amount: i64,
        fee_rate_bps: i32,
        parties: Parties,
        status: TransactionStatus,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SplitError> {
        let split = split::split(gross_amount, fee_rate_bps)?;
        Ok(Self::with_split(
            TransactionType::Payment,
            status,
            gross_amount,
            fee_rate_bps,
            split,
            parties,
            description,
            created_at,
        ))
    }

    /// A full refund of `original`, split with the original's rate so the
    /// refunded shares mirror the charged shares.
    pub fn refund(
        original: &Transaction,
        status: TransactionStatus,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SplitError> {
        let split = split::split(original.gross_amount, original.fee_rate_bps)?;
        let mut tx = Self::with_split(
            TransactionType::Refund,
            status,
            original.gross_amount,
            original.fee_rate_bps,
            split,
            original.parties(),
            description,
            created_at,
        );
        tx.original_transaction_id = Some(original.id);
        Ok(tx)
    }

    /// A teacher payout. No platform fee applies, so the whole amount is the
    /// teacher's share. Always starts `pending`.
    pub fn withdrawal(
        teacher_ref: impl Into<String>,
        amount: i64,
        idempotency_key: impl Into<String>,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SplitError> {
        let split = split::split(amount, 0)?;
        let mut tx = Self::with_split(
            TransactionType::Withdrawal,
            TransactionStatus::Pending,
            amount,
            0,
            split,
            Parties::teacher(teacher_ref),
            description,
            created_at,
        );
        tx.idempotency_key = Some(idempotency_key.into());
        Ok(tx)
    }

    pub fn parties(&self) -> Parties {
        Parties {
            teacher_ref: self.teacher_ref.clone(),
            course_ref: self.course_ref.clone(),
            student_ref: self.student_ref.clone(),
            teacher_name: self.teacher_name.clone(),
            course_title: self.course_title.clone(),
            student_name: self.student_name.clone(),
        }
    }

    pub fn split(&self) -> Split {
        Split {
            admin_amount: self.admin_amount,
            teacher_amount: self.teacher_amount,
        }
    }

    /// Re-derive the split from `gross_amount` and `fee_rate_bps` and compare it
    /// with what is stored.
    pub fn verify_split(&self) -> Result<(), String> {
        let expected = split::split(self.gross_amount, self.fee_rate_bps)
            .map_err(|e| format!("transaction {}: {}", self.id, e))?;
        if expected != self.split() {
            return Err(format!(
                "transaction {}: stored split {}/{} does not match {}/{} for {} cents at {} bps",
                self.id,
                self.admin_amount,
                self.teacher_amount,
                expected.admin_amount,
                expected.teacher_amount,
                self.gross_amount,
                self.fee_rate_bps
            ));
        }
        Ok(())
    }

    pub fn is_completed(&self, kind: TransactionType) -> bool {
        self.kind == kind && self.status == TransactionStatus::Completed
    }

    /// Lowercased substring match over the denormalized display names.
    pub fn matches_search(&self, needle_lowercase: &str) -> bool {
        [&self.course_title, &self.teacher_name, &self.student_name]
            .into_iter()
            .flatten()
            .any(|name| name.to_lowercase().contains(needle_lowercase))
    }
}
