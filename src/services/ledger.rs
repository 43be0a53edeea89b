//! Write path for collaborator-reported events: payments, refunds and status
//! transitions. Keeps the aggregate cache in step with every write.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Parties, SplitCalculator, Transaction, TransactionStatus, TransactionType};
use crate::error::AppError;
use crate::ports::TransactionStore;
use crate::services::aggregator::PayoutAggregator;
use crate::validation::{
    clean_optional, validate_ref, DESCRIPTION_MAX_LEN, DISPLAY_NAME_MAX_LEN,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordPayment {
    pub gross_amount: i64,
    #[serde(default = "default_payment_status")]
    pub status: TransactionStatus,
    pub teacher_ref: String,
    pub course_ref: Option<String>,
    pub student_ref: Option<String>,
    pub teacher_name: Option<String>,
    pub course_title: Option<String>,
    pub student_name: Option<String>,
    pub description: Option<String>,
}

fn default_payment_status() -> TransactionStatus {
    TransactionStatus::Completed
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordRefund {
    pub original_transaction_id: Uuid,
    #[serde(default = "default_payment_status")]
    pub status: TransactionStatus,
    pub description: Option<String>,
}

pub struct LedgerService {
    store: Arc<dyn TransactionStore>,
    calculator: SplitCalculator,
    aggregator: Arc<PayoutAggregator>,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        calculator: SplitCalculator,
        aggregator: Arc<PayoutAggregator>,
    ) -> Self {
        Self {
            store,
            calculator,
            aggregator,
        }
    }

    pub fn fee_rate_bps(&self) -> i32 {
        self.calculator.fee_rate_bps()
    }

    /// Record a charge at the deployment fee rate.
    pub async fn record_payment(&self, input: RecordPayment) -> Result<Transaction, AppError> {
        check_initial_status(input.status)?;
        validate_ref("teacher_ref", &input.teacher_ref)?;
        for (field, value) in [
            ("course_ref", &input.course_ref),
            ("student_ref", &input.student_ref),
        ] {
            if let Some(value) = value {
                validate_ref(field, value)?;
            }
        }

        let parties = Parties {
            teacher_ref: input.teacher_ref,
            course_ref: input.course_ref,
            student_ref: input.student_ref,
            teacher_name: clean_optional(
                "teacher_name",
                input.teacher_name.as_deref(),
                DISPLAY_NAME_MAX_LEN,
            )?,
            course_title: clean_optional(
                "course_title",
                input.course_title.as_deref(),
                DISPLAY_NAME_MAX_LEN,
            )?,
            student_name: clean_optional(
                "student_name",
                input.student_name.as_deref(),
                DISPLAY_NAME_MAX_LEN,
            )?,
        };
        let description =
            clean_optional("description", input.description.as_deref(), DESCRIPTION_MAX_LEN)?;

        let tx = Transaction::payment(
            input.gross_amount,
            self.calculator.fee_rate_bps(),
            parties,
            input.status,
            description,
            Utc::now(),
        )?;
        let saved = self.store.append(&tx).await?;

        tracing::info!(
            transaction_id = %saved.id,
            teacher_ref = %saved.teacher_ref,
            gross_amount = saved.gross_amount,
            admin_amount = saved.admin_amount,
            teacher_amount = saved.teacher_amount,
            status = %saved.status,
            "payment recorded"
        );

        if saved.status == TransactionStatus::Completed {
            self.aggregator.invalidate_teacher(&saved.teacher_ref).await;
        }
        Ok(saved)
    }

    /// Full refund of a completed payment, split with the payment's own rate.
    pub async fn record_refund(&self, input: RecordRefund) -> Result<Transaction, AppError> {
        check_initial_status(input.status)?;

        let original = self.store.get(input.original_transaction_id).await?;
        if original.kind != TransactionType::Payment {
            return Err(AppError::Validation(format!(
                "original_transaction_id: {} is a {}, not a payment",
                original.id, original.kind
            )));
        }
        if original.status != TransactionStatus::Completed {
            return Err(AppError::Validation(format!(
                "original_transaction_id: payment {} is {}, \
                 only completed payments can be refunded",
                original.id, original.status
            )));
        }
        if let Some(existing) = self.store.find_live_refund(original.id).await? {
            return Err(AppError::Validation(format!(
                "original_transaction_id: payment {} already has refund {}",
                original.id, existing.id
            )));
        }

        let description =
            clean_optional("description", input.description.as_deref(), DESCRIPTION_MAX_LEN)?;
        let tx = Transaction::refund(&original, input.status, description, Utc::now())?;
        let saved = self.store.append(&tx).await?;

        tracing::info!(
            transaction_id = %saved.id,
            original_transaction_id = %original.id,
            teacher_ref = %saved.teacher_ref,
            gross_amount = saved.gross_amount,
            status = %saved.status,
            "refund recorded"
        );

        if saved.status == TransactionStatus::Completed {
            self.after_completion(&saved).await?;
        }
        Ok(saved)
    }

    /// Move a pending row into a terminal status.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> Result<Transaction, AppError> {
        let updated = self.store.update_status(id, status, Utc::now()).await?;

        tracing::info!(
            transaction_id = %updated.id,
            kind = %updated.kind,
            teacher_ref = %updated.teacher_ref,
            status = %updated.status,
            "transaction status updated"
        );

        self.after_completion(&updated).await?;
        Ok(updated)
    }

    pub async fn get(&self, id: Uuid) -> Result<Transaction, AppError> {
        Ok(self.store.get(id).await?)
    }

    async fn after_completion(&self, tx: &Transaction) -> Result<(), AppError> {
        self.aggregator.invalidate_teacher(&tx.teacher_ref).await;

        // A refund landing after a payout can push the balance below zero;
        // reading it fresh raises the alert right away.
        if tx.kind == TransactionType::Refund && tx.status == TransactionStatus::Completed {
            self.aggregator.fresh_teacher_balance(&tx.teacher_ref).await?;
        }
        Ok(())
    }
}

fn check_initial_status(status: TransactionStatus) -> Result<(), AppError> {
    match status {
        TransactionStatus::Pending | TransactionStatus::Completed => Ok(()),
        other => Err(AppError::Validation(format!(
            "status: new transactions start pending or completed, not {}",
            other
        ))),
    }
}
