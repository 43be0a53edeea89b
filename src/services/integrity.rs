//! Operator-visible channel for monetary integrity violations.
//!
//! Every alert is logged at error level under the `integrity` target, kept in a
//! bounded history for `/integrity/alerts`, and broadcast to live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityViolation {
    /// Completed refunds plus completed withdrawals exceed completed earnings.
    NegativeBalance { teacher_ref: String, deficit: i64 },
    /// A stored row whose split does not re-derive from its gross and rate.
    SplitMismatch { transaction_id: Uuid, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityAlert {
    pub id: Uuid,
    #[serde(flatten)]
    pub violation: IntegrityViolation,
    pub raised_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct IntegrityMonitor {
    history: Arc<RwLock<VecDeque<IntegrityAlert>>>,
    limit: usize,
    sender: broadcast::Sender<IntegrityAlert>,
}

impl IntegrityMonitor {
    pub fn new(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(limit.max(1));
        Self {
            history: Arc::new(RwLock::new(VecDeque::with_capacity(limit))),
            limit: limit.max(1),
            sender,
        }
    }

    pub async fn raise(&self, violation: IntegrityViolation) -> IntegrityAlert {
        let alert = IntegrityAlert {
            id: Uuid::new_v4(),
            violation,
            raised_at: Utc::now(),
        };

        match &alert.violation {
            IntegrityViolation::NegativeBalance { teacher_ref, deficit } => tracing::error!(
                target: "integrity",
                alert_id = %alert.id,
                teacher_ref = %teacher_ref,
                deficit,
                "teacher balance is negative"
            ),
            IntegrityViolation::SplitMismatch {
                transaction_id,
                detail,
            } => tracing::error!(
                target: "integrity",
                alert_id = %alert.id,
                transaction_id = %transaction_id,
                detail = %detail,
                "stored split does not re-derive"
            ),
        }

        {
            let mut history = self.history.write().await;
            if history.len() == self.limit {
                history.pop_front();
            }
            history.push_back(alert.clone());
        }

        // No subscribers is fine; the history still has it.
        let _ = self.sender.send(alert.clone());
        alert
    }

    /// Most recent first.
    pub async fn recent(&self) -> Vec<IntegrityAlert> {
        self.history.read().await.iter().rev().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IntegrityAlert> {
        self.sender.subscribe()
    }
}

impl Default for IntegrityMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negative(teacher: &str) -> IntegrityViolation {
        IntegrityViolation::NegativeBalance {
            teacher_ref: teacher.to_string(),
            deficit: 100,
        }
    }

    #[tokio::test]
    async fn keeps_bounded_history_newest_first() {
        let monitor = IntegrityMonitor::new(2);
        monitor.raise(negative("t-1")).await;
        monitor.raise(negative("t-2")).await;
        monitor.raise(negative("t-3")).await;

        let recent = monitor.recent().await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].violation, negative("t-3"));
        assert_eq!(recent[1].violation, negative("t-2"));
    }

    #[tokio::test]
    async fn broadcasts_to_subscribers() {
        let monitor = IntegrityMonitor::default();
        let mut rx = monitor.subscribe();
        let raised = monitor.raise(negative("t-1")).await;
        assert_eq!(rx.recv().await.unwrap(), raised);
    }

    #[test]
    fn alert_serializes_flat_with_kind() {
        let alert = IntegrityAlert {
            id: Uuid::nil(),
            violation: negative("t-1"),
            raised_at: Utc::now(),
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["kind"], "negative_balance");
        assert_eq!(json["teacher_ref"], "t-1");
        assert_eq!(json["deficit"], 100);
    }
}
