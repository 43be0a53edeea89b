use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::ports::TransactionStore;
use crate::services::integrity::IntegrityMonitor;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

impl HealthResponse {
    pub fn is_unhealthy(&self) -> bool {
        self.status == "unhealthy"
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

pub struct StoreChecker {
    store: Arc<dyn TransactionStore>,
}

impl StoreChecker {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DependencyChecker for StoreChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.store.ping().await {
            Ok(()) => DependencyStatus::Healthy {
                status: "healthy".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => DependencyStatus::Unhealthy {
                status: "unhealthy".to_string(),
                error: e.to_string(),
            },
        }
    }
}

/// Reports unresolved integrity alerts. Non-critical: the service keeps
/// serving, but an operator needs to look.
pub struct IntegrityChecker {
    monitor: IntegrityMonitor,
}

impl IntegrityChecker {
    pub fn new(monitor: IntegrityMonitor) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl DependencyChecker for IntegrityChecker {
    async fn check(&self) -> DependencyStatus {
        let alerts = self.monitor.recent().await.len();
        if alerts == 0 {
            DependencyStatus::Healthy {
                status: "healthy".to_string(),
                latency_ms: 0,
            }
        } else {
            DependencyStatus::Unhealthy {
                status: "unhealthy".to_string(),
                error: format!("{} integrity alert(s) raised", alerts),
            }
        }
    }
}

pub async fn check_health(
    store: &StoreChecker,
    integrity: &IntegrityChecker,
    start_time: Instant,
) -> HealthResponse {
    let timeout_duration = Duration::from_secs(5);

    let (store_result, integrity_result) = tokio::join!(
        timeout(timeout_duration, store.check()),
        timeout(timeout_duration, integrity.check())
    );

    let mut dependencies = HashMap::new();
    dependencies.insert(
        "store".to_string(),
        store_result.unwrap_or_else(|_| timed_out()),
    );
    dependencies.insert(
        "integrity".to_string(),
        integrity_result.unwrap_or_else(|_| timed_out()),
    );

    let overall_status = determine_overall_status(&dependencies);

    HealthResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        dependencies,
    }
}

fn timed_out() -> DependencyStatus {
    DependencyStatus::Unhealthy {
        status: "unhealthy".to_string(),
        error: "timeout".to_string(),
    }
}

fn determine_overall_status(dependencies: &HashMap<String, DependencyStatus>) -> String {
    let critical_deps = ["store"];
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for (name, status) in dependencies {
        if matches!(status, DependencyStatus::Unhealthy { .. }) {
            if critical_deps.contains(&name.as_str()) {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
    }

    if has_critical_failure {
        "unhealthy".to_string()
    } else if has_non_critical_failure {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}
