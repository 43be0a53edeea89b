use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::adapters::{InMemoryTransactionStore, PostgresTransactionStore};
use crate::config::{Config, StoreBackend};
use crate::ports::TransactionStore;
use crate::{create_app, db, AppState};

pub struct ValidationReport {
    pub environment: bool,
    pub store: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.store
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Store Connectivity:    {}", status(self.store));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        store: true,
        errors: Vec::new(),
    };

    let problems = config.problems();
    if !problems.is_empty() {
        report.environment = false;
        report
            .errors
            .extend(problems.into_iter().map(|p| format!("Environment: {}", p)));
        return report;
    }

    match connect_store(config, false).await {
        Ok(store) => {
            if let Err(e) = store.ping().await {
                report.store = false;
                report.errors.push(format!("Store: {}", e));
            }
        }
        Err(e) => {
            report.store = false;
            report.errors.push(format!("Store: {:#}", e));
        }
    }

    report
}

/// Open the configured backend. Postgres migrations run when `migrate` is set.
pub async fn connect_store(config: &Config, migrate: bool) -> Result<Arc<dyn TransactionStore>> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; nothing survives a restart");
            Ok(Arc::new(InMemoryTransactionStore::new()))
        }
        StoreBackend::Postgres => {
            let pool = db::create_pool(config)
                .await
                .context("Failed to connect to database")?;
            if migrate {
                db::run_migrations(&pool).await?;
            }
            Ok(Arc::new(PostgresTransactionStore::new(pool)))
        }
    }
}

pub async fn build_state(config: Config) -> Result<AppState> {
    let store = connect_store(&config, true).await?;
    let state = AppState::new(store, config)?;
    tracing::info!(
        fee_rate_bps = state.ledger.fee_rate_bps(),
        backend = %state.config.store_backend,
        "Ledger services initialized"
    );
    Ok(state)
}

pub fn cors_layer(config: &Config) -> Result<Option<CorsLayer>> {
    if config.cors_allowed_origins.is_empty() {
        return Ok(None);
    }

    let origins = config
        .cors_allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .with_context(|| format!("CORS_ALLOWED_ORIGINS: invalid origin '{}'", origin))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PATCH])
            .allow_headers(tower_http::cors::Any),
    ))
}

pub fn router(state: AppState) -> Result<Router> {
    let cors = cors_layer(&state.config)?;
    let app = create_app(state);
    Ok(match cors {
        Some(cors) => app.layer(cors),
        None => app,
    })
}

pub async fn serve(config: Config) -> Result<()> {
    let port = config.server_port;
    let state = build_state(config).await?;
    let app = router(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_environment_missing_database_url() {
        let config = Config::default();
        let report = validate_environment(&config).await;

        assert!(!report.environment);
        assert!(!report.is_valid());
    }

    #[tokio::test]
    async fn test_validate_environment_memory_backend() {
        let config = Config {
            store_backend: StoreBackend::Memory,
            ..Config::default()
        };
        let report = validate_environment(&config).await;

        assert!(report.is_valid());
    }

    #[test]
    fn test_cors_layer_rejects_bad_origin() {
        let config = Config {
            cors_allowed_origins: vec!["bad\norigin".to_string()],
            ..Config::default()
        };
        assert!(cors_layer(&config).is_err());
        assert!(cors_layer(&Config::default()).unwrap().is_none());
    }
}
