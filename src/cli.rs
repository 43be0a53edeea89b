use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::TransactionStatus;
use crate::startup;

#[derive(Parser)]
#[command(name = "revenue-ledger")]
#[command(about = "Revenue Ledger - course sales splits and teacher payouts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction management commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Teacher balance commands
    #[command(subcommand)]
    Teacher(TeacherCommands),

    /// Payout commands
    #[command(subcommand)]
    Payout(PayoutCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Mark a pending transaction as completed
    Complete {
        /// Transaction UUID
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },

    /// Mark a pending transaction as failed
    Fail {
        /// Transaction UUID
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum TeacherCommands {
    /// Print the payout balance of a teacher
    Balance {
        #[arg(value_name = "TEACHER_REF")]
        teacher_ref: String,
    },
}

#[derive(Subcommand)]
pub enum PayoutCommands {
    /// Pay out every teacher whose pending balance reaches the minimum
    Sweep {
        /// Minimum pending balance in cents
        #[arg(long, default_value_t = 5_000)]
        min_cents: i64,

        /// Day the sweep is keyed on (defaults to today, UTC)
        #[arg(long, value_name = "YYYY-MM-DD")]
        day: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_tx_status(
    config: Config,
    tx_id: Uuid,
    status: TransactionStatus,
) -> anyhow::Result<()> {
    let state = startup::build_state(config).await?;
    let tx = state.ledger.update_status(tx_id, status).await?;

    tracing::info!("Transaction {} marked as {}", tx.id, tx.status);
    println!("✓ Transaction {} marked as {}", tx.id, tx.status);
    Ok(())
}

pub async fn handle_teacher_balance(config: Config, teacher_ref: &str) -> anyhow::Result<()> {
    crate::validation::validate_ref("teacher_ref", teacher_ref)?;

    let state = startup::build_state(config).await?;
    let balance = state.aggregator.fresh_teacher_balance(teacher_ref).await?;

    println!("Teacher {}:", balance.teacher_ref);
    println!("  Pending:   {}", cents(balance.pending_amount));
    println!("  Earned:    {}", cents(balance.lifetime_earned));
    println!("  Refunded:  {}", cents(balance.lifetime_refunded));
    println!("  Paid out:  {}", cents(balance.lifetime_paid_out));
    println!("  In flight: {}", cents(balance.in_flight_amount));
    if let Some(deficit) = balance.integrity_deficit {
        println!("  ⚠ Integrity deficit: {}", cents(deficit));
    }
    Ok(())
}

pub async fn handle_payout_sweep(
    config: Config,
    min_cents: i64,
    day: Option<NaiveDate>,
) -> anyhow::Result<()> {
    let day = day.unwrap_or_else(|| Utc::now().date_naive());
    let state = startup::build_state(config).await?;

    tracing::info!(min_cents, %day, "Running payout sweep...");
    let report = state.payouts.run_auto_payouts(min_cents, day).await?;

    for tx in &report.created {
        println!("✓ Paid {} to {} ({})", cents(tx.gross_amount), tx.teacher_ref, tx.id);
    }
    for skipped in &report.skipped {
        println!("✗ Skipped {}: {}", skipped.teacher_ref, skipped.reason);
    }
    println!(
        "Sweep finished: {} created, {} already paid, {} skipped",
        report.created.len(),
        report.replayed,
        report.skipped.len()
    );

    if !report.skipped.is_empty() {
        anyhow::bail!("{} teacher(s) could not be paid out", report.skipped.len());
    }
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Store Backend: {}", config.store_backend);
    println!(
        "  Database URL: {}",
        config.masked_database_url().as_deref().unwrap_or("(not set)")
    );
    println!("  Fee Rate: {} bps", config.fee_rate_bps);
    println!("  Store Timeout: {} ms", config.store_timeout.as_millis());
    println!("  Cache TTL: {} s", config.cache_ttl.as_secs());
    println!(
        "  Collaborator Signing: {}",
        if config.collaborator_webhook_secret.is_some() { "enabled" } else { "disabled" }
    );

    let report = startup::validate_environment(config).await;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid");
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");
    Ok(())
}

fn cents(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cents_formatting() {
        assert_eq!(cents(15_750), "157.50");
        assert_eq!(cents(5), "0.05");
        assert_eq!(cents(-1_001), "-10.01");
    }

    #[test]
    fn test_parse_payout_sweep() {
        let cli = Cli::parse_from([
            "revenue-ledger",
            "payout",
            "sweep",
            "--min-cents",
            "2500",
            "--day",
            "2026-03-01",
        ]);
        match cli.command {
            Some(Commands::Payout(PayoutCommands::Sweep { min_cents, day })) => {
                assert_eq!(min_cents, 2_500);
                assert_eq!(day, NaiveDate::from_ymd_opt(2026, 3, 1));
            }
            _ => panic!("expected payout sweep"),
        }
    }

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::parse_from(["revenue-ledger"]);
        assert!(cli.command.is_none());
    }
}
