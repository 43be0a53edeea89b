use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use revenue_ledger::cli::{
    self, Cli, Commands, DbCommands, PayoutCommands, TeacherCommands, TxCommands,
};
use revenue_ledger::config::{Config, LogFormat};
use revenue_ledger::domain::TransactionStatus;
use revenue_ledger::startup;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            config.validate()?;
            startup::serve(config).await
        }
        Commands::Tx(TxCommands::Complete { tx_id }) => {
            cli::handle_tx_status(config, tx_id, TransactionStatus::Completed).await
        }
        Commands::Tx(TxCommands::Fail { tx_id }) => {
            cli::handle_tx_status(config, tx_id, TransactionStatus::Failed).await
        }
        Commands::Teacher(TeacherCommands::Balance { teacher_ref }) => {
            cli::handle_teacher_balance(config, &teacher_ref).await
        }
        Commands::Payout(PayoutCommands::Sweep { min_cents, day }) => {
            cli::handle_payout_sweep(config, min_cents, day).await
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config).await,
    }
}
