use clap::Parser;
use tracing_subscriber::EnvFilter;

use quill::commands;
use quill::config::{Cli, Config};
use quill::db;
use quill::state::AppState;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(&config.db_path(), &config.database)?;
    db::run_migrations(&pool)?;

    let state = AppState { db: pool, config };

    let output = commands::dispatch(&state, &cli.command)?;
    print!("{}", output);

    Ok(())
}
