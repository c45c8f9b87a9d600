use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "quill", about = "Blog store administration")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Path to the SQLite database (overrides the config file)
    #[arg(long)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the database and apply migrations
    Migrate,
    /// Recompute cached counters from the rows and fix any drift
    Recount {
        /// Recount every user and post
        #[arg(long)]
        all: bool,
        /// User ids to recount
        #[arg(long = "user")]
        users: Vec<i64>,
        /// Post ids to recount
        #[arg(long = "post")]
        posts: Vec<i64>,
    },
    /// Report counter drift without changing anything
    Check,
    /// Print row totals
    Stats,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub counters: CountersConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CountersConfig {
    /// Compare the delta plan against the recount on every commit and
    /// log when a cached value had drifted.
    pub cross_check: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 8,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self { cross_check: true }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref path) = cli.database {
            config.database.path = Some(path.clone());
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("quill.db"));
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".quill")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("quill.db"))
    }
}
