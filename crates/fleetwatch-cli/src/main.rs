mod config;
mod serve_cmd;
#[cfg(test)]
mod test_util;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use fleetwatch_chat::{ChatDispatcher, RunRegistry};
use fleetwatch_db::pool;

use config::FleetwatchConfig;

#[derive(Parser)]
#[command(name = "fleetwatch", about = "Autonomous task-execution orchestrator for software-engineering work")]
struct Cli {
    /// Database URL (overrides FLEETWATCH_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a fleetwatch config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/fleetwatch")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the fleetwatch database (requires config file or env vars)
    DbInit,
    /// Run the dashboard + chat-webhook process
    Serve {
        /// Project whose lists/tasks this process serves and whose chat
        /// commands route here
        #[arg(long, env = "FLEETWATCH_PROJECT_ID")]
        project_id: Uuid,
        /// Bind address for the HTTP listener
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Bind port for the HTTP listener
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

/// Execute the `fleetwatch init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let token_secret = config::generate_token_secret();

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        auth: config::AuthSection {
            token_secret: token_secret.clone(),
        },
        chat: config::ChatSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  auth.token_secret = {}...{}", &token_secret[..8], &token_secret[56..]);
    println!();
    println!("Next: run `fleetwatch db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `fleetwatch db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = FleetwatchConfig::resolve(cli_db_url)?;

    println!("Initializing fleetwatch database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("fleetwatch db-init complete.");
    Ok(())
}

/// Execute the `fleetwatch serve` command: dashboard API, chat webhook,
/// health-check loop, and suggestion-expiry sweep on one runtime.
async fn cmd_serve(cli_db_url: Option<&str>, project_id: Uuid, bind: &str, port: u16) -> anyhow::Result<()> {
    let resolved = FleetwatchConfig::resolve(cli_db_url)?;
    let webhook_secret = resolved
        .webhook_secret
        .clone()
        .context("serve requires a webhook secret: set FLEETWATCH_WEBHOOK_SECRET or chat.webhook_secret in the config file")?;

    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let dispatcher = std::sync::Arc::new(ChatDispatcher::new(
        db_pool.clone(),
        "https://api.telegram.org",
        resolved.bot_credentials.clone(),
    ));
    let runs = std::sync::Arc::new(RunRegistry::new());

    let result = serve_cmd::run_serve(
        db_pool.clone(),
        dispatcher,
        runs,
        bind,
        port,
        webhook_secret,
        project_id,
        resolved.bot_credentials,
    )
    .await;

    db_pool.close().await;
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { project_id, bind, port } => {
            cmd_serve(cli.database_url.as_deref(), project_id, &bind, port).await?;
        }
    }

    Ok(())
}
