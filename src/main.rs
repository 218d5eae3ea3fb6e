use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ConfigCommand, PhotoCommand, QueueCommand, SyncCommand, WatchCommand};
use sms_offline::config::Config;
use sms_offline::db::{init_db, QueueRepository, UploadRepository};

#[derive(Parser)]
#[command(name = "sms-offline")]
#[command(version)]
#[command(about = "Offline queue and sync for the SMS onboarding portal", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and edit the offline queue
    Queue(QueueCommand),

    /// Queue photos for upload
    Photo(PhotoCommand),

    /// Replay queued changes against the portal
    Sync(SyncCommand),

    /// Sync automatically when connectivity returns
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sms_offline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Queue(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(&QueueRepository::new(pool)).await?;
        }
        Some(Commands::Photo(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(&UploadRepository::new(pool)).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(pool, &config).await?;
        }
        Some(Commands::Watch(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(pool, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
