mod config_cmd;
mod photo_cmd;
mod queue_cmd;
mod sync_cmd;
mod watch_cmd;

pub use config_cmd::ConfigCommand;
pub use photo_cmd::PhotoCommand;
pub use queue_cmd::QueueCommand;
pub use sync_cmd::SyncCommand;
pub use watch_cmd::WatchCommand;

use clap::ValueEnum;
use sqlx::SqlitePool;
use std::io::{self, Write};

use sms_offline::config::Config;
use sms_offline::sync::{HttpRemoteApi, SyncEngine};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Builds a sync engine against the configured portal API.
pub fn engine(
    pool: SqlitePool,
    config: &Config,
) -> Result<SyncEngine<HttpRemoteApi>, Box<dyn std::error::Error>> {
    let remote = HttpRemoteApi::new(config.require_api_url()?)?
        .with_token(config.api_token.value.clone())
        .with_conflict_strategy(config.conflict_strategy.value);
    Ok(SyncEngine::new(pool, remote, config.retry.policy()))
}

/// Asks for a y/N confirmation on stdin.
fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
