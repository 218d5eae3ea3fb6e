//! Sync CLI commands for replaying the offline queue.

use clap::{Args, Subcommand};
use sqlx::SqlitePool;

use sms_offline::config::Config;
use sms_offline::models::{EntityType, SyncStatus};
use sms_offline::sync::{check_server, SyncReport};

use super::{engine, OutputFormat};

/// Replay queued changes against the portal
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Replay due changes and pending uploads (default)
    Run {
        /// Ignore retry backoff and attempt every item
        #[arg(long)]
        now: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show last sync time, pending changes and server reachability
    Status {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List recorded sync errors
    Errors {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Clear recorded sync errors
    ClearErrors,

    /// Show the last synced copy of an entity
    Cached {
        /// Entity type (location, equipment, part, photo)
        entity_type: EntityType,

        /// Entity ID
        id: String,
    },
}

impl SyncCommand {
    pub async fn run(
        &self,
        pool: SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => self.sync(pool, config, false, &OutputFormat::Text).await,
            Some(SyncSubcommand::Run { now, format }) => {
                self.sync(pool, config, *now, format).await
            }
            Some(SyncSubcommand::Status { format }) => self.status(pool, config, format).await,
            Some(SyncSubcommand::Errors { format }) => {
                let status = engine(pool, config)?.status().await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&status.sync_errors)?);
                    }
                    OutputFormat::Text => {
                        if status.sync_errors.is_empty() {
                            println!("No sync errors.");
                        }
                        for error in &status.sync_errors {
                            println!(
                                "{}  {} {} {}: {}",
                                error.occurred_at.format("%Y-%m-%d %H:%M:%S"),
                                error.operation,
                                error.entity_type,
                                error.entity_id,
                                error.error
                            );
                        }
                    }
                }
                Ok(())
            }
            Some(SyncSubcommand::ClearErrors) => {
                let cleared = engine(pool, config)?.clear_errors().await?;
                println!("Cleared {} error(s)", cleared);
                Ok(())
            }
            Some(SyncSubcommand::Cached { entity_type, id }) => {
                match engine(pool, config)?.cached_entity(*entity_type, id).await? {
                    Some(data) => {
                        println!("{}", serde_json::to_string_pretty(&data)?);
                        Ok(())
                    }
                    None => Err(format!("No cached copy of {} {}", entity_type, id).into()),
                }
            }
        }
    }

    async fn sync(
        &self,
        pool: SqlitePool,
        config: &Config,
        now: bool,
        format: &OutputFormat,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let engine = engine(pool, config)?;

        let report = if now {
            engine.sync_all_now().await?
        } else {
            engine.sync_all().await?
        };

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => print_report(&report),
        }

        if report.is_clean() {
            Ok(())
        } else {
            Err(format!("{} change(s) failed to sync", report.errors.len()).into())
        }
    }

    async fn status(
        &self,
        pool: SqlitePool,
        config: &Config,
        format: &OutputFormat,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let api_url = config.require_api_url()?.to_string();
        let status = engine(pool, config)?.status().await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            OutputFormat::Text => {
                println!("Sync Status");
                println!("===========");
                println!();
                print_status(&status);
                println!();
                println!("Server:    {}", api_url);
                if check_server(&api_url).await {
                    println!("Reachable: ✓ online");
                } else {
                    println!("Reachable: ✗ offline");
                }
            }
        }
        Ok(())
    }
}

fn print_status(status: &SyncStatus) {
    match status.last_sync_at {
        Some(at) => println!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last sync: never"),
    }
    println!("Pending:   {}", status.pending_changes);
    println!("Errors:    {}", status.sync_errors.len());
}

fn print_report(report: &SyncReport) {
    if report.skipped {
        println!("A sync is already running.");
        return;
    }

    println!("Synced {} change(s)", report.succeeded.len());
    for failed in &report.failed {
        let outcome = if failed.will_retry {
            "will retry"
        } else {
            "dead-lettered"
        };
        println!("  ✗ {} ({}): {}", failed.item, outcome, failed.error);
    }
    if !report.deferred.is_empty() {
        println!("  {} change(s) deferred behind a failure", report.deferred.len());
    }
    if report.waiting > 0 {
        println!("  {} change(s) waiting for retry backoff", report.waiting);
    }
    if !report.uploads_succeeded.is_empty() || !report.uploads_failed.is_empty() {
        println!(
            "Uploads: {} sent, {} failed",
            report.uploads_succeeded.len(),
            report.uploads_failed.len()
        );
    }
}
