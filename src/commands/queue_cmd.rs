use clap::{Args, Subcommand};
use serde_json::Value;

use sms_offline::db::{clear_all, QueueRepository};
use sms_offline::models::{EntityType, NewQueueItem, Operation};

use super::{confirm, OutputFormat};

#[derive(Args)]
pub struct QueueCommand {
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// Queue a mutation for the next sync
    Add {
        /// Entity type (location, equipment, part, photo)
        entity_type: EntityType,

        /// Operation (create, update, delete)
        operation: Operation,

        /// Entity payload as JSON; updates and deletes need an "id"
        payload: String,

        /// Entity as last seen from the server, used for merge conflicts
        #[arg(long)]
        base: Option<String>,
    },

    /// List queued mutations, oldest first
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove a queued mutation
    Remove {
        /// Queue item ID
        id: String,
    },

    /// Remove every queued mutation
    Clear {
        /// Also drop pending photo uploads and cached entity data
        #[arg(long)]
        all: bool,

        /// Skip confirmation
        #[arg(long, short)]
        force: bool,
    },

    /// List mutations that ran out of retries
    DeadLetters {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Move a dead-lettered mutation back into the queue
    Requeue {
        /// Dead letter ID
        id: String,
    },

    /// Delete every dead-lettered mutation
    Purge {
        /// Skip confirmation
        #[arg(long, short)]
        force: bool,
    },
}

fn parse_json(label: &str, raw: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("Invalid {} JSON: {}", label, e))?;
    if !value.is_object() {
        return Err(format!("The {} must be a JSON object", label).into());
    }
    Ok(value)
}

impl QueueCommand {
    pub async fn run(&self, repo: &QueueRepository) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            QueueSubcommand::Add {
                entity_type,
                operation,
                payload,
                base,
            } => {
                let payload = parse_json("payload", payload)?;
                if *operation != Operation::Create && payload.get("id").is_none() {
                    return Err(format!("{} requires an \"id\" in the payload", operation).into());
                }

                let mut item = NewQueueItem::new(*entity_type, *operation, payload);
                if let Some(base) = base {
                    item = item.with_base(parse_json("base", base)?);
                }

                let id = repo.enqueue(item).await?;
                println!("Queued {} {}: {}", operation, entity_type, id);
                Ok(())
            }

            QueueSubcommand::List { format } => {
                let items = repo.list_pending().await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&items)?);
                    }
                    OutputFormat::Text => {
                        if items.is_empty() {
                            println!("Queue is empty.");
                        } else {
                            for item in &items {
                                print!("{}  {}", item.id, item);
                                if let Some(at) = item.next_attempt_at {
                                    print!("  next attempt {}", at.format("%Y-%m-%d %H:%M:%S"));
                                }
                                println!();
                            }
                            println!("\n{} pending change(s)", items.len());
                        }
                    }
                }
                Ok(())
            }

            QueueSubcommand::Remove { id } => {
                if repo.remove(id).await? {
                    println!("Removed: {}", id);
                    Ok(())
                } else {
                    Err(format!("Queue item not found: {}", id).into())
                }
            }

            QueueSubcommand::Clear { all: true, force } => {
                if !force && !confirm("Discard all pending changes, uploads and cached data?")? {
                    println!("Cancelled.");
                    return Ok(());
                }
                clear_all(repo.pool()).await?;
                println!("Cleared offline data");
                Ok(())
            }

            QueueSubcommand::Clear { all: false, force } => {
                let count = repo.count().await?;
                if count == 0 {
                    println!("Queue is empty.");
                    return Ok(());
                }
                if !force && !confirm(&format!("Discard {} pending change(s)?", count))? {
                    println!("Cancelled.");
                    return Ok(());
                }
                let removed = repo.clear().await?;
                println!("Removed {} item(s)", removed);
                Ok(())
            }

            QueueSubcommand::DeadLetters { format } => {
                let letters = repo.list_dead_letters().await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&letters)?);
                    }
                    OutputFormat::Text => {
                        if letters.is_empty() {
                            println!("No dead letters.");
                        }
                        for letter in &letters {
                            println!(
                                "{}  {} {} after {} retries",
                                letter.id, letter.operation, letter.entity_type, letter.retry_count
                            );
                            println!("  {}", letter.last_error);
                        }
                    }
                }
                Ok(())
            }

            QueueSubcommand::Requeue { id } => {
                if repo.requeue_dead_letter(id).await? {
                    println!("Requeued: {}", id);
                    Ok(())
                } else {
                    Err(format!("Dead letter not found: {}", id).into())
                }
            }

            QueueSubcommand::Purge { force } => {
                if !force && !confirm("Delete all dead letters?")? {
                    println!("Cancelled.");
                    return Ok(());
                }
                let purged = repo.purge_dead_letters().await?;
                println!("Purged {} dead letter(s)", purged);
                Ok(())
            }
        }
    }
}
