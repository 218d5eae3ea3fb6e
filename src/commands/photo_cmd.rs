use clap::{Args, Subcommand};
use std::path::PathBuf;

use sms_offline::db::UploadRepository;
use sms_offline::models::{EntityType, UploadStatus};
use sms_offline::photo::{create_pending_upload, file_size_mb, upload_from_data_url};

use super::OutputFormat;

#[derive(Args)]
pub struct PhotoCommand {
    #[command(subcommand)]
    pub command: PhotoSubcommand,
}

#[derive(Subcommand)]
pub enum PhotoSubcommand {
    /// Queue a photo for upload on the next sync
    Add {
        /// Image file (jpeg, png or webp)
        path: PathBuf,

        /// The file holds a base64 data URL instead of raw image bytes
        #[arg(long)]
        data_url: bool,

        /// Entity the photo belongs to (location, equipment, part)
        entity_type: EntityType,

        /// ID of that entity
        entity_id: String,
    },

    /// List uploads that have not been sent yet
    List {
        /// Only show failed uploads
        #[arg(long)]
        failed: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Drop a queued upload
    Remove {
        /// Upload ID
        id: String,
    },
}

impl PhotoCommand {
    pub async fn run(&self, repo: &UploadRepository) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            PhotoSubcommand::Add {
                path,
                data_url,
                entity_type,
                entity_id,
            } => {
                let upload = if *data_url {
                    let contents = tokio::fs::read_to_string(path).await?;
                    let name = path
                        .file_stem()
                        .and_then(|n| n.to_str())
                        .unwrap_or("photo");
                    upload_from_data_url(&contents, name, *entity_type, entity_id)?
                } else {
                    create_pending_upload(path, *entity_type, entity_id).await?
                };
                repo.save(&upload).await?;
                println!(
                    "Queued {} ({:.2} MB) for {} {}: {}",
                    upload.filename,
                    file_size_mb(upload.file.len()),
                    upload.entity_type,
                    upload.entity_id,
                    upload.id
                );
                Ok(())
            }

            PhotoSubcommand::List { failed, format } => {
                let uploads = if *failed {
                    repo.list_failed().await?
                } else {
                    let mut all = repo.list_pending().await?;
                    all.extend(repo.list_by_status(UploadStatus::Uploading).await?);
                    all.extend(repo.list_failed().await?);
                    all
                };

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&uploads)?);
                    }
                    OutputFormat::Text => {
                        if uploads.is_empty() {
                            println!("No uploads queued.");
                        }
                        for upload in &uploads {
                            println!(
                                "{}  {} -> {} {} [{}]",
                                upload.id,
                                upload.filename,
                                upload.entity_type,
                                upload.entity_id,
                                upload.status
                            );
                            if let Some(error) = &upload.error {
                                println!("  {}", error);
                            }
                        }
                    }
                }
                Ok(())
            }

            PhotoSubcommand::Remove { id } => {
                if repo.remove(id).await? {
                    println!("Removed upload: {}", id);
                    Ok(())
                } else {
                    Err(format!("Upload not found: {}", id).into())
                }
            }
        }
    }
}
