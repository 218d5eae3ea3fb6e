use clap::{Args, Subcommand};

use sms_offline::config::{Config, ConfigValue};

use super::OutputFormat;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn print_optional(name: &str, value: &ConfigValue<Option<String>>) {
    println!("{}: {}", name, value.value.as_deref().unwrap_or("(not set)"));
    println!("  source: {}", value.source);
    println!();
}

/// Shows only the first few characters of a secret.
fn mask(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{}...", prefix)
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!("cache_path: {}", config.cache_path.value.display());
                        println!("  source: {}", config.cache_path.source);
                        println!();

                        print_optional("api_url", &config.api_url);

                        match &config.api_token.value {
                            Some(token) => println!("api_token: {}", mask(token)),
                            None => println!("api_token: (not set)"),
                        }
                        println!("  source: {}", config.api_token.source);
                        println!();

                        println!("conflict_strategy: {}", config.conflict_strategy.value);
                        println!("  source: {}", config.conflict_strategy.source);
                        println!();

                        println!("retry:");
                        println!("  max_retries: {}", config.retry.max_retries);
                        println!("  base_delay_ms: {}", config.retry.base_delay_ms);
                        println!("  max_delay_ms: {}", config.retry.max_delay_ms);
                        println!();

                        println!("probe:");
                        println!("  interval_secs: {}", config.probe.interval_secs);
                        println!("  periodic_sync_secs: {}", config.probe.periodic_sync_secs);
                        println!();

                        println!("proxy:");
                        println!("  port: {}", config.proxy.port);
                        println!(
                            "  upstream_url: {}",
                            config.upstream_url().unwrap_or("(not set)")
                        );
                        println!("  static_assets: {}", config.proxy.static_assets.join(", "));
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_keeps_prefix_only() {
        assert_eq!(mask("abcdef123"), "abcd...");
        assert_eq!(mask("ab"), "ab...");
    }
}
