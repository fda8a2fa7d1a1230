//! Configuration management commands.
//!
//! Settings live in `~/.lifeos/config.toml`. Flags and environment variables
//! take precedence over the file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set { key: ConfigKey, value: String },

    /// Get a configuration value
    Get { key: ConfigKey },

    /// Show all configuration
    Show,

    /// Remove the configuration file
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigKey {
    /// Base URL of the LifeOS server
    ApiUrl,
    /// User id sent as x-user-id
    User,
    /// Default minutes east of UTC
    Tz,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz: Option<i32>,
}

impl CliConfig {
    fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::ApiUrl => self.api_url.clone(),
            ConfigKey::User => self.user.clone(),
            ConfigKey::Tz => self.tz.map(|tz| tz.to_string()),
        }
    }

    fn set(&mut self, key: ConfigKey, value: String) -> Result<()> {
        match key {
            ConfigKey::ApiUrl => self.api_url = Some(value),
            ConfigKey::User => self.user = Some(value),
            ConfigKey::Tz => {
                let tz: i32 = value.parse().context("tz must be a whole number of minutes")?;
                if tz.abs() > 14 * 60 {
                    anyhow::bail!("tz must be within +/-840 minutes");
                }
                self.tz = Some(tz);
            }
        }
        Ok(())
    }
}

fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".lifeos").join("config.toml"))
}

/// Load the configuration, or defaults when no file exists.
pub fn load() -> Result<CliConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn save(cfg: &CliConfig) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Set { key, value } => {
            let mut cfg = load()?;
            cfg.set(key, value)?;
            save(&cfg)?;
            match format {
                OutputFormat::Table => output::print_success("Configuration saved"),
                _ => output::print_item(&cfg, format)?,
            }
        }

        ConfigCommands::Get { key } => match load()?.get(key) {
            Some(value) => println!("{}", value),
            None => output::print_info("Not set"),
        },

        ConfigCommands::Show => {
            let cfg = load()?;
            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    for key in ConfigKey::value_variants() {
                        let name = key
                            .to_possible_value()
                            .map(|v| v.get_name().to_string())
                            .unwrap_or_default();
                        output::print_detail(&name, &cfg.get(*key).unwrap_or_else(|| "-".into()));
                    }
                }
                _ => output::print_item(&cfg, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This removes all CLI configuration. Use --force to confirm.");
                return Ok(());
            }
            let path = config_path()?;
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}
