use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::email::Action;
use crate::filename::DEFAULT_SCHEMA;
use crate::labels::LabelChoice;
use crate::query::{SearchQuery, DEFAULT_MIN_SIZE_MB};
use crate::runner::RunPlan;
use crate::scheduler::Schedule;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub gmail: GmailConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GmailConfig {
    pub credentials_path: String,
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: String,
    #[serde(default = "default_oauth_host")]
    pub oauth_host: String,
    /// Unset means an ephemeral port.
    #[serde(default)]
    pub oauth_port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Free-form query; when unset the basic search below is used.
    pub search_query: Option<String>,
    pub email_size_mb: u32,
    pub label_ids: Vec<String>,
    pub batch_size: u32,
    pub target_directory: String,
    pub filename_schema: String,
    pub add_metadata: bool,
    pub process_embedded: bool,
    pub permanently_remove: bool,
    pub backup_original: bool,
    /// `-` disables the label, unset means the default label.
    pub downloaded_label_id: Option<String>,
    pub removed_label_id: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            search_query: None,
            email_size_mb: DEFAULT_MIN_SIZE_MB,
            label_ids: Vec::new(),
            batch_size: 100,
            target_directory: "./attachments".to_string(),
            filename_schema: DEFAULT_SCHEMA.to_string(),
            add_metadata: false,
            process_embedded: true,
            permanently_remove: false,
            backup_original: true,
            downloaded_label_id: None,
            removed_label_id: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub period_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            enabled: false,
            period_secs: 3600,
        }
    }
}

impl SchedulerConfig {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            enabled: self.enabled && self.period_secs > 0,
            period: std::time::Duration::from_secs(self.period_secs.max(1)),
        }
    }
}

fn default_token_cache_path() -> String {
    "./gmail-token-cache.json".to_string()
}

fn default_oauth_host() -> String {
    "localhost".to_string()
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Configuration from environment variables (a `.env` file is loaded by `main`).
    pub fn new() -> Result<Self> {
        Self::check_required_env_vars()?;

        let defaults = ProcessingConfig::default();
        let scheduler_defaults = SchedulerConfig::default();
        Ok(Config {
            gmail: GmailConfig {
                credentials_path: std::env::var("GMAIL_CREDENTIALS_PATH")
                    .context("GMAIL_CREDENTIALS_PATH must be set")?,
                token_cache_path: env_or("GMAIL_TOKEN_CACHE_PATH", default_token_cache_path()),
                oauth_host: env_or("OAUTH_HOST", default_oauth_host()),
                oauth_port: std::env::var("OAUTH_PORT").ok().and_then(|port| port.trim().parse().ok()),
            },
            processing: ProcessingConfig {
                search_query: std::env::var("SEARCH_QUERY").ok().filter(|query| !query.trim().is_empty()),
                email_size_mb: env_parse("EMAIL_SIZE_MB", defaults.email_size_mb),
                label_ids: std::env::var("LABEL_IDS")
                    .map(|ids| split_list(&ids))
                    .unwrap_or(defaults.label_ids),
                batch_size: env_parse("SEARCH_BATCH_SIZE", defaults.batch_size),
                target_directory: env_or("TARGET_DIRECTORY", defaults.target_directory),
                filename_schema: env_or("FILENAME_SCHEMA", defaults.filename_schema),
                add_metadata: env_parse("ADD_METADATA", defaults.add_metadata),
                process_embedded: env_parse("PROCESS_EMBEDDED", defaults.process_embedded),
                permanently_remove: env_parse("PERMANENTLY_REMOVE", defaults.permanently_remove),
                backup_original: env_parse("BACKUP_ORIGINAL", defaults.backup_original),
                downloaded_label_id: std::env::var("DOWNLOADED_LABEL_ID").ok(),
                removed_label_id: std::env::var("REMOVED_LABEL_ID").ok(),
            },
            scheduler: SchedulerConfig {
                enabled: env_parse("SCHEDULER_ENABLED", scheduler_defaults.enabled),
                period_secs: env_parse("SCHEDULER_PERIOD_SECS", scheduler_defaults.period_secs),
            },
        })
    }

    /// Configuration from a TOML/JSON/INI file; `UNATTACH_` environment
    /// variables override it (e.g. `UNATTACH_PROCESSING__BATCH_SIZE=50`).
    pub fn from_file(path: &Path) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("UNATTACH").separator("__"))
            .build()
            .with_context(|| format!("Unable to read configuration file {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn run_plan(&self, action: Action, query: Option<&str>, limit: Option<usize>) -> RunPlan {
        let processing = &self.processing;
        RunPlan {
            query: match query.or(processing.search_query.as_deref()) {
                Some(query) => SearchQuery::Custom(query.to_string()),
                None => SearchQuery::Basic {
                    min_size_mb: processing.email_size_mb,
                    label_ids: processing.label_ids.clone(),
                },
            },
            page_size: processing.batch_size,
            limit,
            action,
            process_embedded: processing.process_embedded,
            backup: processing.backup_original,
            permanently_remove: processing.permanently_remove,
            downloaded_label: LabelChoice::from_config(processing.downloaded_label_id.as_deref()),
            removed_label: LabelChoice::from_config(processing.removed_label_id.as_deref()),
            target_directory: PathBuf::from(&processing.target_directory),
            filename_schema: processing.filename_schema.clone(),
            add_metadata: processing.add_metadata,
        }
    }

    fn check_required_env_vars() -> Result<()> {
        let required_vars = ["GMAIL_CREDENTIALS_PATH"];

        let missing_vars: Vec<&str> = required_vars
            .iter()
            .copied()
            .filter(|var| std::env::var(var).is_err())
            .collect();

        if !missing_vars.is_empty() {
            anyhow::bail!(
                "Missing environment variables: {}\n\
                 \n\
                 💡 Solutions:\n\
                 1. Create a .env file with your credentials:\n\
                    GMAIL_CREDENTIALS_PATH=/path/to/client_credentials.json\n\
                 \n\
                 2. Or pass a configuration file:\n\
                    unattach --config unattach.toml",
                missing_vars.join(", ")
            );
        }

        Ok(())
    }
}
