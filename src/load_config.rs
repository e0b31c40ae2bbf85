/// `load_config` module: Loads a static YAML config and the environment secrets into the core SynchroniseConfig.
///
/// This module is the only place where untrusted YAML is parsed and mapped to strongly-typed internal structs.
///
/// # Responsibilities
/// - Parse the user-supplied YAML file (warehouse, ads, upload sections) into type-safe Rust structs
/// - Fill defaults (row threshold, audience cutoff date, API version, batch size)
/// - Read credentials (`FB_APP_ID`, `FB_APP_SECRET`, `FB_ACCESS_TOKEN`, `GOOGLE_OAUTH_ACCESS_TOKEN`)
///   from the environment; they never live in the YAML file and are never logged
/// - Produce clear diagnostics: any failure in loading must surface at the CLI boundary
///
/// # Errors
/// All errors in this module use `anyhow::Error` for context-rich diagnostics.
use anyhow::{Context, Result};
use audience_sync_core::resolve::{parse_created_after, DEFAULT_CREATED_AFTER};
use audience_sync_core::select::MIN_AUDIENCE_ROWS;
use audience_sync_core::synchronise::SynchroniseConfig;
use audience_sync_core::users::MAX_UPLOAD_BATCH;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const DEFAULT_API_VERSION: &str = "v24.0";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub warehouse: WarehouseSection,
    pub ads: AdsSection,
    #[serde(default)]
    pub upload: UploadSection,
}

#[derive(Debug, Deserialize)]
pub struct WarehouseSection {
    pub project_id: String,
    pub dataset_id: String,
    #[serde(default = "default_min_row_count")]
    pub min_row_count: u64,
    /// Query job location, e.g. `EU`. Left to the warehouse when absent.
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdsSection {
    pub ad_account_id: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// `YYYY-MM-DD`; audiences created on or before that day are ignored.
    #[serde(default = "default_created_after")]
    pub created_after: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_min_row_count() -> u64 {
    MIN_AUDIENCE_ROWS
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_created_after() -> String {
    DEFAULT_CREATED_AFTER.to_string()
}

fn default_batch_size() -> usize {
    MAX_UPLOAD_BATCH
}

impl CliConfig {
    /// Map the YAML sections onto the core run configuration.
    pub fn synchronise_config(&self) -> Result<SynchroniseConfig> {
        let created_after = parse_created_after(&self.ads.created_after).with_context(|| {
            format!(
                "ads.created_after must be a YYYY-MM-DD date, got {:?}",
                self.ads.created_after
            )
        })?;
        let config = SynchroniseConfig {
            project_id: self.warehouse.project_id.clone(),
            dataset_id: self.warehouse.dataset_id.clone(),
            ad_account_id: self.ads.ad_account_id.clone(),
            min_row_count: self.warehouse.min_row_count,
            created_after,
            upload_batch_size: self.upload.batch_size,
        };
        config.trace_loaded();
        Ok(config)
    }
}

/// Loads a static YAML config file (no secrets).
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if config.upload.batch_size == 0 || config.upload.batch_size > MAX_UPLOAD_BATCH {
        anyhow::bail!(
            "upload.batch_size must be between 1 and {MAX_UPLOAD_BATCH}, got {}",
            config.upload.batch_size
        );
    }

    Ok(config)
}

/// Credentials for both collaborators. Opaque; never logged.
pub struct Secrets {
    pub app_id: String,
    pub app_secret: String,
    pub access_token: String,
    pub warehouse_token: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .field("warehouse_token", &"[REDACTED]")
            .finish()
    }
}

fn required_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!(error = ?e, variable = name, "Required environment variable missing");
            Err(anyhow::anyhow!("{name} environment variable required"))
        }
    }
}

/// Read the credentials from the process environment.
pub fn load_secrets() -> Result<Secrets> {
    let secrets = Secrets {
        app_id: required_env("FB_APP_ID")?,
        app_secret: required_env("FB_APP_SECRET")?,
        access_token: required_env("FB_ACCESS_TOKEN")?,
        warehouse_token: required_env("GOOGLE_OAUTH_ACCESS_TOKEN")?,
    };
    info!(app_id = %secrets.app_id, "Loaded credentials from environment");
    Ok(secrets)
}
