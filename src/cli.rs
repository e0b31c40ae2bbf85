use crate::bigquery::BigQueryClient;
use crate::graph::GraphApiClient;
use crate::load_config::{load_config, load_secrets, CliConfig, Secrets};
use anyhow::Result;
use audience_sync_core::synchronise::{handle_invocation, plan};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI for audience-sync: mirror warehouse audience tables into ads custom audiences.
#[derive(Parser)]
#[clap(
    name = "audience-sync",
    version,
    about = "Synchronise segmented BigQuery tables into Meta custom audiences"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or reuse an audience per qualifying table and upload its users
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Show which audiences a sync would create or reuse, without writing
    Plan {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

fn build_clients(config: &CliConfig, secrets: Secrets) -> Result<(BigQueryClient, GraphApiClient)> {
    let mut warehouse = BigQueryClient::new(
        config.warehouse.project_id.clone(),
        secrets.warehouse_token,
    )
    .map_err(anyhow::Error::msg)?
    .with_location(config.warehouse.location.clone());
    if let Ok(base_url) = std::env::var("BIGQUERY_BASE_URL") {
        warehouse = warehouse.with_base_url(base_url);
    }

    let mut ads = GraphApiClient::new(
        secrets.app_id,
        &secrets.app_secret,
        secrets.access_token,
        config.ads.api_version.clone(),
    )
    .map_err(anyhow::Error::msg)?;
    if let Ok(base_url) = std::env::var("GRAPH_API_BASE_URL") {
        ads = ads.with_base_url(base_url);
    }

    Ok((warehouse, ads))
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config } => {
            let file = load_config(config)?;
            let sync_config = file.synchronise_config()?;
            let (warehouse, ads) = build_clients(&file, load_secrets()?)?;

            println!("Synchronise starting...");
            match handle_invocation((), &sync_config, &warehouse, &ads).await {
                Ok(message) => {
                    println!("{message}");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] Synchronisation failed: {}", e);
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::Plan { config } => {
            let file = load_config(config)?;
            let sync_config = file.synchronise_config()?;
            let (warehouse, ads) = build_clients(&file, load_secrets()?)?;

            let planned = plan(&sync_config, &warehouse, &ads)
                .await
                .map_err(anyhow::Error::new)?;
            if planned.is_empty() {
                println!("No qualifying tables in {}.", sync_config.dataset_id);
            }
            for entry in planned {
                match entry.existing_audience_id {
                    Some(id) => println!(
                        "{} ({} rows) -> {} [reuse {}]",
                        entry.table.table_id, entry.table.row_count, entry.table.audience_name, id
                    ),
                    None => println!(
                        "{} ({} rows) -> {} [create]",
                        entry.table.table_id, entry.table.row_count, entry.table.audience_name
                    ),
                }
                if !entry.missing_columns.is_empty() {
                    println!("  missing columns: {}", entry.missing_columns.join(", "));
                }
            }
            Ok(())
        }
    }
}
