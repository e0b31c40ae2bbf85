//! High-level pipeline: orchestrates select → resolve → provision → upload.
//!
//! This module is the driver of a synchronisation run. It:
//!   - Selects the dataset tables large enough to become audiences, and names them
//!   - Indexes the custom audiences already present on the ad account
//!   - For each selected table, in listing order: reuses or creates the audience,
//!     queries the table's users and uploads them
//!   - Returns a report of what was provisioned and uploaded
//!
//! # Responsibilities
//! - Strictly sequential: every collaborator call completes before the next one
//!   is issued, and one table's pipeline finishes before the next table starts
//! - Fail-fast: the first error aborts the run; nothing is retried and no later
//!   table is attempted. Audiences created earlier in the run stay in place
//! - Holds no state between runs: the audience index is rebuilt every time
//!
//! # Callable From
//! - The CLI crate (`sync` and `plan` commands) and integration tests
//! - Expects concrete [`Warehouse`] and [`AdsPlatform`] implementations
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]; invocation wrapper: [`handle_invocation`]
//! - Read-only preview: [`plan`]

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::contract::{AdsPlatform, TableRef, Warehouse};
use crate::error::SyncError;
use crate::provision::provision_audience;
use crate::resolve::{resolve_existing_audiences, AudienceIndex};
use crate::select::{select_audience_tables, TableDescriptor};
use crate::users::{fetch_users, missing_user_columns, upload_audience_users, UploadReport};

/// Returned by [`handle_invocation`] when every table was synchronised.
pub const SUCCESS_MESSAGE: &str = "Audience created successfully!";

/// Everything a run needs besides the two clients. Fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchroniseConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub ad_account_id: String,
    pub min_row_count: u64,
    pub created_after: DateTime<Utc>,
    pub upload_batch_size: usize,
}

impl SynchroniseConfig {
    pub fn trace_loaded(&self) {
        info!(
            project_id = %self.project_id,
            dataset_id = %self.dataset_id,
            ad_account_id = %self.ad_account_id,
            min_row_count = self.min_row_count,
            created_after = %self.created_after,
            upload_batch_size = self.upload_batch_size,
            "Loaded SynchroniseConfig"
        );
    }

    fn table_ref(&self, table_id: &str) -> TableRef {
        TableRef {
            project_id: self.project_id.clone(),
            dataset_id: self.dataset_id.clone(),
            table_id: table_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SynchroniseReport {
    pub audiences: Vec<AudienceReport>,
}

#[derive(Debug, Serialize)]
pub struct AudienceReport {
    pub table_id: String,
    pub audience_name: String,
    pub audience_id: String,
    pub created: bool,
    pub users: usize,
    pub upload: UploadReport,
}

/// One qualifying table and what a run would do with it.
#[derive(Debug, Serialize)]
pub struct PlannedAudience {
    pub table: TableDescriptor,
    /// Id of the audience that would be reused, `None` when one would be created.
    pub existing_audience_id: Option<String>,
    /// User columns the table lacks; a sync of this table would fail on them.
    pub missing_columns: Vec<&'static str>,
}

pub async fn synchronise<W, A>(
    config: &SynchroniseConfig,
    warehouse: &W,
    ads: &A,
) -> Result<SynchroniseReport, SyncError>
where
    W: Warehouse + ?Sized,
    A: AdsPlatform + ?Sized,
{
    info!("[SYNC] Starting audience synchronisation");

    let tables = select_audience_tables(warehouse, &config.dataset_id, config.min_row_count)
        .await
        .inspect_err(|e| error!(error = %e, "[SYNC][ERROR] Table selection failed"))?;

    let mut index =
        resolve_existing_audiences(ads, &config.ad_account_id, config.created_after)
            .await
            .inspect_err(|e| error!(error = %e, "[SYNC][ERROR] Audience resolution failed"))?;

    let mut audiences = Vec::with_capacity(tables.len());
    for table in tables {
        info!(
            table_id = %table.table_id,
            audience_name = %table.audience_name,
            "[SYNC] Synchronising table"
        );
        let report = synchronise_table(config, warehouse, ads, &mut index, table)
            .await
            .inspect_err(|e| error!(error = %e, "[SYNC][ERROR] Table synchronisation failed"))?;
        audiences.push(report);
    }

    info!(audiences = audiences.len(), "[SYNC] Synchronisation complete");
    Ok(SynchroniseReport { audiences })
}

async fn synchronise_table<W, A>(
    config: &SynchroniseConfig,
    warehouse: &W,
    ads: &A,
    index: &mut AudienceIndex,
    table: TableDescriptor,
) -> Result<AudienceReport, SyncError>
where
    W: Warehouse + ?Sized,
    A: AdsPlatform + ?Sized,
{
    let created = !index.contains(&table.audience_name);
    let audience =
        provision_audience(ads, &config.ad_account_id, &table.audience_name, index).await?;
    if created {
        // Another table deriving the same name later in this run reuses it.
        index.insert(table.audience_name.clone(), audience.id.clone());
    }

    let users = fetch_users(warehouse, &config.table_ref(&table.table_id)).await?;
    let user_count = users.len();
    let upload = upload_audience_users(ads, &audience, users, config.upload_batch_size).await?;

    Ok(AudienceReport {
        table_id: table.table_id,
        audience_name: table.audience_name,
        audience_id: audience.id,
        created,
        users: user_count,
        upload,
    })
}

/// Run the selector and resolver only. Issues no writes.
pub async fn plan<W, A>(
    config: &SynchroniseConfig,
    warehouse: &W,
    ads: &A,
) -> Result<Vec<PlannedAudience>, SyncError>
where
    W: Warehouse + ?Sized,
    A: AdsPlatform + ?Sized,
{
    let tables = select_audience_tables(warehouse, &config.dataset_id, config.min_row_count).await?;
    let index = resolve_existing_audiences(ads, &config.ad_account_id, config.created_after).await?;

    Ok(tables
        .into_iter()
        .map(|table| PlannedAudience {
            existing_audience_id: index.get(&table.audience_name).map(str::to_owned),
            missing_columns: missing_user_columns(&table.columns),
            table,
        })
        .collect())
}

/// Entry point for a triggered run. The invocation context is accepted for
/// trigger compatibility and not inspected.
pub async fn handle_invocation<C, W, A>(
    _context: C,
    config: &SynchroniseConfig,
    warehouse: &W,
    ads: &A,
) -> Result<&'static str, SyncError>
where
    W: Warehouse + ?Sized,
    A: AdsPlatform + ?Sized,
{
    let report = synchronise(config, warehouse, ads).await?;
    match serde_json::to_string(&report) {
        Ok(json) => tracing::debug!(report = %json, "[SYNC] Run report"),
        Err(e) => error!(error = ?e, "[SYNC] Failed to serialise run report"),
    }
    Ok(SUCCESS_MESSAGE)
}
