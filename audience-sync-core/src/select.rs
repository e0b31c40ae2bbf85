//! Table selection: which warehouse tables become audiences, and under which name.

use serde::Serialize;
use tracing::{debug, info};

use crate::contract::Warehouse;
use crate::error::SyncError;

/// Tables with fewer rows than this are not worth an audience.
pub const MIN_AUDIENCE_ROWS: u64 = 1000;

/// Appended to every derived audience name ("offline to online").
pub const AUDIENCE_NAME_SUFFIX: &str = " O2O";

// Applied in order, on substrings. "cat" matches inside longer words too.
const NAME_SUBSTITUTIONS: [(&str, &str); 4] = [
    ("_", " "),
    ("cat", "vehicle category:"),
    ("event", "event name:"),
    ("channel", "channel:"),
];

/// A table that qualified for synchronisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    pub table_id: String,
    pub row_count: u64,
    pub audience_name: String,
    /// Column names reported by the table's metadata.
    #[serde(skip)]
    pub columns: Vec<String>,
}

/// Derive the audience display name for a table id.
///
/// `channel_event_cat` becomes `CHANNEL: EVENT NAME: VEHICLE CATEGORY: O2O`.
pub fn derive_audience_name(table_id: &str) -> String {
    let mut name = table_id.to_string();
    for (from, to) in NAME_SUBSTITUTIONS {
        name = name.replace(from, to);
    }
    name.to_uppercase() + AUDIENCE_NAME_SUFFIX
}

pub fn qualifies(row_count: u64, min_rows: u64) -> bool {
    row_count >= min_rows
}

/// List the dataset's tables and keep those with at least `min_rows` rows.
///
/// Row counts come from a per-table metadata fetch, not from the listing.
/// The result keeps the warehouse's listing order. Any collaborator failure
/// aborts the whole selection.
pub async fn select_audience_tables<W>(
    warehouse: &W,
    dataset_id: &str,
    min_rows: u64,
) -> Result<Vec<TableDescriptor>, SyncError>
where
    W: Warehouse + ?Sized,
{
    let tables = warehouse
        .list_tables(dataset_id)
        .await
        .map_err(|e| SyncError::warehouse(format!("list tables in {dataset_id}"), e))?;
    info!(
        dataset_id,
        tables = tables.len(),
        "[SELECT] Listed dataset tables"
    );

    let mut selected = Vec::new();
    for table in &tables {
        let metadata = warehouse.get_table(table).await.map_err(|e| {
            SyncError::warehouse(format!("get table {}", table.qualified_name()), e)
        })?;

        if !qualifies(metadata.row_count, min_rows) {
            debug!(
                table_id = %metadata.table_id,
                row_count = metadata.row_count,
                min_rows,
                "[SELECT] Skipping table below row threshold"
            );
            continue;
        }

        let audience_name = derive_audience_name(&metadata.table_id);
        debug!(
            table_id = %metadata.table_id,
            row_count = metadata.row_count,
            audience_name = %audience_name,
            "[SELECT] Table qualifies"
        );
        selected.push(TableDescriptor {
            table_id: metadata.table_id,
            row_count: metadata.row_count,
            audience_name,
            columns: metadata.schema,
        });
    }

    info!(
        dataset_id,
        selected = selected.len(),
        "[SELECT] Selected audience tables"
    );
    Ok(selected)
}
