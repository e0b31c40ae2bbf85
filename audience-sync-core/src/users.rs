//! Reading audience members out of the warehouse and uploading them.
//!
//! Every row of a qualifying table becomes one [`UserRecord`] with the
//! matching keys `[FN, EMAIL, LN, PHONE]`. Values are sent exactly as stored;
//! the ads platform normalises and hashes them on its side.
//!
//! Uploads are bounded: a table larger than the batch size is sent as a
//! sequence of batches sharing one upload session, so no single request
//! exceeds the platform's per-call limit. A table that fits in one batch
//! goes out in a single session-less call.

use serde::Serialize;
use tracing::{debug, info};

use crate::contract::{
    AdsPlatform, AudienceHandle, Row, TableRef, UploadResult, UploadSession, UserField,
    UserPayload, UserRecord, Warehouse,
};
use crate::error::SyncError;

/// Matching-key order of every uploaded record.
pub const USER_SCHEMA: [UserField; 4] = [
    UserField::FirstName,
    UserField::Email,
    UserField::LastName,
    UserField::Phone,
];

/// Largest number of users the ads platform accepts per upload call.
pub const MAX_UPLOAD_BATCH: usize = 10_000;

/// Aggregate of all upload calls made for one audience.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub batches: usize,
    pub num_received: u64,
    pub num_invalid_entries: u64,
}

impl UploadReport {
    fn record(&mut self, result: &UploadResult) {
        self.batches += 1;
        self.num_received += result.num_received;
        self.num_invalid_entries += result.num_invalid_entries;
    }
}

/// Required user columns absent from `columns`, in matching-key order.
pub fn missing_user_columns(columns: &[String]) -> Vec<&'static str> {
    USER_SCHEMA
        .iter()
        .map(|field| field.column())
        .filter(|column| !columns.iter().any(|c| c == column))
        .collect()
}

/// Unfiltered query over the whole table.
pub fn users_query(table: &TableRef) -> String {
    format!("SELECT *\nFROM `{}`", table.qualified_name())
}

fn field_value(row: &Row, field: UserField, table_id: &str) -> Result<Option<String>, SyncError> {
    match row.get(field.column()) {
        Some(value) => Ok(value.map(str::to_owned)),
        None => Err(SyncError::MissingColumn {
            table_id: table_id.to_string(),
            column: field.column().to_string(),
        }),
    }
}

/// Extract the four matching keys from a result row by column name.
pub fn user_record_from_row(row: &Row, table_id: &str) -> Result<UserRecord, SyncError> {
    Ok(UserRecord {
        first_name: field_value(row, UserField::FirstName, table_id)?,
        email: field_value(row, UserField::Email, table_id)?,
        last_name: field_value(row, UserField::LastName, table_id)?,
        phone: field_value(row, UserField::Phone, table_id)?,
    })
}

/// Query every row of `table` and reshape it into user records.
pub async fn fetch_users<W>(warehouse: &W, table: &TableRef) -> Result<Vec<UserRecord>, SyncError>
where
    W: Warehouse + ?Sized,
{
    let sql = users_query(table);
    debug!(sql = %sql, "[UPLOAD] Querying audience members");

    let rows = warehouse
        .query(&sql)
        .await
        .map_err(|e| SyncError::warehouse(format!("query {}", table.qualified_name()), e))?;

    let users = rows
        .iter()
        .map(|row| user_record_from_row(row, &table.table_id))
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        table = %table.qualified_name(),
        users = users.len(),
        "[UPLOAD] Fetched audience members"
    );
    Ok(users)
}

fn new_session_id() -> u64 {
    // Positive int64, as required by the upload session API.
    (uuid::Uuid::new_v4().as_u128() as u64) & (i64::MAX as u64)
}

/// Upload `users` to `audience`, `batch_size` records per call at most.
///
/// The whole run stops at the first failed call; batches already accepted
/// stay on the platform.
pub async fn upload_audience_users<A>(
    ads: &A,
    audience: &AudienceHandle,
    users: Vec<UserRecord>,
    batch_size: usize,
) -> Result<UploadReport, SyncError>
where
    A: AdsPlatform + ?Sized,
{
    let batch_size = batch_size.clamp(1, MAX_UPLOAD_BATCH);
    let total = users.len();
    let mut report = UploadReport::default();

    if total <= batch_size {
        let payload = UserPayload {
            schema: USER_SCHEMA.to_vec(),
            data: users,
            session: None,
        };
        let result = ads
            .upload_users(audience, &payload)
            .await
            .map_err(|e| SyncError::ads(format!("upload users to audience {}", audience.id), e))?;
        report.record(&result);
        info!(
            audience_id = %audience.id,
            users = total,
            num_received = result.num_received,
            num_invalid_entries = result.num_invalid_entries,
            "[UPLOAD] Uploaded audience members"
        );
        return Ok(report);
    }

    let session_id = new_session_id();
    let batch_count = total.div_ceil(batch_size);
    info!(
        audience_id = %audience.id,
        users = total,
        batch_size,
        batch_count,
        session_id,
        "[UPLOAD] Uploading audience members in batches"
    );

    let mut remaining = users.into_iter().peekable();
    let mut batch_seq: u32 = 0;
    while remaining.peek().is_some() {
        batch_seq += 1;
        let data: Vec<UserRecord> = remaining.by_ref().take(batch_size).collect();
        let session = UploadSession {
            session_id,
            batch_seq,
            last_batch_flag: remaining.peek().is_none(),
            estimated_num_total: total,
        };
        let batch_len = data.len();
        let payload = UserPayload {
            schema: USER_SCHEMA.to_vec(),
            data,
            session: Some(session),
        };
        let result = ads.upload_users(audience, &payload).await.map_err(|e| {
            SyncError::ads(
                format!("upload batch {batch_seq} to audience {}", audience.id),
                e,
            )
        })?;
        report.record(&result);
        debug!(
            audience_id = %audience.id,
            batch_seq,
            users = batch_len,
            num_received = result.num_received,
            "[UPLOAD] Uploaded batch"
        );
    }

    info!(
        audience_id = %audience.id,
        batches = report.batches,
        num_received = report.num_received,
        num_invalid_entries = report.num_invalid_entries,
        "[UPLOAD] Uploaded audience members"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableRef {
        TableRef {
            project_id: "project".into(),
            dataset_id: "dataset".into(),
            table_id: "cat_sales".into(),
        }
    }

    #[test]
    fn reports_missing_user_columns_in_key_order() {
        let columns = vec!["phone".to_string(), "email".to_string(), "extra".to_string()];
        assert_eq!(
            missing_user_columns(&columns),
            vec!["mailing_address_first_name", "mailing_address_last_name"]
        );
    }

    #[test]
    fn query_targets_fully_qualified_table() {
        assert_eq!(users_query(&table()), "SELECT *\nFROM `project.dataset.cat_sales`");
    }

    #[test]
    fn schema_keys_are_in_upload_order() {
        let keys: Vec<&str> = USER_SCHEMA.iter().map(UserField::key).collect();
        assert_eq!(keys, vec!["FN", "EMAIL", "LN", "PHONE"]);
    }

    #[test]
    fn extracts_record_by_column_name_and_keeps_nulls() {
        let row = Row::new()
            .with("mailing_address_first_name", Some("Ana"))
            .with("email", Some("ana@example.com"))
            .with("mailing_address_last_name", None)
            .with("phone", Some("+6281234567"))
            .with("segment", Some("cat"));

        let record = user_record_from_row(&row, "cat_sales").unwrap();

        assert_eq!(
            record.values(),
            [Some("Ana"), Some("ana@example.com"), None, Some("+6281234567")]
        );
    }

    #[test]
    fn missing_column_is_an_error() {
        let row = Row::new()
            .with("mailing_address_first_name", Some("Ana"))
            .with("email", Some("ana@example.com"))
            .with("mailing_address_last_name", Some("Lee"));

        let err = user_record_from_row(&row, "cat_sales").unwrap_err();
        match err {
            SyncError::MissingColumn { table_id, column } => {
                assert_eq!(table_id, "cat_sales");
                assert_eq!(column, "phone");
            }
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }
}
