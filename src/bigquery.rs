//! BigQuery REST client: the warehouse side of the pipeline.
//!
//! Implements [`Warehouse`] over the BigQuery v2 REST API with a bearer
//! access token (for example the output of `gcloud auth print-access-token`).
//!
//! - `tables.list` is followed through every `pageToken`.
//! - `tables.get` provides the authoritative `numRows` (an int64 encoded as a string).
//! - `jobs.query` is followed by `jobs.getQueryResults` until the job is
//!   complete and every result page has been read. Cells are mapped to
//!   `Option<String>` by column name using the result schema.

use async_trait::async_trait;
use audience_sync_core::contract::{ClientError, Row, TableMetadata, TableRef, Warehouse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Server-side wait per query/poll request.
const QUERY_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone)]
pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    access_token: String,
    location: Option<String>,
}

/// Error reported by the BigQuery API, message kept verbatim.
#[derive(Debug)]
pub struct BigQueryError {
    pub status: u16,
    pub message: String,
}

impl fmt::Display for BigQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BigQuery returned {}: {}", self.status, self.message)
    }
}

impl std::error::Error for BigQueryError {}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListEntry>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListEntry {
    table_reference: TableReference,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    table_reference: TableReference,
    num_rows: Option<String>,
    schema: Option<TableSchema>,
}

#[derive(Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Deserialize)]
struct FieldSchema {
    name: String,
}

impl TableSchema {
    fn column_names(self) -> Vec<String> {
        self.fields.into_iter().map(|f| f.name).collect()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
    job_reference: Option<JobReference>,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Deserialize)]
struct TableCell {
    v: serde_json::Value,
}

fn cell_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn to_row(columns: &[String], row: TableRow) -> Row {
    columns
        .iter()
        .cloned()
        .zip(row.f.into_iter().map(|cell| cell_text(cell.v)))
        .collect()
}

impl BigQueryClient {
    /// Creates a client for `project_id` authenticated with a bearer token.
    pub fn new(project_id: String, access_token: String) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BIGQUERY_BASE_URL.to_string(),
            project_id,
            access_token,
            location: None,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.bearer_auth(&self.access_token).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            tracing::error!(status, message = %message, "BigQuery request failed");
            return Err(Box::new(BigQueryError { status, message }));
        }

        Ok(response.json().await?)
    }

    async fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, ClientError> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.base_url, self.project_id, job.job_id
        );
        let mut params = vec![("timeoutMs", QUERY_TIMEOUT_MS.to_string())];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.send(self.http.get(&url).query(&params)).await
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<TableRef>, ClientError> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables",
            self.base_url, self.project_id, dataset_id
        );
        tracing::info!(project_id = %self.project_id, dataset_id, "Listing BigQuery tables");

        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.http.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: TableList = self.send(request).await?;
            tables.extend(page.tables.into_iter().map(|entry| TableRef {
                project_id: entry.table_reference.project_id,
                dataset_id: entry.table_reference.dataset_id,
                table_id: entry.table_reference.table_id,
            }));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::info!(dataset_id, tables = tables.len(), "Listed BigQuery tables");
        Ok(tables)
    }

    async fn get_table(&self, table: &TableRef) -> Result<TableMetadata, ClientError> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.base_url, table.project_id, table.dataset_id, table.table_id
        );
        let resource: TableResource = self.send(self.http.get(&url)).await?;

        let row_count = match resource.num_rows.as_deref() {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                format!(
                    "Invalid numRows {:?} for table {}: {}",
                    raw,
                    table.qualified_name(),
                    e
                )
            })?,
            None => 0,
        };
        tracing::debug!(table = %table.qualified_name(), row_count, "Fetched BigQuery table metadata");

        Ok(TableMetadata {
            table_id: resource.table_reference.table_id,
            row_count,
            schema: resource
                .schema
                .map(TableSchema::column_names)
                .unwrap_or_default(),
        })
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, ClientError> {
        let url = format!("{}/projects/{}/queries", self.base_url, self.project_id);
        let body = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: QUERY_TIMEOUT_MS,
            location: self.location.as_deref(),
        };
        tracing::info!(project_id = %self.project_id, "Running BigQuery query");

        let mut page: QueryResponse = self.send(self.http.post(&url).json(&body)).await?;
        let job = page.job_reference.clone();
        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        loop {
            let mut next_page = None;
            if page.job_complete {
                if columns.is_none() {
                    columns = page.schema.take().map(TableSchema::column_names);
                }
                let names = columns
                    .as_deref()
                    .ok_or("BigQuery query result carries no schema")?;
                rows.extend(page.rows.drain(..).map(|row| to_row(names, row)));
                match page.page_token.take() {
                    Some(token) => next_page = Some(token),
                    None => break,
                }
            }

            let job_ref = job
                .as_ref()
                .ok_or("BigQuery query response carries no job reference")?;
            page = self.get_query_results(job_ref, next_page.as_deref()).await?;
        }

        tracing::info!(rows = rows.len(), "BigQuery query complete");
        Ok(rows)
    }
}
