//! Collaborator contracts: the warehouse and the ads platform.
//!
//! The pipeline never talks to a transport directly. Everything it needs from
//! the outside world goes through [`Warehouse`] and [`AdsPlatform`], which are
//! implemented by the real REST clients in the binary crate and by
//! `mockall` mocks (`MockWarehouse`, `MockAdsPlatform`) in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[allow(unused_imports)]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// Error returned by collaborator implementations. Propagated verbatim.
pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// Reference to a table as returned by a dataset listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    /// `project.dataset.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Authoritative table metadata (listing results may carry stale row counts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub table_id: String,
    pub row_count: u64,
    /// Column names, in schema order.
    pub schema: Vec<String>,
}

/// One result row with lookup by column name.
///
/// `get` distinguishes a column that is absent from the row's schema
/// (`None`) from a column whose cell is null (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    cells: HashMap<String, Option<String>>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful in tests.
    pub fn with(mut self, column: impl Into<String>, value: Option<&str>) -> Self {
        self.cells.insert(column.into(), value.map(str::to_owned));
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Option<String>) {
        self.cells.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<Option<&str>> {
        self.cells.get(column).map(Option::as_deref)
    }
}

impl FromIterator<(String, Option<String>)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

/// Trait for the data warehouse holding the segmented user tables.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// List every table in the dataset, in the order the warehouse returns them.
    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<TableRef>, ClientError>;

    /// Fetch full metadata (row count, schema) for one table.
    async fn get_table(&self, table: &TableRef) -> Result<TableMetadata, ClientError>;

    /// Run a standard-SQL query and return every result row.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, ClientError>;
}

/// Fields that can be requested when listing custom audiences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudienceField {
    Id,
    Name,
    TimeCreated,
}

impl AudienceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudienceField::Id => "id",
            AudienceField::Name => "name",
            AudienceField::TimeCreated => "time_created",
        }
    }
}

/// An existing custom audience as listed by the ads platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudienceSummary {
    pub id: String,
    pub name: String,
    pub time_created: DateTime<Utc>,
}

/// Reference to a platform-side custom audience.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudienceHandle {
    pub id: String,
}

impl AudienceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudienceSubtype {
    Custom,
}

impl AudienceSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudienceSubtype::Custom => "CUSTOM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerFileSource {
    UserProvidedOnly,
}

impl CustomerFileSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerFileSource::UserProvidedOnly => "USER_PROVIDED_ONLY",
        }
    }
}

/// Parameters for creating a custom audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomAudience {
    pub name: String,
    pub description: String,
    pub subtype: AudienceSubtype,
    pub customer_file_source: CustomerFileSource,
}

/// Matching keys, in the order they appear in every uploaded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    FirstName,
    Email,
    LastName,
    Phone,
}

impl UserField {
    /// Schema key understood by the ads platform.
    pub fn key(&self) -> &'static str {
        match self {
            UserField::FirstName => "FN",
            UserField::Email => "EMAIL",
            UserField::LastName => "LN",
            UserField::Phone => "PHONE",
        }
    }

    /// Warehouse column the value is read from.
    pub fn column(&self) -> &'static str {
        match self {
            UserField::FirstName => "mailing_address_first_name",
            UserField::Email => "email",
            UserField::LastName => "mailing_address_last_name",
            UserField::Phone => "phone",
        }
    }
}

/// One audience member, values in `[FN, EMAIL, LN, PHONE]` order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub first_name: Option<String>,
    pub email: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

impl UserRecord {
    /// Values in schema order, as sent on the wire.
    pub fn values(&self) -> [Option<&str>; 4] {
        [
            self.first_name.as_deref(),
            self.email.as_deref(),
            self.last_name.as_deref(),
            self.phone.as_deref(),
        ]
    }
}

/// Multi-request upload session, used when a table is sent in several batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSession {
    pub session_id: u64,
    /// 1-based.
    pub batch_seq: u32,
    pub last_batch_flag: bool,
    pub estimated_num_total: usize,
}

/// Body of a single user upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPayload {
    pub schema: Vec<UserField>,
    pub data: Vec<UserRecord>,
    pub session: Option<UploadSession>,
}

/// What the ads platform reports back for one upload call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResult {
    pub audience_id: String,
    pub num_received: u64,
    pub num_invalid_entries: u64,
}

/// Trait for the advertising platform owning the custom audiences.
///
/// Implementors hold their own credentials; there is no global auth state.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AdsPlatform: Send + Sync {
    /// List every custom audience of the ad account with the requested fields.
    async fn list_custom_audiences(
        &self,
        ad_account_id: &str,
        fields: &[AudienceField],
    ) -> Result<Vec<AudienceSummary>, ClientError>;

    /// Create a custom audience and return a handle to it.
    async fn create_custom_audience(
        &self,
        ad_account_id: &str,
        audience: &NewCustomAudience,
    ) -> Result<AudienceHandle, ClientError>;

    /// Add users to a custom audience.
    async fn upload_users(
        &self,
        audience: &AudienceHandle,
        payload: &UserPayload,
    ) -> Result<UploadResult, ClientError>;
}
