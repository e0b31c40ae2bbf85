//! Pipeline error type.

use std::fmt;

use crate::contract::ClientError;

/// Errors that abort a synchronisation run.
///
/// Collaborator failures are kept as the source error so their message
/// reaches the caller unchanged.
#[derive(Debug)]
pub enum SyncError {
    /// The warehouse client failed.
    Warehouse {
        context: String,
        source: ClientError,
    },
    /// The ads platform client failed.
    Ads {
        context: String,
        source: ClientError,
    },
    /// A result row lacks one of the columns a user record is built from.
    MissingColumn { table_id: String, column: String },
}

impl SyncError {
    pub fn warehouse(context: impl Into<String>, source: ClientError) -> Self {
        SyncError::Warehouse {
            context: context.into(),
            source,
        }
    }

    pub fn ads(context: impl Into<String>, source: ClientError) -> Self {
        SyncError::Ads {
            context: context.into(),
            source,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Warehouse { context, source } => {
                write!(f, "Warehouse error ({}): {}", context, source)
            }
            SyncError::Ads { context, source } => {
                write!(f, "Ads platform error ({}): {}", context, source)
            }
            SyncError::MissingColumn { table_id, column } => {
                write!(f, "Field '{}' not found in table '{}'", column, table_id)
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Warehouse { source, .. } | SyncError::Ads { source, .. } => {
                let source: &(dyn std::error::Error + 'static) = source.as_ref();
                Some(source)
            }
            SyncError::MissingColumn { .. } => None,
        }
    }
}
