/// Errors that can occur within the storage layer.
///
/// Store methods on [`crate::FacilityStore`] return `anyhow::Result` at the
/// surface; this type captures the failures that need structure, in
/// particular decode failures when a stored string column no longer parses
/// into its domain enum.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A stored string column does not parse into its domain enum.
    #[error("Storage: invalid value '{value}' in column '{column}'")]
    Decode { column: &'static str, value: String },

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// JSON serialization or deserialization failure (severity_overrides_json).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

pub(crate) fn decode<T: std::str::FromStr>(
    column: &'static str,
    value: &str,
) -> Result<T> {
    value.parse().map_err(|_| StorageError::Decode {
        column,
        value: value.to_string(),
    })
}
