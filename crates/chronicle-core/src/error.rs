use thiserror::Error;

#[derive(Debug, Error)]
pub enum RevisionError {
    /// Versioning configuration names a field that does not exist, or an
    /// operation needs configuration that was never declared. Fatal.
    #[error("Versioning misconfigured: {0}")]
    Config(String),

    #[error("No {table} row matches {key}")]
    NotFound { table: &'static str, key: String },

    /// A revert target that resolved to a row outside the content bundle.
    #[error("Primary key {pk} is not part of the content bundle")]
    NotInBundle { pk: i64 },

    /// Bundle-scoped uniqueness violations and store-level constraint
    /// failures, surfaced uniformly.
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Traversal over a record that was never persisted.
    #[error("Record has no persisted revisions")]
    NoRevisions,

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Validation failure for a bundle-scoped uniqueness constraint. Translated
/// into [`RevisionError::Integrity`] at the operation boundary so callers
/// handle it the same way as a store-level constraint failure.
#[derive(Debug, Error)]
#[error("Value for {fields:?} already belongs to another content bundle")]
pub struct UniqueViolation {
    pub fields: Vec<&'static str>,
}

impl From<UniqueViolation> for RevisionError {
    fn from(violation: UniqueViolation) -> Self {
        RevisionError::Integrity(violation.to_string())
    }
}
