use chronicle_core::{RevisionError, VersionedRecord};
use rusqlite::Connection;

/// Column names the store manages itself on every versioned table.
const RESERVED: &[&str] = &["id", "cid", "is_trash"];

/// Check that the model's versioning configuration only names declared
/// fields and that no domain field collides with a store-managed column.
pub fn validate_versioning<M: VersionedRecord>() -> Result<(), RevisionError> {
    for spec in M::FIELDS {
        if RESERVED.contains(&spec.name) {
            return Err(RevisionError::Config(format!(
                "field '{}' on {} collides with a store-managed column",
                spec.name,
                M::TABLE
            )));
        }
    }

    let versioning = M::versioning();
    let mut named: Vec<&'static str> = Vec::new();
    named.extend(versioning.comparator);
    named.extend(versioning.publication_date);
    named.extend(versioning.clear_on_revise);
    for check in versioning.unique_checks() {
        named.extend(check);
    }
    for name in named {
        if !M::has_field(name) {
            return Err(RevisionError::Config(format!(
                "versioning for {} names undeclared field '{}'",
                M::TABLE,
                name
            )));
        }
    }
    Ok(())
}

/// Build the CREATE TABLE statement for a versioned model: autoincrement
/// primary key, indexed content id, trash flag, then the declared domain
/// columns.
pub fn create_table_sql<M: VersionedRecord>() -> Result<String, RevisionError> {
    validate_versioning::<M>()?;

    let mut columns = vec![
        "id          INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        "cid         TEXT".to_string(),
        "is_trash    INTEGER NOT NULL DEFAULT 0".to_string(),
    ];
    for spec in M::FIELDS {
        columns.push(format!("{:<11} {}", spec.name, spec.ty.sql_type()));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {columns}\n);\n\
         CREATE INDEX IF NOT EXISTS idx_{table}_cid ON {table}(cid);",
        table = M::TABLE,
        columns = columns.join(",\n    "),
    ))
}

/// Create the model's table and content-id index if they do not exist.
pub fn init_table<M: VersionedRecord>(conn: &Connection) -> Result<(), RevisionError> {
    conn.execute_batch(&create_table_sql::<M>()?)?;
    Ok(())
}
