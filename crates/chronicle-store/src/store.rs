use chrono::{DateTime, Utc};
use chronicle_core::{
    encode_timestamp, FieldSpec, FieldType, FieldValue, RevisionError, UniqueViolation,
    VersionedRecord,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

type Result<T> = std::result::Result<T, RevisionError>;

/// All revisions of one content bundle, ordered ascending by comparator,
/// with the neighbours of the record the query was anchored on.
#[derive(Debug)]
pub struct RevisionSet<M> {
    pub revisions: Vec<M>,
    /// Greatest comparator strictly less than the anchor's, if any.
    pub prev: Option<M>,
    /// Least comparator strictly greater than the anchor's, if any.
    pub next: Option<M>,
}

/// How a revert target is identified.
#[derive(Debug)]
pub enum Selector<M> {
    /// A concrete row by primary key.
    Pk(i64),
    /// The newest revision published at or before this instant. Requires a
    /// configured publication-date field.
    Date(DateTime<Utc>),
    /// An already-resolved record.
    Record(M),
}

/// Persist the record: assign a bundle token on first contact, validate
/// bundle-scoped uniqueness, then insert (no pk) or update in place.
///
/// A model ordered by a domain field gets `touch()`ed here when that field
/// is still `Null`, so first saves stamp their own comparator.
pub fn save<M: VersionedRecord>(conn: &Connection, record: &mut M) -> Result<()> {
    if record.content_id().is_none() {
        // The first revision has no pk to derive an id from, so the bundle
        // gets a generated token.
        record.set_content_id(Some(Uuid::new_v4().simple().to_string()));
    }
    if let Some(spec) = comparator_spec::<M>()? {
        if record.field(spec.name)?.is_null() {
            record.touch();
        }
    }

    validate_bundle(conn, record)?;
    match record.pk() {
        None => {
            insert(conn, record)?;
            debug!(table = M::TABLE, pk = ?record.pk(), "inserted revision");
        }
        Some(pk) => {
            update_in_place(conn, record, pk)?;
            debug!(table = M::TABLE, pk, "updated revision in place");
        }
    }
    Ok(())
}

/// Create a new revision: a plain insert for a record that was never
/// persisted (establishing the bundle), otherwise a clone of the current
/// row. Existing rows are never overwritten; on return the record is the
/// freshly inserted revision.
pub fn revise<M: VersionedRecord>(conn: &Connection, record: &mut M) -> Result<()> {
    if record.pk().is_none() {
        return save(conn, record);
    }
    let fresh = clone_revision(conn, record)?;
    *record = fresh;
    Ok(())
}

/// Insert a copy of the record as a new row in the same bundle: every
/// domain field carries over, the comparator is seeded with the bundle's
/// current maximum and refreshed via `touch()` so the clone orders last.
pub fn clone_revision<M: VersionedRecord>(conn: &Connection, record: &M) -> Result<M> {
    if record.pk().is_none() {
        return Err(RevisionError::NoRevisions);
    }
    let cid = bundle_id(record)?.to_string();

    let mut fresh = M::blank();
    fresh.set_content_id(Some(cid.clone()));
    fresh.set_trashed(record.is_trashed());
    for spec in M::FIELDS {
        fresh.set_field(spec.name, record.field(spec.name)?)?;
    }

    if let Some(spec) = comparator_spec::<M>()? {
        let ceiling = max_comparator::<M>(conn, &cid, spec)?;
        fresh.set_field(spec.name, ceiling.clone())?;
        fresh.touch();
        let refreshed = fresh.field(spec.name)?;
        if refreshed.partial_cmp(&ceiling) != Some(std::cmp::Ordering::Greater) {
            return Err(RevisionError::Config(format!(
                "comparator '{}' on {} must be refreshed past the bundle maximum by touch()",
                spec.name,
                M::TABLE
            )));
        }
    }

    validate_bundle(conn, &fresh)?;
    insert(conn, &mut fresh)?;
    debug!(table = M::TABLE, cid = %cid, pk = ?fresh.pk(), "cloned revision forward");
    Ok(fresh)
}

/// Explicit in-place edit of an existing revision: a typo fix that should
/// not enter the history. The record must already be persisted.
pub fn small_change<M: VersionedRecord>(conn: &Connection, record: &mut M) -> Result<()> {
    if record.pk().is_none() {
        return Err(RevisionError::NoRevisions);
    }
    save(conn, record)
}

/// Check every bundle-scoped uniqueness constraint: a declared value (or
/// value tuple) may recur within this record's own bundle but must not
/// appear in any other bundle. Constraints with a `Null` member are
/// skipped. Violations are translated into the integrity error callers
/// also see for store-level constraint failures.
pub fn validate_bundle<M: VersionedRecord>(conn: &Connection, record: &M) -> Result<()> {
    for fields in M::versioning().unique_checks() {
        let mut values = Vec::with_capacity(fields.len());
        for name in &fields {
            values.push(record.field(name)?);
        }
        if values.iter().any(FieldValue::is_null) {
            continue;
        }

        let clauses: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{} = ?{}", name, i + 1))
            .collect();
        let mut sql = format!(
            "SELECT 1 FROM {} WHERE {}",
            M::TABLE,
            clauses.join(" AND ")
        );
        let mut params: Vec<Value> = values.iter().map(sql_value).collect();
        if let Some(cid) = record.content_id() {
            params.push(Value::Text(cid.to_string()));
            sql.push_str(&format!(" AND cid <> ?{}", params.len()));
        }
        sql.push_str(" LIMIT 1");

        let taken = conn
            .query_row(&sql, params_from_iter(params), |_| Ok(()))
            .optional()?;
        if taken.is_some() {
            return Err(UniqueViolation { fields }.into());
        }
    }
    Ok(())
}

/// Fetch a single revision by primary key.
pub fn get_revision<M: VersionedRecord>(conn: &Connection, pk: i64) -> Result<Option<M>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        select_columns::<M>(),
        M::TABLE
    );
    conn.query_row(&sql, params![pk], from_row::<M>)
        .optional()
        .map_err(Into::into)
}

/// All revisions sharing the record's bundle, plus its immediate
/// neighbours in comparator order.
pub fn revisions_of<M: VersionedRecord>(conn: &Connection, record: &M) -> Result<RevisionSet<M>> {
    let cid = bundle_id(record)?;
    let comparator = comparator_column::<M>()?;

    let sql = format!(
        "SELECT {} FROM {} WHERE cid = ?1 ORDER BY {} ASC",
        select_columns::<M>(),
        M::TABLE,
        comparator
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![cid], from_row::<M>)?;
    let mut revisions = Vec::new();
    for row in rows {
        revisions.push(row?);
    }

    let anchor = comparator_value(record)?;
    let prev = adjacent::<M>(conn, cid, &anchor, Direction::Before)?;
    let next = adjacent::<M>(conn, cid, &anchor, Direction::After)?;
    Ok(RevisionSet {
        revisions,
        prev,
        next,
    })
}

/// The revision with the greatest comparator in the record's bundle.
pub fn latest_revision<M: VersionedRecord>(conn: &Connection, record: &M) -> Result<M> {
    let cid = bundle_id(record)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE cid = ?1 ORDER BY {} DESC LIMIT 1",
        select_columns::<M>(),
        M::TABLE,
        comparator_column::<M>()?
    );
    conn.query_row(&sql, params![cid], from_row::<M>)
        .optional()?
        .ok_or(RevisionError::NoRevisions)
}

/// Whether no revision in the bundle orders after this one.
pub fn is_latest<M: VersionedRecord>(conn: &Connection, record: &M) -> Result<bool> {
    let cid = bundle_id(record)?;
    let anchor = comparator_value(record)?;
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE cid = ?1 AND {} > ?2",
        M::TABLE,
        comparator_column::<M>()?
    );
    let newer: i64 = conn.query_row(&sql, params![cid, anchor], |row| row.get(0))?;
    Ok(newer == 0)
}

/// Clone the record forward if it is not already the latest revision.
pub fn make_latest<M: VersionedRecord>(conn: &Connection, record: &mut M) -> Result<()> {
    if !is_latest(conn, record)? {
        revise(conn, record)?;
    }
    Ok(())
}

/// The latest revision of every bundle that is not in the trash.
pub fn latest_per_bundle<M: VersionedRecord>(conn: &Connection) -> Result<Vec<M>> {
    let comparator = comparator_column::<M>()?;
    let sql = format!(
        "SELECT {cols} FROM {table} AS a \
         WHERE a.is_trash = 0 AND a.{cmp} = \
         (SELECT MAX(b.{cmp}) FROM {table} AS b WHERE b.cid = a.cid) \
         ORDER BY a.id",
        cols = select_columns::<M>(),
        table = M::TABLE,
        cmp = comparator
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], from_row::<M>)?;
    let mut latest = Vec::new();
    for row in rows {
        latest.push(row?);
    }
    Ok(latest)
}

/// The value a field held in each revision of the bundle, oldest first.
pub fn field_history<M: VersionedRecord>(
    conn: &Connection,
    record: &M,
    field: &str,
) -> Result<Vec<(FieldValue, M)>> {
    if !M::has_field(field) {
        return Err(RevisionError::UnknownField(field.to_string()));
    }
    let set = revisions_of(conn, record)?;
    set.revisions
        .into_iter()
        .map(|revision| Ok((revision.field(field)?, revision)))
        .collect()
}

/// Resolve a selector to a concrete revision. Date selectors pick the
/// greatest-comparator revision published at or before the given instant
/// and require a configured publication-date field.
pub fn resolve<M: VersionedRecord>(conn: &Connection, selector: Selector<M>) -> Result<M> {
    match selector {
        Selector::Record(record) => Ok(record),
        Selector::Pk(pk) => get_revision(conn, pk)?.ok_or_else(|| RevisionError::NotFound {
            table: M::TABLE,
            key: pk.to_string(),
        }),
        Selector::Date(date) => {
            let column = M::versioning().publication_date.ok_or_else(|| {
                RevisionError::Config(format!(
                    "no publication date field declared for {}; date selectors need one",
                    M::TABLE
                ))
            })?;
            if !M::has_field(column) {
                return Err(RevisionError::Config(format!(
                    "publication date field '{}' is not declared on {}",
                    column,
                    M::TABLE
                )));
            }
            let key = encode_timestamp(&date);
            let sql = format!(
                "SELECT {} FROM {} WHERE {} <= ?1 ORDER BY {} DESC LIMIT 1",
                select_columns::<M>(),
                M::TABLE,
                column,
                comparator_column::<M>()?
            );
            conn.query_row(&sql, params![key], from_row::<M>)
                .optional()?
                .ok_or(RevisionError::NotFound {
                    table: M::TABLE,
                    key,
                })
        }
    }
}

/// Revert the bundle to an earlier revision: resolve the selector, verify
/// the target row belongs to the same bundle, then clone it forward as the
/// new latest revision. The target row itself is never touched.
pub fn revert_to<M: VersionedRecord>(
    conn: &Connection,
    record: &M,
    selector: Selector<M>,
) -> Result<M> {
    let cid = bundle_id(record)?;
    let target = resolve(conn, selector)?;
    let target_pk = target.pk().ok_or(RevisionError::NoRevisions)?;

    let sql = format!("SELECT 1 FROM {} WHERE id = ?1 AND cid = ?2", M::TABLE);
    let member = conn
        .query_row(&sql, params![target_pk, cid], |_| Ok(()))
        .optional()?;
    if member.is_none() {
        return Err(RevisionError::NotInBundle { pk: target_pk });
    }

    clone_revision(conn, &target)
}

/// Mark every revision of the bundle as trash. Reversible; no rows are
/// removed. Trashing an individual revision makes no sense: either the
/// bundle keeps a history or it does not. To undo one revision, revert.
pub fn trash<M: VersionedRecord>(conn: &Connection, record: &mut M) -> Result<usize> {
    let rows = set_trash_flag(conn, record, true)?;
    debug!(table = M::TABLE, rows, "trashed bundle");
    Ok(rows)
}

/// Take every revision of the bundle back out of the trash.
pub fn restore<M: VersionedRecord>(conn: &Connection, record: &mut M) -> Result<usize> {
    let rows = set_trash_flag(conn, record, false)?;
    debug!(table = M::TABLE, rows, "restored bundle");
    Ok(rows)
}

/// Irreversibly delete every revision row of the bundle.
pub fn purge<M: VersionedRecord>(conn: &Connection, record: &M) -> Result<usize> {
    let cid = bundle_id(record)?;
    let sql = format!("DELETE FROM {} WHERE cid = ?1", M::TABLE);
    let rows = conn.execute(&sql, params![cid])?;
    debug!(table = M::TABLE, cid = %cid, rows, "purged bundle");
    Ok(rows)
}

/// Delete a single revision row. Returns whether a row was removed.
pub fn delete_revision<M: VersionedRecord>(conn: &Connection, record: &M) -> Result<bool> {
    let pk = record.pk().ok_or(RevisionError::NoRevisions)?;
    let sql = format!("DELETE FROM {} WHERE id = ?1", M::TABLE);
    let rows = conn.execute(&sql, params![pk])?;
    Ok(rows > 0)
}

fn set_trash_flag<M: VersionedRecord>(
    conn: &Connection,
    record: &mut M,
    trashed: bool,
) -> Result<usize> {
    let sql = format!("UPDATE {} SET is_trash = ?1 WHERE cid = ?2", M::TABLE);
    let rows = {
        let cid = bundle_id(record)?;
        conn.execute(&sql, params![trashed as i64, cid])?
    };
    record.set_trashed(trashed);
    Ok(rows)
}

enum Direction {
    Before,
    After,
}

fn adjacent<M: VersionedRecord>(
    conn: &Connection,
    cid: &str,
    anchor: &Value,
    direction: Direction,
) -> Result<Option<M>> {
    let comparator = comparator_column::<M>()?;
    let (op, order) = match direction {
        Direction::Before => ("<", "DESC"),
        Direction::After => (">", "ASC"),
    };
    let sql = format!(
        "SELECT {} FROM {} WHERE cid = ?1 AND {} {} ?2 ORDER BY {} {} LIMIT 1",
        select_columns::<M>(),
        M::TABLE,
        comparator,
        op,
        comparator,
        order
    );
    conn.query_row(&sql, params![cid, anchor], from_row::<M>)
        .optional()
        .map_err(Into::into)
}

fn bundle_id<M: VersionedRecord>(record: &M) -> Result<&str> {
    record.content_id().ok_or(RevisionError::NoRevisions)
}

fn comparator_spec<M: VersionedRecord>() -> Result<Option<FieldSpec>> {
    match M::versioning().comparator {
        Some(name) => match M::FIELDS.iter().find(|spec| spec.name == name) {
            Some(spec) => Ok(Some(*spec)),
            None => Err(RevisionError::Config(format!(
                "comparator field '{}' is not declared on {}",
                name,
                M::TABLE
            ))),
        },
        None => Ok(None),
    }
}

fn comparator_column<M: VersionedRecord>() -> Result<&'static str> {
    Ok(comparator_spec::<M>()?.map(|spec| spec.name).unwrap_or("id"))
}

/// The record's comparator as a SQL parameter; the pk for models without a
/// configured comparator field.
fn comparator_value<M: VersionedRecord>(record: &M) -> Result<Value> {
    match M::versioning().comparator {
        Some(name) => Ok(sql_value(&record.field(name)?)),
        None => match record.pk() {
            Some(pk) => Ok(Value::Integer(pk)),
            None => Err(RevisionError::NoRevisions),
        },
    }
}

fn max_comparator<M: VersionedRecord>(
    conn: &Connection,
    cid: &str,
    spec: FieldSpec,
) -> Result<FieldValue> {
    let sql = format!("SELECT MAX({}) FROM {} WHERE cid = ?1", spec.name, M::TABLE);
    let value = conn.query_row(&sql, params![cid], |row| read_field(row, 0, spec.ty))?;
    Ok(value)
}

fn select_columns<M: VersionedRecord>() -> String {
    let mut columns = vec!["id", "cid", "is_trash"];
    columns.extend(M::FIELDS.iter().map(|spec| spec.name));
    columns.join(", ")
}

fn from_row<M: VersionedRecord>(row: &Row) -> rusqlite::Result<M> {
    let mut record = M::blank();
    record.set_pk(Some(row.get(0)?));
    record.set_content_id(row.get(1)?);
    record.set_trashed(row.get::<_, i64>(2)? != 0);
    for (offset, spec) in M::FIELDS.iter().enumerate() {
        let value = read_field(row, 3 + offset, spec.ty)?;
        if record.set_field(spec.name, value).is_err() {
            return Err(rusqlite::Error::InvalidColumnName(spec.name.to_string()));
        }
    }
    Ok(record)
}

fn read_field(row: &Row, idx: usize, ty: FieldType) -> rusqlite::Result<FieldValue> {
    let value = match ty {
        FieldType::Integer => row.get::<_, Option<i64>>(idx)?.into(),
        FieldType::Real => row.get::<_, Option<f64>>(idx)?.into(),
        FieldType::Text => row.get::<_, Option<String>>(idx)?.into(),
        FieldType::Timestamp => match row.get::<_, Option<String>>(idx)? {
            Some(text) => {
                let ts = chronicle_core::decode_timestamp(&text).map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(
                        idx,
                        rusqlite::types::Type::Text,
                        Box::new(err),
                    )
                })?;
                FieldValue::Timestamp(ts)
            }
            None => FieldValue::Null,
        },
    };
    Ok(value)
}

fn sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Integer(v) => Value::Integer(*v),
        FieldValue::Real(v) => Value::Real(*v),
        FieldValue::Text(v) => Value::Text(v.clone()),
        FieldValue::Timestamp(v) => Value::Text(encode_timestamp(v)),
    }
}

fn insert<M: VersionedRecord>(conn: &Connection, record: &mut M) -> Result<()> {
    let mut columns = vec!["cid", "is_trash"];
    columns.extend(M::FIELDS.iter().map(|spec| spec.name));
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();

    let mut params: Vec<Value> = vec![
        match record.content_id() {
            Some(cid) => Value::Text(cid.to_string()),
            None => Value::Null,
        },
        Value::Integer(record.is_trashed() as i64),
    ];
    for spec in M::FIELDS {
        params.push(sql_value(&record.field(spec.name)?));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        M::TABLE,
        columns.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, params_from_iter(params))
        .map_err(integrity_err)?;
    record.set_pk(Some(conn.last_insert_rowid()));
    Ok(())
}

fn update_in_place<M: VersionedRecord>(conn: &Connection, record: &M, pk: i64) -> Result<()> {
    let mut assignments = vec!["cid = ?1".to_string(), "is_trash = ?2".to_string()];
    let mut params: Vec<Value> = vec![
        match record.content_id() {
            Some(cid) => Value::Text(cid.to_string()),
            None => Value::Null,
        },
        Value::Integer(record.is_trashed() as i64),
    ];
    for spec in M::FIELDS {
        params.push(sql_value(&record.field(spec.name)?));
        assignments.push(format!("{} = ?{}", spec.name, params.len()));
    }
    params.push(Value::Integer(pk));

    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{}",
        M::TABLE,
        assignments.join(", "),
        params.len()
    );
    conn.execute(&sql, params_from_iter(params))
        .map_err(integrity_err)?;
    Ok(())
}

/// Surface SQLite constraint failures as the same integrity variant used
/// for bundle-scoped uniqueness violations.
fn integrity_err(err: rusqlite::Error) -> RevisionError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            RevisionError::Integrity(err.to_string())
        }
        _ => RevisionError::Sqlite(err),
    }
}
