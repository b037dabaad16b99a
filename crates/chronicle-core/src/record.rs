use crate::error::RevisionError;
use crate::value::{FieldSpec, FieldValue};

/// Per-model versioning configuration.
///
/// The defaults describe the common case: revisions ordered by primary key,
/// no date-based revert selectors, no bundle-scoped uniqueness, nothing
/// cleared between revisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Versioning {
    /// Field establishing revision order within a bundle. `None` means the
    /// integer primary key.
    pub comparator: Option<&'static str>,
    /// Field used to resolve date-based revert selectors. Date selectors
    /// without this configured are a fatal configuration error.
    pub publication_date: Option<&'static str>,
    /// Single fields unique across bundles: a value may recur within one
    /// bundle's revisions but must not appear in any other bundle.
    pub unique: &'static [&'static str],
    /// Field tuples unique across bundles, same semantics as `unique`.
    pub unique_together: &'static [&'static [&'static str]],
    /// Per-revision fields (e.g. a log message) cleared when preparing a
    /// new revision for writing.
    pub clear_on_revise: &'static [&'static str],
}

impl Versioning {
    /// Every bundle-scoped uniqueness constraint, single fields first.
    pub fn unique_checks(&self) -> Vec<Vec<&'static str>> {
        let mut checks: Vec<Vec<&'static str>> =
            self.unique.iter().map(|field| vec![*field]).collect();
        checks.extend(self.unique_together.iter().map(|group| group.to_vec()));
        checks
    }
}

/// A record type whose rows form append-only revision bundles.
///
/// All revisions of one logical content item share a content id; the
/// comparator (by default the primary key) totally orders them. Accessors
/// are explicit: there is no dynamic attribute dispatch, and unknown field
/// names surface as [`RevisionError::UnknownField`].
pub trait VersionedRecord: Sized {
    /// Backing table name.
    const TABLE: &'static str;
    /// Declared domain columns, excluding the primary key, content id and
    /// trash flag (the store owns those).
    const FIELDS: &'static [FieldSpec];

    fn versioning() -> Versioning {
        Versioning::default()
    }

    /// A record with no primary key, no content id and every field `Null`.
    /// The store uses this to rebuild rows and cloned revisions.
    fn blank() -> Self;

    fn pk(&self) -> Option<i64>;
    fn set_pk(&mut self, pk: Option<i64>);

    fn content_id(&self) -> Option<&str>;
    fn set_content_id(&mut self, cid: Option<String>);

    fn is_trashed(&self) -> bool;
    fn set_trashed(&mut self, trashed: bool);

    fn field(&self, name: &str) -> Result<FieldValue, RevisionError>;
    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), RevisionError>;

    /// Refresh a non-pk comparator before a cloned revision is inserted,
    /// e.g. stamp a last-changed timestamp or bump a revision counter.
    /// Models ordered by primary key keep the default no-op: a fresh
    /// autoincrement pk is already a fresh comparator.
    fn touch(&mut self) {}

    /// Whether `name` is a declared domain field.
    fn has_field(name: &str) -> bool {
        Self::FIELDS.iter().any(|spec| spec.name == name)
    }

    /// The comparator value of this record: the configured field, or the
    /// primary key (`Null` when unpersisted).
    fn comparator(&self) -> Result<FieldValue, RevisionError> {
        match Self::versioning().comparator {
            Some(name) => self.field(name),
            None => Ok(self.pk().into()),
        }
    }

    /// Set each `clear_on_revise` field to `Null` before writing a new
    /// revision. Per-revision fields should start empty on each edit.
    fn clear_revision_fields(&mut self) -> Result<(), RevisionError> {
        for name in Self::versioning().clear_on_revise {
            self.set_field(name, FieldValue::Null)?;
        }
        Ok(())
    }
}
