use chronicle_core::{RevisionError, VersionedRecord};
use serde::{Deserialize, Serialize};

use crate::diff::inline_diff;

/// One field's difference between two revisions, ready for a history or
/// diff view to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub name: String,
    pub from: String,
    pub to: String,
    /// Inline HTML rendering of the change.
    pub diff: String,
}

/// Diff a named field between two revisions. Values are coerced to strings
/// first; non-text fields diff as their textual form.
pub fn diff_field<M: VersionedRecord>(
    from: &M,
    to: &M,
    field: &str,
) -> Result<String, RevisionError> {
    let from_text = from.field(field)?.to_string();
    let to_text = to.field(field)?.to_string();
    Ok(inline_diff(&from_text, &to_text))
}

/// Per-field report of how `current` differs from the revision before it.
/// With no previous revision every field diffs against the empty string,
/// rendering as a single insertion.
pub fn diff_against_previous<M: VersionedRecord>(
    current: &M,
    prev: Option<&M>,
) -> Result<Vec<FieldDiff>, RevisionError> {
    let mut report = Vec::with_capacity(M::FIELDS.len());
    for spec in M::FIELDS {
        let to = current.field(spec.name)?.to_string();
        let from = match prev {
            Some(previous) => previous.field(spec.name)?.to_string(),
            None => String::new(),
        };
        report.push(FieldDiff {
            name: spec.name.to_string(),
            diff: inline_diff(&from, &to),
            from,
            to,
        });
    }
    Ok(report)
}
