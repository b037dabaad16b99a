use serde::{Deserialize, Serialize};
use similar::utils::diff_chars;
use similar::{Algorithm, ChangeTag};

/// One consolidated segment of a character-level diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiffOp {
    Equal { text: String },
    Insert { text: String },
    Delete { text: String },
}

impl DiffOp {
    pub fn is_change(&self) -> bool {
        !matches!(self, DiffOp::Equal { .. })
    }
}

/// Character-level diff between two strings, as consolidated segments.
pub fn diff_ops(from: &str, to: &str) -> Vec<DiffOp> {
    diff_chars(Algorithm::Myers, from, to)
        .into_iter()
        .map(|(tag, text)| match tag {
            ChangeTag::Equal => DiffOp::Equal {
                text: text.to_string(),
            },
            ChangeTag::Insert => DiffOp::Insert {
                text: text.to_string(),
            },
            ChangeTag::Delete => DiffOp::Delete {
                text: text.to_string(),
            },
        })
        .collect()
}

/// Only the inserted and deleted segments. Identical inputs yield an empty
/// change set.
pub fn changes(from: &str, to: &str) -> Vec<DiffOp> {
    diff_ops(from, to)
        .into_iter()
        .filter(DiffOp::is_change)
        .collect()
}

/// Render diff segments as inline HTML: insertions in `<ins>`, deletions
/// in `<del>`, unchanged text in `<span>`.
pub fn render_inline(ops: &[DiffOp]) -> String {
    let mut html = String::new();
    for op in ops {
        match op {
            DiffOp::Equal { text } => {
                html.push_str("<span>");
                html.push_str(&escape(text));
                html.push_str("</span>");
            }
            DiffOp::Insert { text } => {
                html.push_str("<ins style=\"background:#e6ffe6;\">");
                html.push_str(&escape(text));
                html.push_str("</ins>");
            }
            DiffOp::Delete { text } => {
                html.push_str("<del style=\"background:#ffe6e6;\">");
                html.push_str(&escape(text));
                html.push_str("</del>");
            }
        }
    }
    html
}

/// Diff two strings and render the result inline in one step.
pub fn inline_diff(from: &str, to: &str) -> String {
    render_inline(&diff_ops(from, to))
}

/// HTML-escape a segment; newlines are rendered visibly so single-line
/// diff views keep their shape.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' => out.push_str("&para;<br>"),
            other => out.push(other),
        }
    }
    out
}
