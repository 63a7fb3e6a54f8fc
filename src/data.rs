//! Row values as they cross the storage boundary.
//!
//! CSV fields are untyped text. Before insertion every field becomes a
//! [`SqlValue`]: either SQL `NULL` (for empty cells and the usual missing-value
//! placeholders) or the text itself. No numeric or temporal typing is applied.

use std::collections::HashSet;

/// Tokens treated as missing values when no explicit list is configured.
pub const DEFAULT_NULL_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Text(String),
}

impl SqlValue {
    pub fn from_field(field: String, markers: &NullMarkers) -> Self {
        if markers.is_null(&field) {
            SqlValue::Null
        } else {
            SqlValue::Text(field)
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Null => None,
            SqlValue::Text(text) => Some(text),
        }
    }
}

/// Exact-match set of source tokens that normalize to `NULL`.
///
/// The empty string is always a member: an empty cell is never stored as `''`.
#[derive(Debug, Clone)]
pub struct NullMarkers {
    tokens: HashSet<String>,
}

impl NullMarkers {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tokens = tokens.into_iter().map(Into::into).collect::<HashSet<_>>();
        tokens.insert(String::new());
        Self { tokens }
    }

    pub fn is_null(&self, field: &str) -> bool {
        self.tokens.contains(field)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for NullMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_NULL_MARKERS.iter().copied())
    }
}
