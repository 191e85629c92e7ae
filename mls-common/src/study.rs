//! Study identity types
//!
//! A study is the unit of work the intake services coalesce received objects
//! into. Its key doubles as a file-name stem under the artifact root, so every
//! key is sanitized into a single safe path segment.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier naming one logical study
///
/// Always non-empty and safe to use as a single path segment: only ASCII
/// alphanumerics, `-`, `_` and `.` appear, and it never starts with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudyKey(String);

impl StudyKey {
    /// Build a key from arbitrary text, sanitizing it into a path segment.
    ///
    /// Empty input yields the placeholder `unknown`.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let sanitized = sanitize_segment(raw.as_ref());
        if sanitized.is_empty() {
            Self("unknown".to_string())
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StudyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StudyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Replace every character that is unsafe in a file name with `_`.
///
/// Leading dots are also replaced so the result can never be `.`, `..` or a
/// hidden file.
pub fn sanitize_segment(raw: &str) -> String {
    let mut out: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let leading_dots = out.chars().take_while(|c| *c == '.').count();
    if leading_dots > 0 {
        out.replace_range(..leading_dots, &"_".repeat(leading_dots));
    }

    out
}

/// Identifying and descriptive fields carried by a received object
///
/// Every field is optional: senders routinely omit or blank them. Values are
/// kept as received; use the accessor methods for trimmed, non-empty views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyMetadata {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub patient_sex: Option<String>,
    #[serde(default)]
    pub patient_age: Option<String>,
    #[serde(default)]
    pub accession_number: Option<String>,
    #[serde(default)]
    pub study_id: Option<String>,
    #[serde(default)]
    pub study_description: Option<String>,
}

impl StudyMetadata {
    pub fn patient_id(&self) -> Option<&str> {
        present(&self.patient_id)
    }

    pub fn accession_number(&self) -> Option<&str> {
        present(&self.accession_number)
    }

    pub fn study_id(&self) -> Option<&str> {
        present(&self.study_id)
    }

    pub fn patient_name(&self) -> Option<&str> {
        present(&self.patient_name)
    }

    pub fn patient_sex(&self) -> Option<&str> {
        present(&self.patient_sex)
    }

    pub fn patient_age(&self) -> Option<&str> {
        present(&self.patient_age)
    }

    pub fn study_description(&self) -> Option<&str> {
        present(&self.study_description)
    }
}

/// Trimmed value, treating blank strings as absent
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
