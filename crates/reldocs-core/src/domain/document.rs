//! Documents produced by content generation and consumed by the writer.

use serde::{Deserialize, Serialize};

/// How a generated document lands in the target repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentKind {
    /// Whole-file content; replaces whatever is at the path.
    NewFile,
    /// A section spliced into an existing file. `content` must start with the
    /// `anchor` heading line (e.g. `## [1.2.3] - release/1.2.3`).
    Section { anchor: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    /// Repository-relative path, `/`-separated.
    pub path: String,
    pub content: String,
    pub kind: DocumentKind,
}

impl GeneratedDocument {
    pub fn new_file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind: DocumentKind::NewFile,
        }
    }

    pub fn section(
        path: impl Into<String>,
        anchor: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind: DocumentKind::Section {
                anchor: anchor.into(),
            },
        }
    }
}
