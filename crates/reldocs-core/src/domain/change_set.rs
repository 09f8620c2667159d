//! Classified, deduplicated view of gathered evidence.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::record::SourceRecord;

/// Partition a record is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Feature,
    Fix,
    Breaking,
    Unclassified,
}

/// A record together with the key it was deduplicated under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEntry {
    /// External id, or a synthetic `unkeyed:` key for records that lack one.
    pub key: String,
    /// Name of the source adapter that reported the surviving record.
    pub source: String,
    pub record: SourceRecord,
}

/// Four disjoint, ordered partitions. Built only by the categorizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub features: Vec<ClassifiedEntry>,
    pub fixes: Vec<ClassifiedEntry>,
    pub breaking: Vec<ClassifiedEntry>,
    pub unclassified: Vec<ClassifiedEntry>,
    /// Components touched by the release (issue components, top-level PR dirs).
    pub affected_components: BTreeSet<String>,
}

impl ChangeSet {
    pub fn partition(&self, category: Category) -> &[ClassifiedEntry] {
        match category {
            Category::Feature => &self.features,
            Category::Fix => &self.fixes,
            Category::Breaking => &self.breaking,
            Category::Unclassified => &self.unclassified,
        }
    }

    /// Every entry with its category, partitions in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (Category, &ClassifiedEntry)> {
        [
            Category::Feature,
            Category::Fix,
            Category::Breaking,
            Category::Unclassified,
        ]
        .into_iter()
        .flat_map(move |c| self.partition(c).iter().map(move |e| (c, e)))
    }

    pub fn len(&self) -> usize {
        self.features.len() + self.fixes.len() + self.breaking.len() + self.unclassified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when there is anything beyond context pages worth a changelog entry.
    pub fn has_changes(&self) -> bool {
        self.entries()
            .any(|(_, e)| !matches!(e.record, SourceRecord::Page(_)))
    }
}
