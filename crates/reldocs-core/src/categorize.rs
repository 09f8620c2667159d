//! Deterministic classification of gathered evidence into a [`ChangeSet`].
//!
//! Pure: no I/O, no clock, no randomness. The same outcomes and rules always
//! produce the same change set.
//!
//! 1. Deduplicate by external id. Within one source the first record seen
//!    wins. Sources run concurrently, so between sources the earliest
//!    timestamp wins, and on equal timestamps the source registered first.
//!    Records without an id get a synthetic `unkeyed:` key and are never
//!    merged.
//! 2. Classify every survivor into exactly one partition. Malformed records
//!    go to `unclassified`.
//! 3. Sort each partition by timestamp ascending (missing first), then key.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ClassificationRules;
use crate::domain::{Category, ChangeSet, ClassifiedEntry, GatherOutcome, SourceRecord};

/// Classify the records of every successful outcome.
pub fn categorize(outcomes: &[GatherOutcome], rules: &ClassificationRules) -> ChangeSet {
    let survivors = deduplicate(outcomes);

    let mut change_set = ChangeSet::default();
    for entry in survivors.into_values() {
        collect_components(&entry.record, &mut change_set.affected_components);
        let category = classify(&entry.record, rules);
        match category {
            Category::Feature => change_set.features.push(entry),
            Category::Fix => change_set.fixes.push(entry),
            Category::Breaking => change_set.breaking.push(entry),
            Category::Unclassified => change_set.unclassified.push(entry),
        }
    }

    for partition in [
        &mut change_set.features,
        &mut change_set.fixes,
        &mut change_set.breaking,
        &mut change_set.unclassified,
    ] {
        partition.sort_by(|a, b| {
            a.record
                .timestamp()
                .cmp(&b.record.timestamp())
                .then_with(|| a.key.cmp(&b.key))
        });
    }

    change_set
}

fn deduplicate(outcomes: &[GatherOutcome]) -> BTreeMap<String, ClassifiedEntry> {
    // key -> (index of the contributing outcome, entry)
    let mut survivors: BTreeMap<String, (usize, ClassifiedEntry)> = BTreeMap::new();
    let mut position = 0usize;

    for (origin, outcome) in outcomes.iter().enumerate() {
        for record in outcome.records() {
            let id = record.external_id();
            let key = if id.is_empty() {
                format!("unkeyed:{}:{position}", record.kind().as_str())
            } else {
                id
            };
            position += 1;

            let candidate = ClassifiedEntry {
                key: key.clone(),
                source: outcome.source.clone(),
                record: record.clone(),
            };
            let replace = match survivors.get(&key) {
                None => true,
                Some((seen_in, existing)) => {
                    *seen_in != origin && is_earlier(&candidate.record, &existing.record)
                }
            };
            if replace {
                survivors.insert(key, (origin, candidate));
            }
        }
    }

    survivors
        .into_iter()
        .map(|(key, (_, entry))| (key, entry))
        .collect()
}

/// A dated record beats an undated one; otherwise strictly earlier wins.
fn is_earlier(candidate: &SourceRecord, existing: &SourceRecord) -> bool {
    match (candidate.timestamp(), existing.timestamp()) {
        (Some(c), Some(e)) => c < e,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Partition for a single record.
pub fn classify(record: &SourceRecord, rules: &ClassificationRules) -> Category {
    if !record.is_well_formed() {
        return Category::Unclassified;
    }

    let labels = record.labels();
    let has_label = |wanted: &[String]| labels.iter().any(|l| contains_ci(wanted, l));

    match record {
        SourceRecord::Issue(issue) => {
            if issue.breaking_change || has_label(&rules.breaking_labels) {
                Category::Breaking
            } else if contains_ci(&rules.fix_issue_types, &issue.issue_type) {
                Category::Fix
            } else if contains_ci(&rules.feature_issue_types, &issue.issue_type) {
                Category::Feature
            } else {
                by_labels(&has_label, rules)
            }
        }
        SourceRecord::PullRequest(pr) => classify_change(
            record.title(),
            pr.description.as_deref().unwrap_or(""),
            &has_label,
            rules,
        ),
        SourceRecord::Commit(commit) => {
            classify_change(record.title(), &commit.message, &has_label, rules)
        }
        SourceRecord::Page(_) => {
            if has_label(&rules.breaking_labels) {
                Category::Breaking
            } else {
                by_labels(&has_label, rules)
            }
        }
    }
}

/// PRs and commits: conventional-commit prefix first, then labels.
fn classify_change(
    title: &str,
    body: &str,
    has_label: &dyn Fn(&[String]) -> bool,
    rules: &ClassificationRules,
) -> Category {
    let prefix = ConventionalPrefix::parse(title);
    let marked_breaking = rules
        .breaking_markers
        .iter()
        .any(|m| contains_substring_ci(body, m) || contains_substring_ci(title, m));

    let prefix_breaking = prefix.as_ref().is_some_and(|p| p.breaking);
    if prefix_breaking || marked_breaking || has_label(&rules.breaking_labels) {
        return Category::Breaking;
    }
    if let Some(prefix) = prefix {
        if contains_ci(&rules.feature_prefixes, prefix.kind) {
            return Category::Feature;
        }
        if contains_ci(&rules.fix_prefixes, prefix.kind) {
            return Category::Fix;
        }
    }
    by_labels(has_label, rules)
}

fn by_labels(has_label: &dyn Fn(&[String]) -> bool, rules: &ClassificationRules) -> Category {
    if has_label(&rules.fix_labels) {
        Category::Fix
    } else if has_label(&rules.feature_labels) {
        Category::Feature
    } else {
        Category::Unclassified
    }
}

/// `type(scope)!: subject`
#[derive(Debug, PartialEq, Eq)]
struct ConventionalPrefix<'a> {
    kind: &'a str,
    breaking: bool,
}

impl<'a> ConventionalPrefix<'a> {
    fn parse(title: &'a str) -> Option<Self> {
        let (head, _) = title.split_once(':')?;
        let (head, breaking) = match head.strip_suffix('!') {
            Some(stripped) => (stripped, true),
            None => (head, false),
        };
        let kind = match head.split_once('(') {
            Some((kind, scope)) if scope.ends_with(')') => kind,
            Some(_) => return None,
            None => head,
        };
        if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self { kind, breaking })
    }
}

fn contains_ci(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(value.trim()))
}

fn contains_substring_ci(haystack: &str, needle: &str) -> bool {
    !needle.is_empty() && haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn collect_components(record: &SourceRecord, components: &mut BTreeSet<String>) {
    match record {
        SourceRecord::Issue(issue) => {
            components.extend(
                issue
                    .components
                    .iter()
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty()),
            );
        }
        SourceRecord::PullRequest(pr) => {
            components.extend(
                pr.changed_files
                    .iter()
                    .filter_map(|path| path.split_once('/'))
                    .map(|(dir, _)| dir.trim().to_lowercase())
                    .filter(|dir| !dir.is_empty()),
            );
        }
        SourceRecord::Commit(_) | SourceRecord::Page(_) => {}
    }
}
