//! Deterministic markdown generator.
//!
//! Produces the release notes file, a changelog section and one section per
//! affected component guide. Output depends only on the change set and the
//! release, so repeated runs render byte-identical documents.

use std::fmt::Write as _;

use async_trait::async_trait;

use super::ContentGenerator;
use crate::config::DocumentLayout;
use crate::domain::{
    Category, ChangeSet, ClassifiedEntry, GeneratedDocument, GenerationError, ReleaseDescriptor,
    SourceRecord,
};

/// Template-based [`ContentGenerator`].
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator {
    layout: DocumentLayout,
}

impl TemplateGenerator {
    pub fn new(layout: DocumentLayout) -> Self {
        Self { layout }
    }

    pub fn render(
        &self,
        change_set: &ChangeSet,
        release: &ReleaseDescriptor,
    ) -> Vec<GeneratedDocument> {
        let mut documents = vec![GeneratedDocument::new_file(
            self.layout.release_notes_path(release),
            release_notes(change_set, release),
        )];

        if change_set.has_changes() {
            let anchor = changelog_anchor(release);
            documents.push(GeneratedDocument::section(
                self.layout.changelog_path.clone(),
                anchor.clone(),
                changelog_entry(&anchor, change_set),
            ));
        }

        for component in &change_set.affected_components {
            let Some(guide) = self.layout.guide_for(component) else {
                continue;
            };
            if documents.iter().any(|d| d.path == guide) {
                continue;
            }
            if let Some(content) = component_update(component, change_set, release) {
                let anchor = format!("## Updates in {}", release.version_string());
                documents.push(GeneratedDocument::section(guide, anchor, content));
            }
        }

        documents
    }
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(
        &self,
        change_set: &ChangeSet,
        release: &ReleaseDescriptor,
    ) -> Result<Vec<GeneratedDocument>, GenerationError> {
        Ok(self.render(change_set, release))
    }
}

pub fn changelog_anchor(release: &ReleaseDescriptor) -> String {
    format!("## [{}] - {}", release.version_string(), release.branch())
}

/// `KEY`, `#42` or a short commit hash.
fn reference(entry: &ClassifiedEntry) -> String {
    match &entry.record {
        SourceRecord::PullRequest(pr) => format!("#{}", pr.id),
        SourceRecord::Commit(commit) => commit.hash.chars().take(8).collect(),
        SourceRecord::Issue(_) | SourceRecord::Page(_) => entry.key.clone(),
    }
}

fn bullet(entry: &ClassifiedEntry) -> String {
    let title = entry.record.title();
    let title = if title.is_empty() { "(untitled)" } else { title };
    if entry.key.starts_with("unkeyed:") {
        format!("- {title}")
    } else {
        format!("- {title} ({})", reference(entry))
    }
}

fn changelog_excerpt(entry: &ClassifiedEntry) -> Option<&str> {
    match &entry.record {
        SourceRecord::Issue(issue) => issue.changelog.as_deref().filter(|c| !c.trim().is_empty()),
        _ => None,
    }
}

fn pull_requests(change_set: &ChangeSet) -> Vec<&ClassifiedEntry> {
    let mut prs: Vec<&ClassifiedEntry> = change_set
        .entries()
        .map(|(_, e)| e)
        .filter(|e| matches!(e.record, SourceRecord::PullRequest(_)))
        .collect();
    prs.sort_by(|a, b| a.key.cmp(&b.key));
    prs
}

fn release_notes(change_set: &ChangeSet, release: &ReleaseDescriptor) -> String {
    let version = release.version_string();
    let mut out = String::new();
    let _ = writeln!(out, "# Release {version}\n");
    let _ = writeln!(out, "- Branch: `{}`", release.branch());
    if let Some(tag) = release.base_tag() {
        let _ = writeln!(out, "- Compared against: `{tag}`");
    }
    let _ = writeln!(
        out,
        "- Summary: {} new features, {} fixes, {} breaking changes\n",
        change_set.features.len(),
        change_set.fixes.len(),
        change_set.breaking.len()
    );

    if !change_set.breaking.is_empty() {
        out.push_str("## Breaking Changes\n\n");
        for entry in &change_set.breaking {
            let _ = writeln!(out, "{}", bullet(entry));
            let _ = writeln!(
                out,
                "  - Action required: {}",
                changelog_excerpt(entry).unwrap_or("see the linked change for details")
            );
        }
        out.push('\n');
    }

    for (heading, category) in [("New Features", Category::Feature), ("Bug Fixes", Category::Fix)] {
        let entries = change_set.partition(category);
        if entries.is_empty() {
            continue;
        }
        let _ = writeln!(out, "## {heading}\n");
        for entry in entries {
            let _ = writeln!(out, "{}", bullet(entry));
            if let Some(excerpt) = changelog_excerpt(entry) {
                for line in excerpt.lines() {
                    let _ = writeln!(out, "  {line}");
                }
            }
        }
        out.push('\n');
    }

    let other: Vec<&ClassifiedEntry> = change_set
        .unclassified
        .iter()
        .filter(|e| !matches!(e.record, SourceRecord::Page(_)))
        .collect();
    if !other.is_empty() {
        out.push_str("## Other Changes\n\n");
        for entry in other {
            let _ = writeln!(out, "{}", bullet(entry));
        }
        out.push('\n');
    }

    let pages: Vec<&ClassifiedEntry> = change_set
        .entries()
        .map(|(_, e)| e)
        .filter(|e| matches!(e.record, SourceRecord::Page(_)))
        .collect();
    if !pages.is_empty() {
        out.push_str("## References\n\n");
        for entry in pages {
            let _ = writeln!(out, "- {}", entry.record.title());
        }
        out.push('\n');
    }

    out
}

fn changelog_entry(anchor: &str, change_set: &ChangeSet) -> String {
    let mut out = format!("{anchor}\n\n");

    for (heading, entries) in [
        ("Added", &change_set.features),
        ("Fixed", &change_set.fixes),
        ("Breaking Changes", &change_set.breaking),
    ] {
        if entries.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### {heading}");
        for entry in entries {
            let _ = writeln!(out, "{}", bullet(entry));
        }
        out.push('\n');
    }

    let prs = pull_requests(change_set);
    if !prs.is_empty() {
        out.push_str("### Pull Requests\n");
        for entry in prs {
            if let SourceRecord::PullRequest(pr) = &entry.record {
                let _ = writeln!(
                    out,
                    "- [{}]({}) (#{})",
                    pr.title.trim(),
                    pr.url.as_deref().unwrap_or("#"),
                    pr.id
                );
            }
        }
        out.push('\n');
    }

    out
}

fn touches_component(entry: &ClassifiedEntry, component: &str) -> bool {
    match &entry.record {
        SourceRecord::Issue(issue) => issue
            .components
            .iter()
            .any(|c| c.trim().eq_ignore_ascii_case(component)),
        SourceRecord::PullRequest(pr) => pr.changed_files.iter().any(|path| {
            path.split_once('/')
                .is_some_and(|(dir, _)| dir.trim().eq_ignore_ascii_case(component))
        }),
        SourceRecord::Commit(_) | SourceRecord::Page(_) => false,
    }
}

fn component_update(
    component: &str,
    change_set: &ChangeSet,
    release: &ReleaseDescriptor,
) -> Option<String> {
    let sections = [
        ("New Features", Category::Feature),
        ("Bug Fixes", Category::Fix),
        ("Breaking Changes", Category::Breaking),
    ];

    let mut body = String::new();
    for (heading, category) in sections {
        let entries: Vec<&ClassifiedEntry> = change_set
            .partition(category)
            .iter()
            .filter(|e| touches_component(e, component))
            .collect();
        if entries.is_empty() {
            continue;
        }
        let _ = writeln!(body, "### {heading}");
        for entry in entries {
            let _ = writeln!(body, "{}", bullet(entry));
            match (category, changelog_excerpt(entry)) {
                (Category::Breaking, excerpt) => {
                    let _ = writeln!(
                        body,
                        "  - Action required: {}",
                        excerpt.unwrap_or("see the linked change for details")
                    );
                }
                (_, Some(excerpt)) => {
                    let _ = writeln!(body, "  - {}", excerpt.replace('\n', " "));
                }
                (_, None) => {}
            }
        }
        body.push('\n');
    }

    if body.is_empty() {
        return None;
    }
    Some(format!("## Updates in {}\n\n{body}", release.version_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DocumentKind, Issue, PullRequest};
    use chrono::{TimeZone, Utc};

    fn entry(record: SourceRecord) -> ClassifiedEntry {
        ClassifiedEntry {
            key: record.external_id(),
            source: "test".to_string(),
            record,
        }
    }

    fn issue(key: &str, summary: &str, components: &[&str]) -> SourceRecord {
        SourceRecord::Issue(Issue {
            key: key.to_string(),
            summary: summary.to_string(),
            issue_type: "Story".to_string(),
            status: "Done".to_string(),
            priority: "High".to_string(),
            components: components.iter().map(|s| s.to_string()).collect(),
            labels: vec![],
            fix_version: None,
            epic_key: None,
            changelog: Some("Export as CSV".to_string()),
            breaking_change: false,
            assignee: None,
            created: None,
            updated: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        })
    }

    fn sample() -> ChangeSet {
        let pr = SourceRecord::PullRequest(PullRequest {
            id: 7,
            title: "fix(ui): button alignment".to_string(),
            description: None,
            author: "dev".to_string(),
            source_branch: "fix/button".to_string(),
            target_branch: "release/1.2.3".to_string(),
            state: "MERGED".to_string(),
            url: Some("https://example.test/pr/7".to_string()),
            labels: vec![],
            linked_issues: vec![],
            changed_files: vec!["ui/button.ts".to_string()],
            created_on: None,
            updated_on: Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()),
        });
        ChangeSet {
            features: vec![entry(issue("PROJ-1", "CSV export", &["api"]))],
            fixes: vec![entry(pr)],
            breaking: vec![],
            unclassified: vec![],
            affected_components: ["api", "ui", "billing"].iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_render_produces_notes_changelog_and_guides() {
        let release = ReleaseDescriptor::parse("release/1.2.3", Some("v1.2.2")).unwrap();
        let docs = TemplateGenerator::default().render(&sample(), &release);

        let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "docs/releases/1.2.3.md",
                "docs/CHANGELOG.md",
                "docs/api-guide.md",
                "docs/ui-guide.md"
            ]
        );
        assert_eq!(docs[0].kind, DocumentKind::NewFile);
        assert!(docs[0].content.starts_with("# Release 1.2.3\n"));
        assert!(docs[0].content.contains("`v1.2.2`"));
        assert!(docs[0].content.contains("- CSV export (PROJ-1)"));

        let changelog = &docs[1].content;
        assert!(changelog.starts_with("## [1.2.3] - release/1.2.3\n"));
        assert!(changelog.contains("### Added\n- CSV export (PROJ-1)"));
        assert!(changelog.contains("[fix(ui): button alignment](https://example.test/pr/7) (#7)"));

        assert!(docs[3].content.contains("### Bug Fixes\n- fix(ui): button alignment (#7)"));
        assert!(super::super::validate_documents(&docs).is_ok());
    }

    #[test]
    fn test_render_is_deterministic() {
        let release = ReleaseDescriptor::parse("release/1.2.3", None).unwrap();
        let generator = TemplateGenerator::default();
        assert_eq!(generator.render(&sample(), &release), generator.render(&sample(), &release));
    }

    #[test]
    fn test_empty_change_set_still_gets_release_notes() {
        let release = ReleaseDescriptor::parse("release/2.0.0", None).unwrap();
        let docs = TemplateGenerator::default().render(&ChangeSet::default(), &release);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.contains("0 new features"));
    }
}
