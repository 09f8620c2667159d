//! File materialization and content digests.

use sha2::{Digest, Sha256};

use crate::domain::{DocumentKind, GeneratedDocument};

/// Commit trailer carrying the digest of the materialized file set.
pub const DIGEST_TRAILER: &str = "Release-Docs-Digest";

/// Hex-encoded sha256 of `content`.
pub fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Digest over a whole file set, independent of input order.
pub fn content_digest<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut entries: Vec<(&str, String)> = files
        .into_iter()
        .map(|(path, content)| (path, sha256_hex(content)))
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for (path, digest) in entries {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Full file content after applying `doc` to the current content.
pub fn materialize(doc: &GeneratedDocument, existing: Option<&str>) -> String {
    match &doc.kind {
        DocumentKind::NewFile => doc.content.clone(),
        DocumentKind::Section { anchor } => {
            splice_section(existing.unwrap_or(""), anchor, &doc.content)
        }
    }
}

pub fn commit_message(version: &str, digest: &str) -> String {
    format!("docs: Update documentation for release {version}\n\n{DIGEST_TRAILER}: {digest}\n")
}

/// Digest recorded in a commit message trailer, if any.
pub fn trailer_digest(message: &str) -> Option<&str> {
    message.lines().rev().find_map(|line| {
        line.trim()
            .strip_prefix(DIGEST_TRAILER)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::trim)
            .filter(|d| !d.is_empty())
    })
}

/// ATX heading level of a markdown line (`## x` is 2).
pub fn heading_level(line: &str) -> Option<usize> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 {
        return None;
    }
    match line[level..].chars().next() {
        None | Some(' ') | Some('\t') => Some(level),
        _ => None,
    }
}

/// Splice `section` into `existing`.
///
/// - If a line equal to `anchor` exists, the block from it up to the next
///   heading of the same or higher level is replaced.
/// - Otherwise the section is inserted before the first heading of the
///   anchor's level.
/// - Otherwise it is appended.
///
/// Splicing the same section twice yields the same text as splicing it once,
/// provided no line after the anchor is a heading at or above its level.
pub fn splice_section(existing: &str, anchor: &str, section: &str) -> String {
    let anchor = anchor.trim_end();
    let level = heading_level(anchor).unwrap_or(usize::MAX);
    let body = section.trim_end_matches(['\n', '\r', ' ']);
    let lines: Vec<&str> = existing.split_inclusive('\n').collect();

    let ends_block = |line: &str| heading_level(line).is_some_and(|l| l <= level);

    if let Some(start) = lines.iter().position(|l| l.trim_end() == anchor) {
        let end = lines[start + 1..]
            .iter()
            .position(|l| ends_block(l))
            .map(|offset| start + 1 + offset);

        let mut out: String = lines[..start].concat();
        out.push_str(body);
        match end {
            Some(end) => {
                out.push_str("\n\n");
                out.push_str(&lines[end..].concat());
            }
            None => out.push('\n'),
        }
        return out;
    }

    if let Some(at) = lines.iter().position(|l| heading_level(l) == Some(level)) {
        let mut out: String = lines[..at].concat();
        out.push_str(body);
        out.push_str("\n\n");
        out.push_str(&lines[at..].concat());
        return out;
    }

    let head = existing.trim_end_matches(['\n', '\r', ' ']);
    if head.is_empty() {
        format!("{body}\n")
    } else {
        format!("{head}\n\n{body}\n")
    }
}
