//! Validated release identity.

use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Branch prefix every release branch must carry.
pub const RELEASE_BRANCH_PREFIX: &str = "release/";

/// Semantic version extracted from a release branch (`x.y.z` or `x.y.z-pre`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Option<String>,
}

impl ReleaseVersion {
    /// Parse `x.y.z` with an optional `-pre` suffix made of `[A-Za-z0-9.-]`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidVersion {
            version: input.to_string(),
        };

        let (core, pre_release) = match input.split_once('-') {
            Some((core, pre)) => {
                if pre.is_empty()
                    || !pre
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
                {
                    return Err(invalid());
                }
                (core, Some(pre.to_string()))
            }
            None => (input, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre_release,
        })
    }
}

impl std::fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

/// Immutable identity of the release being documented.
///
/// Only constructible through [`ReleaseDescriptor::parse`], so a descriptor in
/// hand always has a well-formed branch and an extractable version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    branch: String,
    version: ReleaseVersion,
    base_tag: Option<String>,
}

impl ReleaseDescriptor {
    /// Validate a release branch name (`release/x.y.z[-pre]`) and optional base tag.
    pub fn parse(branch: &str, base_tag: Option<&str>) -> Result<Self, ValidationError> {
        let branch = branch.trim();
        if branch.is_empty() {
            return Err(ValidationError::EmptyReleaseIdentifier);
        }

        let version = branch
            .strip_prefix(RELEASE_BRANCH_PREFIX)
            .ok_or_else(|| ValidationError::InvalidBranch {
                branch: branch.to_string(),
            })?;
        let version = ReleaseVersion::parse(version).map_err(|_| ValidationError::InvalidBranch {
            branch: branch.to_string(),
        })?;

        let base_tag = match base_tag.map(str::trim) {
            None | Some("") => None,
            Some(tag) if tag.chars().any(char::is_whitespace) => {
                return Err(ValidationError::InvalidBaseTag {
                    tag: tag.to_string(),
                })
            }
            Some(tag) => Some(tag.to_string()),
        };

        Ok(Self {
            branch: branch.to_string(),
            version,
            base_tag,
        })
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn version(&self) -> &ReleaseVersion {
        &self.version
    }

    pub fn base_tag(&self) -> Option<&str> {
        self.base_tag.as_deref()
    }

    /// Version rendered as a string (`1.2.3`, `2.0.0-beta.1`).
    pub fn version_string(&self) -> String {
        self.version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_release_branch() {
        let d = ReleaseDescriptor::parse("release/1.2.3", None).unwrap();
        assert_eq!(d.branch(), "release/1.2.3");
        assert_eq!(d.version_string(), "1.2.3");
        assert_eq!(d.version().minor, 2);
        assert!(d.base_tag().is_none());
    }

    #[test]
    fn parses_prerelease_branch_with_base_tag() {
        let d = ReleaseDescriptor::parse("release/2.0.0-beta.1", Some("v1.9.0")).unwrap();
        assert_eq!(d.version().pre_release.as_deref(), Some("beta.1"));
        assert_eq!(d.version_string(), "2.0.0-beta.1");
        assert_eq!(d.base_tag(), Some("v1.9.0"));
    }

    #[test]
    fn blank_base_tag_is_treated_as_absent() {
        let d = ReleaseDescriptor::parse("release/1.0.0", Some("  ")).unwrap();
        assert!(d.base_tag().is_none());
    }

    #[test]
    fn rejects_missing_prefix() {
        let err = ReleaseDescriptor::parse("1.2.3", None).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidBranch { .. }));
    }

    #[test]
    fn rejects_malformed_versions() {
        for branch in [
            "release/1.2",
            "release/1.2.3.4",
            "release/a.b.c",
            "release/1.2.3-",
            "release/1.2.3-beta_1",
            "release/",
        ] {
            assert!(
                ReleaseDescriptor::parse(branch, None).is_err(),
                "{branch} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_empty_identifier() {
        let err = ReleaseDescriptor::parse("   ", None).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyReleaseIdentifier));
    }

    #[test]
    fn rejects_base_tag_with_whitespace() {
        let err = ReleaseDescriptor::parse("release/1.0.0", Some("v1 .0")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidBaseTag { .. }));
    }
}
