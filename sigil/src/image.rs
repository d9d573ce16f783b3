// SPDX-License-Identifier: MIT OR Apache-2.0

//! Container image references.

use crate::error::{self, Error, Result};
use snafu::ensure;
use std::fmt;
use std::str::FromStr;

/// A parsed container image reference of the form
/// `[registry[:port]/][repository/]name[:tag][@sha256:hex]`.
///
/// Defaults are filled in during parsing: registry `docker.io`, repository
/// `library` (for Docker Hub images), tag `latest` when neither a tag nor a
/// digest was given. After construction at least one of tag and digest is
/// present, and the value never changes; [`ImageRef::with_digest`] returns a
/// new reference instead of mutating.
#[derive(Debug, Clone)]
pub struct ImageRef {
    registry: String,
    repository: String,
    name: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    /// Parses an image reference from its string form.
    pub fn parse(reference: &str) -> Result<Self> {
        let (remainder, digest) = match reference.split_once('@') {
            Some((left, digest_part)) => {
                let digest = digest_part
                    .strip_prefix("sha256:")
                    .filter(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
                    .ok_or_else(|| {
                        error::InvalidImageSnafu {
                            image: reference.to_string(),
                        }
                        .build()
                    })?;
                (left, Some(digest.to_ascii_lowercase()))
            }
            None => (reference, None),
        };

        // A ':' after the last '/' separates the tag; before it, it can only
        // be a registry port.
        let (remainder, tag) = match remainder.rsplit_once(':') {
            Some((left, tag)) if !tag.contains('/') => (left, Some(tag.to_string())),
            _ => (remainder, None),
        };

        let mut segments: Vec<&str> = remainder.split('/').collect();
        let has_registry = segments.len() > 1 && {
            let first = segments[0];
            first.contains('.') || first.contains(':') || first == "localhost"
        };
        let registry = if has_registry {
            segments.remove(0).to_string()
        } else {
            "docker.io".to_string()
        };

        let name = segments.pop().unwrap_or_default().to_string();
        ensure!(
            !name.is_empty() && segments.iter().all(|s| !s.is_empty()),
            error::InvalidImageSnafu {
                image: reference.to_string(),
            }
        );
        let repository = if segments.is_empty() {
            if registry == "docker.io" {
                "library".to_string()
            } else {
                String::new()
            }
        } else {
            segments.join("/")
        };

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag),
            (None, Some(_)) => None,
            (None, None) => Some("latest".to_string()),
        };

        Ok(Self {
            registry,
            repository,
            name,
            tag,
            digest,
        })
    }

    /// The registry host, e.g. `docker.io` or `registry.example.com:5000`.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The repository path, possibly empty for single-level references on
    /// private registries.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The image name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tag, if any. Retained for display even when a digest is present.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The hex sha256 digest, if the reference is pinned.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// A copy of this reference pinned to `digest` (bare hex, no prefix).
    pub fn with_digest(&self, digest: &str) -> Self {
        Self {
            digest: Some(digest.to_string()),
            ..self.clone()
        }
    }
}

impl FromStr for ImageRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/", self.registry)?;
        if !self.repository.is_empty() {
            write!(f, "{}/", self.repository)?;
        }
        f.write_str(&self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@sha256:{digest}")?;
        }
        Ok(())
    }
}

/// Two references to the same repository compare by digest when both are
/// pinned; the digest identifies the content regardless of tag.
impl PartialEq for ImageRef {
    fn eq(&self, other: &Self) -> bool {
        if self.registry != other.registry
            || self.repository != other.repository
            || self.name != other.name
        {
            return false;
        }
        match (&self.digest, &other.digest) {
            (Some(a), Some(b)) => a == b,
            _ => self.tag == other.tag && self.digest == other.digest,
        }
    }
}

impl Eq for ImageRef {}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "ac904c9b191d14faf54b7952f2650a4bb21c201bf34131388b851e8ce992a652";

    #[test]
    fn bare_name_gets_all_defaults() {
        let image = ImageRef::parse("sample").unwrap();
        assert_eq!(image.registry(), "docker.io");
        assert_eq!(image.repository(), "library");
        assert_eq!(image.name(), "sample");
        assert_eq!(image.tag(), Some("latest"));
        assert_eq!(image.digest(), None);
        assert_eq!(image.to_string(), "docker.io/library/sample:latest");
    }

    #[test]
    fn repository_and_tag() {
        let image = ImageRef::parse("securesystemsengineering/alice-image:test").unwrap();
        assert_eq!(image.registry(), "docker.io");
        assert_eq!(image.repository(), "securesystemsengineering");
        assert_eq!(image.name(), "alice-image");
        assert_eq!(image.tag(), Some("test"));
    }

    #[test]
    fn registry_detection() {
        let image = ImageRef::parse("registry.example.com:5000/team/app:v1").unwrap();
        assert_eq!(image.registry(), "registry.example.com:5000");
        assert_eq!(image.repository(), "team");
        assert_eq!(image.name(), "app");

        let image = ImageRef::parse("localhost/app").unwrap();
        assert_eq!(image.registry(), "localhost");
        assert_eq!(image.repository(), "");
        assert_eq!(image.to_string(), "localhost/app:latest");

        // No dot, colon or "localhost": the first segment is a repository.
        let image = ImageRef::parse("team/app").unwrap();
        assert_eq!(image.registry(), "docker.io");
        assert_eq!(image.repository(), "team");
    }

    #[test]
    fn digest_suppresses_default_tag() {
        let image = ImageRef::parse(&format!("sample@sha256:{DIGEST}")).unwrap();
        assert_eq!(image.tag(), None);
        assert_eq!(image.digest(), Some(DIGEST));
        assert_eq!(
            image.to_string(),
            format!("docker.io/library/sample@sha256:{DIGEST}")
        );
    }

    #[test]
    fn tag_and_digest_both_render() {
        let image = ImageRef::parse(&format!("sample:v1@sha256:{DIGEST}")).unwrap();
        assert_eq!(image.tag(), Some("v1"));
        assert_eq!(image.digest(), Some(DIGEST));
        assert_eq!(
            image.to_string(),
            format!("docker.io/library/sample:v1@sha256:{DIGEST}")
        );
    }

    #[test]
    fn digest_wins_for_equality() {
        let a = ImageRef::parse(&format!("sample:v1@sha256:{DIGEST}")).unwrap();
        let b = ImageRef::parse(&format!("sample:v2@sha256:{DIGEST}")).unwrap();
        assert_eq!(a, b);

        let c = ImageRef::parse("sample:v1").unwrap();
        let d = ImageRef::parse("sample:v2").unwrap();
        assert_ne!(c, d);
    }

    #[test]
    fn rejects_malformed_references() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("sample@sha256:abc").is_err());
        assert!(ImageRef::parse(&format!("sample@md5:{DIGEST}")).is_err());
        assert!(ImageRef::parse("registry.io//app").is_err());
    }

    #[test]
    fn with_digest_pins_a_copy() {
        let image = ImageRef::parse("sample:v1").unwrap();
        let pinned = image.with_digest(DIGEST);
        assert_eq!(image.digest(), None);
        assert_eq!(pinned.digest(), Some(DIGEST));
        assert_eq!(pinned.tag(), Some("v1"));
    }
}
