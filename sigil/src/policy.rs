// SPDX-License-Identifier: MIT OR Apache-2.0

//! The image policy: an ordered rule set matched against image references.
//!
//! Patterns are shell-style globs where `*` stays within one path segment and
//! `**` crosses segments. Among all rules matching an image, the most
//! specific pattern wins; specificity compares the literal prefix length,
//! then the number of segments, then penalizes `**`. Ties go to the rule
//! declared first.

use crate::error::{self, Result};
use crate::image::ImageRef;
use globset::{GlobBuilder, GlobMatcher};
use serde::Deserialize;
use snafu::ResultExt;
use std::path::Path;

/// One policy rule.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    /// The glob pattern matched against the full image reference string.
    pub pattern: String,

    /// The validator to use; `None` selects the `default` entry.
    #[serde(default)]
    pub validator: Option<String>,

    /// The trust root to verify against; `None` selects the `default` key.
    #[serde(default)]
    pub key: Option<String>,

    /// Delegation roles that must all have signed the image.
    #[serde(default)]
    pub delegations: Vec<String>,

    /// `false` turns verification off for matching images.
    #[serde(default)]
    pub verify: Option<bool>,
}

impl Rule {
    /// Whether matching images are verified at all. `verify: false` is sugar
    /// for the static-approve validator.
    pub fn verify_enabled(&self) -> bool {
        self.verify.unwrap_or(true)
    }
}

/// Pattern specificity, compared lexicographically: longer literal prefix
/// beats more segments beats absence of `**`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Specificity {
    literal_prefix: usize,
    segments: usize,
    single_star_only: bool,
}

impl Specificity {
    fn of(pattern: &str) -> Self {
        Self {
            literal_prefix: pattern
                .find(|c| matches!(c, '*' | '?' | '['))
                .unwrap_or(pattern.len()),
            segments: pattern.split('/').count(),
            single_star_only: !pattern.contains("**"),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: Rule,
    matcher: GlobMatcher,
    specificity: Specificity,
}

/// The full image policy, compiled for lookup.
#[derive(Debug, Clone)]
pub struct ImagePolicy {
    rules: Vec<CompiledRule>,
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    rules: Vec<Rule>,
}

impl ImagePolicy {
    /// Compiles a rule list into a policy.
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let matcher = GlobBuilder::new(&rule.pattern)
                    .literal_separator(true)
                    .build()
                    .context(error::InvalidPatternSnafu {
                        pattern: rule.pattern.clone(),
                    })?
                    .compile_matcher();
                let specificity = Specificity::of(&rule.pattern);
                Ok(CompiledRule {
                    rule,
                    matcher,
                    specificity,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Loads and compiles a policy file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context(error::FileReadSnafu {
            path: path.display().to_string(),
        })?;
        let file: PolicyFile =
            serde_yaml::from_str(&content).context(error::ConfigParseSnafu {
                path: path.display().to_string(),
            })?;
        Self::from_rules(file.rules)
    }

    /// Selects the most specific rule matching `image`.
    pub fn rule_for(&self, image: &ImageRef) -> Result<&Rule> {
        let reference = image.to_string();
        let mut best: Option<&CompiledRule> = None;
        for candidate in &self.rules {
            if !candidate.matcher.is_match(&reference) {
                continue;
            }
            // Strictly-greater keeps the earliest rule on ties.
            if best.map_or(true, |b| candidate.specificity > b.specificity) {
                best = Some(candidate);
            }
        }
        best.map(|c| &c.rule).ok_or_else(|| {
            error::NoMatchingRuleSnafu { image: reference }.build()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str) -> Rule {
        Rule {
            pattern: pattern.to_string(),
            validator: None,
            key: None,
            delegations: Vec::new(),
            verify: None,
        }
    }

    fn policy(patterns: &[&str]) -> ImagePolicy {
        ImagePolicy::from_rules(patterns.iter().map(|p| rule(p)).collect()).unwrap()
    }

    fn image(reference: &str) -> ImageRef {
        ImageRef::parse(reference).unwrap()
    }

    #[test]
    fn literal_prefix_beats_catch_all() {
        let policy = policy(&["**", "docker.io/library/*:*"]);
        let matched = policy.rule_for(&image("nginx:stable")).unwrap();
        assert_eq!(matched.pattern, "docker.io/library/*:*");
    }

    #[test]
    fn longest_literal_prefix_wins() {
        let policy = policy(&[
            "docker.io/**",
            "docker.io/securesystemsengineering/*:*",
            "docker.io/securesystemsengineering/sample:*",
        ]);
        let matched = policy
            .rule_for(&image("securesystemsengineering/sample:v4"))
            .unwrap();
        assert_eq!(matched.pattern, "docker.io/securesystemsengineering/sample:*");

        let matched = policy
            .rule_for(&image("securesystemsengineering/alice-image:test"))
            .unwrap();
        assert_eq!(matched.pattern, "docker.io/securesystemsengineering/*:*");
    }

    #[test]
    fn single_star_stays_within_a_segment() {
        let policy1 = policy(&["docker.io/*:*"]);
        assert!(policy1.rule_for(&image("team/app:v1")).is_err());

        let policy2 = policy(&["docker.io/**"]);
        assert!(policy2.rule_for(&image("team/app:v1")).is_ok());
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let first = Rule {
            delegations: vec!["del1".to_string()],
            ..rule("registry.io/app/*:*")
        };
        let second = rule("registry.io/app/*:*");
        let policy = ImagePolicy::from_rules(vec![first, second]).unwrap();
        let matched = policy.rule_for(&image("registry.io/app/web:v2")).unwrap();
        assert_eq!(matched.delegations, vec!["del1".to_string()]);
    }

    #[test]
    fn no_match_is_an_error() {
        let policy = policy(&["gcr.io/**"]);
        assert!(matches!(
            policy.rule_for(&image("nginx")).unwrap_err(),
            crate::Error::NoMatchingRule { .. }
        ));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(ImagePolicy::from_rules(vec![rule("a[")]).is_err());
    }
}
