// SPDX-License-Identifier: MIT OR Apache-2.0

//! The validator implementations and the registry that maps configured
//! validator names to instances.
//!
//! Validator dispatch is a compile-time switch over the configured `type`;
//! an unknown type never gets past configuration parsing.

pub mod cosign;
pub mod notaryv1;
pub mod statik;

use crate::config::{Config, ValidatorEntry, ValidatorType};
use crate::error::Result;
use crate::image::ImageRef;
use crate::policy::Rule;
use cosign::CosignValidator;
use notaryv1::NotaryV1Validator;
use statik::StaticValidator;

/// A configured validator instance.
#[derive(Debug, Clone)]
pub enum Validator {
    /// Notary v1 chain-of-trust validation.
    NotaryV1(NotaryV1Validator),
    /// Cosign subprocess verification.
    Cosign(CosignValidator),
    /// Unconditional allow or deny.
    Static(StaticValidator),
}

impl Validator {
    /// Builds the concrete validator a configuration entry selects.
    pub fn from_entry(entry: &ValidatorEntry) -> Result<Self> {
        Ok(match entry.kind {
            ValidatorType::NotaryV1 => Validator::NotaryV1(NotaryV1Validator::from_entry(entry)?),
            ValidatorType::Cosign => Validator::Cosign(CosignValidator::from_entry(entry)?),
            ValidatorType::Static => Validator::Static(StaticValidator::new(
                &entry.name,
                entry.approve.unwrap_or(false),
            )),
        })
    }

    /// The configured name.
    pub fn name(&self) -> &str {
        match self {
            Validator::NotaryV1(v) => v.name(),
            Validator::Cosign(v) => v.name(),
            Validator::Static(v) => v.name(),
        }
    }

    /// Validates an image under a policy rule. `Ok(Some(digest))` pins the
    /// image, `Ok(None)` approves without pinning.
    pub async fn validate(&self, image: &ImageRef, rule: &Rule) -> Result<Option<String>> {
        match self {
            Validator::NotaryV1(v) => v.validate(image, rule).await,
            Validator::Cosign(v) => v.validate(image, rule).await,
            Validator::Static(v) => v.validate(image),
        }
    }

    /// Whether the validator's backing service is reachable. Validators
    /// without a backing service are always healthy.
    pub async fn healthy(&self) -> bool {
        match self {
            Validator::NotaryV1(v) => v.healthy().await,
            Validator::Cosign(_) | Validator::Static(_) => true,
        }
    }
}

/// All configured validators, looked up by the name a policy rule gives.
#[derive(Debug, Clone)]
pub struct Validators {
    items: Vec<Validator>,
}

impl Validators {
    /// Instantiates every configured validator. Fails fast on unusable
    /// entries; a half-configured webhook must not start.
    pub fn from_config(config: &Config) -> Result<Self> {
        let items = config
            .validators()
            .iter()
            .map(Validator::from_entry)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { items })
    }

    /// Selects a validator by name. With a single configured validator the
    /// name is ignored; otherwise `None` selects `default`.
    pub fn get(&self, name: Option<&str>) -> Result<&Validator> {
        if self.items.len() < 2 {
            return self.items.first().ok_or_else(|| {
                crate::error::ValidatorNotFoundSnafu {
                    name: name.map(str::to_string),
                }
                .build()
            });
        }
        let wanted = name.unwrap_or("default");
        self.items
            .iter()
            .find(|v| v.name() == wanted)
            .ok_or_else(|| {
                crate::error::ValidatorNotFoundSnafu {
                    name: name.map(str::to_string),
                }
                .build()
            })
    }

    /// Iterates over all validators (readiness probes every one).
    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config(yaml: &str) -> Config {
        let entries: Vec<ValidatorEntry> = serde_yaml::from_str(yaml).unwrap();
        Config::from_entries(entries).unwrap()
    }

    #[test]
    fn builds_each_validator_type() {
        let config = config(
            r#"
- name: default
  type: notaryv1
  host: notary.docker.io
  root_keys:
    - name: default
      key: "aaa"
- name: sigstore
  type: cosign
  root_keys:
    - name: default
      key: "aaa"
- name: allow
  type: static
  approve: true
"#,
        );
        let validators = Validators::from_config(&config).unwrap();
        assert!(matches!(
            validators.get(None).unwrap(),
            Validator::NotaryV1(_)
        ));
        assert!(matches!(
            validators.get(Some("sigstore")).unwrap(),
            Validator::Cosign(_)
        ));
        assert!(matches!(
            validators.get(Some("allow")).unwrap(),
            Validator::Static(_)
        ));
        assert!(validators.get(Some("missing")).is_err());
    }

    #[test]
    fn notaryv1_without_host_is_fatal() {
        let entries: Vec<ValidatorEntry> = serde_yaml::from_str(
            r#"
- name: default
  type: notaryv1
  root_keys:
    - name: default
      key: "aaa"
"#,
        )
        .unwrap();
        let config = Config::from_entries(entries).unwrap();
        assert!(Validators::from_config(&config).is_err());
    }
}
