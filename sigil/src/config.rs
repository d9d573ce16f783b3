// SPDX-License-Identifier: MIT OR Apache-2.0

//! Validator configuration: a YAML list of validator entries, optionally
//! merged with a secrets file keyed by validator name (credentials are
//! mounted separately from the main config in a cluster).

use crate::error::{self, Result};
use serde::Deserialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::path::Path;

/// The concrete validator kind a configuration entry selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorType {
    /// Notary v1 chain-of-trust validation.
    #[serde(rename = "notaryv1")]
    NotaryV1,
    /// Cosign subprocess verification.
    Cosign,
    /// Unconditional allow or deny.
    Static,
}

/// A named pinned public key.
#[derive(Debug, Clone, Deserialize)]
pub struct TrustRoot {
    /// Key name referenced from policy rules; `default` is the fallback.
    pub name: String,
    /// The key material: PEM or bare base64 DER.
    pub key: String,
}

/// HTTP basic credentials for registry token endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct BasicAuth {
    /// User name.
    #[serde(alias = "USER", alias = "username")]
    pub user: String,
    /// Password.
    #[serde(alias = "PASS", alias = "password")]
    pub pass: String,
}

/// One validator entry from the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorEntry {
    /// The name policy rules reference; `default` is the fallback.
    pub name: String,

    /// Which validator implementation this entry configures.
    #[serde(rename = "type")]
    pub kind: ValidatorType,

    /// The notary host, for notary-backed validators.
    #[serde(default)]
    pub host: Option<String>,

    /// Pinned trust roots.
    #[serde(default)]
    pub root_keys: Vec<TrustRoot>,

    /// Credentials for the notary's token endpoint.
    #[serde(default)]
    pub auth: Option<BasicAuth>,

    /// A self-signed CA certificate (PEM) for the notary.
    #[serde(default)]
    pub cert: Option<String>,

    /// Whether the notary is an Azure Container Registry variant.
    #[serde(default)]
    pub is_acr: bool,

    /// For static validators: allow (`true`) or deny (`false`).
    #[serde(default)]
    pub approve: Option<bool>,

    /// Path of the cosign binary; `cosign` on `$PATH` by default.
    #[serde(default)]
    pub cosign_binary: Option<String>,
}

/// The full validator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    validators: Vec<ValidatorEntry>,
}

impl Config {
    /// Loads the configuration file, merging in the secrets file when given.
    ///
    /// The secrets file maps validator names to partial entries whose fields
    /// override the main configuration (typically just `auth`).
    pub fn load(path: &Path, secrets_path: Option<&Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).context(error::FileReadSnafu {
            path: path.display().to_string(),
        })?;
        let mut entries: serde_yaml::Value =
            serde_yaml::from_str(&content).context(error::ConfigParseSnafu {
                path: path.display().to_string(),
            })?;

        if let Some(secrets_path) = secrets_path {
            let secrets = std::fs::read_to_string(secrets_path).context(error::FileReadSnafu {
                path: secrets_path.display().to_string(),
            })?;
            let secrets: serde_yaml::Value =
                serde_yaml::from_str(&secrets).context(error::ConfigParseSnafu {
                    path: secrets_path.display().to_string(),
                })?;
            merge_secrets(&mut entries, &secrets);
        }

        let validators: Vec<ValidatorEntry> =
            serde_yaml::from_value(entries).context(error::ConfigParseSnafu {
                path: path.display().to_string(),
            })?;
        Self::from_entries(validators)
    }

    /// Builds a configuration from entries, enforcing the uniqueness rules.
    pub fn from_entries(validators: Vec<ValidatorEntry>) -> Result<Self> {
        ensure!(
            !validators.is_empty(),
            error::InvalidConfigurationSnafu {
                reason: "no validator configurations".to_string(),
            }
        );
        let defaults = validators.iter().filter(|v| v.name == "default").count();
        ensure!(
            defaults <= 1,
            error::InvalidConfigurationSnafu {
                reason: "too many default validator configurations".to_string(),
            }
        );
        for validator in &validators {
            let default_keys = validator
                .root_keys
                .iter()
                .filter(|k| k.name == "default")
                .count();
            ensure!(
                default_keys <= 1,
                error::InvalidConfigurationSnafu {
                    reason: format!(
                        "too many default keys in validator configuration {:?}",
                        validator.name
                    ),
                }
            );
        }
        Ok(Self { validators })
    }

    /// The configured entries, in declaration order.
    pub fn validators(&self) -> &[ValidatorEntry] {
        &self.validators
    }

    /// Selects a validator entry by name. With a single configured entry the
    /// name is ignored; otherwise `None` selects `default`.
    pub fn entry(&self, name: Option<&str>) -> Result<&ValidatorEntry> {
        if self.validators.len() < 2 {
            return self
                .validators
                .first()
                .context(error::ValidatorNotFoundSnafu {
                    name: name.map(str::to_string),
                });
        }
        let wanted = name.unwrap_or("default");
        self.validators
            .iter()
            .find(|v| v.name == wanted)
            .context(error::ValidatorNotFoundSnafu {
                name: name.map(str::to_string),
            })
    }
}

/// Selects a trust root by name. With a single configured key the name is
/// ignored; otherwise `None` selects `default`.
pub fn select_trust_root<'a>(
    roots: &'a [TrustRoot],
    name: Option<&str>,
) -> Result<&'a TrustRoot> {
    if roots.len() < 2 {
        return roots.first().context(error::KeyNotFoundSnafu {
            name: name.unwrap_or("default").to_string(),
        });
    }
    let wanted = name.unwrap_or("default");
    roots
        .iter()
        .find(|r| r.name == wanted)
        .context(error::KeyNotFoundSnafu {
            name: wanted.to_string(),
        })
}

/// Merges secrets (a mapping of validator name to partial entry) into the
/// entry list, secrets winning on conflicts.
fn merge_secrets(entries: &mut serde_yaml::Value, secrets: &serde_yaml::Value) {
    let (Some(entries), Some(secrets)) = (entries.as_sequence_mut(), secrets.as_mapping())
    else {
        return;
    };
    for entry in entries {
        let Some(name) = entry.get("name").cloned() else {
            continue;
        };
        let (Some(extra), Some(entry)) = (
            secrets.get(&name).and_then(|v| v.as_mapping()),
            entry.as_mapping_mut(),
        ) else {
            continue;
        };
        for (key, value) in extra {
            entry.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const CONFIG: &str = r#"
- name: default
  type: notaryv1
  host: notary.docker.io
  root_keys:
    - name: default
      key: "aaa"
- name: allowlist
  type: static
  approve: true
"#;

    #[test]
    fn loads_and_selects_by_name() {
        let file = write_yaml(CONFIG);
        let config = Config::load(file.path(), None).unwrap();
        assert_eq!(config.validators().len(), 2);
        assert_eq!(config.entry(None).unwrap().name, "default");
        assert_eq!(config.entry(Some("allowlist")).unwrap().name, "allowlist");
        assert!(config.entry(Some("missing")).is_err());
    }

    #[test]
    fn single_entry_ignores_name() {
        let file = write_yaml(
            r#"
- name: onlyone
  type: static
  approve: false
"#,
        );
        let config = Config::load(file.path(), None).unwrap();
        assert_eq!(config.entry(Some("whatever")).unwrap().name, "onlyone");
    }

    #[test]
    fn secrets_merge_by_validator_name() {
        let config_file = write_yaml(CONFIG);
        let secrets_file = write_yaml(
            r#"
default:
  auth:
    USER: bert
    PASS: bertig
"#,
        );
        let config = Config::load(config_file.path(), Some(secrets_file.path())).unwrap();
        let auth = config.entry(None).unwrap().auth.clone().unwrap();
        assert_eq!(auth.user, "bert");
        assert_eq!(auth.pass, "bertig");
        assert!(config.entry(Some("allowlist")).unwrap().auth.is_none());
    }

    #[test]
    fn duplicate_default_validators_are_fatal() {
        let file = write_yaml(
            r#"
- name: default
  type: static
  approve: true
- name: default
  type: static
  approve: false
"#,
        );
        assert!(matches!(
            Config::load(file.path(), None).unwrap_err(),
            crate::Error::InvalidConfiguration { .. }
        ));
    }

    #[test]
    fn duplicate_default_keys_are_fatal() {
        let file = write_yaml(
            r#"
- name: default
  type: notaryv1
  host: notary.docker.io
  root_keys:
    - name: default
      key: "aaa"
    - name: default
      key: "bbb"
"#,
        );
        assert!(matches!(
            Config::load(file.path(), None).unwrap_err(),
            crate::Error::InvalidConfiguration { .. }
        ));
    }

    #[test]
    fn unknown_validator_type_is_fatal() {
        let file = write_yaml(
            r#"
- name: default
  type: notaryv3
"#,
        );
        assert!(matches!(
            Config::load(file.path(), None).unwrap_err(),
            crate::Error::ConfigParse { .. }
        ));
    }

    #[test]
    fn trust_root_selection() {
        let roots = vec![
            TrustRoot {
                name: "default".to_string(),
                key: "a".to_string(),
            },
            TrustRoot {
                name: "charlie".to_string(),
                key: "b".to_string(),
            },
        ];
        assert_eq!(select_trust_root(&roots, None).unwrap().key, "a");
        assert_eq!(select_trust_root(&roots, Some("charlie")).unwrap().key, "b");
        assert!(matches!(
            select_trust_root(&roots, Some("missing")).unwrap_err(),
            crate::Error::KeyNotFound { .. }
        ));
        assert!(select_trust_root(&[], None).is_err());
    }
}
