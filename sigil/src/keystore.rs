// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-validation key store.
//!
//! A [`KeyStore`] starts out trusting nothing but the pinned root key from
//! configuration, and grows as chain-of-trust validation progresses: a
//! validated `root` contributes the per-role key sets and thresholds, a
//! validated `targets` contributes delegation keys, and validated `snapshot`
//! and `timestamp` documents contribute the hash expectations their `meta`
//! sections record. A store lives for one image validation and is never
//! shared.

use crate::error::{self, Result};
use crate::schema::decoded::{Base64, Decoded, Hex};
use crate::schema::key::Key;
use crate::schema::{MetaFile, Root, Targets};
use snafu::OptionExt;
use std::collections::HashMap;
use std::num::NonZeroU64;

/// The keys trusted for one role, plus the role's signing threshold.
///
/// A `None` key ID marks a pinned key that is allowed to match any signature
/// (the bootstrap root key has no declared ID).
#[derive(Debug, Clone)]
pub struct TrustedKeys {
    /// Key ID and key, per trusted key.
    pub keys: Vec<(Option<Decoded<Hex>>, Key)>,
    /// How many distinct valid signatures the role requires.
    pub threshold: NonZeroU64,
}

/// What a referencing role recorded about another role's document.
#[derive(Debug, Clone)]
pub struct MetaExpectation {
    /// Expected SHA-256 of the document's wire bytes.
    pub sha256: Decoded<Base64>,
    /// Expected document version, when the referencing role records one.
    pub version: Option<NonZeroU64>,
}

/// Trusted keys and hash expectations accumulated during one chain-of-trust
/// validation.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: HashMap<String, TrustedKeys>,
    meta: HashMap<String, MetaExpectation>,
}

impl KeyStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that trusts `root_key` for the `root` role at threshold 1.
    pub fn bootstrap(root_key: Key) -> Self {
        let mut store = Self::new();
        store.keys.insert(
            "root".to_owned(),
            TrustedKeys {
                keys: vec![(None, root_key)],
                threshold: NonZeroU64::MIN,
            },
        );
        store
    }

    /// Installs the per-role key sets and thresholds a validated `root`
    /// declares, replacing the bootstrap entry.
    pub fn load_root(&mut self, root: &Root) -> Result<()> {
        for (role_name, role_keys) in &root.roles {
            let mut keys = Vec::with_capacity(role_keys.keyids.len());
            for keyid in &role_keys.keyids {
                let key = root.keys.get(keyid).context(error::UnknownKeyIdSnafu {
                    role: role_name.clone(),
                    keyid: keyid.to_string(),
                })?;
                keys.push((Some(keyid.clone()), key.clone()));
            }
            self.keys.insert(
                role_name.clone(),
                TrustedKeys {
                    keys,
                    threshold: role_keys.threshold,
                },
            );
        }
        Ok(())
    }

    /// Installs the delegation-role keys a validated `targets` declares.
    pub fn load_delegations(&mut self, targets: &Targets) -> Result<()> {
        let Some(delegations) = &targets.delegations else {
            return Ok(());
        };
        for role in &delegations.roles {
            let mut keys = Vec::with_capacity(role.keyids.len());
            for keyid in &role.keyids {
                let key = delegations
                    .keys
                    .get(keyid)
                    .context(error::UnknownKeyIdSnafu {
                        role: role.name.clone(),
                        keyid: keyid.to_string(),
                    })?;
                keys.push((Some(keyid.clone()), key.clone()));
            }
            self.keys.insert(
                role.name.clone(),
                TrustedKeys {
                    keys,
                    threshold: role.threshold,
                },
            );
        }
        Ok(())
    }

    /// Installs the hash expectations from a validated `snapshot` or
    /// `timestamp` meta section.
    pub fn load_meta(&mut self, meta: &HashMap<String, MetaFile>) {
        for (role_name, meta_file) in meta {
            self.meta.insert(
                role_name.clone(),
                MetaExpectation {
                    sha256: meta_file.hashes.sha256.clone(),
                    version: meta_file.version,
                },
            );
        }
    }

    /// The keys and threshold trusted for `role`, if any.
    pub fn keys_for(&self, role: &str) -> Option<&TrustedKeys> {
        self.keys.get(role)
    }

    /// The signing threshold for `role`, if any keys are trusted for it.
    pub fn threshold_for(&self, role: &str) -> Option<NonZeroU64> {
        self.keys.get(role).map(|k| k.threshold)
    }

    /// The hash expectation recorded for `role`, if any.
    pub fn expectation_for(&self, role: &str) -> Option<&MetaExpectation> {
        self.meta.get(role)
    }
}
