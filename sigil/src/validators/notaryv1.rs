// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Notary v1 validator: drives the TUF chain-of-trust algorithm against
//! a notary server and resolves an image reference to its signed digest.
//!
//! The order of operations matters. `root` is signature-checked against the
//! pinned key first, but only counts as validated once its hash matches what
//! the (timestamp-anchored) `snapshot` recorded; `timestamp` anchors
//! freshness, `snapshot` anchors consistency, and only then are `targets`
//! and its delegations trusted to name digests.

use crate::config::ValidatorEntry;
use crate::error::{self, Result};
use crate::image::ImageRef;
use crate::keystore::KeyStore;
use crate::notary::Notary;
use crate::policy::Rule;
use crate::schema::key::Key;
use crate::schema::{RoleName, Root, Snapshot, Target, Targets, Timestamp, TrustData};
use snafu::ensure;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Collective deadline for all trust-data fetches of one validation.
const TRUST_DATA_DEADLINE: Duration = Duration::from_secs(30);

/// The delegation role notary uses for plain (non-delegated) signing once
/// delegations exist on a repository.
const RELEASES_ROLE: &str = "targets/releases";

/// Validates images against a Notary v1 server.
#[derive(Debug, Clone)]
pub struct NotaryV1Validator {
    name: String,
    notary: Notary,
}

impl NotaryV1Validator {
    /// Builds the validator from its configuration entry.
    pub fn from_entry(entry: &ValidatorEntry) -> Result<Self> {
        Ok(Self {
            name: entry.name.clone(),
            notary: Notary::from_entry(entry)?,
        })
    }

    /// The configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the backing notary is reachable.
    pub async fn healthy(&self) -> bool {
        self.notary.healthy().await
    }

    /// Resolves `image` to its signed digest under the policy rule's pinned
    /// key and required delegations.
    pub async fn validate(&self, image: &ImageRef, rule: &Rule) -> Result<Option<String>> {
        let root_key = self.notary.get_key(rule.key.as_deref())?;
        let required: Vec<String> = rule
            .delegations
            .iter()
            .map(|role| normalize_delegation(role))
            .collect();
        let digest = self
            .process_chain_of_trust(image, &required, root_key)
            .await?;
        Ok(Some(digest))
    }

    async fn process_chain_of_trust(
        &self,
        image: &ImageRef,
        required: &[String],
        root_key: Key,
    ) -> Result<String> {
        let (root_raw, snapshot_raw, timestamp_raw, targets_raw) =
            tokio::time::timeout(TRUST_DATA_DEADLINE, async {
                futures::try_join!(
                    self.notary.get_trust_data(image, &RoleName::Root),
                    self.notary.get_trust_data(image, &RoleName::Snapshot),
                    self.notary.get_trust_data(image, &RoleName::Timestamp),
                    self.notary.get_trust_data(image, &RoleName::Targets),
                )
            })
            .await
            .map_err(|_| {
                error::DeadlineSnafu {
                    what: "trust data retrieval".to_string(),
                }
                .build()
            })??;

        let root = TrustData::<Root>::from_bytes(root_raw, RoleName::Root)?;
        let snapshot = TrustData::<Snapshot>::from_bytes(snapshot_raw, RoleName::Snapshot)?;
        let timestamp = TrustData::<Timestamp>::from_bytes(timestamp_raw, RoleName::Timestamp)?;
        let targets = TrustData::<Targets>::from_bytes(targets_raw, RoleName::Targets)?;

        // Root is signature-checked against the pinned key and its role keys
        // are installed. Not fully trusted yet: its hash still has to match
        // what snapshot recorded.
        let mut keystore = KeyStore::bootstrap(root_key);
        root.validate_signature(&keystore)?;
        root.validate_expiry()?;
        keystore.load_root(&root.signed)?;

        // Freshness. Timestamp has no hash anchor; it is the anchor.
        timestamp.validate(&keystore)?;

        // Consistency: snapshot against the root keys and the timestamp hash.
        snapshot.validate_signature(&keystore)?;
        let mut timestamp_store = KeyStore::new();
        timestamp_store.load_meta(&timestamp.signed.meta);
        snapshot.validate_hash(&timestamp_store)?;
        snapshot.validate_expiry()?;

        // Root anti-rollback: the fetched root must be the one snapshot pins.
        let mut snapshot_store = KeyStore::new();
        snapshot_store.load_meta(&snapshot.signed.meta);
        root.validate_hash(&snapshot_store)?;

        // Targets, hash-anchored in snapshot.
        keystore.load_meta(&snapshot.signed.meta);
        targets.validate(&keystore)?;
        targets.validate_hash(&keystore)?;
        keystore.load_delegations(&targets.signed)?;

        // Delegation documents, fetched concurrently. Roles that were
        // declared but never signed don't exist on the notary and are
        // dropped; roles that do exist must validate.
        let declared: Vec<String> = targets
            .signed
            .delegation_names()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let mut delegations: HashMap<String, TrustData<Targets>> = HashMap::new();
        if !declared.is_empty() {
            let fetched = tokio::time::timeout(
                TRUST_DATA_DEADLINE,
                futures::future::join_all(declared.iter().map(|name| async {
                    let role = RoleName::delegation(name);
                    let bytes = self.notary.get_delegation_trust_data(image, &role).await;
                    (name.clone(), bytes)
                })),
            )
            .await
            .map_err(|_| {
                error::DeadlineSnafu {
                    what: "delegation trust data retrieval".to_string(),
                }
                .build()
            })?;
            for (name, bytes) in fetched {
                let Some(bytes) = bytes else { continue };
                let data = TrustData::<Targets>::from_bytes(bytes, RoleName::delegation(&name))?;
                data.validate(&keystore)?;
                delegations.insert(name, data);
            }
        }

        // Required-delegation gate: every role the policy demands must be
        // present and validated.
        for role in required {
            ensure!(
                delegations.contains_key(role),
                error::InsufficientTrustDataSnafu {
                    image: image.to_string(),
                }
            );
        }

        // Candidate targets maps, per the precedence rules: required
        // delegations > targets/releases > top-level targets.
        let candidates: Vec<&HashMap<String, Target>> = if required.is_empty() {
            match delegations.get(RELEASES_ROLE) {
                Some(releases) if targets.signed.has_delegations() => {
                    vec![&releases.signed.targets]
                }
                _ => vec![&targets.signed.targets],
            }
        } else {
            required
                .iter()
                .map(|role| &delegations[role].signed.targets)
                .collect()
        };

        let found: Vec<Option<String>> = candidates
            .iter()
            .map(|targets_map| search_targets(targets_map, image))
            .collect();
        ensure!(
            required.is_empty() || found.iter().all(Option::is_some),
            error::InsufficientTrustDataSnafu {
                image: image.to_string(),
            }
        );

        let digests: BTreeSet<String> = found.into_iter().flatten().collect();
        let mut digests = digests.into_iter();
        match (digests.next(), digests.next()) {
            (Some(digest), None) => Ok(digest),
            (Some(_), Some(_)) => error::AmbiguousDigestSnafu {
                image: image.to_string(),
            }
            .fail(),
            (None, _) => error::DigestNotFoundSnafu {
                image: image.to_string(),
            }
            .fail(),
        }
    }
}

/// Looks up the image in one targets map: by digest bytes when the reference
/// is pinned, by tag otherwise.
fn search_targets(targets: &HashMap<String, Target>, image: &ImageRef) -> Option<String> {
    if let Some(digest) = image.digest() {
        let expected = hex::decode(digest).ok()?;
        return targets
            .values()
            .any(|target| target.hashes.sha256.bytes() == expected)
            .then(|| digest.to_string());
    }
    let target = targets.get(image.tag()?)?;
    Some(hex::encode(target.hashes.sha256.bytes()))
}

/// Prepends `targets/` to a delegation role name when absent.
fn normalize_delegation(role: &str) -> String {
    if role.starts_with("targets/") {
        role.to_string()
    } else {
        format!("targets/{role}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Hashes;
    use crate::schema::decoded::{Base64, Decoded};
    use maplit::hashmap;

    fn target(sha256_b64: &str) -> Target {
        Target {
            hashes: Hashes {
                sha256: Decoded::<Base64>::parse(sha256_b64).unwrap(),
            },
            length: Some(528),
        }
    }

    #[test]
    fn normalizes_delegation_roles() {
        assert_eq!(normalize_delegation("phbelitz"), "targets/phbelitz");
        assert_eq!(normalize_delegation("targets/chamsen"), "targets/chamsen");
        assert_eq!(normalize_delegation("targets/releases"), "targets/releases");
    }

    #[test]
    fn searches_by_tag() {
        let targets = hashmap! {
            "test".to_string() => target("rJBMmxkdFPr1S3lS8mUKS7IcIBvzQTE4i4UejOmSplI="),
        };
        let image = ImageRef::parse("securesystemsengineering/alice-image:test").unwrap();
        assert_eq!(
            search_targets(&targets, &image).unwrap(),
            "ac904c9b191d14faf54b7952f2650a4bb21c201bf34131388b851e8ce992a652"
        );

        let image = ImageRef::parse("securesystemsengineering/alice-image:missing").unwrap();
        assert_eq!(search_targets(&targets, &image), None);
    }

    #[test]
    fn searches_by_digest() {
        let targets = hashmap! {
            "test".to_string() => target("rJBMmxkdFPr1S3lS8mUKS7IcIBvzQTE4i4UejOmSplI="),
        };
        let digest = "ac904c9b191d14faf54b7952f2650a4bb21c201bf34131388b851e8ce992a652";
        let image = ImageRef::parse(&format!(
            "securesystemsengineering/alice-image@sha256:{digest}"
        ))
        .unwrap();
        assert_eq!(search_targets(&targets, &image).unwrap(), digest);

        let other = "a154797b8300165956ee1f16d98f3a1426301c1168f0462c73ce9bc03361cabf";
        let image = ImageRef::parse(&format!(
            "securesystemsengineering/alice-image@sha256:{other}"
        ))
        .unwrap();
        assert_eq!(search_targets(&targets, &image), None);
    }
}
