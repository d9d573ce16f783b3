// SPDX-License-Identifier: MIT OR Apache-2.0

//! The TUF metadata objects served by a notary: `root`, `targets` (with its
//! delegations), `snapshot` and `timestamp`, plus the signature, expiry and
//! hash checks each of them supports.
//!
//! A [`TrustData`] keeps three views of one fetched document: the typed
//! `signed` payload, the raw `signed` JSON value (signatures are verified
//! over its canonical serialization, never over wire bytes), and the wire
//! bytes themselves (hash checks from a referencing role cover those).

mod de;
pub mod decoded;
pub mod key;

use crate::error::{self, Result};
use crate::keystore::KeyStore;
use crate::schema::decoded::{Base64, Decoded, Hex};
use crate::schema::key::{Key, SignatureMethod};
use aws_lc_rs::digest::{digest, SHA256};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use olpc_cjson::CanonicalFormatter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

/// The name of a TUF role: one of the four top-level roles, or a delegation
/// role of the form `targets/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleName {
    /// The root role; delegates trust to the other top-level roles.
    Root,
    /// The snapshot role; pins the hashes of `root` and all targets metadata.
    Snapshot,
    /// The timestamp role; pins the hash of `snapshot` and limits replay.
    Timestamp,
    /// The top-level targets role.
    Targets,
    /// A delegation role, e.g. `targets/releases`. The full `targets/`-prefixed
    /// name is stored.
    Delegation(String),
}

impl RoleName {
    /// Builds a delegation role name, prepending `targets/` when absent.
    pub fn delegation(name: &str) -> Self {
        if name.starts_with("targets/") {
            RoleName::Delegation(name.to_owned())
        } else {
            RoleName::Delegation(format!("targets/{name}"))
        }
    }

    /// The `_type` value this role's documents must carry. Delegation
    /// documents share the `targets` shape.
    pub fn type_name(&self) -> &str {
        match self {
            RoleName::Root => "root",
            RoleName::Snapshot => "snapshot",
            RoleName::Timestamp => "timestamp",
            RoleName::Targets | RoleName::Delegation(_) => "targets",
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleName::Root => f.write_str("root"),
            RoleName::Snapshot => f.write_str("snapshot"),
            RoleName::Timestamp => f.write_str("timestamp"),
            RoleName::Targets => f.write_str("targets"),
            RoleName::Delegation(name) => f.write_str(name),
        }
    }
}

impl FromStr for RoleName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "root" => Ok(RoleName::Root),
            "snapshot" => Ok(RoleName::Snapshot),
            "timestamp" => Ok(RoleName::Timestamp),
            "targets" => Ok(RoleName::Targets),
            other if other.starts_with("targets/") => {
                Ok(RoleName::Delegation(other.to_owned()))
            }
            other => Err(format!("'{other}' is not a TUF role name")),
        }
    }
}

/// Common trait implemented by the `signed` payload of every role.
pub trait Role: Serialize + DeserializeOwned {
    /// The `_type` value documents of this role carry.
    const TYPE: &'static str;

    /// When the metadata stops being trustworthy.
    fn expires(&self) -> DateTime<Utc>;

    /// Monotonic metadata version.
    fn version(&self) -> NonZeroU64;
}

/// A signature over the canonical form of a `signed` payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Signature {
    /// The ID of the key that made this signature.
    pub keyid: Decoded<Hex>,
    /// The signing method, e.g. `ecdsa`.
    pub method: SignatureMethod,
    /// The base64-encoded signature bytes.
    pub sig: Decoded<Base64>,
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The `signed` payload of a `root` document: the key database and the
/// per-role key assignments and thresholds everything else is verified
/// against.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Root {
    /// When the metadata expires.
    pub expires: DateTime<Utc>,

    /// Metadata version.
    pub version: NonZeroU64,

    /// All keys known to this repository, indexed by key ID.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The key IDs and signing threshold for each role.
    pub roles: HashMap<String, RoleKeys>,

    /// Whether the repository uses consistent snapshots. Notary omits this.
    #[serde(default)]
    pub consistent_snapshot: Option<bool>,
}

/// The key IDs used for a role and the signature threshold required to
/// consider the role's metadata properly signed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoleKeys {
    /// The key IDs used for the role.
    pub keyids: Vec<Decoded<Hex>>,

    /// How many distinct valid signatures the role requires.
    pub threshold: NonZeroU64,
}

impl Role for Root {
    const TYPE: &'static str = "root";

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The `signed` payload of a `targets` document (and of every delegation
/// document, which shares the shape minus further delegations).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Targets {
    /// When the metadata expires.
    pub expires: DateTime<Utc>,

    /// Metadata version.
    pub version: NonZeroU64,

    /// Signed targets, keyed by tag.
    #[serde(default)]
    pub targets: HashMap<String, Target>,

    /// Sub-roles nominated to sign subsets of the targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
}

/// One signed target: the hashes (and length) recorded for a tag.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Target {
    /// Hashes of the target, by hash algorithm.
    pub hashes: Hashes,

    /// Length in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// The hash dictionary recorded for a target or a metadata file. Notary
/// base64-encodes these (unlike key and signature IDs, which are hex).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Hashes {
    /// The SHA-256 digest.
    pub sha256: Decoded<Base64>,
}

/// The delegation section of a `targets` document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Delegations {
    /// Public keys for the delegation roles, indexed by key ID.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The nominated sub-roles.
    pub roles: Vec<DelegatedRole>,
}

/// One delegation role nominated by `targets`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DelegatedRole {
    /// The full role name, e.g. `targets/releases`.
    pub name: String,

    /// The key IDs this role signs with.
    pub keyids: Vec<Decoded<Hex>>,

    /// How many distinct valid signatures the role requires.
    pub threshold: NonZeroU64,

    /// The target paths this role is trusted for.
    #[serde(default)]
    pub paths: Vec<String>,
}

impl Targets {
    /// Whether this document nominates any delegation roles.
    pub fn has_delegations(&self) -> bool {
        self.delegations
            .as_ref()
            .is_some_and(|d| !d.roles.is_empty())
    }

    /// The names of all nominated delegation roles, in declaration order.
    pub fn delegation_names(&self) -> Vec<&str> {
        self.delegations
            .as_ref()
            .map(|d| d.roles.iter().map(|r| r.name.as_str()).collect())
            .unwrap_or_default()
    }
}

impl Role for Targets {
    const TYPE: &'static str = "targets";

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The `signed` payload of a `snapshot` document: the hashes of `root` and of
/// all targets metadata, keyed by role name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Snapshot {
    /// When the metadata expires.
    pub expires: DateTime<Utc>,

    /// Metadata version.
    pub version: NonZeroU64,

    /// Hash records, keyed by role name (`root`, `targets`, `targets/...`).
    pub meta: HashMap<String, MetaFile>,
}

/// The `signed` payload of a `timestamp` document. Its `meta` map records
/// only the `snapshot` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Timestamp {
    /// When the metadata expires.
    pub expires: DateTime<Utc>,

    /// Metadata version.
    pub version: NonZeroU64,

    /// Hash records; only `snapshot` is meaningful here.
    pub meta: HashMap<String, MetaFile>,
}

/// One hash record in a `snapshot` or `timestamp` meta map.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetaFile {
    /// Hashes of the referenced metadata document's bytes.
    pub hashes: Hashes,

    /// Length in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// Version of the referenced document. Notary omits this; when present it
    /// is checked against the fetched document to catch rollbacks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<NonZeroU64>,
}

impl Role for Snapshot {
    const TYPE: &'static str = "snapshot";

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

impl Role for Timestamp {
    const TYPE: &'static str = "timestamp";

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A fetched trust-data document.
#[derive(Debug, Clone)]
pub struct TrustData<T> {
    role: RoleName,
    /// The typed `signed` payload.
    pub signed: T,
    /// The signatures over the canonical form of `signed`.
    pub signatures: Vec<Signature>,
    raw_signed: Value,
    raw: Bytes,
}

impl<T: Role> TrustData<T> {
    /// Parses and schema-checks a fetched document for the given role.
    pub fn from_bytes(raw: Bytes, role: RoleName) -> Result<Self> {
        let document: Value =
            serde_json::from_slice(&raw).context(error::ParseTrustDataSnafu {
                role: role.to_string(),
            })?;
        let raw_signed = document
            .get("signed")
            .cloned()
            .context(error::SchemaMismatchSnafu {
                role: role.to_string(),
                reason: "missing 'signed' field".to_string(),
            })?;
        let signatures: Vec<Signature> = serde_json::from_value(
            document
                .get("signatures")
                .cloned()
                .context(error::SchemaMismatchSnafu {
                    role: role.to_string(),
                    reason: "missing 'signatures' field".to_string(),
                })?,
        )
        .context(error::ParseTrustDataSnafu {
            role: role.to_string(),
        })?;
        ensure!(
            !signatures.is_empty(),
            error::SchemaMismatchSnafu {
                role: role.to_string(),
                reason: "document carries no signatures".to_string(),
            }
        );
        let declared_type = raw_signed
            .get("_type")
            .and_then(Value::as_str)
            .context(error::SchemaMismatchSnafu {
                role: role.to_string(),
                reason: "missing '_type' field".to_string(),
            })?;
        ensure!(
            declared_type.eq_ignore_ascii_case(role.type_name()),
            error::SchemaMismatchSnafu {
                role: role.to_string(),
                reason: format!("'_type' is {declared_type:?}"),
            }
        );
        let signed: T = serde_json::from_value(raw_signed.clone()).context(
            error::ParseTrustDataSnafu {
                role: role.to_string(),
            },
        )?;
        Ok(Self {
            role,
            signed,
            signatures,
            raw_signed,
            raw,
        })
    }

    /// The role this document was fetched for.
    pub fn role(&self) -> &RoleName {
        &self.role
    }

    /// The canonical JSON serialization of the `signed` payload. This, not
    /// the wire bytes, is what signatures are verified over.
    pub fn canonical_signed(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.raw_signed
            .serialize(&mut ser)
            .context(error::JsonSerializationSnafu {
                what: format!("{} role", self.role),
            })?;
        Ok(data)
    }

    /// The SHA-256 digest of the document's wire bytes, as recorded by a
    /// referencing role.
    pub fn sha256(&self) -> Vec<u8> {
        digest(&SHA256, &self.raw).as_ref().to_vec()
    }

    /// Requires at least `threshold` distinct valid signatures from the keys
    /// the key store trusts for this document's role.
    pub fn validate_signature(&self, keystore: &KeyStore) -> Result<()> {
        let trusted = keystore
            .keys_for(&self.role.to_string())
            .context(error::SignatureInvalidSnafu {
                role: self.role.to_string(),
            })?;
        let canonical = self.canonical_signed()?;

        let mut valid: HashSet<&[u8]> = HashSet::new();
        for signature in &self.signatures {
            if valid.contains(signature.keyid.bytes()) {
                continue;
            }
            let verified = trusted.keys.iter().any(|(keyid, key)| {
                keyid
                    .as_ref()
                    .map_or(true, |id| id.bytes() == signature.keyid.bytes())
                    && key.verify(&signature.method, &canonical, &signature.sig)
            });
            if verified {
                valid.insert(signature.keyid.bytes());
            }
        }
        ensure!(
            valid.len() as u64 >= trusted.threshold.get(),
            error::SignatureInvalidSnafu {
                role: self.role.to_string(),
            }
        );
        Ok(())
    }

    /// Fails if the metadata has expired.
    pub fn validate_expiry(&self) -> Result<()> {
        let expires = self.signed.expires();
        ensure!(
            Utc::now() < expires,
            error::ExpiredSnafu {
                role: self.role.to_string(),
                expires,
            }
        );
        Ok(())
    }

    /// Compares this document's wire-byte hash (and version, when recorded)
    /// against what the referencing role declared into `keystore`.
    pub fn validate_hash(&self, keystore: &KeyStore) -> Result<()> {
        let role = self.role.to_string();
        let expectation = keystore
            .expectation_for(&role)
            .context(error::HashMismatchSnafu { role: role.clone() })?;
        ensure!(
            self.sha256() == expectation.sha256.bytes(),
            error::HashMismatchSnafu { role: role.clone() }
        );
        if let Some(expected) = expectation.version {
            ensure!(
                self.signed.version() >= expected,
                error::RollbackSnafu {
                    role,
                    fetched: self.signed.version().get(),
                    expected: expected.get(),
                }
            );
        }
        Ok(())
    }

    /// Signature and expiry validation in one step. Hash checks are driven
    /// separately because they need the referencing document's declarations.
    pub fn validate(&self, keystore: &KeyStore) -> Result<()> {
        self.validate_signature(keystore)?;
        self.validate_expiry()
    }
}
