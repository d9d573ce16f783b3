// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared helpers for integration tests: runtime-generated signing keys and
//! notary repositories built (and signed) on the fly, served over httptest.

#![allow(dead_code)]

use aws_lc_rs::digest::{digest, SHA256};
use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use httptest::{matchers::request, responders::status_code, Expectation, Server};
use olpc_cjson::CanonicalFormatter;
use serde::Serialize;
use serde_json::{json, Value};

/// DER prefix of a P-256 `SubjectPublicKeyInfo` wrapping a 65-byte
/// uncompressed point.
const P256_SPKI_PREFIX: &[u8] = &hex_literal::hex!(
    "3059301306072a8648ce3d020106082a8648ce3d030107034200"
);

/// The digest the alice-image fixtures sign for tag `test`.
pub const ALICE_DIGEST: &str = "ac904c9b191d14faf54b7952f2650a4bb21c201bf34131388b851e8ce992a652";
/// The digest the sample-image fixtures sign for tag `sign`.
pub const SAMPLE_DIGEST: &str = "a154797b8300165956ee1f16d98f3a1426301c1168f0462c73ce9bc03361cabf";

/// An ECDSA P-256 signing key generated for one test.
pub struct TestSigner {
    pair: EcdsaKeyPair,
    spki: Vec<u8>,
    keyid: String,
}

impl TestSigner {
    pub fn new() -> Self {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("generate test key");
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, document.as_ref())
            .expect("load test key");
        let mut spki = P256_SPKI_PREFIX.to_vec();
        spki.extend_from_slice(pair.public_key().as_ref());
        let keyid = hex::encode(digest(&SHA256, &spki).as_ref());
        Self { pair, spki, keyid }
    }

    /// The key ID trust data references this key by.
    pub fn keyid(&self) -> &str {
        &self.keyid
    }

    /// The key as it would sit in a configuration file (base64 DER SPKI).
    pub fn public_b64(&self) -> String {
        STANDARD.encode(&self.spki)
    }

    /// The key as trust data embeds it.
    pub fn tuf_key(&self) -> Value {
        json!({
            "keytype": "ecdsa",
            "keyval": {"private": null, "public": self.public_b64()},
        })
    }

    /// Signs the canonical form of `signed`, producing a signature object.
    pub fn sign(&self, signed: &Value) -> Value {
        let rng = SystemRandom::new();
        let signature = self
            .pair
            .sign(&rng, &canonical_bytes(signed))
            .expect("sign test document");
        json!({
            "keyid": self.keyid,
            "method": "ecdsa",
            "sig": STANDARD.encode(signature.as_ref()),
        })
    }
}

/// Canonical JSON bytes of a value, as signing input.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut bytes, CanonicalFormatter::new());
    value.serialize(&mut ser).expect("canonical serialization");
    bytes
}

/// Base64 SHA-256 of document bytes, as snapshot/timestamp record it.
pub fn sha256_b64(bytes: &[u8]) -> String {
    STANDARD.encode(digest(&SHA256, bytes).as_ref())
}

pub fn far_future() -> String {
    "2035-01-01T00:00:00Z".to_string()
}

pub fn past() -> String {
    "2019-01-01T00:00:00Z".to_string()
}

/// Wraps a `signed` payload and its signatures into wire bytes.
pub fn signed_doc(signed: &Value, signers: &[&TestSigner]) -> Vec<u8> {
    let signatures: Vec<Value> = signers.iter().map(|s| s.sign(signed)).collect();
    serde_json::to_vec(&json!({"signed": signed, "signatures": signatures}))
        .expect("serialize test document")
}

/// A target entry signing the given hex digest.
pub fn target_entry(digest_hex: &str) -> Value {
    let raw = hex::decode(digest_hex).expect("digest hex");
    json!({"hashes": {"sha256": STANDARD.encode(raw)}, "length": 528})
}

pub fn root_signed(expires: &str, role_keys: &[(&str, &TestSigner)]) -> Value {
    let mut keys = serde_json::Map::new();
    let mut roles = serde_json::Map::new();
    for (role, signer) in role_keys {
        keys.insert(signer.keyid().to_string(), signer.tuf_key());
        roles.insert(
            (*role).to_string(),
            json!({"keyids": [signer.keyid()], "threshold": 1}),
        );
    }
    json!({
        "_type": "root",
        "consistent_snapshot": false,
        "expires": expires,
        "version": 1,
        "keys": Value::Object(keys),
        "roles": Value::Object(roles),
    })
}

pub fn targets_signed(expires: &str, targets: Value, delegations: Option<Value>) -> Value {
    let mut signed = json!({
        "_type": "targets",
        "expires": expires,
        "version": 2,
        "targets": targets,
    });
    if let Some(delegations) = delegations {
        signed["delegations"] = delegations;
    }
    signed
}

/// A delegation section nominating the given `targets/<name>` roles.
pub fn delegations_section(roles: &[(&str, &TestSigner)]) -> Value {
    let mut keys = serde_json::Map::new();
    let mut role_list = Vec::new();
    for (name, signer) in roles {
        keys.insert(signer.keyid().to_string(), signer.tuf_key());
        role_list.push(json!({
            "name": format!("targets/{name}"),
            "keyids": [signer.keyid()],
            "threshold": 1,
            "paths": ["*"],
        }));
    }
    json!({"keys": Value::Object(keys), "roles": role_list})
}

pub fn snapshot_signed(expires: &str, meta: &[(&str, &[u8])]) -> Value {
    let mut entries = serde_json::Map::new();
    for (role, bytes) in meta {
        entries.insert(
            (*role).to_string(),
            json!({"hashes": {"sha256": sha256_b64(bytes)}, "length": bytes.len()}),
        );
    }
    json!({
        "_type": "snapshot",
        "expires": expires,
        "version": 1,
        "meta": Value::Object(entries),
    })
}

pub fn timestamp_signed(expires: &str, snapshot_bytes: &[u8]) -> Value {
    json!({
        "_type": "timestamp",
        "expires": expires,
        "version": 1,
        "meta": {
            "snapshot": {
                "hashes": {"sha256": sha256_b64(snapshot_bytes)},
                "length": snapshot_bytes.len(),
            },
        },
    })
}

/// The four top-level signers of a test repository.
pub struct RepoKeys {
    pub root: TestSigner,
    pub targets: TestSigner,
    pub snapshot: TestSigner,
    pub timestamp: TestSigner,
}

impl RepoKeys {
    pub fn new() -> Self {
        Self {
            root: TestSigner::new(),
            targets: TestSigner::new(),
            snapshot: TestSigner::new(),
            timestamp: TestSigner::new(),
        }
    }

    pub fn top_level(&self) -> Vec<(&str, &TestSigner)> {
        vec![
            ("root", &self.root),
            ("targets", &self.targets),
            ("snapshot", &self.snapshot),
            ("timestamp", &self.timestamp),
        ]
    }
}

/// A fully signed notary repository, ready to serve.
pub struct Repo {
    pub keys: RepoKeys,
    pub root: Vec<u8>,
    pub targets: Vec<u8>,
    pub snapshot: Vec<u8>,
    pub timestamp: Vec<u8>,
    /// Delegation documents by full role name (`targets/<name>`).
    pub delegations: Vec<(String, Vec<u8>)>,
}

impl Repo {
    /// Builds a consistent repository: `targets_map` is the top-level targets
    /// field, `delegations` maps role names to (signer, their targets field).
    /// Delegation roles in `unsigned` are declared but get no document.
    pub fn build(
        targets_map: Value,
        delegations: &[(&str, &TestSigner, Value)],
        unsigned: &[(&str, &TestSigner)],
    ) -> Self {
        let keys = RepoKeys::new();

        let mut declared: Vec<(&str, &TestSigner)> = delegations
            .iter()
            .map(|(name, signer, _)| (*name, *signer))
            .collect();
        declared.extend(unsigned.iter().map(|(name, signer)| (*name, *signer)));

        let delegation_section = if declared.is_empty() {
            None
        } else {
            Some(delegations_section(&declared))
        };
        let targets_value = targets_signed(&far_future(), targets_map, delegation_section);
        let targets = signed_doc(&targets_value, &[&keys.targets]);

        let delegation_docs: Vec<(String, Vec<u8>)> = delegations
            .iter()
            .map(|(name, signer, their_targets)| {
                let signed = targets_signed(&far_future(), their_targets.clone(), None);
                (format!("targets/{name}"), signed_doc(&signed, &[*signer]))
            })
            .collect();

        let root_value = root_signed(&far_future(), &keys.top_level());
        let root = signed_doc(&root_value, &[&keys.root]);

        let mut meta: Vec<(&str, &[u8])> = vec![("root", &root), ("targets", &targets)];
        for (name, bytes) in &delegation_docs {
            meta.push((name.as_str(), bytes.as_slice()));
        }
        let snapshot_value = snapshot_signed(&far_future(), &meta);
        let snapshot = signed_doc(&snapshot_value, &[&keys.snapshot]);

        let timestamp_value = timestamp_signed(&far_future(), &snapshot);
        let timestamp = signed_doc(&timestamp_value, &[&keys.timestamp]);

        Self {
            keys,
            root,
            targets,
            snapshot,
            timestamp,
            delegations: delegation_docs,
        }
    }

    /// Re-signs `snapshot` and `timestamp` after a document was swapped out,
    /// keeping the hash chain consistent.
    pub fn reseal(&mut self) {
        let mut meta: Vec<(&str, &[u8])> = vec![("root", &self.root), ("targets", &self.targets)];
        for (name, bytes) in &self.delegations {
            meta.push((name.as_str(), bytes.as_slice()));
        }
        let snapshot_value = snapshot_signed(&far_future(), &meta);
        self.snapshot = signed_doc(&snapshot_value, &[&self.keys.snapshot]);
        let timestamp_value = timestamp_signed(&far_future(), &self.snapshot);
        self.timestamp = signed_doc(&timestamp_value, &[&self.keys.timestamp]);
    }

    /// Serves every document of the repository for `repo_path` (e.g.
    /// `docker.io/securesystemsengineering/alice-image`); declared-but-
    /// unsigned delegation roles answer 404.
    pub fn serve(&self, server: &Server, repo_path: &str, missing: &[&str]) {
        let tuf = |role: &str| format!("/v2/{repo_path}/_trust/tuf/{role}.json");
        for (role, bytes) in [
            ("root", &self.root),
            ("targets", &self.targets),
            ("snapshot", &self.snapshot),
            ("timestamp", &self.timestamp),
        ] {
            server.expect(
                Expectation::matching(request::method_path("GET", tuf(role)))
                    .times(0..)
                    .respond_with(status_code(200).body(bytes.clone())),
            );
        }
        for (name, bytes) in &self.delegations {
            server.expect(
                Expectation::matching(request::method_path("GET", tuf(name)))
                    .times(0..)
                    .respond_with(status_code(200).body(bytes.clone())),
            );
        }
        for role in missing {
            server.expect(
                Expectation::matching(request::method_path("GET", tuf(role)))
                    .times(0..)
                    .respond_with(status_code(404)),
            );
        }
    }
}

/// A canned API server for owner-reference resolution and readiness checks.
#[derive(Default)]
pub struct StubCluster {
    objects: std::collections::HashMap<String, Value>,
}

impl StubCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, object: Value) -> Self {
        self.objects.insert(path.to_string(), object);
        self
    }
}

#[async_trait::async_trait]
impl sigil::cluster::ClusterApi for StubCluster {
    async fn get(&self, path: &str) -> sigil::Result<Value> {
        self.objects.get(path).cloned().ok_or_else(|| {
            sigil::error::KubeNotFoundSnafu {
                path: path.to_string(),
            }
            .build()
        })
    }
}

/// A notaryv1 validator entry pointing at a test server.
pub fn notary_entry(name: &str, server: &Server, root_key_b64: &str) -> sigil::config::ValidatorEntry {
    let host = server.url_str("");
    let yaml = format!(
        r#"
name: {name}
type: notaryv1
host: "{}"
root_keys:
  - name: default
    key: "{root_key_b64}"
"#,
        host.trim_end_matches('/'),
    );
    serde_yaml::from_str(&yaml).expect("validator entry")
}

/// A policy rule requiring the given delegation roles.
pub fn rule_with_delegations(delegations: &[&str]) -> sigil::policy::Rule {
    serde_yaml::from_str(&format!(
        "pattern: '**'\ndelegations: {:?}\n",
        delegations
    ))
    .expect("rule")
}
