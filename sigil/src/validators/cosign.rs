// SPDX-License-Identifier: MIT OR Apache-2.0

//! The cosign validator: shells out to the cosign binary and parses its
//! verdict.
//!
//! The subprocess contract: `verify -key /dev/stdin <image>` with the pinned
//! ECDSA public key as PEM on stdin. Stdout carries one JSON signature
//! payload per line; the digest sits at `Critical.Image.Docker-manifest-digest`.
//! A handful of stderr shapes are mapped to distinct failures, everything
//! else is an opaque cosign error.

use crate::config::{select_trust_root, TrustRoot, ValidatorEntry};
use crate::error::{self, Result};
use crate::image::ImageRef;
use crate::policy::Rule;
use crate::schema::key::Key;
use log::info;
use regex::Regex;
use snafu::{ensure, ResultExt};
use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const COSIGN_TIMEOUT: Duration = Duration::from_secs(120);

static MANIFEST_UNKNOWN_RE: OnceLock<Regex> = OnceLock::new();

fn manifest_unknown_re() -> &'static Regex {
    MANIFEST_UNKNOWN_RE
        .get_or_init(|| Regex::new(r"^error: GET https://[^ ]+ MANIFEST_UNKNOWN").unwrap())
}

/// Verifies images by invoking an external cosign binary.
#[derive(Debug, Clone)]
pub struct CosignValidator {
    name: String,
    binary: String,
    root_keys: Vec<TrustRoot>,
}

impl CosignValidator {
    /// Builds a cosign validator from its configuration entry.
    pub fn from_entry(entry: &ValidatorEntry) -> Result<Self> {
        ensure!(
            !entry.root_keys.is_empty(),
            error::InvalidConfigurationSnafu {
                reason: format!("validator {:?} has no trust roots", entry.name),
            }
        );
        Ok(Self {
            name: entry.name.clone(),
            binary: entry
                .cosign_binary
                .clone()
                .unwrap_or_else(|| "cosign".to_string()),
            root_keys: entry.root_keys.clone(),
        })
    }

    /// The configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs cosign for `image` with the rule's pinned key and returns the
    /// single verified digest.
    pub async fn validate(&self, image: &ImageRef, rule: &Rule) -> Result<Option<String>> {
        let root = select_trust_root(&self.root_keys, rule.key.as_deref())?;
        let key = Key::from_config(&root.key)?;
        ensure!(
            matches!(key, Key::Ecdsa { .. }),
            error::UnsupportedKeySnafu {
                reason: "cosign verification requires an ECDSA public key".to_string(),
            }
        );

        let reference = image.to_string();
        let output = self.invoke(&reference, &key.to_pem()).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        info!(
            "cosign verdict for {reference}: status {:?}, stderr {:?}",
            output.status.code(),
            stderr
        );

        if !output.status.success() {
            if stderr.contains("no matching signatures") {
                return error::CosignNoSignatureSnafu { image: reference }.fail();
            }
            if manifest_unknown_re().is_match(&stderr) {
                return error::DigestNotFoundSnafu { image: reference }.fail();
            }
            return error::CosignFailureSnafu {
                image: reference,
                stderr: stderr.into_owned(),
            }
            .fail();
        }

        let mut digests = BTreeSet::new();
        for line in stdout.lines() {
            let Ok(payload) = serde_json::from_str::<serde_json::Value>(line) else {
                info!("non-JSON signature payload from cosign: {line}");
                continue;
            };
            if let Some(digest) = payload
                .pointer("/Critical/Image/Docker-manifest-digest")
                .and_then(serde_json::Value::as_str)
            {
                digests.insert(digest.trim_start_matches("sha256:").to_string());
            }
        }

        let mut digests = digests.into_iter();
        match (digests.next(), digests.next()) {
            (Some(digest), None) => Ok(Some(digest)),
            (Some(_), Some(_)) => error::AmbiguousDigestSnafu { image: reference }.fail(),
            (None, _) => error::DigestNotFoundSnafu { image: reference }.fail(),
        }
    }

    async fn invoke(&self, reference: &str, pem: &str) -> Result<std::process::Output> {
        let mut child = Command::new(&self.binary)
            .arg("verify")
            .arg("-key")
            .arg("/dev/stdin")
            .arg(reference)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(error::CosignSpawnSnafu)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(pem.as_bytes())
                .await
                .context(error::CosignIoSnafu)?;
        }

        match tokio::time::timeout(COSIGN_TIMEOUT, child.wait_with_output()).await {
            Ok(output) => output.context(error::CosignIoSnafu),
            Err(_) => error::CosignTimeoutSnafu {
                image: reference.to_string(),
            }
            .fail(),
        }
    }
}
