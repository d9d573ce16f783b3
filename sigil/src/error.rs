// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error type for the verification pipeline.
//!
//! Every failure a validator can produce is a distinct variant so that the
//! admission handler (and the test suite) can tell them apart. The terse,
//! operator-facing message for an admission response comes from
//! [`Error::user_message`]; the full `Display` output is only ever logged.

use chrono::{DateTime, Utc};
use snafu::Snafu;

/// Alias for a `Result` with the error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for the verification pipeline.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("'{image}' is not a valid image reference"))]
    InvalidImage { image: String },

    #[snafu(display("failed to parse {role} trust data: {source}"))]
    ParseTrustData {
        role: String,
        source: serde_json::Error,
    },

    #[snafu(display("{role} trust data has an invalid format: {reason}"))]
    SchemaMismatch { role: String, reason: String },

    #[snafu(display("failed to serialize {what} to canonical JSON: {source}"))]
    JsonSerialization {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("role {role} references unknown key id {keyid}"))]
    UnknownKeyId { role: String, keyid: String },

    #[snafu(display("unsupported or malformed public key: {reason}"))]
    UnsupportedKey { reason: String },

    #[snafu(display("signature threshold not reached for role {role}"))]
    SignatureInvalid { role: String },

    #[snafu(display("metadata for role {role} expired at {expires}"))]
    Expired {
        role: String,
        expires: DateTime<Utc>,
    },

    #[snafu(display("hash of {role} does not match the hash its referencing role recorded"))]
    HashMismatch { role: String },

    #[snafu(display(
        "version of {role} ({fetched}) is older than the referencing role expects ({expected})"
    ))]
    Rollback {
        role: String,
        fetched: u64,
        expected: u64,
    },

    #[snafu(display("unable to reach notary {notary}: {source}"))]
    Unreachable {
        notary: String,
        source: reqwest::Error,
    },

    #[snafu(display("notary {notary} has no {role} trust data"))]
    TrustDataNotFound { notary: String, role: String },

    #[snafu(display("notary {notary} answered {status} for {url}"))]
    NotaryResponse {
        notary: String,
        url: String,
        status: u16,
    },

    #[snafu(display("{scheme:?} is an unsupported authentication scheme for notary {notary}"))]
    AuthScheme {
        notary: String,
        scheme: Option<String>,
    },

    #[snafu(display("no authentication realm in challenge from notary {notary}"))]
    AuthRealmMissing { notary: String },

    #[snafu(display("authentication through insecure channel {url} for notary {notary}"))]
    InsecureAuthRealm { notary: String, url: String },

    #[snafu(display("potential path traversal in {what}"))]
    PathTraversal { what: String },

    #[snafu(display("authentication token from {url} has an invalid format"))]
    TokenInvalid { url: String },

    #[snafu(display("no authentication token in response from {url}"))]
    TokenMissing { url: String },

    #[snafu(display("{what} did not complete within the deadline"))]
    Deadline { what: String },

    #[snafu(display("trust root {name:?} could not be found"))]
    KeyNotFound { name: String },

    #[snafu(display("not all required delegations have trust data for image {image}"))]
    InsufficientTrustData { image: String },

    #[snafu(display("unable to find signed digest for image {image}"))]
    DigestNotFound { image: String },

    #[snafu(display("found multiple signed digests for image {image}"))]
    AmbiguousDigest { image: String },

    #[snafu(display("failed to run cosign: {source}"))]
    CosignSpawn { source: std::io::Error },

    #[snafu(display("failed to talk to cosign: {source}"))]
    CosignIo { source: std::io::Error },

    #[snafu(display("cosign timed out verifying image {image}"))]
    CosignTimeout { image: String },

    #[snafu(display("cosign found no matching signatures for image {image}"))]
    CosignNoSignature { image: String },

    #[snafu(display("unexpected cosign failure for image {image}: {stderr}"))]
    CosignFailure { image: String, stderr: String },

    #[snafu(display("static deny"))]
    StaticDeny,

    #[snafu(display(
        "{api_version} is not in the supported API version list for {kind} {name}"
    ))]
    UnknownApiVersion {
        kind: String,
        api_version: String,
        name: String,
    },

    #[snafu(display("workload kind {kind} is not supported"))]
    UnsupportedKind { kind: String },

    #[snafu(display("workload object has an invalid format: {reason}"))]
    MalformedWorkload { reason: String },

    #[snafu(display("couldn't find the right parent resource {kind} {name}"))]
    ParentNotFound { kind: String, name: String },

    #[snafu(display("no policy rule matches image {image}"))]
    NoMatchingRule { image: String },

    #[snafu(display("policy pattern '{pattern}' is invalid: {source}"))]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },

    #[snafu(display("unable to find validator configuration {name:?}"))]
    ValidatorNotFound { name: Option<String> },

    #[snafu(display("failed to read {path}: {source}"))]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to write {path}: {source}"))]
    FileWrite {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse {path}: {source}"))]
    ConfigParse {
        path: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("{reason}"))]
    InvalidConfiguration { reason: String },

    #[snafu(display("AdmissionReview request has an invalid format: {reason}"))]
    InvalidRequest { reason: String },

    #[snafu(display("failed to build Kubernetes client: {source}"))]
    KubeClient { source: kube::Error },

    #[snafu(display("Kubernetes API request for {path} failed: {source}"))]
    KubeRequest { path: String, source: kube::Error },

    #[snafu(display("Kubernetes API has no resource at {path}"))]
    KubeNotFound { path: String },
}

impl Error {
    /// The terse message embedded in a denied AdmissionReview.
    ///
    /// Detailed context stays in the logs; this string is what the requesting
    /// user gets to see.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidImage { image } => {
                format!("invalid image reference \"{image}\".")
            }
            Error::ParseTrustData { role, .. } | Error::SchemaMismatch { role, .. } => {
                format!("{role} trust data has an invalid format.")
            }
            Error::SignatureInvalid { role } => {
                format!("failed to verify signature of {role} trust data.")
            }
            Error::Expired { role, .. } => format!("{role} trust data has expired."),
            Error::HashMismatch { role } | Error::Rollback { role, .. } => {
                format!("failed to validate {role} trust data against its reference.")
            }
            Error::Unreachable { notary, .. } => {
                format!("unable to reach notary {notary}.")
            }
            Error::TrustDataNotFound { notary, role } => {
                format!("unable to get {role} trust data from {notary}.")
            }
            Error::Deadline { .. } => "timed out retrieving trust data.".into(),
            Error::KeyNotFound { .. } => {
                "unable to get public root key from configuration.".into()
            }
            Error::InsufficientTrustData { image } => {
                format!("not all required delegations have trust data for image {image}.")
            }
            Error::DigestNotFound { image } => {
                format!("unable to find signed digest for image {image}.")
            }
            Error::AmbiguousDigest { image } => {
                format!("found multiple signed digests for image {image}.")
            }
            Error::CosignTimeout { .. } => "cosign verification timed out.".into(),
            Error::CosignNoSignature { image } => {
                format!("failed to verify signature of image {image}.")
            }
            Error::StaticDeny => "Static deny.".into(),
            Error::UnknownApiVersion {
                kind, api_version, ..
            } => format!("unsupported API version {api_version} for kind {kind}."),
            Error::UnsupportedKind { kind } => format!("unsupported workload kind {kind}."),
            Error::ParentNotFound { kind, name } => {
                format!("couldn't find the right parent resource {kind} {name}.")
            }
            Error::NoMatchingRule { image } => {
                format!("no matching rule for image {image}.")
            }
            Error::ValidatorNotFound { .. } => {
                "unable to find a matching validator configuration.".into()
            }
            Error::InvalidRequest { .. } => "AdmissionReview request has an invalid format.".into(),
            _ => "unknown error. please check the logs.".into(),
        }
    }
}
