// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sigil is the image-verification pipeline behind a Kubernetes mutating
//! admission webhook.
//!
//! Workload-creation requests are intercepted, every container image the
//! workload references is checked for a valid cryptographic signature under a
//! configured trust policy, and each image reference is rewritten to pin it
//! to the verified content-addressed digest. Unsigned or policy-violating
//! workloads are rejected; signed workloads run exactly the bits that were
//! signed.
//!
//! The crate is organized around the flow of an admission request:
//!
//! * [`admission`] deserializes the AdmissionReview, drives validation and
//!   assembles the JSON Patch response.
//! * [`workload`] enumerates container images per workload kind and computes
//!   the RFC 6901 pointer for each image field.
//! * [`policy`] selects a validator and delegation set per image.
//! * [`validators`] hosts the Notary v1 chain-of-trust validator, the Cosign
//!   subprocess validator and the static validator.
//! * [`schema`], [`keystore`] and [`notary`] carry the TUF metadata model,
//!   the per-validation key store and the notary HTTPS client.

#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

pub mod admission;
pub mod cluster;
pub mod config;
pub mod error;
pub mod image;
pub mod keystore;
pub mod notary;
pub mod policy;
pub mod schema;
pub mod util;
pub mod validators;
pub mod workload;

pub use crate::error::{Error, Result};
pub use crate::image::ImageRef;
