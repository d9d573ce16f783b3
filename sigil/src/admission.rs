// SPDX-License-Identifier: MIT OR Apache-2.0

//! AdmissionReview handling: request parsing, validation orchestration and
//! response assembly.
//!
//! Container validations within one request run concurrently; the patch list
//! preserves source order (`containers` before `initContainers`, each by
//! index). Any single validation failure denies the whole request, unless
//! detection mode is on, in which case the request is allowed and the
//! failure surfaces as a warning.

use crate::cluster::ClusterApi;
use crate::error::{self, Result};
use crate::policy::ImagePolicy;
use crate::validators::Validators;
use crate::workload::{Container, WorkloadObject};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use std::sync::Arc;
use std::time::Duration;

/// Overall deadline per admission request, just under the webhook timeout
/// the API server enforces.
const REQUEST_DEADLINE: Duration = Duration::from_secs(25);

/// The fields of an incoming admission request the pipeline uses.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Request UID, echoed in the response.
    pub uid: String,
    /// Kind of the submitted object.
    pub kind: String,
    /// Namespace the request targets.
    pub namespace: String,
    /// CREATE or UPDATE.
    pub operation: String,
    /// The requesting user, for log context.
    pub user: Option<String>,
    /// The submitted workload object.
    pub object: Value,
}

impl AdmissionRequest {
    /// Extracts and shape-checks the request from an AdmissionReview body.
    pub fn parse(review: &Value) -> Result<Self> {
        let request = review
            .get("request")
            .context(error::InvalidRequestSnafu {
                reason: "missing 'request'".to_string(),
            })?;
        let field = |name: &str| -> Result<String> {
            Ok(request
                .get(name)
                .and_then(Value::as_str)
                .context(error::InvalidRequestSnafu {
                    reason: format!("missing '{name}'"),
                })?
                .to_string())
        };
        Ok(Self {
            uid: field("uid")?,
            kind: request
                .pointer("/kind/kind")
                .and_then(Value::as_str)
                .context(error::InvalidRequestSnafu {
                    reason: "missing 'kind.kind'".to_string(),
                })?
                .to_string(),
            namespace: field("namespace")?,
            operation: field("operation")?,
            user: request
                .pointer("/userInfo/username")
                .and_then(Value::as_str)
                .map(str::to_string),
            object: request
                .get("object")
                .cloned()
                .context(error::InvalidRequestSnafu {
                    reason: "missing 'object'".to_string(),
                })?,
        })
    }
}

/// One JSON Patch operation; the pipeline only ever replaces image fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchOp {
    /// Always `replace`.
    pub op: String,
    /// RFC 6901 pointer to the image field.
    pub path: String,
    /// The digest-pinned image reference.
    pub value: String,
}

impl PatchOp {
    /// A `replace` operation.
    pub fn replace(path: String, value: String) -> Self {
        Self {
            op: "replace".to_string(),
            path,
            value,
        }
    }
}

/// An AdmissionReview response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    /// `admission.k8s.io/v1beta1`.
    pub api_version: String,
    /// `AdmissionReview`.
    pub kind: String,
    /// The verdict.
    pub response: AdmissionResponse,
}

/// The verdict part of an AdmissionReview response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Echoed request UID.
    pub uid: String,
    /// Whether the request is admitted.
    pub allowed: bool,
    /// HTTP-ish status detail.
    pub status: AdmissionStatus,
    /// Warnings shown to the requesting user (detection mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    /// `JSONPatch` when a patch is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
    /// Base64-wrapped JSON Patch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

/// Status detail of an admission response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionStatus {
    /// 202 on acceptance, 403 on denial.
    pub code: u16,
    /// The terse failure message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Builds the standardized response object. `allowed` is the validation
/// verdict; detection mode turns a denial into an acceptance that carries
/// the failure message as a warning.
pub fn admission_review(
    uid: &str,
    allowed: bool,
    patch: Option<String>,
    msg: Option<&str>,
    detection_mode: bool,
) -> AdmissionReview {
    let accepted = allowed || detection_mode;
    let mut response = AdmissionResponse {
        uid: uid.to_string(),
        allowed: accepted,
        status: AdmissionStatus {
            code: if accepted { 202 } else { 403 },
            message: None,
        },
        warnings: None,
        patch_type: None,
        patch: None,
    };
    if let Some(msg) = msg {
        response.status.message = Some(msg.to_string());
        if detection_mode && !allowed {
            response.warnings = Some(vec![msg.to_string()]);
        }
    }
    if let Some(patch) = patch {
        response.patch_type = Some("JSONPatch".to_string());
        response.patch = Some(patch);
    }
    AdmissionReview {
        api_version: "admission.k8s.io/v1beta1".to_string(),
        kind: "AdmissionReview".to_string(),
        response,
    }
}

/// The admission pipeline: policy lookup, validator dispatch and patch
/// assembly, shared read-only across requests.
pub struct Admitter {
    validators: Validators,
    policy: ImagePolicy,
    cluster: Arc<dyn ClusterApi>,
    detection_mode: bool,
}

impl Admitter {
    /// Builds the pipeline.
    pub fn new(
        validators: Validators,
        policy: ImagePolicy,
        cluster: Arc<dyn ClusterApi>,
        detection_mode: bool,
    ) -> Self {
        Self {
            validators,
            policy,
            cluster,
            detection_mode,
        }
    }

    /// Whether detection mode is on.
    pub fn detection_mode(&self) -> bool {
        self.detection_mode
    }

    /// The configured validators (readiness probes every one).
    pub fn validators(&self) -> &Validators {
        &self.validators
    }

    /// Handles one AdmissionReview body and always produces a response; any
    /// validation failure is logged in full and reported tersely.
    pub async fn review(&self, body: &Value) -> AdmissionReview {
        let uid = body
            .pointer("/request/uid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match self.admit(body).await {
            Ok(patches) => {
                let patch = match encode_patch(&patches) {
                    Ok(patch) => patch,
                    Err(err) => {
                        error!("failed to encode patch: {err}");
                        return admission_review(
                            &uid,
                            false,
                            None,
                            Some(&err.user_message()),
                            self.detection_mode,
                        );
                    }
                };
                admission_review(&uid, true, patch, None, self.detection_mode)
            }
            Err(err) => {
                error!("admission denied: {err}");
                admission_review(
                    &uid,
                    false,
                    None,
                    Some(&err.user_message()),
                    self.detection_mode,
                )
            }
        }
    }

    /// Validates the request and returns the patch operations to apply.
    pub async fn admit(&self, body: &Value) -> Result<Vec<PatchOp>> {
        let request = AdmissionRequest::parse(body)?;
        info!(
            "{} of {} {} in {} by {}",
            request.operation,
            request.kind,
            request.object.pointer("/metadata/name").and_then(Value::as_str).unwrap_or("?"),
            request.namespace,
            request.user.as_deref().unwrap_or("?"),
        );
        tokio::time::timeout(REQUEST_DEADLINE, self.validate_workload(&request))
            .await
            .map_err(|_| {
                error::DeadlineSnafu {
                    what: "admission request validation".to_string(),
                }
                .build()
            })?
    }

    async fn validate_workload(&self, request: &AdmissionRequest) -> Result<Vec<PatchOp>> {
        let workload = WorkloadObject::new(&request.object, &request.namespace)?;
        let containers = if workload.has_owner() {
            workload.parent_containers(self.cluster.as_ref()).await?
        } else {
            workload.containers()?
        };

        let verdicts = futures::future::join_all(
            containers
                .iter()
                .map(|container| self.validate_container(container)),
        )
        .await;

        let mut patches = Vec::new();
        for (container, verdict) in containers.iter().zip(verdicts) {
            let Some(digest) = verdict? else {
                continue;
            };
            if container.image.digest() == Some(digest.as_str()) {
                debug!("{} is already pinned to its signed digest", container.original);
                continue;
            }
            patches.push(PatchOp::replace(
                workload.patch_path(container),
                container.image.with_digest(&digest).to_string(),
            ));
        }
        Ok(patches)
    }

    async fn validate_container(&self, container: &Container) -> Result<Option<String>> {
        let rule = self.policy.rule_for(&container.image)?;
        debug!(
            "image {} matched pattern '{}'",
            container.image, rule.pattern
        );
        if !rule.verify_enabled() {
            return Ok(None);
        }
        let validator = self.validators.get(rule.validator.as_deref())?;
        validator.validate(&container.image, rule).await
    }
}

/// Serializes and base64-wraps a patch list; `None` when there is nothing to
/// patch.
fn encode_patch(patches: &[PatchOp]) -> Result<Option<String>> {
    if patches.is_empty() {
        return Ok(None);
    }
    let bytes = serde_json::to_vec(patches).context(error::JsonSerializationSnafu {
        what: "JSON patch".to_string(),
    })?;
    Ok(Some(STANDARD.encode(bytes)))
}
