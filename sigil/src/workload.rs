// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workload objects: per-kind container enumeration, JSON-pointer patch
//! paths, and owner-reference resolution.
//!
//! A workload created by a controller (a Pod under a ReplicaSet, a
//! ReplicaSet under a Deployment) is never validated from its own template:
//! the owner is fetched from the API server, its UID is checked against the
//! owner reference, and the topmost owner's containers stand in for the
//! child's. The owner was already admitted (and mutated), so its template is
//! the trusted one.

use crate::cluster::{resource_path, ClusterApi};
use crate::error::{self, Result};
use crate::image::ImageRef;
use serde::Deserialize;
use serde_json::Value;
use snafu::{ensure, OptionExt};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// The workload kinds the webhook mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// A bare pod.
    Pod,
    /// A deployment.
    Deployment,
    /// A replica set.
    ReplicaSet,
    /// A stateful set.
    StatefulSet,
    /// A daemon set.
    DaemonSet,
    /// A job.
    Job,
    /// A cron job.
    CronJob,
    /// A replication controller.
    ReplicationController,
}

impl WorkloadKind {
    /// The API versions accepted for this kind.
    fn supported_api_versions(self) -> &'static [&'static str] {
        match self {
            WorkloadKind::Pod | WorkloadKind::ReplicationController => &["v1"],
            WorkloadKind::Deployment
            | WorkloadKind::ReplicaSet
            | WorkloadKind::DaemonSet
            | WorkloadKind::StatefulSet => &["apps/v1", "apps/v1beta1", "apps/v1beta2"],
            WorkloadKind::Job => &["batch/v1"],
            WorkloadKind::CronJob => &["batch/v1", "batch/v1beta1", "batch/v2alpha1"],
        }
    }

    /// The pointer prefix of the pod spec inside this kind's object.
    fn pod_spec_prefix(self) -> &'static str {
        match self {
            WorkloadKind::Pod => "/spec",
            WorkloadKind::CronJob => "/spec/jobTemplate/spec/template/spec",
            _ => "/spec/template/spec",
        }
    }
}

impl FromStr for WorkloadKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "Pod" => WorkloadKind::Pod,
            "Deployment" => WorkloadKind::Deployment,
            "ReplicaSet" => WorkloadKind::ReplicaSet,
            "StatefulSet" => WorkloadKind::StatefulSet,
            "DaemonSet" => WorkloadKind::DaemonSet,
            "Job" => WorkloadKind::Job,
            "CronJob" => WorkloadKind::CronJob,
            "ReplicationController" => WorkloadKind::ReplicationController,
            other => {
                return error::UnsupportedKindSnafu {
                    kind: other.to_string(),
                }
                .fail()
            }
        })
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkloadKind::Pod => "Pod",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::ReplicaSet => "ReplicaSet",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Job => "Job",
            WorkloadKind::CronJob => "CronJob",
            WorkloadKind::ReplicationController => "ReplicationController",
        })
    }
}

/// Which container list a container came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerSlot {
    /// `spec.containers`.
    Containers,
    /// `spec.initContainers`.
    InitContainers,
}

impl ContainerSlot {
    /// The field name, as it appears in specs and patch paths.
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerSlot::Containers => "containers",
            ContainerSlot::InitContainers => "initContainers",
        }
    }
}

/// One container of a workload.
#[derive(Debug, Clone)]
pub struct Container {
    /// The parsed image reference.
    pub image: ImageRef,
    /// The image string exactly as the spec carries it.
    pub original: String,
    /// Position within its container list.
    pub index: usize,
    /// Which container list it sits in.
    pub slot: ContainerSlot,
}

/// An owner reference from workload metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// API version of the owner.
    pub api_version: String,
    /// Kind of the owner.
    pub kind: String,
    /// Name of the owner.
    pub name: String,
    /// UID the owner must have.
    pub uid: String,
}

/// A workload object from an admission request (or fetched as a parent).
#[derive(Debug, Clone)]
pub struct WorkloadObject {
    /// The workload kind.
    pub kind: WorkloadKind,
    /// The object's API version.
    pub api_version: String,
    /// The namespace the request targets.
    pub namespace: String,
    /// `metadata.name`, falling back to `metadata.generateName`.
    pub name: String,
    spec: Value,
    owners: Vec<OwnerReference>,
}

impl WorkloadObject {
    /// Builds a workload object from its JSON representation, checking the
    /// kind and API version against the allowlist.
    pub fn new(object: &Value, namespace: &str) -> Result<Self> {
        let kind: WorkloadKind = object
            .get("kind")
            .and_then(Value::as_str)
            .context(error::MalformedWorkloadSnafu {
                reason: "missing 'kind'".to_string(),
            })?
            .parse()?;
        let api_version = object
            .get("apiVersion")
            .and_then(Value::as_str)
            .context(error::MalformedWorkloadSnafu {
                reason: "missing 'apiVersion'".to_string(),
            })?
            .to_string();
        let metadata = object.get("metadata").unwrap_or(&Value::Null);
        let name = metadata
            .get("name")
            .or_else(|| metadata.get("generateName"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let spec = object
            .get("spec")
            .cloned()
            .context(error::MalformedWorkloadSnafu {
                reason: "missing 'spec'".to_string(),
            })?;
        let owners = match metadata.get("ownerReferences") {
            Some(refs) => serde_json::from_value(refs.clone()).map_err(|err| {
                error::MalformedWorkloadSnafu {
                    reason: format!("bad ownerReferences: {err}"),
                }
                .build()
            })?,
            None => Vec::new(),
        };

        ensure!(
            kind.supported_api_versions().contains(&api_version.as_str()),
            error::UnknownApiVersionSnafu {
                kind: kind.to_string(),
                api_version,
                name,
            }
        );

        Ok(Self {
            kind,
            api_version,
            namespace: namespace.to_string(),
            name,
            spec,
            owners,
        })
    }

    /// Whether the object is controlled by another workload.
    pub fn has_owner(&self) -> bool {
        !self.owners.is_empty()
    }

    fn pod_spec(&self) -> Result<&Value> {
        let spec = match self.kind {
            WorkloadKind::Pod => Some(&self.spec),
            WorkloadKind::CronJob => self
                .spec
                .pointer("/jobTemplate/spec/template/spec"),
            _ => self.spec.pointer("/template/spec"),
        };
        spec.context(error::MalformedWorkloadSnafu {
            reason: format!("no pod spec under {} {}", self.kind, self.name),
        })
    }

    /// Every container of the workload, `containers` first, then
    /// `initContainers`, each in array order.
    pub fn containers(&self) -> Result<Vec<Container>> {
        let pod_spec = self.pod_spec()?;
        let mut containers = Vec::new();
        for slot in [ContainerSlot::Containers, ContainerSlot::InitContainers] {
            let Some(list) = pod_spec.get(slot.as_str()) else {
                continue;
            };
            let list = list.as_array().context(error::MalformedWorkloadSnafu {
                reason: format!("'{}' is not a list", slot.as_str()),
            })?;
            for (index, container) in list.iter().enumerate() {
                let original = container
                    .get("image")
                    .and_then(Value::as_str)
                    .context(error::MalformedWorkloadSnafu {
                        reason: format!("container {index} has no image"),
                    })?
                    .to_string();
                containers.push(Container {
                    image: ImageRef::parse(&original)?,
                    original,
                    index,
                    slot,
                });
            }
        }
        Ok(containers)
    }

    /// The RFC 6901 pointer to a container's `image` field within this
    /// object.
    pub fn patch_path(&self, container: &Container) -> String {
        format!(
            "{}/{}/{}/image",
            self.kind.pod_spec_prefix(),
            container.slot.as_str(),
            container.index
        )
    }

    /// Containers of the topmost owners, resolved through the API server.
    ///
    /// Each owner reference is fetched, its UID compared against the
    /// reference (a recycled name with a different UID is not the parent
    /// that admitted this object), and owners-of-owners followed until a
    /// workload without owners is reached.
    pub async fn parent_containers(&self, api: &dyn ClusterApi) -> Result<Vec<Container>> {
        let mut containers = Vec::new();
        let mut queue: VecDeque<OwnerReference> = self.owners.iter().cloned().collect();
        while let Some(owner) = queue.pop_front() {
            let plural = format!("{}s", owner.kind.to_lowercase());
            let path = resource_path(&owner.api_version, &self.namespace, &plural, &owner.name);
            let parent = api.get(&path).await.map_err(|err| {
                log::debug!("owner lookup at {path} failed: {err}");
                error::ParentNotFoundSnafu {
                    kind: plural.clone(),
                    name: owner.name.clone(),
                }
                .build()
            })?;
            let uid = parent
                .pointer("/metadata/uid")
                .and_then(Value::as_str)
                .unwrap_or_default();
            ensure!(
                uid == owner.uid,
                error::ParentNotFoundSnafu {
                    kind: plural,
                    name: owner.name.clone(),
                }
            );
            let parent = WorkloadObject::new(&parent, &self.namespace)?;
            if parent.has_owner() {
                queue.extend(parent.owners.iter().cloned());
            } else {
                containers.extend(parent.containers()?);
            }
        }
        Ok(containers)
    }
}
