// SPDX-License-Identifier: MIT OR Apache-2.0

//! A thin seam over the Kubernetes API.
//!
//! The pipeline only ever issues raw-path GETs (owner-reference resolution
//! and the readiness probes), so the trait is a single method; the real
//! implementation wraps a [`kube::Client`], and tests substitute a stub.

use crate::error::{self, Result};
use async_trait::async_trait;
use serde_json::Value;
use snafu::ResultExt;

/// Read access to the cluster's API server.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// GETs an API path (e.g. `/apis/apps/v1/namespaces/ns/replicasets/x`)
    /// and returns the object as JSON.
    async fn get(&self, path: &str) -> Result<Value>;
}

/// The in-cluster implementation.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    /// Builds a client from the pod's environment (service account token and
    /// cluster CA), falling back to the local kubeconfig outside a cluster.
    pub async fn new() -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .context(error::KubeClientSnafu)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get(&self, path: &str) -> Result<Value> {
        let request = http::Request::get(path)
            .body(Vec::new())
            .map_err(|_| {
                error::KubeNotFoundSnafu {
                    path: path.to_string(),
                }
                .build()
            })?;
        match self.client.request::<Value>(request).await {
            Ok(value) => Ok(value),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                error::KubeNotFoundSnafu {
                    path: path.to_string(),
                }
                .fail()
            }
            Err(source) => Err(source).context(error::KubeRequestSnafu {
                path: path.to_string(),
            }),
        }
    }
}

/// Builds the API path for a namespaced resource, accounting for the core
/// group's `/api` prefix.
pub fn resource_path(api_version: &str, namespace: &str, plural: &str, name: &str) -> String {
    if api_version.contains('/') {
        format!("/apis/{api_version}/namespaces/{namespace}/{plural}/{name}")
    } else {
        format!("/api/{api_version}/namespaces/{namespace}/{plural}/{name}")
    }
}
