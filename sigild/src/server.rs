// SPDX-License-Identifier: MIT OR Apache-2.0

//! The webhook's HTTP surface: `/mutate`, `/health` and `/ready`.

use crate::alerts::AlertRouter;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, error};
use serde_json::Value;
use sigil::admission::Admitter;
use sigil::cluster::ClusterApi;
use std::sync::Arc;

/// Cluster objects the readiness probe looks for.
#[derive(Debug, Clone, Default)]
pub struct ReadinessTargets {
    /// Namespace of the bootstrap sentinel pod.
    pub namespace: Option<String>,
    /// Name of the bootstrap sentinel pod.
    pub sentinel: Option<String>,
    /// Name of this webhook's MutatingWebhookConfiguration.
    pub webhook: Option<String>,
}

/// Shared server state.
pub struct AppState {
    /// The admission pipeline.
    pub admitter: Admitter,
    /// API access for the readiness probe.
    pub cluster: Arc<dyn ClusterApi>,
    /// Alert dispatch.
    pub alerts: AlertRouter,
    /// Readiness probe targets.
    pub readiness: ReadinessTargets,
}

/// Builds the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

/// Validates an AdmissionReview and answers with the verdict. Alert-dispatch
/// failures surface as HTTP 500, never as an allow.
async fn mutate(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let review = state.admitter.review(&body).await;
    // The validation verdict, regardless of detection mode: a response
    // without a failure message passed validation.
    let admitted = review.response.status.message.is_none();
    if state.alerts.wants(admitted) {
        if let Err(err) = state
            .alerts
            .dispatch(&body, admitted, review.response.status.message.as_deref())
            .await
        {
            error!("{err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Alert could not be sent. Check the logs for more details!",
            )
                .into_response();
        }
    }
    Json(review).into_response()
}

/// Liveness: the process is up.
async fn health() -> StatusCode {
    StatusCode::OK
}

/// Readiness: 200 iff (the webhook is registered OR the bootstrap sentinel
/// pod is still running) AND every configured notary is healthy.
async fn ready(State(state): State<Arc<AppState>>) -> StatusCode {
    if is_ready(&state).await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn is_ready(state: &AppState) -> bool {
    let sentinel_running = match (&state.readiness.namespace, &state.readiness.sentinel) {
        (Some(namespace), Some(sentinel)) => {
            let path = format!("/api/v1/namespaces/{namespace}/pods/{sentinel}");
            match state.cluster.get(&path).await {
                Ok(pod) => {
                    pod.pointer("/status/phase").and_then(Value::as_str) == Some("Running")
                }
                Err(err) => {
                    debug!("sentinel lookup failed: {err}");
                    false
                }
            }
        }
        _ => false,
    };

    let webhook_installed = match &state.readiness.webhook {
        Some(webhook) => {
            let path = format!(
                "/apis/admissionregistration.k8s.io/v1beta1/mutatingwebhookconfigurations/{webhook}"
            );
            state.cluster.get(&path).await.is_ok()
        }
        None => false,
    };

    if !webhook_installed && !sentinel_running {
        return false;
    }

    for validator in state.admitter.validators().iter() {
        if !validator.healthy().await {
            return false;
        }
    }
    true
}
