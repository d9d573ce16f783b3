// SPDX-License-Identifier: MIT OR Apache-2.0

//! Alert dispatch: optional webhook notifications for admitted and rejected
//! requests.
//!
//! The alert configuration names receivers per decision category. Each
//! receiver gets a JSON payload built from its template, with `{...}`
//! placeholders filled from the request. A receiver marked
//! `fail_if_alert_sending_fails` escalates a delivery failure to the caller,
//! which turns it into an HTTP 500 (never into a silent allow).

use crate::error::{self, Result};
use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use snafu::ResultExt;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Alerting configuration, as loaded from YAML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertingConfig {
    /// Receivers notified when a request is admitted.
    #[serde(default)]
    admit_request: Option<AlertCategory>,

    /// Receivers notified when a request is rejected.
    #[serde(default)]
    reject_request: Option<AlertCategory>,
}

#[derive(Debug, Clone, Deserialize)]
struct AlertCategory {
    templates: Vec<Receiver>,
}

#[derive(Debug, Clone, Deserialize)]
struct Receiver {
    receiver_url: String,

    #[serde(default)]
    custom_headers: HashMap<String, String>,

    /// Payload template; string values may carry `{alert_message}`,
    /// `{images}`, `{request_id}`, `{namespace}` and `{timestamp}`.
    #[serde(default)]
    payload: Value,

    #[serde(default)]
    fail_if_alert_sending_fails: bool,
}

/// Sends alerts for admission decisions.
#[derive(Debug, Clone, Default)]
pub struct AlertRouter {
    config: AlertingConfig,
    client: reqwest::Client,
}

impl AlertRouter {
    /// A router that never sends anything (no alert configuration).
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Loads the alert configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context(error::FileReadSnafu {
            path: path.display().to_string(),
        })?;
        let config: AlertingConfig =
            serde_yaml::from_str(&content).context(error::AlertConfigParseSnafu {
                path: path.display().to_string(),
            })?;
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    /// Whether any receiver is interested in this decision.
    pub fn wants(&self, admitted: bool) -> bool {
        if admitted {
            self.config.admit_request.is_some()
        } else {
            self.config.reject_request.is_some()
        }
    }

    /// Notifies every receiver of the matching category. Failures are
    /// logged; a receiver that insists on delivery propagates the failure.
    pub async fn dispatch(
        &self,
        review_body: &Value,
        admitted: bool,
        reason: Option<&str>,
    ) -> Result<()> {
        let category = if admitted {
            &self.config.admit_request
        } else {
            &self.config.reject_request
        };
        let Some(category) = category else {
            return Ok(());
        };

        let context = alert_context(review_body, admitted, reason);
        for receiver in &category.templates {
            let payload = fill_template(&receiver.payload, &context);
            let mut request = self.client
                .post(receiver.receiver_url.as_str())
                .timeout(Duration::from_secs(10))
                .json(&payload);
            for (name, value) in &receiver.custom_headers {
                request = request.header(name, value);
            }
            let delivered = match request.send().await {
                Ok(response) => response.status().is_success(),
                Err(err) => {
                    warn!("alert delivery to {} failed: {err}", receiver.receiver_url);
                    false
                }
            };
            if delivered {
                info!("alert delivered to {}", receiver.receiver_url);
            } else if receiver.fail_if_alert_sending_fails {
                return error::AlertSendSnafu {
                    url: receiver.receiver_url.clone(),
                }
                .fail();
            }
        }
        Ok(())
    }
}

fn alert_context(review_body: &Value, admitted: bool, reason: Option<&str>) -> HashMap<&'static str, String> {
    let request = review_body.get("request").unwrap_or(&Value::Null);
    let images = request
        .pointer("/object/spec/containers")
        .and_then(Value::as_array)
        .map(|containers| {
            containers
                .iter()
                .filter_map(|c| c.get("image").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    let mut context = HashMap::new();
    context.insert(
        "alert_message",
        reason
            .map(str::to_string)
            .unwrap_or_else(|| {
                if admitted {
                    "request admitted".to_string()
                } else {
                    "request rejected".to_string()
                }
            }),
    );
    context.insert("images", images);
    context.insert(
        "request_id",
        request
            .get("uid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    );
    context.insert(
        "namespace",
        request
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    );
    context.insert("timestamp", Utc::now().to_rfc3339());
    context
}

/// Replaces `{placeholder}` occurrences in every string of the template.
fn fill_template(template: &Value, context: &HashMap<&'static str, String>) -> Value {
    match template {
        Value::String(s) => {
            let mut filled = s.clone();
            for (key, value) in context {
                filled = filled.replace(&format!("{{{key}}}"), value);
            }
            Value::String(filled)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| fill_template(item, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), fill_template(value, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl AlertRouter {
    /// Test constructor from parsed configuration.
    #[doc(hidden)]
    pub fn from_config_value(config: Value) -> Self {
        Self {
            config: serde_json::from_value(config).unwrap_or_default(),
            client: reqwest::Client::new(),
        }
    }
}
