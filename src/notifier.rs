//! # Notifier
//!
//! Fire-and-forget success/failure notifications. The dispatcher logs and
//! discards notifier errors (and panics), so an implementation can never
//! affect a resource's state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::NotifierConfig;
use crate::models::Resource;
use crate::state_machine::{LifecycleOperation, ResourceState};

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification endpoint returned HTTP {status}")]
    Rejected { status: u16 },

    #[error("Notifier configuration error: {0}")]
    Configuration(String),
}

/// What happened to the resource, as reported to notifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub operation: LifecycleOperation,
    pub success: bool,
    /// State the resource was left in; `None` once deleted or when the final
    /// write did not land
    pub final_state: Option<ResourceState>,
    pub errors: Vec<String>,
    pub correlation_id: Uuid,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        event_kind: &str,
        resource: &Resource,
        outcome: &OperationOutcome,
    ) -> Result<(), NotifierError>;
}

/// Writes notifications to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        event_kind: &str,
        resource: &Resource,
        outcome: &OperationOutcome,
    ) -> Result<(), NotifierError> {
        if outcome.success {
            info!(
                event_kind = %event_kind,
                operation = %outcome.operation,
                kind = %resource.kind,
                resource_id = resource.id,
                project_id = ?resource.project_id,
                final_state = ?outcome.final_state,
                correlation_id = %outcome.correlation_id,
                "Lifecycle operation succeeded"
            );
        } else {
            warn!(
                event_kind = %event_kind,
                operation = %outcome.operation,
                kind = %resource.kind,
                resource_id = resource.id,
                project_id = ?resource.project_id,
                errors = ?outcome.errors,
                correlation_id = %outcome.correlation_id,
                "Lifecycle operation failed"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event_kind: &'a str,
    operation_event: &'static str,
    kind: String,
    resource_id: i64,
    project_id: Option<i64>,
    outcome: &'a OperationOutcome,
    timestamp: DateTime<Utc>,
}

/// POSTs each notification as JSON to a webhook.
///
/// [`Notifier::notify`] hands the POST to a background task and returns at
/// once, so a slow endpoint never holds up a dispatch; delivery errors are
/// logged from that task. [`WebhookNotifier::deliver`] waits for the answer.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifierError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("lifecycle-worker/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifierError::Configuration(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// POST one notification and wait for the endpoint to accept it
    pub async fn deliver(
        &self,
        event_kind: &str,
        resource: &Resource,
        outcome: &OperationOutcome,
    ) -> Result<(), NotifierError> {
        let body = payload(event_kind, resource, outcome)?;
        post(&self.client, &self.url, &body).await
    }
}

fn payload(
    event_kind: &str,
    resource: &Resource,
    outcome: &OperationOutcome,
) -> Result<serde_json::Value, NotifierError> {
    let payload = WebhookPayload {
        event_kind,
        operation_event: outcome.operation.event_type(),
        kind: resource.kind.to_string(),
        resource_id: resource.id,
        project_id: resource.project_id,
        outcome,
        timestamp: Utc::now(),
    };
    serde_json::to_value(&payload).map_err(|e| NotifierError::Delivery(e.to_string()))
}

async fn post(client: &Client, url: &str, body: &serde_json::Value) -> Result<(), NotifierError> {
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| NotifierError::Delivery(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(NotifierError::Rejected {
            status: resp.status().as_u16(),
        });
    }
    Ok(())
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        event_kind: &str,
        resource: &Resource,
        outcome: &OperationOutcome,
    ) -> Result<(), NotifierError> {
        let body = payload(event_kind, resource, outcome)?;
        let client = self.client.clone();
        let url = self.url.clone();
        let (event_kind, resource_id) = (event_kind.to_string(), resource.id);

        tokio::spawn(async move {
            if let Err(e) = post(&client, &url, &body).await {
                warn!(error = %e, event_kind = %event_kind, resource_id, "Webhook notification failed");
            }
        });
        Ok(())
    }
}

/// Sends to every inner notifier; reports the first error after trying all
#[derive(Clone, Default)]
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Log notifier plus a webhook when one is configured
    pub fn from_config(config: &NotifierConfig) -> Result<Self, NotifierError> {
        let mut composite = Self::new().with(Arc::new(LogNotifier));
        if let Some(url) = &config.webhook_url {
            let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(5000));
            composite = composite.with(Arc::new(WebhookNotifier::new(url.clone(), timeout)?));
        }
        Ok(composite)
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn notify(
        &self,
        event_kind: &str,
        resource: &Resource,
        outcome: &OperationOutcome,
    ) -> Result<(), NotifierError> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event_kind, resource, outcome).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
