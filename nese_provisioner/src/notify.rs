//! Operator notifications for failed runs.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use nese_resources::AllocationId;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing::{info, warn};

use crate::task::FailedStep;

pub const PROVISIONING_FAILED_SUBJECT: &str = "NESE Bucket provisioning failed.";
pub const QUOTA_ADJUSTMENT_FAILED_SUBJECT: &str = "NESE Bucket quota adjustment failed.";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NotifyError {
    #[snafu(display("failed to deliver notification"))]
    Delivery { source: reqwest::Error },
    #[snafu(display("notification endpoint rejected the notification with status {status}"))]
    Rejected { status: u16 },
    #[snafu(display("notification failed: {message}"))]
    Unavailable { message: String },
}

/// A message to the operators handling provisioning failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub allocation: AllocationId,
    /// Extra details such as the bucket name or quota.
    pub context: BTreeMap<String, String>,
    pub failed_steps: Vec<FailedStep>,
    pub recipients: Vec<String>,
}

impl Notification {
    pub fn new(subject: impl Into<String>, allocation: AllocationId) -> Self {
        Self {
            subject: subject.into(),
            allocation,
            context: BTreeMap::new(),
            failed_steps: Vec::new(),
            recipients: Vec::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_failed_steps(mut self, failed_steps: Vec<FailedStep>) -> Self {
        self.failed_steps = failed_steps;
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        warn!(
            subject = %notification.subject,
            allocation = %notification.allocation,
            context = ?notification.context,
            failed_steps = ?notification.failed_steps,
            recipients = ?notification.recipients,
            "operator notification"
        );
        Ok(())
    }
}

/// Posts notifications as JSON to a ticketing endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .context(DeliverySnafu)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        info!(allocation = %notification.allocation, subject = %notification.subject, "notification delivered");
        Ok(())
    }
}

/// Keeps notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Make every later notification fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(|err| err.into_inner()) = Some(message.into());
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Some(message) = self
            .failure
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
        {
            return Err(NotifyError::Unavailable { message });
        }

        self.sent
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StepName;

    #[test]
    fn test_notification_json() {
        let notification = Notification::new(PROVISIONING_FAILED_SUBJECT, AllocationId::new(7))
            .with_context("bucket_name", "lab-data")
            .with_failed_steps(vec![FailedStep::new(StepName::ProvisionUser, "denied")])
            .with_recipients(vec!["help@example.org".to_string()]);

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["allocation"], 7);
        assert_eq!(json["context"]["bucket_name"], "lab-data");
        assert_eq!(json["failed_steps"][0]["step"], "provision_user");
        assert_eq!(json["recipients"][0], "help@example.org");
    }

    #[tokio::test]
    async fn test_in_memory_notifier_failure() {
        let notifier = InMemoryNotifier::new();
        let notification = Notification::new(QUOTA_ADJUSTMENT_FAILED_SUBJECT, AllocationId::new(1));

        notifier.notify(&notification).await.unwrap();
        notifier.fail_with("smtp down");
        assert!(notifier.notify(&notification).await.is_err());
        assert_eq!(notifier.notifications(), vec![notification]);
    }
}
