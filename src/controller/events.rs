//! Kubernetes Event publishing.
//!
//! Events are fire and forget: a failed publish is logged as a warning and
//! never propagates, so an Events API hiccup cannot break reconciliation.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Access token secret was created for the first time
pub const REASON_CREATED: &str = "Created";
/// Access token secret rewritten or a Deployment patched
pub const REASON_UPDATED: &str = "Updated";
/// Token renewal failed
pub const REASON_FAILED_RENEWAL: &str = "FailedRenewal";
/// Deployment rollout failed after the secret was written
pub const REASON_FAILED_DEPLOYMENT_UPGRADE: &str = "FailedDeploymentUpgrade";

/// Publishes Events attributed to the githubapp controller
#[derive(Clone)]
pub struct EventPublisher {
    recorder: Recorder,
}

impl EventPublisher {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }

    pub async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: impl Into<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note.into()),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(err) = self.recorder.publish(&event, reference).await {
            warn!("failed to publish {reason} event: {err}");
        }
    }
}
