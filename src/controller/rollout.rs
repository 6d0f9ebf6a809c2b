//! Deployment rollout trigger.
//!
//! Stamping a timestamp label onto the pod template changes the pod template
//! hash, which makes the Deployment controller perform a rolling upgrade.
//! Pods then remount the renewed access token secret.

use crate::controller::events::{EventPublisher, REASON_UPDATED};
use crate::crd::GithubApp;
use anyhow::{Context, Result};
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{ListParams, PostParams};
use kube::runtime::events::EventType;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::info;

/// Pod template label rewritten on every rollout
pub const ROLLOUT_LABEL: &str = "ghApplastUpdateTime";

/// Timestamp format stamped into the rollout label
fn rollout_timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Restart every Deployment matching `spec.rolloutDeployment.labels`.
///
/// Each label pair is applied independently as an equality selector. The
/// first failure is returned with context; remaining Deployments are left
/// untouched until the next reconcile.
pub async fn rollout_deployments(
    client: Client,
    app: &GithubApp,
    events: &EventPublisher,
) -> Result<()> {
    let Some(labels) = app
        .spec
        .rollout_deployment
        .as_ref()
        .and_then(|rollout| rollout.labels.as_ref())
        .filter(|labels| !labels.is_empty())
    else {
        return Ok(());
    };

    let namespace = app.namespace().unwrap_or_default();
    let deployments: Api<Deployment> = Api::namespaced(client, &namespace);

    for (key, value) in labels {
        let selector = format!("{key}={value}");
        let list = deployments
            .list(&ListParams::default().labels(&selector))
            .await
            .with_context(|| format!("failed to list Deployments with label {selector}"))?;

        for mut deployment in list {
            let deployment_name = deployment.name_any();
            stamp_pod_template(&mut deployment, &rollout_timestamp());

            deployments
                .replace(&deployment_name, &PostParams::default(), &deployment)
                .await
                .with_context(|| {
                    format!("failed to upgrade deployment {namespace}/{deployment_name}")
                })?;

            info!("deployment rolling upgrade triggered for {namespace}/{deployment_name}");
            events
                .publish(
                    &app.object_ref(&()),
                    EventType::Normal,
                    REASON_UPDATED,
                    "Rollout",
                    format!("Triggered rolling upgrade of deployment {deployment_name}"),
                )
                .await;
        }
    }

    Ok(())
}

/// Write the rollout timestamp into the pod template labels
fn stamp_pod_template(deployment: &mut Deployment, timestamp: &str) {
    let template = &mut deployment
        .spec
        .get_or_insert_with(Default::default)
        .template;
    template
        .metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(Default::default)
        .insert(ROLLOUT_LABEL.to_string(), timestamp.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_inserts_label_on_empty_template() {
        let mut deployment = Deployment::default();
        stamp_pod_template(&mut deployment, "20260802120000");

        let labels = deployment
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .labels
            .unwrap();
        assert_eq!(
            labels.get(ROLLOUT_LABEL).map(String::as_str),
            Some("20260802120000")
        );
    }

    #[test]
    fn stamp_overwrites_previous_timestamp() {
        let mut deployment = Deployment::default();
        stamp_pod_template(&mut deployment, "20260101000000");
        stamp_pod_template(&mut deployment, "20260802120000");

        let labels = deployment
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .labels
            .unwrap();
        assert_eq!(
            labels.get(ROLLOUT_LABEL).map(String::as_str),
            Some("20260802120000")
        );
    }

    #[test]
    fn timestamp_is_compact_utc() {
        let ts = rollout_timestamp();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }
}
