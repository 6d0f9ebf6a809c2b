//! Access token Secret management.
//!
//! The managed Secret carries exactly two fields, `token` and `username`,
//! and an owner reference back to its GithubApp. Anything else in the data
//! map is treated as tampering and triggers a regeneration upstream.

use crate::constants::GIT_USERNAME;
use crate::controller::events::{EventPublisher, REASON_CREATED, REASON_UPDATED};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use kube::runtime::events::EventType;
use std::collections::BTreeMap;
use tracing::info;

use crate::crd::GithubApp;

/// Secret field holding the installation access token
pub const TOKEN_FIELD: &str = "token";
/// Secret field holding the placeholder git username
pub const USERNAME_FIELD: &str = "username";

/// True when the Secret carries any field besides `token` and `username`
pub fn has_stray_fields(secret: &Secret) -> bool {
    secret
        .data
        .as_ref()
        .is_some_and(|data| data.keys().any(|key| key != TOKEN_FIELD && key != USERNAME_FIELD))
}

/// The canonical access token Secret for a GithubApp
fn desired_secret(app: &GithubApp, token: &str) -> Secret {
    let mut string_data = BTreeMap::new();
    string_data.insert(TOKEN_FIELD.to_string(), token.to_string());
    string_data.insert(USERNAME_FIELD.to_string(), GIT_USERNAME.to_string());

    Secret {
        metadata: ObjectMeta {
            name: Some(app.spec.access_token_secret.clone()),
            namespace: app.namespace(),
            owner_references: Some(app.controller_owner_ref(&()).into_iter().collect()),
            ..Default::default()
        },
        string_data: Some(string_data),
        ..Default::default()
    }
}

/// Create or overwrite the access token Secret.
///
/// An existing Secret is fully replaced so stray fields written by other
/// parties are dropped. Emits `Created` on first creation and `Updated` on
/// every rewrite.
pub async fn upsert_access_token_secret(
    client: Client,
    app: &GithubApp,
    events: &EventPublisher,
    token: &str,
) -> Result<()> {
    let namespace = app.namespace().unwrap_or_default();
    let secret_name = app.spec.access_token_secret.clone();
    let secrets: Api<Secret> = Api::namespaced(client, &namespace);

    let mut desired = desired_secret(app, token);

    match secrets
        .get_opt(&secret_name)
        .await
        .with_context(|| format!("failed to get access token secret {namespace}/{secret_name}"))?
    {
        None => {
            secrets
                .create(&PostParams::default(), &desired)
                .await
                .context("failed to create Secret for access token")?;
            info!("created access token secret {namespace}/{secret_name}");
            events
                .publish(
                    &app.object_ref(&()),
                    EventType::Normal,
                    REASON_CREATED,
                    "Reconcile",
                    format!("Created access token secret {secret_name}"),
                )
                .await;
        }
        Some(existing) => {
            // Full replace drops every previous data field
            desired.metadata.resource_version = existing.resource_version();
            secrets
                .replace(&secret_name, &PostParams::default(), &desired)
                .await
                .context("failed to update existing Secret")?;
            info!("updated access token secret {namespace}/{secret_name}");
            events
                .publish(
                    &app.object_ref(&()),
                    EventType::Normal,
                    REASON_UPDATED,
                    "Reconcile",
                    format!("Updated access token secret {secret_name}"),
                )
                .await;
        }
    }

    Ok(())
}

/// Delete every Secret in the namespace owned by a GithubApp with this name.
/// Used during teardown; garbage collection via the owner reference is the
/// backstop when the controller is not running.
pub async fn delete_owned_secrets(client: Client, app: &GithubApp) -> Result<()> {
    let namespace = app.namespace().unwrap_or_default();
    let name = app.name_any();
    let secrets: Api<Secret> = Api::namespaced(client, &namespace);

    let list = secrets
        .list(&Default::default())
        .await
        .with_context(|| format!("failed to list secrets in {namespace}"))?;

    for secret in list {
        let owned = secret
            .owner_references()
            .iter()
            .any(|owner| owner.kind == "GithubApp" && owner.name == name);
        if owned {
            let secret_name = secret.name_any();
            secrets
                .delete(&secret_name, &Default::default())
                .await
                .with_context(|| {
                    format!("failed to delete owned secret {namespace}/{secret_name}")
                })?;
            info!("deleted owned secret {namespace}/{secret_name}");
        }
    }

    Ok(())
}

/// Extract a data field as UTF-8, empty when absent
pub fn data_field(secret: &Secret, field: &str) -> String {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(field))
        .map(|value| String::from_utf8_lossy(&value.0).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::GithubAppSpec;
    use k8s_openapi::ByteString;

    fn test_app() -> GithubApp {
        let mut app = GithubApp::new(
            "gh-app-test",
            GithubAppSpec {
                app_id: 857468,
                install_id: 48531286,
                access_token_secret: "github-app-access-token-857468".to_string(),
                private_key_secret: Some("gh-app-key-test".to_string()),
                google_private_key_secret: None,
                vault_private_key: None,
                rollout_deployment: None,
            },
        );
        app.metadata.namespace = Some("default".to_string());
        app.metadata.uid = Some("bfb5efd1-0000-0000-0000-000000000000".to_string());
        app
    }

    fn secret_with_keys(keys: &[&str]) -> Secret {
        let data: BTreeMap<String, ByteString> = keys
            .iter()
            .map(|key| ((*key).to_string(), ByteString(b"value".to_vec())))
            .collect();
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn canonical_fields_are_not_stray() {
        assert!(!has_stray_fields(&secret_with_keys(&["token", "username"])));
        assert!(!has_stray_fields(&secret_with_keys(&[])));
        assert!(!has_stray_fields(&Secret::default()));
    }

    #[test]
    fn extra_field_is_stray() {
        assert!(has_stray_fields(&secret_with_keys(&[
            "token", "username", "foo"
        ])));
    }

    #[test]
    fn desired_secret_carries_canonical_fields() {
        let secret = desired_secret(&test_app(), "ghs_sometoken");
        let string_data = secret.string_data.unwrap();
        assert_eq!(string_data.len(), 2);
        assert_eq!(string_data.get(TOKEN_FIELD).unwrap(), "ghs_sometoken");
        assert_eq!(string_data.get(USERNAME_FIELD).unwrap(), GIT_USERNAME);
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("github-app-access-token-857468")
        );
        assert_eq!(secret.metadata.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn desired_secret_is_controller_owned() {
        let secret = desired_secret(&test_app(), "ghs_sometoken");
        let owners = secret.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        let owner = &owners[0];
        assert_eq!(owner.kind, "GithubApp");
        assert_eq!(owner.name, "gh-app-test");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    #[test]
    fn data_field_reads_utf8_values() {
        let mut secret = secret_with_keys(&["token"]);
        secret
            .data
            .as_mut()
            .unwrap()
            .insert("username".to_string(), ByteString(b"not-used".to_vec()));
        assert_eq!(data_field(&secret, "username"), "not-used");
        assert_eq!(data_field(&secret, "missing"), "");
    }
}
