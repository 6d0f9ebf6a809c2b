//! # GithubApp Custom Resource
//!
//! CRD types for `githubapps.githubapp.samir.io/v1`.
//!
//! A `GithubApp` declares a GitHub App installation whose access token the
//! controller keeps fresh in a namespaced Secret. Exactly one private key
//! source must be configured: a Kubernetes Secret, a GCP Secret Manager
//! resource, or a Vault KV-v2 entry.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rejection message when zero or multiple private key sources are configured
pub const KEY_SOURCE_EXCLUSIVITY_MESSAGE: &str =
    "exactly one of googlePrivateKeySecret, privateKeySecret, or vaultPrivateKey must be specified";

/// GithubApp Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: githubapp.samir.io/v1
/// kind: GithubApp
/// metadata:
///   name: my-github-app
///   namespace: default
/// spec:
///   appId: 857468
///   installId: 48531286
///   privateKeySecret: gh-app-key
///   accessTokenSecret: github-app-access-token
///   rolloutDeployment:
///     labels:
///       app: my-service
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "githubapp.samir.io",
    version = "v1",
    kind = "GithubApp",
    namespaced,
    status = "GithubAppStatus",
    printcolumn = r#"{"name":"App ID","type":"string","jsonPath":".spec.appId"}"#,
    printcolumn = r#"{"name":"Access Token Secret","type":"string","jsonPath":".spec.accessTokenSecret"}"#,
    printcolumn = r#"{"name":"Install ID","type":"string","jsonPath":".spec.installId"}"#,
    printcolumn = r#"{"name":"Expires At","type":"string","jsonPath":".status.expiresAt"}"#,
    printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.error"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GithubAppSpec {
    /// GitHub App numeric identifier
    pub app_id: i64,
    /// Installation identifier under the app
    pub install_id: i64,
    /// Name of the Secret the controller manages for the access token
    pub access_token_secret: String,
    /// Name of a Secret in the same namespace with field `privateKey`
    /// holding a PEM-encoded RSA key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_secret: Option<String>,
    /// Fully qualified GCP Secret Manager resource name whose payload is a
    /// base64-encoded PEM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_private_key_secret: Option<String>,
    /// Vault KV-v2 location of a base64-encoded PEM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_private_key: Option<VaultPrivateKeySpec>,
    /// Deployments to restart when a new token is issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_deployment: Option<RolloutDeploymentSpec>,
}

/// Location of the private key in Vault
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultPrivateKeySpec {
    /// KV-v2 secrets engine mount path
    pub mount_path: String,
    /// Path of the secret under the mount
    pub secret_path: String,
    /// Key within the secret holding the base64-encoded PEM
    pub secret_key: String,
}

/// Deployments selected for a rolling restart on token renewal
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RolloutDeploymentSpec {
    /// Each key/value pair selects Deployments by an equality label selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

/// Observed state of a GithubApp
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GithubAppStatus {
    /// Expiry of the current access token as returned by GitHub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Time>,
    /// Last reconcile failure message, absent when healthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The private key source configured on a spec
#[derive(Debug, Clone, Copy)]
pub enum KeySourceRef<'a> {
    Kubernetes(&'a str),
    Gcp(&'a str),
    Vault(&'a VaultPrivateKeySpec),
}

impl GithubAppSpec {
    /// Number of private key sources configured on this spec
    pub fn configured_key_sources(&self) -> usize {
        let mut count = 0;
        if self.private_key_secret.as_deref().is_some_and(|s| !s.is_empty()) {
            count += 1;
        }
        if self
            .google_private_key_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty())
        {
            count += 1;
        }
        if self.vault_private_key.is_some() {
            count += 1;
        }
        count
    }

    /// The single configured key source, or the exclusivity violation message
    pub fn key_source(&self) -> Result<KeySourceRef<'_>, String> {
        validate_key_sources(self)?;
        if let Some(name) = self.private_key_secret.as_deref().filter(|s| !s.is_empty()) {
            return Ok(KeySourceRef::Kubernetes(name));
        }
        if let Some(name) = self
            .google_private_key_secret
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            return Ok(KeySourceRef::Gcp(name));
        }
        if let Some(vault) = self.vault_private_key.as_ref() {
            return Ok(KeySourceRef::Vault(vault));
        }
        Err(KEY_SOURCE_EXCLUSIVITY_MESSAGE.to_string())
    }
}

/// Check that exactly one private key source is configured.
///
/// Enforced at admission time, and re-checked by the reconciler in case the
/// webhook is disabled.
pub fn validate_key_sources(spec: &GithubAppSpec) -> Result<(), String> {
    if spec.configured_key_sources() == 1 {
        Ok(())
    } else {
        Err(KEY_SOURCE_EXCLUSIVITY_MESSAGE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> GithubAppSpec {
        GithubAppSpec {
            app_id: 857468,
            install_id: 48531286,
            access_token_secret: "github-app-access-token-857468".to_string(),
            private_key_secret: None,
            google_private_key_secret: None,
            vault_private_key: None,
            rollout_deployment: None,
        }
    }

    #[test]
    fn kubernetes_source_is_valid() {
        let mut spec = base_spec();
        spec.private_key_secret = Some("gh-app-key-test".to_string());
        assert!(validate_key_sources(&spec).is_ok());
        assert!(matches!(
            spec.key_source(),
            Ok(KeySourceRef::Kubernetes("gh-app-key-test"))
        ));
    }

    #[test]
    fn no_source_is_rejected() {
        let spec = base_spec();
        let err = validate_key_sources(&spec).unwrap_err();
        assert_eq!(err, KEY_SOURCE_EXCLUSIVITY_MESSAGE);
    }

    #[test]
    fn multiple_sources_are_rejected() {
        let mut spec = base_spec();
        spec.private_key_secret = Some("gh-app-key-test".to_string());
        spec.google_private_key_secret =
            Some("projects/p/secrets/gh-key/versions/latest".to_string());
        assert_eq!(
            validate_key_sources(&spec).unwrap_err(),
            KEY_SOURCE_EXCLUSIVITY_MESSAGE
        );
    }

    #[test]
    fn empty_string_does_not_count_as_a_source() {
        let mut spec = base_spec();
        spec.private_key_secret = Some(String::new());
        spec.vault_private_key = Some(VaultPrivateKeySpec {
            mount_path: "secret".to_string(),
            secret_path: "github-app".to_string(),
            secret_key: "privateKey".to_string(),
        });
        assert!(validate_key_sources(&spec).is_ok());
        assert!(matches!(spec.key_source(), Ok(KeySourceRef::Vault(_))));
    }

    #[test]
    fn spec_deserializes_camel_case() {
        let spec: GithubAppSpec = serde_json::from_value(serde_json::json!({
            "appId": 857468,
            "installId": 48531286,
            "accessTokenSecret": "github-app-access-token-857468",
            "vaultPrivateKey": {
                "mountPath": "secret",
                "secretPath": "github-app",
                "secretKey": "privateKey"
            },
            "rolloutDeployment": {"labels": {"foo": "bar"}}
        }))
        .unwrap();
        assert_eq!(spec.app_id, 857468);
        assert_eq!(spec.vault_private_key.as_ref().unwrap().mount_path, "secret");
        assert_eq!(
            spec.rollout_deployment
                .as_ref()
                .unwrap()
                .labels
                .as_ref()
                .unwrap()
                .get("foo")
                .map(String::as_str),
            Some("bar")
        );
    }
}
