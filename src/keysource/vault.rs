//! Vault KV-v2 key source.
//!
//! Authenticates to Vault with the Kubernetes auth method: a short-lived
//! service account JWT is minted through the TokenRequest API, bound to the
//! controller's own identity and the configured audience, exchanged for a
//! Vault client token, and never persisted or reused across reconciles.
//!
//! The secret value must be a base64-encoded PEM stored under
//! `spec.vaultPrivateKey.secretKey`.

use crate::config::VaultConfig;
use crate::constants::VAULT_JWT_TTL_SECS;
use crate::crd::{GithubApp, KeySourceRef};
use crate::identity::ControllerIdentity;
use crate::keysource::KeySource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::PostParams;
use kube::{Api, Client};
use std::collections::BTreeMap;
use vaultrs::client::{Client as _, VaultClient, VaultClientSettingsBuilder};

/// Mount path of the Kubernetes auth method
const KUBERNETES_AUTH_MOUNT: &str = "kubernetes";

pub struct VaultKeySource {
    kube: Client,
    config: VaultConfig,
    identity: Option<ControllerIdentity>,
}

impl VaultKeySource {
    pub fn new(kube: Client, config: VaultConfig, identity: Option<ControllerIdentity>) -> Self {
        Self {
            kube,
            config,
            identity,
        }
    }

    /// Mint a short-lived, audience-bound JWT for the controller's own
    /// service account via the TokenRequest API
    async fn request_service_account_jwt(&self, audience: &str) -> Result<String> {
        let identity = self
            .identity
            .as_ref()
            .context("controller identity is unknown, cannot authenticate to vault")?;

        let service_accounts: Api<ServiceAccount> =
            Api::namespaced(self.kube.clone(), &identity.namespace);
        let response = service_accounts
            .create_token_request(
                &identity.service_account,
                &PostParams::default(),
                &token_request(audience),
            )
            .await
            .context("failed to create token request to k8s api")?;

        response
            .status
            .map(|status| status.token)
            .filter(|token| !token.is_empty())
            .context("token request returned no token")
    }

    /// Build a fresh client for one fetch. Vault client tokens are not
    /// reused across reconciles.
    fn build_client(&self, addr: &str) -> Result<VaultClient> {
        let settings = VaultClientSettingsBuilder::default()
            .address(addr)
            .build()
            .context("failed to build vault client settings")?;
        let mut client = VaultClient::new(settings).context("failed to create vault client")?;

        // The settings builder has no proxy knob, so swap in a proxied
        // transport when VAULT_PROXY_ADDR is configured
        if let Some(proxy_url) = self.config.proxy.as_deref() {
            let http_client = reqwest::Client::builder()
                .proxy(reqwest::Proxy::all(proxy_url).context("invalid vault proxy address")?)
                .build()
                .context("failed to create proxied http client for vault")?;
            client.http = rustify::clients::reqwest::Client::new(&client.http.base, http_client);
        }

        Ok(client)
    }
}

#[async_trait]
impl KeySource for VaultKeySource {
    async fn fetch(&self, app: &GithubApp) -> Result<Vec<u8>> {
        let vault_spec = match app.spec.key_source() {
            Ok(KeySourceRef::Vault(spec)) => spec.clone(),
            _ => anyhow::bail!("spec.vaultPrivateKey is not set"),
        };

        let addr = self
            .config
            .addr
            .as_deref()
            .context("VAULT_ADDR is not configured")?;
        let role = self
            .config
            .role
            .as_deref()
            .context("VAULT_ROLE is not configured")?;
        let audience = self
            .config
            .audience
            .as_deref()
            .context("VAULT_ROLE_AUDIENCE is not configured")?;

        let jwt = self.request_service_account_jwt(audience).await?;

        let mut client = self.build_client(addr)?;
        let auth = vaultrs::auth::kubernetes::login(&client, KUBERNETES_AUTH_MOUNT, role, &jwt)
            .await
            .context("failed to login to vault with k8s auth")?;
        client.set_token(&auth.client_token);

        let data: BTreeMap<String, serde_json::Value> =
            vaultrs::kv2::read(&client, &vault_spec.mount_path, &vault_spec.secret_path)
                .await
                .context("failed to read secret in vault")?;

        let encoded = data
            .get(&vault_spec.secret_key)
            .and_then(|value| value.as_str())
            .with_context(|| {
                format!("{} not found in vault secret data", vault_spec.secret_key)
            })?;

        general_purpose::STANDARD
            .decode(encoded.trim())
            .context("failed to base64 decode the private key")
    }
}

/// TokenRequest spec for the Vault login JWT
fn token_request(audience: &str) -> TokenRequest {
    TokenRequest {
        spec: TokenRequestSpec {
            audiences: vec![audience.to_string()],
            expiration_seconds: Some(VAULT_JWT_TTL_SECS),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_request_is_audience_bound_and_short_lived() {
        let request = token_request("vault");
        assert_eq!(request.spec.audiences, vec!["vault".to_string()]);
        assert_eq!(request.spec.expiration_seconds, Some(600));
    }

    #[test]
    fn stored_value_is_base64_pem() {
        let mut data: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        data.insert(
            "privateKey".to_string(),
            serde_json::Value::String("LS0tLS1CRUdJTg==".to_string()),
        );
        let encoded = data.get("privateKey").unwrap().as_str().unwrap();
        assert_eq!(
            general_purpose::STANDARD.decode(encoded).unwrap(),
            b"-----BEGIN"
        );
    }
}
