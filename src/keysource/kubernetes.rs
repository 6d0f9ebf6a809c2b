//! Kubernetes Secret key source.
//!
//! Reads the PEM from field `privateKey` of a Secret in the GithubApp's own
//! namespace. The field holds raw PEM bytes, not base64 text, because the
//! Kubernetes API already base64-decodes `data` values on read.

use crate::crd::{GithubApp, KeySourceRef};
use crate::keysource::KeySource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};

/// Secret `data` field holding the PEM-encoded private key
pub const PRIVATE_KEY_FIELD: &str = "privateKey";

pub struct KubernetesKeySource {
    client: Client,
}

impl KubernetesKeySource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeySource for KubernetesKeySource {
    async fn fetch(&self, app: &GithubApp) -> Result<Vec<u8>> {
        let secret_name = match app.spec.key_source() {
            Ok(KeySourceRef::Kubernetes(name)) => name.to_string(),
            _ => anyhow::bail!("spec.privateKeySecret is not set"),
        };
        let namespace = app.namespace().unwrap_or_default();

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let secret = secrets
            .get(&secret_name)
            .await
            .with_context(|| format!("failed to get Secret {namespace}/{secret_name}"))?;

        let pem = secret
            .data
            .as_ref()
            .and_then(|data| data.get(PRIVATE_KEY_FIELD))
            .map(|value| value.0.clone())
            .context("privateKey not found in Secret")?;

        Ok(pem)
    }
}
