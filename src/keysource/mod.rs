//! # Private Key Sources
//!
//! Each source fetches the RSA private key for a GithubApp from one backend:
//! a Kubernetes Secret, a Vault KV-v2 entry, or GCP Secret Manager. Sources
//! are stateless; the resolver owns source selection and the on-disk cache.

use crate::cache::KeyCache;
use crate::crd::{GithubApp, KeySourceRef};
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use std::path::PathBuf;
use tracing::warn;

pub mod gcp;
pub mod kubernetes;
pub mod vault;

use gcp::GcpKeySource;
use kubernetes::KubernetesKeySource;
use vault::VaultKeySource;

/// A backend that can produce the private key PEM for a GithubApp
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the PEM bytes for the given resource
    async fn fetch(&self, app: &GithubApp) -> Result<Vec<u8>>;
}

/// Resolves private keys with a local cache in front of the remote sources
pub struct KeyResolver {
    cache: KeyCache,
    kubernetes: KubernetesKeySource,
    vault: VaultKeySource,
    gcp: GcpKeySource,
}

impl KeyResolver {
    pub fn new(
        cache: KeyCache,
        kubernetes: KubernetesKeySource,
        vault: VaultKeySource,
        gcp: GcpKeySource,
    ) -> Self {
        Self {
            cache,
            kubernetes,
            vault,
            gcp,
        }
    }

    /// Produce the private key for `app`, cache-first.
    ///
    /// On a cache miss the configured source is queried and the result is
    /// written through to the cache. Source errors are returned verbatim
    /// with a prefix naming the source; retry is left to the reconciler.
    pub async fn resolve(&self, app: &GithubApp) -> Result<(Vec<u8>, PathBuf)> {
        let namespace = app.namespace().unwrap_or_default();
        let name = app.name_any();

        if let Some(pem) = self.cache.load(&namespace, &name)? {
            return Ok((pem, self.cache.entry_path(&namespace, &name)));
        }

        let source = app
            .spec
            .key_source()
            .map_err(|message| anyhow::anyhow!(message))?;
        let pem = match source {
            KeySourceRef::Kubernetes(_) => self
                .kubernetes
                .fetch(app)
                .await
                .context("failed to get private key from kubernetes secret")?,
            KeySourceRef::Vault(_) => self
                .vault
                .fetch(app)
                .await
                .context("failed to get private key from vault")?,
            KeySourceRef::Gcp(_) => self
                .gcp
                .fetch(app)
                .await
                .context("failed to get private key from gcp secret manager")?,
        };

        if pem.is_empty() {
            anyhow::bail!("private key for {namespace}/{name} is empty");
        }

        let path = self.cache.store(&namespace, &name, &pem)?;
        Ok((pem, path))
    }

    /// Drop the cached key for `app` so the next resolve re-fetches from the
    /// remote source. Used when GitHub rejects a token exchange (the cached
    /// key may be stale) and during teardown.
    pub fn discard_cached(&self, app: &GithubApp) {
        let namespace = app.namespace().unwrap_or_default();
        let name = app.name_any();
        if let Err(err) = self.cache.remove(&namespace, &name) {
            warn!("failed to remove cached private key for {namespace}/{name}: {err:#}");
        }
    }
}
