//! # Controller Identity
//!
//! Discovers the controller's own service account name and namespace from the
//! projected token mounted into the pod. The token is a JWT whose claims are
//! read without signature verification, which is fine here: the claims only
//! name the identity used for the Vault TokenRequest binding, they grant
//! nothing by themselves.

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use std::path::Path;

/// Identity of the controller pod, discovered once at startup
#[derive(Debug, Clone)]
pub struct ControllerIdentity {
    /// Namespace the controller runs in
    pub namespace: String,
    /// Name of the controller's service account
    pub service_account: String,
}

#[derive(Deserialize)]
struct ProjectedTokenClaims {
    #[serde(rename = "kubernetes.io")]
    kubernetes: KubernetesClaims,
}

#[derive(Deserialize)]
struct KubernetesClaims {
    namespace: String,
    serviceaccount: ServiceAccountClaims,
}

#[derive(Deserialize)]
struct ServiceAccountClaims {
    name: String,
}

impl ControllerIdentity {
    /// Read the projected service account token at `path` and extract the
    /// identity claims.
    pub fn discover(path: &Path) -> Result<Self> {
        let token = std::fs::read_to_string(path).with_context(|| {
            format!("failed to read service account token at {}", path.display())
        })?;
        Self::from_token(token.trim())
    }

    /// Parse the unverified claims of a service account JWT
    pub fn from_token(token: &str) -> Result<Self> {
        let payload = token
            .split('.')
            .nth(1)
            .context("service account token is not a JWT")?;
        let decoded = general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .context("failed to decode JWT claims segment")?;
        let claims: ProjectedTokenClaims =
            serde_json::from_slice(&decoded).context("failed to parse JWT claims")?;
        Ok(Self {
            namespace: claims.kubernetes.namespace,
            service_account: claims.kubernetes.serviceaccount.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose;

    fn fake_service_account_jwt(claims: &serde_json::Value) -> String {
        let header = general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"test"}"#);
        let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn extracts_namespace_and_service_account() {
        let token = fake_service_account_jwt(&serde_json::json!({
            "aud": ["vault"],
            "exp": 1900000000u64,
            "kubernetes.io": {
                "namespace": "github-app-operator-system",
                "serviceaccount": {
                    "name": "github-app-operator-controller-manager",
                    "uid": "e2a3f9a1-0000-0000-0000-000000000000"
                }
            }
        }));

        let identity = ControllerIdentity::from_token(&token).unwrap();
        assert_eq!(identity.namespace, "github-app-operator-system");
        assert_eq!(
            identity.service_account,
            "github-app-operator-controller-manager"
        );
    }

    #[test]
    fn rejects_non_jwt_token() {
        assert!(ControllerIdentity::from_token("not-a-jwt").is_err());
    }

    #[test]
    fn rejects_missing_kubernetes_claims() {
        let token = fake_service_account_jwt(&serde_json::json!({"sub": "system:anonymous"}));
        assert!(ControllerIdentity::from_token(&token).is_err());
    }
}
