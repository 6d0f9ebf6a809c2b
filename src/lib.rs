//! # GitHub App Operator
//!
//! A Kubernetes controller that manages GitHub App installation access
//! tokens for `GithubApp` custom resources.
//!
//! For every `GithubApp`, the controller:
//!
//! 1. **Resolves the app's RSA private key** - from a Kubernetes Secret,
//!    HashiCorp Vault (via Kubernetes service account auth), or GCP Secret
//!    Manager, with a local on-disk cache in front
//! 2. **Signs an RS256 app JWT** and exchanges it with the GitHub API for an
//!    installation access token, retrying on rate limits
//! 3. **Stores the token** in a namespaced Secret owned by the `GithubApp`
//! 4. **Renews the token** before expiry and whenever the stored secret has
//!    been tampered with
//! 5. **Rolls selected Deployments** so pods pick up the fresh credentials
//!
//! A validating admission webhook enforces that exactly one private key
//! source is configured per resource.

pub mod cache;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod error;
pub mod github;
pub mod identity;
pub mod keysource;
pub mod server;
pub mod webhook;

pub use crd::{GithubApp, GithubAppSpec, GithubAppStatus};
pub use error::{Error, Result};
