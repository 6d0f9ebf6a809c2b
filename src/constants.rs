//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable.

/// GitHub REST API base URL
pub const GITHUB_API_BASE_URL: &str = "https://api.github.com";

/// Username written into every access token secret. GitHub ignores the
/// username during token auth but git clients require one.
pub const GIT_USERNAME: &str = "not-used";

/// Default idle requeue interval (seconds), overridden by `CHECK_INTERVAL`
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;

/// Default renewal window before token expiry (seconds), overridden by `EXPIRY_THRESHOLD`
pub const DEFAULT_EXPIRY_THRESHOLD_SECS: u64 = 900;

/// Default root directory for the on-disk private key cache
pub const DEFAULT_PRIVATE_KEY_CACHE_PATH: &str = "/var/run/github-app-secrets/";

/// Default path of the projected service account token
pub const DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Requeue interval after a reconciliation error (seconds)
pub const DEFAULT_ERROR_REQUEUE_SECS: u64 = 60;

/// Maximum attempts for status updates that hit optimistic concurrency conflicts
pub const STATUS_UPDATE_MAX_ATTEMPTS: u32 = 3;

/// TTL of the short-lived service account JWT minted for Vault auth (seconds)
pub const VAULT_JWT_TTL_SECS: i64 = 600;

/// Default HTTP port for liveness and readiness probes
pub const DEFAULT_PROBE_PORT: u16 = 8081;

/// Default HTTPS port for the validating admission webhook
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;

/// Default TLS certificate path for the webhook server (mounted by Kubernetes)
pub const DEFAULT_TLS_CERT_PATH: &str = "/tmp/k8s-webhook-server/serving-certs/tls.crt";

/// Default TLS private key path for the webhook server (mounted by Kubernetes)
pub const DEFAULT_TLS_KEY_PATH: &str = "/tmp/k8s-webhook-server/serving-certs/tls.key";

/// Finalizer placed on GithubApp resources so deletion cleans up the
/// access token secret and the cached private key
pub const FINALIZER: &str = "githubapp.samir.io/finalizer";
