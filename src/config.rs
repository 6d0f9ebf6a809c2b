//! # Controller Configuration
//!
//! Environment-driven configuration, resolved once at startup and carried as
//! an immutable record for the lifetime of the process.
//!
//! Durations use Kubernetes/Go style strings ("30s", "5m", "1h"). Invalid or
//! missing values fall back to the built-in defaults with a warning so a
//! misconfigured interval never prevents startup.

use crate::constants;
use anyhow::Result;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Process-wide configuration, built once by [`ControllerConfig::from_env`]
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Idle requeue period (`CHECK_INTERVAL`)
    pub reconcile_interval: Duration,
    /// Renew when less than this remains before `status.expiresAt` (`EXPIRY_THRESHOLD`)
    pub expiry_threshold: Duration,
    /// Vault authentication settings, required only when a resource selects Vault
    pub vault: VaultConfig,
    /// Optional HTTP proxy for GitHub API calls (`GITHUB_PROXY`)
    pub github_proxy: Option<String>,
    /// Verbose logging (`DEBUG_LOG`)
    pub debug_log: bool,
    /// Root directory of the on-disk private key cache (`PRIVATE_KEY_CACHE_PATH`)
    pub private_key_cache_path: PathBuf,
    /// Path of the projected service account token (`SERVICE_ACCOUNT_TOKEN_PATH`)
    pub service_account_token_path: PathBuf,
    /// Serve the validating admission webhook (`ENABLE_WEBHOOKS`)
    pub enable_webhooks: bool,
    /// Port for liveness and readiness probes (`PROBE_PORT`)
    pub probe_port: u16,
    /// Webhook server settings
    pub webhook: WebhookConfig,
}

/// Vault connection and Kubernetes auth settings
#[derive(Debug, Clone, Default)]
pub struct VaultConfig {
    /// Vault server address (`VAULT_ADDR`)
    pub addr: Option<String>,
    /// Kubernetes auth role (`VAULT_ROLE`)
    pub role: Option<String>,
    /// Audience bound into the service account JWT (`VAULT_ROLE_AUDIENCE`)
    pub audience: Option<String>,
    /// Optional HTTP proxy for Vault calls (`VAULT_PROXY_ADDR`)
    pub proxy: Option<String>,
}

/// Admission webhook server settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub port: u16,
    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,
}

impl ControllerConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Self {
        let reconcile_interval = duration_from_env(
            "CHECK_INTERVAL",
            Duration::from_secs(constants::DEFAULT_RECONCILE_INTERVAL_SECS),
        );
        let expiry_threshold = duration_from_env(
            "EXPIRY_THRESHOLD",
            Duration::from_secs(constants::DEFAULT_EXPIRY_THRESHOLD_SECS),
        );

        Self {
            reconcile_interval,
            expiry_threshold,
            vault: VaultConfig {
                addr: non_empty_env("VAULT_ADDR"),
                role: non_empty_env("VAULT_ROLE"),
                audience: non_empty_env("VAULT_ROLE_AUDIENCE"),
                proxy: non_empty_env("VAULT_PROXY_ADDR"),
            },
            github_proxy: non_empty_env("GITHUB_PROXY"),
            debug_log: bool_from_env("DEBUG_LOG"),
            private_key_cache_path: non_empty_env("PRIVATE_KEY_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_PRIVATE_KEY_CACHE_PATH)),
            service_account_token_path: non_empty_env("SERVICE_ACCOUNT_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH)),
            enable_webhooks: bool_from_env("ENABLE_WEBHOOKS"),
            probe_port: port_from_env("PROBE_PORT", constants::DEFAULT_PROBE_PORT),
            webhook: WebhookConfig {
                port: port_from_env("WEBHOOK_PORT", constants::DEFAULT_WEBHOOK_PORT),
                tls_cert_path: non_empty_env("TLS_CERT_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_TLS_CERT_PATH)),
                tls_key_path: non_empty_env("TLS_KEY_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_TLS_KEY_PATH)),
            },
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn bool_from_env(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<bool>().ok())
        .unwrap_or(false)
}

fn port_from_env(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(default)
}

fn duration_from_env(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match parse_duration(&raw) {
            Ok(duration) => duration,
            Err(err) => {
                warn!("invalid {name} '{raw}', using default {default:?}: {err}");
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a Kubernetes duration string into a `Duration`.
///
/// Supports the single number + unit form: "30s", "5m", "1h", "1d".
pub fn parse_duration(value: &str) -> Result<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("duration string cannot be empty"));
    }

    let duration_regex = Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$")
        .map_err(|e| anyhow::anyhow!("failed to compile regex: {e}"))?;

    let lowercased = trimmed.to_lowercase();
    let captures = duration_regex
        .captures(&lowercased)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "invalid duration format '{trimmed}', expected <number><unit> (e.g. '30s', '5m', '1h')"
            )
        })?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid duration number in '{trimmed}': {e}"))?;

    let seconds = match &captures["unit"] {
        "s" => number,
        "m" => number * 60,
        "h" => number * 3600,
        "d" => number * 86400,
        unit => return Err(anyhow::anyhow!("invalid duration unit '{unit}'")),
    };

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_minutes_hours() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn trims_and_lowercases() {
        assert_eq!(parse_duration(" 15M ").unwrap(), Duration::from_secs(900));
    }

    #[test]
    fn rejects_invalid_formats() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("5 m").is_err());
        assert!(parse_duration("five minutes").is_err());
    }

    #[test]
    fn invalid_env_value_falls_back_to_default() {
        let default = Duration::from_secs(constants::DEFAULT_RECONCILE_INTERVAL_SECS);
        std::env::set_var("TEST_CHECK_INTERVAL_INVALID", "not-a-duration");
        assert_eq!(
            duration_from_env("TEST_CHECK_INTERVAL_INVALID", default),
            default
        );
        std::env::remove_var("TEST_CHECK_INTERVAL_INVALID");
    }

    #[test]
    fn missing_env_value_falls_back_to_default() {
        let default = Duration::from_secs(constants::DEFAULT_EXPIRY_THRESHOLD_SECS);
        assert_eq!(duration_from_env("TEST_UNSET_DURATION_VAR", default), default);
    }
}
