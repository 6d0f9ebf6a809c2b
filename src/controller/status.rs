//! Status subresource writes.
//!
//! `expiresAt` updates race with other writers and retry optimistic
//! concurrency conflicts a bounded number of times with linear backoff.
//! Error recording is best effort: a failed status write is logged, never
//! allowed to mask the reconcile error that produced it.

use crate::crd::{GithubApp, GithubAppStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};
use std::time::Duration;
use tracing::{debug, error};

const CONFLICT: u16 = 409;

/// Write `status.expiresAt`, retrying conflicts up to `max_attempts` times.
///
/// Between attempts the writer sleeps `attempts * 2` seconds. Non-conflict
/// errors are terminal.
pub async fn update_expires_at(
    client: Client,
    app: &GithubApp,
    expires_at: DateTime<Utc>,
    max_attempts: u32,
) -> Result<()> {
    let namespace = app.namespace().unwrap_or_default();
    let name = app.name_any();
    let api: Api<GithubApp> = Api::namespaced(client, &namespace);

    let mut attempts = 0;
    loop {
        attempts += 1;

        let mut latest = api
            .get_status(&name)
            .await
            .context("failed to get GithubApp for status update")?;
        latest
            .status
            .get_or_insert_with(GithubAppStatus::default)
            .expires_at = Some(Time(expires_at));

        match api
            .replace_status(
                &name,
                &PostParams::default(),
                serde_json::to_vec(&latest).context("failed to serialize GithubApp status")?,
            )
            .await
        {
            Ok(_) => {
                debug!("updated status.expiresAt for {namespace}/{name} to {expires_at}");
                return Ok(());
            }
            Err(kube::Error::Api(api_err)) if api_err.code == CONFLICT => {
                if attempts >= max_attempts {
                    anyhow::bail!(
                        "maximum retry attempts reached, failed to update GithubApp status"
                    );
                }
                tokio::time::sleep(Duration::from_secs(u64::from(attempts) * 2)).await;
            }
            Err(err) => {
                return Err(err).context("failed to update GithubApp status");
            }
        }
    }
}

/// Record a reconcile failure in `status.error`
pub async fn set_error(client: Client, app: &GithubApp, message: &str) {
    if let Err(err) = write_error_field(client, app, Some(message.to_string())).await {
        error!("failed to update status field 'error': {err:#}");
    }
}

/// Clear `status.error` after a clean reconcile
pub async fn clear_error(client: Client, app: &GithubApp) -> Result<()> {
    write_error_field(client, app, None)
        .await
        .context("failed to clear status field 'error'")
}

async fn write_error_field(
    client: Client,
    app: &GithubApp,
    message: Option<String>,
) -> Result<()> {
    let namespace = app.namespace().unwrap_or_default();
    let name = app.name_any();
    let api: Api<GithubApp> = Api::namespaced(client, &namespace);

    let mut latest = api
        .get_status(&name)
        .await
        .context("failed to get GithubApp for status update")?;
    latest
        .status
        .get_or_insert_with(GithubAppStatus::default)
        .error = message;

    api.replace_status(
        &name,
        &PostParams::default(),
        serde_json::to_vec(&latest).context("failed to serialize GithubApp status")?,
    )
    .await?;
    Ok(())
}
