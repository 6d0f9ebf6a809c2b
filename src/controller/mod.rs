//! # Reconciler
//!
//! Core reconciliation logic for `GithubApp` resources.
//!
//! Each reconcile walks one state machine:
//! - deletion requested: delete owned secrets and the cached key, drop the finalizer
//! - `status.expiresAt` missing or past: mint a new token
//! - token not yet expired: verify the access token secret is intact and the
//!   token still works, renew when the expiry threshold is reached
//! - otherwise idle, clear `status.error` and requeue
//!
//! Minting runs key resolution, the GitHub token exchange, the secret write,
//! the status update, and the Deployment rollout in that order. A rollout is
//! only attempted once the secret write has been acknowledged.
//!
//! Reconciles are serialized process-wide by a mutex so cache writes and the
//! shared HTTP clients are never contended.

use crate::config::ControllerConfig;
use crate::constants::{DEFAULT_ERROR_REQUEUE_SECS, FINALIZER, STATUS_UPDATE_MAX_ATTEMPTS};
use crate::crd::{validate_key_sources, GithubApp};
use crate::error::Error;
use crate::github::GithubClient;
use crate::keysource::KeyResolver;
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub mod events;
pub mod predicates;
pub mod rollout;
pub mod secrets;
pub mod status;

use events::{EventPublisher, REASON_FAILED_DEPLOYMENT_UPGRADE, REASON_FAILED_RENEWAL};

/// Shared state handed to every reconcile
pub struct Context {
    pub client: Client,
    pub github: GithubClient,
    pub resolver: KeyResolver,
    pub events: EventPublisher,
    pub config: ControllerConfig,
    /// Serializes reconciles across all GithubApps
    reconcile_gate: Mutex<()>,
}

impl Context {
    pub fn new(
        client: Client,
        github: GithubClient,
        resolver: KeyResolver,
        events: EventPublisher,
        config: ControllerConfig,
    ) -> Self {
        Self {
            client,
            github,
            resolver,
            events,
            config,
            reconcile_gate: Mutex::new(()),
        }
    }
}

/// Why a renewal attempt failed, deciding which warning event is emitted
enum RenewalFailure {
    Renewal(anyhow::Error),
    Rollout(anyhow::Error),
}

pub async fn reconcile(app: Arc<GithubApp>, ctx: Arc<Context>) -> Result<Action, Error> {
    let _serialized = ctx.reconcile_gate.lock().await;

    let namespace = app.namespace().unwrap_or_default();
    let name = app.name_any();
    debug!("reconciling GithubApp {namespace}/{name}");

    if app.metadata.deletion_timestamp.is_some() {
        info!("GithubApp {namespace}/{name} is being deleted, removing managed objects");
        cleanup(&app, &ctx).await?;
        return Ok(Action::await_change());
    }

    ensure_finalizer(&app, &ctx).await?;

    if let Err(failure) = ensure_fresh_token(&app, &ctx).await {
        let (reason, err, is_rollout) = match failure {
            RenewalFailure::Renewal(err) => (REASON_FAILED_RENEWAL, err, false),
            RenewalFailure::Rollout(err) => (REASON_FAILED_DEPLOYMENT_UPGRADE, err, true),
        };
        let message = format!("{err:#}");
        error!("failed to renew access token for {namespace}/{name}: {message}");
        ctx.events
            .publish(
                &app.object_ref(&()),
                EventType::Warning,
                reason,
                "Reconcile",
                message.clone(),
            )
            .await;
        status::set_error(ctx.client.clone(), &app, &message).await;
        return Err(if is_rollout {
            Error::DeploymentUpgrade(message)
        } else {
            Error::Renewal(message)
        });
    }

    if app
        .status
        .as_ref()
        .and_then(|status| status.error.as_deref())
        .is_some_and(|message| !message.is_empty())
    {
        status::clear_error(ctx.client.clone(), &app).await?;
    }

    debug!(
        "requeueing GithubApp {namespace}/{name} after {:?}",
        ctx.config.reconcile_interval
    );
    Ok(Action::requeue(ctx.config.reconcile_interval))
}

pub fn error_policy(app: Arc<GithubApp>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        "reconciliation error for GithubApp {}: {error}",
        app.name_any()
    );
    Action::requeue(Duration::from_secs(DEFAULT_ERROR_REQUEUE_SECS))
}

/// Decide whether the token must be minted or renewed, and do so
async fn ensure_fresh_token(app: &GithubApp, ctx: &Context) -> Result<(), RenewalFailure> {
    // The webhook normally guarantees this, but it can be disabled
    validate_key_sources(&app.spec)
        .map_err(|message| RenewalFailure::Renewal(anyhow::anyhow!(message)))?;

    let now = Utc::now();
    let expires_at = app
        .status
        .as_ref()
        .and_then(|status| status.expires_at.as_ref())
        .map(|time| time.0);

    let Some(expires_at) = expires_at.filter(|expiry| *expiry > now) else {
        return mint_and_distribute(app, ctx).await;
    };

    let namespace = app.namespace().unwrap_or_default();
    let secrets_api: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
    let existing = secrets_api
        .get_opt(&app.spec.access_token_secret)
        .await
        .context("failed to get access token secret")
        .map_err(RenewalFailure::Renewal)?;

    let Some(secret) = existing else {
        info!("access token secret is missing, minting a new token");
        return mint_and_distribute(app, ctx).await;
    };

    if secrets::has_stray_fields(&secret) {
        info!("removing invalid keys in access token secret");
        return mint_and_distribute(app, ctx).await;
    }

    let token = secrets::data_field(&secret, secrets::TOKEN_FIELD);
    let username = secrets::data_field(&secret, secrets::USERNAME_FIELD);
    if !ctx.github.is_token_valid(&username, &token).await {
        return mint_and_distribute(app, ctx).await;
    }

    if within_renewal_window(expires_at, now, ctx.config.expiry_threshold) {
        info!("expiry threshold reached, renewing");
        return mint_and_distribute(app, ctx).await;
    }

    Ok(())
}

/// Renewal is due once the remaining lifetime is at or below the threshold
fn within_renewal_window(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    let Ok(threshold) = chrono::Duration::from_std(threshold) else {
        // a threshold too large to represent always renews
        return true;
    };
    expires_at - now <= threshold
}

/// Resolve the key, mint a token, write the secret, update status, roll
/// deployments. Strictly in that order.
async fn mint_and_distribute(app: &GithubApp, ctx: &Context) -> Result<(), RenewalFailure> {
    let (pem, _cache_path) = ctx
        .resolver
        .resolve(app)
        .await
        .map_err(RenewalFailure::Renewal)?;

    let minted = match ctx
        .github
        .create_installation_token(app.spec.app_id, app.spec.install_id, &pem)
        .await
    {
        Ok(minted) => minted,
        Err(err) => {
            // A rejected exchange can mean the cached key went stale after an
            // external rotation; drop it so the next attempt re-fetches.
            ctx.resolver.discard_cached(app);
            return Err(RenewalFailure::Renewal(
                anyhow::Error::new(err).context("failed to generate access token"),
            ));
        }
    };

    secrets::upsert_access_token_secret(ctx.client.clone(), app, &ctx.events, &minted.token)
        .await
        .map_err(RenewalFailure::Renewal)?;

    status::update_expires_at(
        ctx.client.clone(),
        app,
        minted.expires_at,
        STATUS_UPDATE_MAX_ATTEMPTS,
    )
    .await
    .map_err(RenewalFailure::Renewal)?;

    rollout::rollout_deployments(ctx.client.clone(), app, &ctx.events)
        .await
        .map_err(RenewalFailure::Rollout)?;

    Ok(())
}

/// Deletion cleanup: owned secrets, the cached key, then the finalizer
async fn cleanup(app: &GithubApp, ctx: &Context) -> Result<(), Error> {
    secrets::delete_owned_secrets(ctx.client.clone(), app).await?;
    ctx.resolver.discard_cached(app);
    remove_finalizer(app, ctx).await?;
    Ok(())
}

async fn ensure_finalizer(app: &GithubApp, ctx: &Context) -> Result<(), Error> {
    if app.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(());
    }
    let namespace = app.namespace().unwrap_or_default();
    let api: Api<GithubApp> = Api::namespaced(ctx.client.clone(), &namespace);

    let mut finalizers = app.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    api.patch(
        &app.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({"metadata": {"finalizers": finalizers}})),
    )
    .await?;
    Ok(())
}

async fn remove_finalizer(app: &GithubApp, ctx: &Context) -> Result<(), Error> {
    if !app.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(());
    }
    let namespace = app.namespace().unwrap_or_default();
    let api: Api<GithubApp> = Api::namespaced(ctx.client.clone(), &namespace);

    let finalizers: Vec<String> = app
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect();
    api.patch(
        &app.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({"metadata": {"finalizers": finalizers}})),
    )
    .await?;
    Ok(())
}

/// Run the controller until shutdown.
///
/// GithubApps are watched through a projection that ignores the controller's
/// own status writes; owned access token secrets are watched through a
/// projection that ignores the controller's own token writes while still
/// reacting to tampering and deletion.
pub async fn run(ctx: Arc<Context>) -> anyhow::Result<()> {
    let apps: Api<GithubApp> = Api::all(ctx.client.clone());
    let owned_secrets: Api<Secret> = Api::all(ctx.client.clone());

    let (reader, writer) = reflector::store();
    let app_stream = reflector(writer, watcher(apps, watcher::Config::default()))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::githubapp_reconcile_trigger);

    let secret_stream = predicates::access_token_secret_events(
        watcher(owned_secrets, watcher::Config::default()).default_backoff(),
    );

    Controller::for_stream(app_stream, reader)
        .shutdown_on_signal()
        .owns_stream(secret_stream)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _action)) => debug!("reconciled {object:?}"),
                Err(err) => warn!("reconciliation failed: {err:?}"),
            }
        })
        .await;

    info!("controller stream ended");
    Ok(())
}
