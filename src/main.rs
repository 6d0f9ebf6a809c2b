//! Controller entrypoint: wires configuration, clients, the probe server,
//! the optional admission webhook, and the reconcile loop.

use anyhow::{Context, Result};
use github_app_operator::cache::KeyCache;
use github_app_operator::config::ControllerConfig;
use github_app_operator::controller::{self, events::EventPublisher, Context as ReconcileContext};
use github_app_operator::github::GithubClient;
use github_app_operator::identity::ControllerIdentity;
use github_app_operator::keysource::{
    gcp::GcpKeySource, kubernetes::KubernetesKeySource, vault::VaultKeySource, KeyResolver,
};
use github_app_operator::{server, webhook};
use kube::Client;
use std::sync::Arc;
use tracing::{error, info, warn};

const CONTROLLER_NAME: &str = "githubapp-controller";

#[tokio::main]
async fn main() -> Result<()> {
    let config = ControllerConfig::from_env();

    let default_directive = if config.debug_log {
        "github_app_operator=debug,info"
    } else {
        "github_app_operator=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .init();

    info!("starting github-app-operator");

    // Identity discovery failing only disables Vault-backed resolves
    let identity = match ControllerIdentity::discover(&config.service_account_token_path) {
        Ok(identity) => {
            info!(
                "running as service account {}/{}",
                identity.namespace, identity.service_account
            );
            Some(identity)
        }
        Err(err) => {
            warn!("could not discover controller identity, vault key sources will be unavailable: {err:#}");
            None
        }
    };

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let github = GithubClient::new(config.github_proxy.as_deref())
        .context("failed to create GitHub client")?;

    let resolver = KeyResolver::new(
        KeyCache::new(config.private_key_cache_path.clone()),
        KubernetesKeySource::new(client.clone()),
        VaultKeySource::new(client.clone(), config.vault.clone(), identity),
        GcpKeySource::new(),
    );

    let server_state = server::ServerState::new();
    let probe_state = server_state.clone();
    let probe_port = config.probe_port;
    tokio::spawn(async move {
        if let Err(err) = server::start_server(probe_port, probe_state).await {
            error!("probe server error: {err:#}");
        }
    });

    if config.enable_webhooks {
        let webhook_config = config.webhook.clone();
        tokio::spawn(async move {
            if let Err(err) = webhook::serve(webhook_config).await {
                error!("webhook server error: {err:#}");
            }
        });
    }

    let events = EventPublisher::new(client.clone(), CONTROLLER_NAME);
    let ctx = Arc::new(ReconcileContext::new(
        client.clone(),
        github,
        resolver,
        events,
        config,
    ));

    server_state
        .is_ready
        .store(true, std::sync::atomic::Ordering::Relaxed);

    controller::run(ctx).await?;

    info!("controller stopped");
    Ok(())
}
