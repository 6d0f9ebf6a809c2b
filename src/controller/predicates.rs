//! Event filter predicates.
//!
//! The controller writes its own status (`expiresAt`, `error`) and rewrites
//! its own access token secrets, and each of those writes comes straight
//! back as a watch event. These projections hash only the parts of each
//! object that warrant a reconcile, so the controller's own writes do not
//! requeue the object they came from.

use crate::controller::secrets::{TOKEN_FIELD, USERNAME_FIELD};
use crate::crd::GithubApp;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::watcher;
use kube::ResourceExt;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Projection of a GithubApp used to decide whether an update event should
/// trigger a reconcile.
///
/// Spec changes bump `metadata.generation` and deletion sets the deletion
/// timestamp; both must reconcile. Status-only writes leave the projection
/// unchanged and are suppressed.
pub fn githubapp_reconcile_trigger(app: &GithubApp) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    app.metadata.generation.hash(&mut hasher);
    app.metadata.deletion_timestamp.is_some().hash(&mut hasher);
    app.metadata.finalizers.hash(&mut hasher);
    Some(hasher.finish())
}

/// Projection of an owned access token Secret.
///
/// The shape of the data map and the username value decide whether the
/// secret was tampered with. Token renewals rewrite only the token value, so
/// the controller's own updates (and its initial create, once observed) do
/// not re-trigger the owner.
pub fn access_token_secret_trigger(secret: &Secret) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    if let Some(data) = secret.data.as_ref() {
        for key in data.keys() {
            key.hash(&mut hasher);
        }
        data.get(USERNAME_FIELD).map(|v| &v.0).hash(&mut hasher);
        data.get(TOKEN_FIELD).is_some().hash(&mut hasher);
    }
    Some(hasher.finish())
}

/// Filter a Secret watch stream down to the events that warrant waking the
/// owning GithubApp.
///
/// First sightings are suppressed: they are either the controller's own
/// creates or the initial listing, and the owner's own reconcile already
/// covers secrets that were tampered with at rest. Later apply events pass
/// only when the shape projection changed, which drops the echo of the
/// controller's renewal writes. Deletions always pass so a removed token
/// secret is recreated promptly.
pub fn access_token_secret_events<S>(
    stream: S,
) -> impl Stream<Item = Result<Secret, watcher::Error>>
where
    S: Stream<Item = Result<watcher::Event<Secret>, watcher::Error>>,
{
    let mut seen: HashMap<String, u64> = HashMap::new();
    stream.filter_map(move |event| {
        let emit = match event {
            Err(err) => Some(Err(err)),
            Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
            Ok(watcher::Event::Delete(secret)) => {
                seen.remove(&secret_key(&secret));
                Some(Ok(secret))
            }
            Ok(watcher::Event::InitApply(secret) | watcher::Event::Apply(secret)) => {
                match access_token_secret_trigger(&secret) {
                    Some(hash) => match seen.insert(secret_key(&secret), hash) {
                        Some(previous) if previous != hash => Some(Ok(secret)),
                        _ => None,
                    },
                    None => Some(Ok(secret)),
                }
            }
        };
        futures::future::ready(emit)
    })
}

fn secret_key(secret: &Secret) -> String {
    format!(
        "{}/{}",
        secret.namespace().unwrap_or_default(),
        secret.name_any()
    )
}
