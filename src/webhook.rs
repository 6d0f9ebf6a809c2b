//! # Validating Admission Webhook
//!
//! Rejects GithubApp objects that configure zero or multiple private key
//! sources, before they reach the reconciler. Create and Update are
//! validated, Delete is always admitted.
//!
//! The server terminates its own TLS from certificates mounted by
//! Kubernetes and answers `AdmissionReview` requests at
//! `/validate-githubapp-samir-io-v1-githubapp`. It is enabled with
//! `ENABLE_WEBHOOKS=true`; environments that enforce the same rule with
//! external policy can leave it off, the reconciler re-checks exclusivity
//! either way.

use crate::config::WebhookConfig;
use crate::crd::{validate_key_sources, GithubApp};
use anyhow::{Context, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::fs;
use tracing::{error, info, warn};

/// Review path, matching the pattern kubebuilder derives from the GVK
pub const VALIDATE_PATH: &str = "/validate-githubapp-samir-io-v1-githubapp";

const API_VERSION: &str = "admission.k8s.io/v1";
const KIND: &str = "AdmissionReview";

#[derive(Debug, Deserialize, Serialize)]
pub struct AdmissionReview {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AdmissionRequest {
    pub uid: String,
    pub operation: String,
    #[serde(default)]
    pub object: Option<GithubApp>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AdmissionStatus {
    pub code: i32,
    pub message: String,
}

/// Serve the webhook over TLS until the process exits
pub async fn serve(config: WebhookConfig) -> Result<()> {
    let cert_pem = fs::read(&config.tls_cert_path).await.with_context(|| {
        format!(
            "failed to read TLS certificate at {}",
            config.tls_cert_path.display()
        )
    })?;
    let key_pem = fs::read(&config.tls_key_path).await.with_context(|| {
        format!(
            "failed to read TLS private key at {}",
            config.tls_key_path.display()
        )
    })?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse TLS certificate")?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .context("failed to parse TLS private key")?
        .context("no private key found in PEM file")?;

    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("failed to build TLS config")?;
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let tls_acceptor = tokio_rustls::TlsAcceptor::from(std::sync::Arc::new(tls_config));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind webhook listener on {addr}"))?;

    info!("webhook server listening on {addr}");

    loop {
        let (stream, _peer) = listener
            .accept()
            .await
            .context("failed to accept webhook connection")?;
        let acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let io = hyper_util::rt::TokioIo::new(tls_stream);
                    let service = hyper::service::service_fn(handle_request);
                    if let Err(err) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("webhook connection error: {err}");
                    }
                }
                Err(err) => {
                    error!("TLS handshake failed: {err}");
                }
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, VALIDATE_PATH) => Ok(validate(req).await),
        _ => Ok(build_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

async fn validate(req: Request<hyper::body::Incoming>) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            error!("failed to read admission request body: {err}");
            return build_response(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(err) => {
            error!("failed to parse AdmissionReview: {err}");
            return build_response(StatusCode::BAD_REQUEST, "invalid AdmissionReview");
        }
    };

    let Some(request) = review.request else {
        error!("AdmissionReview carries no request");
        return build_response(StatusCode::BAD_REQUEST, "missing request in AdmissionReview");
    };

    let response = review_request(&request);
    let reply = AdmissionReview {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        request: None,
        response: Some(response),
    };

    match serde_json::to_vec(&reply) {
        Ok(json) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(json)))
            .unwrap_or_else(|err| {
                error!("failed to build admission response: {err}");
                Response::new(Full::new(Bytes::from("Internal Error")))
            }),
        Err(err) => {
            error!("failed to serialize admission response: {err}");
            build_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to serialize response")
        }
    }
}

/// Decide a single admission request
pub fn review_request(request: &AdmissionRequest) -> AdmissionResponse {
    let uid = request.uid.clone();

    // Deletion needs no spec validation
    if request.operation.eq_ignore_ascii_case("delete") {
        return AdmissionResponse {
            uid,
            allowed: true,
            status: None,
        };
    }

    let Some(app) = request.object.as_ref() else {
        warn!(
            "admission request for operation {} carries no object, admitting",
            request.operation
        );
        return AdmissionResponse {
            uid,
            allowed: true,
            status: None,
        };
    };

    info!(
        "validating {} of GithubApp {}",
        request.operation.to_lowercase(),
        app.name_any()
    );

    match validate_key_sources(&app.spec) {
        Ok(()) => AdmissionResponse {
            uid,
            allowed: true,
            status: None,
        },
        Err(message) => AdmissionResponse {
            uid,
            allowed: false,
            status: Some(AdmissionStatus { code: 403, message }),
        },
    }
}

fn build_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap_or_else(|err| {
            error!("failed to build response: {err}");
            Response::new(Full::new(Bytes::from("Internal Error")))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(operation: &str, object: Option<serde_json::Value>) -> AdmissionRequest {
        serde_json::from_value(serde_json::json!({
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "operation": operation,
            "object": object,
        }))
        .unwrap()
    }

    fn app_json(sources: serde_json::Value) -> serde_json::Value {
        let mut spec = serde_json::json!({
            "appId": 857468,
            "installId": 48531286,
            "accessTokenSecret": "github-app-access-token-857468",
        });
        spec.as_object_mut()
            .unwrap()
            .extend(sources.as_object().unwrap().clone());
        serde_json::json!({
            "apiVersion": "githubapp.samir.io/v1",
            "kind": "GithubApp",
            "metadata": {"name": "gh-app-test", "namespace": "default"},
            "spec": spec,
        })
    }

    #[test]
    fn single_source_is_admitted() {
        let req = request(
            "CREATE",
            Some(app_json(serde_json::json!({"privateKeySecret": "gh-app-key-test"}))),
        );
        let response = review_request(&req);
        assert!(response.allowed);
        assert!(response.status.is_none());
    }

    #[test]
    fn two_sources_are_rejected_with_rule_message() {
        let req = request(
            "CREATE",
            Some(app_json(serde_json::json!({
                "privateKeySecret": "gh-app-key-test",
                "googlePrivateKeySecret": "projects/p/secrets/key/versions/latest",
            }))),
        );
        let response = review_request(&req);
        assert!(!response.allowed);
        assert!(response.status.unwrap().message.contains(
            "exactly one of googlePrivateKeySecret, privateKeySecret, or vaultPrivateKey must be specified"
        ));
    }

    #[test]
    fn zero_sources_are_rejected_on_update() {
        let req = request("UPDATE", Some(app_json(serde_json::json!({}))));
        let response = review_request(&req);
        assert!(!response.allowed);
    }

    #[test]
    fn delete_is_always_admitted() {
        let req = request("DELETE", None);
        let response = review_request(&req);
        assert!(response.allowed);
    }
}
