//! Admission validation tests exercising full AdmissionReview payloads as
//! the API server would send them.

use github_app_operator::crd::KEY_SOURCE_EXCLUSIVITY_MESSAGE;
use github_app_operator::webhook::{review_request, AdmissionReview};

fn admission_review(operation: &str, spec: serde_json::Value) -> AdmissionReview {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "operation": operation,
            "object": {
                "apiVersion": "githubapp.samir.io/v1",
                "kind": "GithubApp",
                "metadata": {"name": "gh-app-test", "namespace": "default"},
                "spec": spec,
            }
        }
    }))
    .expect("valid AdmissionReview payload")
}

#[test]
fn create_with_kubernetes_secret_source_is_admitted() {
    let review = admission_review(
        "CREATE",
        serde_json::json!({
            "appId": 857468,
            "installId": 48531286,
            "accessTokenSecret": "github-app-access-token-857468",
            "privateKeySecret": "gh-app-key-test",
        }),
    );
    let response = review_request(&review.request.unwrap());
    assert!(response.allowed);
    assert_eq!(response.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
}

#[test]
fn create_with_vault_source_is_admitted() {
    let review = admission_review(
        "CREATE",
        serde_json::json!({
            "appId": 857468,
            "installId": 48531286,
            "accessTokenSecret": "github-app-access-token-857468",
            "vaultPrivateKey": {
                "mountPath": "secret",
                "secretPath": "github-app",
                "secretKey": "privateKey",
            },
        }),
    );
    let response = review_request(&review.request.unwrap());
    assert!(response.allowed);
}

#[test]
fn create_with_both_secret_and_gcp_source_is_rejected() {
    let review = admission_review(
        "CREATE",
        serde_json::json!({
            "appId": 857468,
            "installId": 48531286,
            "accessTokenSecret": "github-app-access-token-857468",
            "privateKeySecret": "gh-app-key-test",
            "googlePrivateKeySecret": "projects/my-project/secrets/gh-key/versions/latest",
        }),
    );
    let response = review_request(&review.request.unwrap());
    assert!(!response.allowed);
    let status = response.status.unwrap();
    assert!(status.message.contains(KEY_SOURCE_EXCLUSIVITY_MESSAGE));
}

#[test]
fn update_removing_every_source_is_rejected() {
    let review = admission_review(
        "UPDATE",
        serde_json::json!({
            "appId": 857468,
            "installId": 48531286,
            "accessTokenSecret": "github-app-access-token-857468",
        }),
    );
    let response = review_request(&review.request.unwrap());
    assert!(!response.allowed);
}

#[test]
fn response_serializes_admission_review_envelope() {
    let review = admission_review(
        "CREATE",
        serde_json::json!({
            "appId": 857468,
            "installId": 48531286,
            "accessTokenSecret": "github-app-access-token-857468",
            "privateKeySecret": "gh-app-key-test",
        }),
    );
    let response = review_request(&review.request.unwrap());

    let reply = AdmissionReview {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        request: None,
        response: Some(response),
    };
    let json = serde_json::to_value(&reply).unwrap();
    assert_eq!(json["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(json["kind"], "AdmissionReview");
    assert_eq!(json["response"]["allowed"], true);
    assert!(json.get("request").is_none());
}
