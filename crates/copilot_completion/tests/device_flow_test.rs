//! Device flow against a mock GitHub login server


use std::sync::Arc;
use std::time::Duration;

use copilot_completion::auth::{self, DeviceAuthFlow, GithubDeviceAuthApi, HeadlessPresenter};
use copilot_completion::error::AuthError;
use copilot_completion::settings::{CredentialStore, FileCredentialStore};
use copilot_completion::utils::http_utils::HttpClients;
use test_utils::{config_for, MockResponseBuilder, RequestCounter};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn flow_for(server: &MockServer) -> DeviceAuthFlow {
    let clients = HttpClients::from_config(&config_for(&server.uri())).expect("clients");
    let api = GithubDeviceAuthApi::new(clients.plain, server.uri());
    DeviceAuthFlow::new(Arc::new(api), Arc::new(HeadlessPresenter))
        .with_poll_interval(Duration::from_millis(20))
        .with_timeout(Duration::from_secs(5))
}

async fn mount_device_code(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/login/device/code"))
        .and(header("editor-version", "vscode/1.99.2"))
        .and(header("accept", "application/json"))
        .and(body_partial_json(serde_json::json!({
            "client_id": "Iv1.b507a08c87ecfe98",
            "scope": "read:user"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockResponseBuilder::device_code()))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_succeeds_after_pending_polls() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;

    let polls = RequestCounter::new();
    let counter = polls.clone();
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .and(body_partial_json(serde_json::json!({
            "device_code": "test-device-code",
            "grant_type": "urn:ietf:params:oauth:grant-type:device_code"
        })))
        .respond_with(move |_req: &wiremock::Request| {
            if counter.increment() < 2 {
                ResponseTemplate::new(200).set_body_json(MockResponseBuilder::authorization_pending())
            } else {
                ResponseTemplate::new(200)
                    .set_body_json(MockResponseBuilder::access_token("gho_integration"))
            }
        })
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileCredentialStore::new(dir.path().join("settings.json"));

    let credential = auth::login(&flow_for(&server), &store).await.expect("login");

    assert_eq!(credential.api_key, "gho_integration");
    assert_eq!(polls.get(), 3);
    assert_eq!(store.read_credential().api_key, "gho_integration");
    assert!(auth::is_logged_in(&store));
}

#[tokio::test]
async fn login_times_out_when_never_authorized() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(MockResponseBuilder::authorization_pending()),
        )
        .mount(&server)
        .await;

    let flow = flow_for(&server).with_timeout(Duration::from_millis(300));
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileCredentialStore::new(dir.path().join("settings.json"));

    let err = auth::login(&flow, &store).await.expect_err("must time out");

    assert!(matches!(err, AuthError::Timeout(_)), "got {err:?}");
    assert!(!auth::is_logged_in(&store));
    assert!(!store.path().exists());
}

#[tokio::test]
async fn device_code_failure_ends_attempt_without_polling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/device/code"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = flow_for(&server).begin_auth().await.expect_err("must fail");

    match err {
        AuthError::RequestFailed(message) => assert!(message.contains("500"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn proxy_auth_during_poll_is_reported() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(407))
        .expect(1)
        .mount(&server)
        .await;

    let err = flow_for(&server).begin_auth().await.expect_err("must fail");

    match err {
        AuthError::RequestFailed(message) => {
            assert!(message.contains("proxy_auth_required"), "{message}")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_login_stops_polling() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(MockResponseBuilder::authorization_pending()),
        )
        .mount(&server)
        .await;

    let flow = flow_for(&server);
    let cancel = flow.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
    });

    let err = flow.begin_auth().await.expect_err("must be cancelled");
    assert!(matches!(err, AuthError::Cancelled), "got {err:?}");
}
