mod common;

use std::sync::Arc;
use std::time::Duration;

use authsession::models::HealthStatus;
use authsession::store::ACCESS_TOKEN_KEY;
use authsession::{
    AuthError, AuthFlow, FlowPaths, IdentityError, StaticIdentityBridge, TransportError,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{LOGIN_PATH, LOGOUT_PATH, ME_PATH, REFRESH_PATH, credential, token_response};

fn login_response(token: &str, expires_in: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": expires_in,
        "user": {"id": 17, "email": "ada@backend.example", "full_name": "Ada L."}
    }))
}

#[tokio::test]
async fn test_sign_in_stores_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(body_json(json!({
            "identity_token": "header.payload.signature",
            "authorization_code": "auth-code",
            "user_info": {
                "email": "ada@example.com",
                "name": {"given_name": "Ada", "family_name": "Lovelace"}
            }
        })))
        .respond_with(login_response("tok1", 3600))
        .expect(1)
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    let identity = flow.sign_in().await.unwrap();

    assert_eq!(identity.user_id, "apple-001");
    assert_eq!(identity.email.as_deref(), Some("ada@backend.example"));
    assert_eq!(identity.full_name.as_deref(), Some("Ada L."));

    let status = flow.session().status().await;
    assert!(status.is_valid);
    assert_eq!(status.user_id.as_deref(), Some("apple-001"));
    assert_eq!(flow.session().gateway().bearer().as_deref(), Some("tok1"));
}

#[tokio::test]
async fn test_sign_in_without_user_object_falls_back_to_provider_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(token_response("tok1", 3600))
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    let identity = flow.sign_in().await.unwrap();
    assert_eq!(identity.email.as_deref(), Some("ada@example.com"));
    assert_eq!(identity.full_name.as_deref(), Some("Ada Lovelace"));
}

#[tokio::test]
async fn test_sign_in_then_refresh_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok1", 1))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"current_token": "tok1"})))
        .respond_with(token_response("tok2", 3600))
        .expect(1)
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    flow.sign_in().await.unwrap();

    // One second of lifetime is already inside the five minute buffer.
    assert!(!flow.session().status().await.is_valid);
    assert_eq!(flow.session().get_valid_token().await.unwrap(), "tok2");

    let status = flow.session().status().await;
    assert!(status.is_valid);
    assert_eq!(status.user_id.as_deref(), Some("apple-001"));
}

#[tokio::test]
async fn test_provider_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(login_response("tok1", 3600))
        .expect(0)
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::unavailable());
    let err = flow.sign_in().await.unwrap_err();
    assert!(matches!(err, AuthError::ProviderUnavailable(_)));
    assert!(!err.is_silent());
}

#[tokio::test]
async fn test_user_cancelled_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(login_response("tok1", 3600))
        .expect(0)
        .mount(&server)
        .await;

    let (_, flow) = common::flow(
        &server,
        StaticIdentityBridge::failing(IdentityError::Cancelled),
    );
    let err = flow.sign_in().await.unwrap_err();
    assert_eq!(err, AuthError::UserCancelled);
    assert!(err.is_silent());
    assert!(!flow.session().status().await.has_token);
}

#[tokio::test]
async fn test_backend_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid identity token"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    assert_eq!(
        flow.sign_in().await,
        Err(AuthError::BackendRejected {
            status: 401,
            message: "Invalid identity token".into()
        })
    );
    assert!(!flow.session().status().await.has_token);
    assert!(flow.session().gateway().bearer().is_none());
}

#[tokio::test]
async fn test_malformed_login_response_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok1"})))
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    assert!(matches!(
        flow.sign_in().await,
        Err(AuthError::BackendRejected { status: 200, .. })
    ));
    assert!(!flow.session().status().await.has_token);
}

#[tokio::test]
async fn test_login_timeout_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok1", 3600).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let gateway = common::gateway_with_timeout(&server, Duration::from_millis(100));
    let (_, manager) = common::manager_with(gateway, Duration::from_secs(300));
    let flow = AuthFlow::new(
        Arc::new(StaticIdentityBridge::new(credential())),
        manager,
        FlowPaths::default(),
    );

    assert_eq!(
        flow.sign_in().await,
        Err(AuthError::Transport(TransportError::Timeout))
    );
}

#[tokio::test]
async fn test_store_failure_during_sign_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(login_response("tok1", 3600))
        .mount(&server)
        .await;

    let (backend, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    backend.fail_writes_for(ACCESS_TOKEN_KEY);

    let err = flow.sign_in().await.unwrap_err();
    assert!(matches!(err, AuthError::Store(_)));
    assert!(!err.requires_sign_in());
    assert!(!flow.session().status().await.has_token);
}

#[tokio::test]
async fn test_sign_out_survives_backend_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGOUT_PATH))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let (backend, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    flow.session()
        .store_new_session(common::grant("tok1", 3600))
        .await
        .unwrap();

    flow.sign_out().await;
    assert!(!flow.session().status().await.has_token);
    assert!(flow.session().gateway().bearer().is_none());
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_sign_out_from_fresh_process_notifies_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGOUT_PATH))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "bye"})))
        .expect(1)
        .mount(&server)
        .await;

    let (backend, first) = common::manager(&server);
    first.store_new_session(common::grant("tok1", 3600)).await.unwrap();

    // Same storage, but a gateway that never had the bearer attached.
    let second = common::manager_over(backend.clone(), common::gateway(&server));
    let flow = AuthFlow::new(
        Arc::new(StaticIdentityBridge::unavailable()),
        second,
        FlowPaths::default(),
    );
    assert!(flow.session().gateway().bearer().is_none());

    flow.sign_out().await;
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_sign_out_twice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGOUT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "bye"})))
        .expect(1)
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    flow.session()
        .store_new_session(common::grant("tok1", 3600))
        .await
        .unwrap();

    flow.sign_out().await;
    // No bearer left, so the second call stays local.
    flow.sign_out().await;
    assert!(!flow.session().status().await.has_token);
}

#[tokio::test]
async fn test_current_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ME_PATH))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "u1", "email": "ada@example.com", "full_name": null})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    flow.session()
        .store_new_session(common::grant("tok1", 3600))
        .await
        .unwrap();

    let user = flow.current_user().await.unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(user.email.as_deref(), Some("ada@example.com"));
    assert!(user.full_name.is_none());
}

#[tokio::test]
async fn test_current_user_unauthorized_clears_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ME_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Not authenticated"})))
        .expect(1)
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    flow.session()
        .store_new_session(common::grant("tok1", 3600))
        .await
        .unwrap();

    assert_eq!(flow.current_user().await, Err(AuthError::SessionExpired));
    assert!(!flow.session().status().await.has_token);
}

#[tokio::test]
async fn test_current_user_without_session() {
    let server = MockServer::start().await;
    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    assert_eq!(flow.current_user().await, Err(AuthError::NoSession));
}

#[tokio::test]
async fn test_current_user_server_error_keeps_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ME_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    flow.session()
        .store_new_session(common::grant("tok1", 3600))
        .await
        .unwrap();

    assert_eq!(
        flow.current_user().await,
        Err(AuthError::Transport(TransportError::Http {
            status: 503,
            message: "maintenance".into()
        }))
    );
    assert!(flow.session().status().await.has_token);
}

#[tokio::test]
async fn test_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "healthy", "service": "api"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (_, flow) = common::flow(&server, StaticIdentityBridge::unavailable());
    assert_eq!(
        flow.health().await.unwrap(),
        HealthStatus {
            status: "healthy".into(),
            service: Some("api".into()),
        }
    );
}

#[tokio::test]
async fn test_initialize() {
    let server = MockServer::start().await;
    let (_, flow) = common::flow(&server, StaticIdentityBridge::new(credential()));
    assert!(!flow.initialize().await);

    flow.session()
        .store_new_session(common::grant("tok1", 3600))
        .await
        .unwrap();
    assert!(flow.initialize().await);
}
