mod common;

use std::time::Duration;

use authsession::TransportError;
use authsession::net::{GatewayRequest, HttpGateway, ResponseBody};
use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_default_headers_and_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/items"))
        .and(header("accept", "application/json"))
        .and(header_exists("x-request-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    let response = gateway.send(GatewayRequest::get("/items")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, ResponseBody::Json(json!({"ok": true})));
}

#[tokio::test]
async fn test_request_ids_are_unique() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    gateway.send(GatewayRequest::get("/a")).await.unwrap();
    gateway.send(GatewayRequest::get("/a")).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let ids: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("x-request-id").unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_bearer_is_attached_once_set() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/private"))
        .and(header("authorization", "Bearer stored"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/private"))
        .and(header("authorization", "Bearer explicit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    gateway.set_bearer("stored");
    gateway.send(GatewayRequest::get("/private")).await.unwrap();
    gateway
        .send(GatewayRequest::get("/private").bearer("explicit"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_no_bearer_after_clear() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    gateway.set_bearer("stored");
    gateway.clear_bearer();
    gateway.send(GatewayRequest::get("/public")).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_request_wrapper() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/echo"))
        .and(header("x-trace", "abc"))
        .and(body_json(json!({"n": 1})))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    let body = json!({"n": 1});
    let response = gateway
        .request(
            Method::POST,
            "/echo",
            Some(&body),
            &[("X-Trace", "abc")],
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.body, ResponseBody::Text("created".into()));
}

#[tokio::test]
async fn test_unversioned_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    gateway
        .send(GatewayRequest::get("/health").unversioned())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_empty_success_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    let response = gateway.send(GatewayRequest::post("/x")).await.unwrap();
    assert_eq!(response.status, 204);
    assert_eq!(response.body, ResponseBody::Empty);
}

#[tokio::test]
async fn test_error_envelope_priority() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/detail"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"detail": "Bad input", "message": "ignored", "error": "ignored"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/error"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "Forbidden"})))
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    assert_eq!(
        gateway.send(GatewayRequest::get("/detail")).await,
        Err(TransportError::Http {
            status: 400,
            message: "Bad input".into()
        })
    );
    assert_eq!(
        gateway.send(GatewayRequest::get("/error")).await,
        Err(TransportError::Http {
            status: 403,
            message: "Forbidden".into()
        })
    );
}

#[tokio::test]
async fn test_unexpected_error_shape_is_generic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(json!({"detail": [{"msg": "field required"}]})),
        )
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    assert_eq!(
        gateway.send(GatewayRequest::get("/x")).await,
        Err(TransportError::Http {
            status: 422,
            message: "request failed with status 422".into()
        })
    );
}

#[tokio::test]
async fn test_non_json_error_uses_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    let err = gateway.send(GatewayRequest::get("/x")).await.unwrap_err();
    assert_eq!(err.status(), Some(502));
    assert_eq!(err.to_string(), "HTTP 502: upstream unavailable");
}

#[tokio::test]
async fn test_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let gateway = common::gateway_with_timeout(&server, Duration::from_millis(100));
    assert_eq!(
        gateway.send(GatewayRequest::get("/slow")).await,
        Err(TransportError::Timeout)
    );

    // A per-request override beats the gateway default.
    let gateway = common::gateway(&server);
    assert_eq!(
        gateway
            .send(GatewayRequest::get("/slow").timeout(Duration::from_millis(100)))
            .await,
        Err(TransportError::Timeout)
    );
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let gateway = HttpGateway::builder("http://127.0.0.1:9").build().unwrap();
    assert!(matches!(
        gateway.send(GatewayRequest::get("/x")).await,
        Err(TransportError::Network(_))
    ));
}

#[tokio::test]
async fn test_malformed_json_success_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{not json", "application/json"))
        .mount(&server)
        .await;

    let gateway = common::gateway(&server);
    assert!(matches!(
        gateway.send(GatewayRequest::get("/x")).await,
        Err(TransportError::Decode(_))
    ));
}
