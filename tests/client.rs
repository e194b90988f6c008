mod common;

use nyx_client::{DataFilter, ErrorKind, NyxClient, NyxError};
use nyx_fake_exchange::{FakeExchange, EMAIL, ORG, USERNAME};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A bare server answering the session lookups made by a token client.
async fn session_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/portal/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "bob"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/portal/auth/qapi-connection"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"org_name": "initech"})))
        .mount(&server)
        .await;
    server
}

async fn token_client(server: &MockServer) -> NyxClient {
    let config = common::config(&server.uri())
        .override_token("tok")
        .build()
        .unwrap();
    NyxClient::connect(config).await.unwrap()
}

#[tokio::test]
async fn test_login_resolves_session() {
    let exchange = FakeExchange::start().await;
    let client = common::connect(&exchange).await;

    assert_eq!(client.org(), ORG);
    assert_eq!(client.session().username, USERNAME);
    assert!(!client.session().community_mode);
}

#[tokio::test]
async fn test_community_mode_qualifies_org() {
    let exchange = FakeExchange::start().await;
    exchange.set_community_mode(true);
    let client = common::connect(&exchange).await;

    assert_eq!(client.org(), format!("{ORG}/{USERNAME}"));
}

#[tokio::test]
async fn test_bad_credentials() {
    let exchange = FakeExchange::start().await;
    let config = common::config(&exchange.uri())
        .email(EMAIL)
        .password("wrong")
        .build()
        .unwrap();

    let err = NyxClient::connect(config).await.unwrap_err();
    assert!(matches!(err, NyxError::Unauthorized(_)));
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_override_token_skips_login() {
    let server = session_server().await;
    let client = token_client(&server).await;

    assert_eq!(client.org(), "initech");
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/api/portal/auth/login"));
}

#[tokio::test]
async fn test_sdk_headers_and_bearer_token() {
    let server = session_server().await;
    Mock::given(method("GET"))
        .and(path("/api/portal/products"))
        .and(header("X-Requested-With", "nyx-sdk"))
        .and(header("X-Client-Type", "nyx-sdk"))
        .and(header("authorization", "Bearer tok"))
        .and(query_param("include", "all"))
        .and(query_param("scope", "global"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = token_client(&server).await;
    let data = client.get_data(&DataFilter::new()).await.unwrap();
    assert!(data.is_empty());
}

#[tokio::test]
async fn test_status_mapping() {
    let server = session_server().await;
    Mock::given(method("GET"))
        .and(path("/api/portal/meta/genres"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"detail": "maintenance"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/portal/meta/categories"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "bad scope"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/portal/meta/creators"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = token_client(&server).await;

    let err = client.genres().await.unwrap_err();
    assert!(matches!(err, NyxError::Status { status: 503, ref message } if message == "maintenance"));
    assert_eq!(err.kind(), ErrorKind::Transport);

    let err = client.categories().await.unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("bad scope"));

    let err = client.creators().await.unwrap_err();
    assert!(matches!(err, NyxError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unreachable_instance() {
    let config = common::config("http://127.0.0.1:9")
        .override_token("tok")
        .build()
        .unwrap();

    let err = NyxClient::connect(config).await.unwrap_err();
    assert!(matches!(err, NyxError::Http(_)));
    assert_eq!(err.kind(), ErrorKind::Transport);
}
