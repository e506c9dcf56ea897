//! REST client and sign-in against a mock backend.

use std::time::Duration;

use hubnotify::auth::{sign_in, SignInError};
use hubnotify::{ApiError, Category, NotificationApi, NotificationFeed};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_for(server: &MockServer) -> NotificationApi {
    NotificationApi::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_load_normalizes_records_in_server_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/notifications"))
        .and(header("authorization", "Bearer T"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": 1, "title": "A", "message": "m1", "type": 9003,
                 "isActionable": true, "relatedId": "R1", "isRead": false,
                 "createdAt": "2024-05-01T10:00:00Z"},
                {"id": "2", "title": "B", "message": "m2", "category": "INVITE",
                 "createdOn": "2024-05-01T09:00:00", "isRead": true},
                "not a record",
                {"title": "C"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let list = api_for(&server).load("T").await.unwrap();
    assert_eq!(list.len(), 3);

    assert_eq!(list[0].id, "1");
    assert_eq!(list[0].category, Some(Category::Code(9003)));
    assert!(list[0].is_actionable_invitation());
    assert!(list[0].created_at.is_some());

    assert_eq!(list[1].id, "2");
    assert_eq!(list[1].category, Some(Category::Symbol("INVITE".into())));
    assert!(list[1].is_read);
    assert!(list[1].created_at.is_some());

    assert_eq!(list[2].title, "C");
    assert_eq!(list[2].category, None);
    assert!(list[2].id.starts_with("local-"));
}

#[tokio::test]
async fn test_load_empty_and_missing_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
        .mount(&server)
        .await;

    assert!(api_for(&server).load("T").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_load_non_list_data_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"x": 1}})))
        .mount(&server)
        .await;

    let err = api_for(&server).load("T").await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)), "got {err:?}");
}

#[tokio::test]
async fn test_load_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/notifications"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = api_for(&server).load("expired").await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn test_respond_sends_query_and_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/invitation/respond"))
        .and(query_param("relatedId", "R1"))
        .and(query_param("accepted", "true"))
        .and(header("authorization", "Bearer T"))
        .respond_with(ResponseTemplate::new(200).set_body_string("whatever"))
        .expect(1)
        .mount(&server)
        .await;

    api_for(&server).respond("R1", true, "T").await.unwrap();
}

#[tokio::test]
async fn test_respond_reject_and_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/invitation/respond"))
        .and(query_param("accepted", "false"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = api_for(&server).respond("R9", false, "T").await.unwrap_err();
    match err {
        ApiError::Server { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_sign_in_returns_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/account/login"))
        .and(body_json(json!({"Username": "a@b.c", "Password": "pw"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "issued"}})),
        )
        .mount(&server)
        .await;

    let token = sign_in(&reqwest::Client::new(), &server.uri(), "a@b.c", "pw")
        .await
        .unwrap();
    assert_eq!(token, "issued");
}

#[tokio::test]
async fn test_sign_in_rejected_uses_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/account/login"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "Sai mật khẩu"})),
        )
        .mount(&server)
        .await;

    let err = sign_in(&reqwest::Client::new(), &server.uri(), "a@b.c", "bad")
        .await
        .unwrap_err();
    assert!(matches!(err, SignInError::Rejected(ref m) if m == "Sai mật khẩu"));
}

#[tokio::test]
async fn test_sign_in_success_without_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/account/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "check your email"})),
        )
        .mount(&server)
        .await;

    let err = sign_in(&reqwest::Client::new(), &server.uri(), "a@b.c", "pw")
        .await
        .unwrap_err();
    assert!(matches!(err, SignInError::MissingToken(ref m) if m == "check your email"));
}

#[tokio::test]
async fn test_load_keeps_record_with_mistyped_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": 1, "title": "A", "createdAt": 1717230600, "isRead": false},
                {"id": 2, "title": "B", "isActionable": "true", "isRead": false}
            ]
        })))
        .mount(&server)
        .await;

    let list = api_for(&server).load("T").await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].title, "A");
    assert!(list[0].created_at.is_some());
    assert!(!list[1].is_actionable);

    let mut feed = NotificationFeed::new();
    feed.replace_all(list);
    assert_eq!(feed.counter(), 2);
}
