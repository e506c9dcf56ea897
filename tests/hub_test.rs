//! Hub transport against an in-process WebSocket server and a mock
//! negotiate endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hubnotify::hub::negotiate::negotiate;
use hubnotify::hub::{HubConnection, HubOptions, PushTransport, TransportEvent};
use hubnotify::HandshakeError;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

type ServerWs = WebSocketStream<TcpStream>;

/// One accepted socket plus what the client presented.
struct Accepted {
    ws: ServerWs,
    uri: String,
    authorization: Option<String>,
}

/// Start a hub that hands every accepted socket to the test.
async fn hub_server() -> (String, mpsc::UnboundedReceiver<Accepted>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = Arc::new(Mutex::new((String::new(), None::<String>)));
            let record = Arc::clone(&seen);
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let mut slot = record.lock().unwrap();
                slot.0 = req.uri().to_string();
                slot.1 = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            };
            let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                continue;
            };
            let (uri, authorization) = seen.lock().unwrap().clone();
            if tx
                .send(Accepted {
                    ws,
                    uri,
                    authorization,
                })
                .is_err()
            {
                break;
            }
        }
    });

    (format!("http://{addr}/hubs/notification"), rx)
}

async fn next_text(ws: &mut ServerWs) -> Option<String> {
    while let Some(msg) = ws.next().await {
        match msg.ok()? {
            Message::Text(text) => return Some(text.to_string()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn accept_handshake(ws: &mut ServerWs) {
    let request = next_text(ws).await.expect("handshake request");
    assert!(request.ends_with('\u{1e}'));
    let body: Value = serde_json::from_str(request.trim_end_matches('\u{1e}')).unwrap();
    assert_eq!(body, json!({"protocol": "json", "version": 1}));
    ws.send(Message::Text("{}\u{1e}".into())).await.unwrap();
}

async fn send_record(ws: &mut ServerWs, record: Value) {
    ws.send(Message::Text(format!("{record}\u{1e}"))).await.unwrap();
}

fn push(payload: Value) -> Value {
    json!({"type": 1, "target": "ReceiveNotification", "arguments": [payload]})
}

fn direct_options() -> HubOptions {
    HubOptions {
        skip_negotiation: true,
        keep_alive_interval: Duration::from_secs(60),
        server_timeout: Duration::from_secs(60),
        handshake_timeout: Duration::from_secs(2),
        reconnect_delays: vec![Duration::ZERO],
    }
}

fn connection(
    hub_url: &str,
    options: HubOptions,
) -> (HubConnection, mpsc::Receiver<TransportEvent>) {
    let (tx, rx) = mpsc::channel(16);
    let conn = HubConnection::new(
        reqwest::Client::new(),
        hub_url,
        Arc::new(|| Some("tok".to_string())),
        tx,
        options,
    );
    (conn, rx)
}

async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_delivers_pushed_notifications() {
    let (hub_url, mut accepted) = hub_server().await;
    let (mut conn, mut events) = connection(&hub_url, direct_options());

    let server = tokio::spawn(async move {
        let mut socket = accepted.recv().await.unwrap();
        accept_handshake(&mut socket.ws).await;
        send_record(&mut socket.ws, json!({"type": 6})).await;
        send_record(&mut socket.ws, push(json!({"title": "Hi", "relatedId": "R1"}))).await;
        send_record(&mut socket.ws, push(json!("plain"))).await;
        socket
    });

    timeout(WAIT, conn.start()).await.unwrap().unwrap();
    assert!(conn.is_running());

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Message(json!({"title": "Hi", "relatedId": "R1"}))
    );
    assert_eq!(next_event(&mut events).await, TransportEvent::Message(json!("plain")));

    let socket = server.await.unwrap();
    assert!(socket.uri.contains("access_token=tok"), "uri was {}", socket.uri);
    assert_eq!(socket.authorization.as_deref(), Some("Bearer tok"));

    conn.stop().await;
    assert!(!conn.is_running());
}

#[tokio::test]
async fn test_records_sharing_the_handshake_frame_are_delivered() {
    let (hub_url, mut accepted) = hub_server().await;
    let (mut conn, mut events) = connection(&hub_url, direct_options());

    let server = tokio::spawn(async move {
        let mut socket = accepted.recv().await.unwrap();
        next_text(&mut socket.ws).await.unwrap();
        let frame = format!("{{}}\u{1e}{}\u{1e}", push(json!({"message": "early"})));
        socket.ws.send(Message::Text(frame)).await.unwrap();
        socket
    });

    timeout(WAIT, conn.start()).await.unwrap().unwrap();
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Message(json!({"message": "early"}))
    );
    let _socket = server.await.unwrap();
    conn.stop().await;
}

#[tokio::test]
async fn test_refused_handshake_fails_start() {
    let (hub_url, mut accepted) = hub_server().await;
    let (mut conn, _events) = connection(&hub_url, direct_options());

    let server = tokio::spawn(async move {
        let mut socket = accepted.recv().await.unwrap();
        next_text(&mut socket.ws).await.unwrap();
        send_record(&mut socket.ws, json!({"error": "protocol not supported"})).await;
        socket
    });

    let err = timeout(WAIT, conn.start()).await.unwrap().unwrap_err();
    assert!(
        matches!(err, HandshakeError::Rejected(ref reason) if reason == "protocol not supported"),
        "got {err:?}"
    );
    assert!(!conn.is_running());
    let _socket = server.await.unwrap();
}

#[tokio::test]
async fn test_invocation_with_id_gets_completion() {
    let (hub_url, mut accepted) = hub_server().await;
    let (mut conn, mut events) = connection(&hub_url, direct_options());

    let server = tokio::spawn(async move {
        let mut socket = accepted.recv().await.unwrap();
        accept_handshake(&mut socket.ws).await;
        send_record(
            &mut socket.ws,
            json!({"type": 1, "invocationId": "7", "target": "receivenotification", "arguments": ["x"]}),
        )
        .await;
        let reply = next_text(&mut socket.ws).await.unwrap();
        let body: Value = serde_json::from_str(reply.trim_end_matches('\u{1e}')).unwrap();
        (socket, body)
    });

    timeout(WAIT, conn.start()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut events).await, TransportEvent::Message(json!("x")));

    let (_socket, completion) = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(completion, json!({"type": 3, "invocationId": "7"}));
    conn.stop().await;
}

#[tokio::test]
async fn test_server_close_without_reconnect_is_permanent() {
    let (hub_url, mut accepted) = hub_server().await;
    let (mut conn, mut events) = connection(&hub_url, direct_options());

    let server = tokio::spawn(async move {
        let mut socket = accepted.recv().await.unwrap();
        accept_handshake(&mut socket.ws).await;
        send_record(&mut socket.ws, json!({"type": 7, "error": "Server is shutting down"})).await;
        socket
    });

    timeout(WAIT, conn.start()).await.unwrap().unwrap();
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Closed("Server is shutting down".into())
    );
    let _socket = server.await.unwrap();
    conn.stop().await;
}

#[tokio::test]
async fn test_reconnects_with_fresh_token() {
    let (hub_url, mut accepted) = hub_server().await;
    let (tx, mut events) = mpsc::channel(16);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut conn = HubConnection::new(
        reqwest::Client::new(),
        &hub_url,
        Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Some(format!("tok{n}"))
        }),
        tx,
        direct_options(),
    );

    let server = tokio::spawn(async move {
        let mut first = accepted.recv().await.unwrap();
        accept_handshake(&mut first.ws).await;
        first.ws.close(None).await.unwrap();

        let mut second = accepted.recv().await.unwrap();
        accept_handshake(&mut second.ws).await;
        send_record(&mut second.ws, push(json!({"title": "after"}))).await;
        (first, second)
    });

    timeout(WAIT, conn.start()).await.unwrap().unwrap();

    assert!(matches!(next_event(&mut events).await, TransportEvent::Reconnecting(_)));
    assert_eq!(next_event(&mut events).await, TransportEvent::Reconnected);
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Message(json!({"title": "after"}))
    );

    let (first, second) = server.await.unwrap();
    assert!(first.uri.contains("access_token=tok1"));
    assert!(second.uri.contains("access_token=tok2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    conn.stop().await;
}

#[tokio::test]
async fn test_gives_up_after_reconnect_schedule() {
    let (hub_url, mut accepted) = hub_server().await;
    let options = HubOptions {
        reconnect_delays: vec![Duration::ZERO, Duration::from_millis(20)],
        handshake_timeout: Duration::from_millis(300),
        ..direct_options()
    };
    let (mut conn, mut events) = connection(&hub_url, options);

    tokio::spawn(async move {
        let mut first = accepted.recv().await.unwrap();
        accept_handshake(&mut first.ws).await;
        drop(first);
        // Every later socket is dropped before the handshake reply.
        while let Some(socket) = accepted.recv().await {
            drop(socket);
        }
    });

    timeout(WAIT, conn.start()).await.unwrap().unwrap();
    assert!(matches!(next_event(&mut events).await, TransportEvent::Reconnecting(_)));
    match next_event(&mut events).await {
        TransportEvent::Closed(reason) => {
            assert!(reason.starts_with("reconnect failed after 2 attempts"), "{reason}");
        }
        other => panic!("unexpected {other:?}"),
    }
    conn.stop().await;
}

#[tokio::test]
async fn test_silent_hub_times_out() {
    let (hub_url, mut accepted) = hub_server().await;
    let options = HubOptions {
        server_timeout: Duration::from_millis(200),
        reconnect_delays: Vec::new(),
        ..direct_options()
    };
    let (mut conn, mut events) = connection(&hub_url, options);

    let server = tokio::spawn(async move {
        let mut socket = accepted.recv().await.unwrap();
        accept_handshake(&mut socket.ws).await;
        socket
    });

    timeout(WAIT, conn.start()).await.unwrap().unwrap();
    let _socket = server.await.unwrap();

    match next_event(&mut events).await {
        TransportEvent::Reconnecting(reason) => {
            assert!(reason.contains("no message from the hub"), "{reason}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(next_event(&mut events).await, TransportEvent::Closed(_)));
    conn.stop().await;
}

#[tokio::test]
async fn test_keep_alive_pings_and_stop_closes() {
    let (hub_url, mut accepted) = hub_server().await;
    let options = HubOptions {
        keep_alive_interval: Duration::from_millis(50),
        ..direct_options()
    };
    let (mut conn, _events) = connection(&hub_url, options);

    let server = tokio::spawn(async move {
        let mut socket = accepted.recv().await.unwrap();
        accept_handshake(&mut socket.ws).await;
        let ping = next_text(&mut socket.ws).await.unwrap();
        (socket, ping)
    });

    timeout(WAIT, conn.start()).await.unwrap().unwrap();
    let (mut socket, ping) = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(ping, "{\"type\":6}\u{1e}");

    conn.stop().await;
    let mut saw_close_record = false;
    while let Some(text) = timeout(WAIT, next_text(&mut socket.ws)).await.unwrap() {
        if text == "{\"type\":7}\u{1e}" {
            saw_close_record = true;
        }
    }
    assert!(saw_close_record);
}

#[tokio::test]
async fn test_negotiate_returns_connection_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hubs/notification/negotiate"))
        .and(query_param("negotiateVersion", "1"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "negotiateVersion": 1,
            "connectionId": "cid",
            "connectionToken": "ctok",
            "availableTransports": [
                {"transport": "WebSockets", "transferFormats": ["Text", "Binary"]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let hub_url = format!("{}/hubs/notification", server.uri());
    let endpoint = negotiate(&reqwest::Client::new(), &hub_url, "tok").await.unwrap();
    assert_eq!(endpoint.hub_url, hub_url);
    assert_eq!(endpoint.connection_key.as_deref(), Some("ctok"));
    assert_eq!(endpoint.token, "tok");
}

#[tokio::test]
async fn test_negotiate_follows_one_redirect() {
    let server = MockServer::start().await;
    let target = format!("{}/service/client", server.uri());
    Mock::given(method("POST"))
        .and(path("/hubs/notification/negotiate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"url": target, "accessToken": "service-token"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/service/client/negotiate"))
        .and(header("authorization", "Bearer service-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "negotiateVersion": 1,
            "connectionToken": "svc"
        })))
        .mount(&server)
        .await;

    let hub_url = format!("{}/hubs/notification", server.uri());
    let endpoint = negotiate(&reqwest::Client::new(), &hub_url, "tok").await.unwrap();
    assert_eq!(endpoint.hub_url, target);
    assert_eq!(endpoint.token, "service-token");
    assert_eq!(endpoint.connection_key.as_deref(), Some("svc"));
}

#[tokio::test]
async fn test_negotiate_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/denied/negotiate"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/refused/negotiate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "hub offline"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sse/negotiate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "connectionId": "x",
            "availableTransports": [{"transport": "ServerSentEvents", "transferFormats": ["Text"]}]
        })))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    for (hub, expected) in [
        ("denied", "401"),
        ("refused", "hub offline"),
        ("sse", "WebSockets"),
    ] {
        let err = negotiate(&client, &format!("{}/{hub}", server.uri()), "tok")
            .await
            .unwrap_err();
        match err {
            HandshakeError::Negotiate(reason) => {
                assert!(reason.contains(expected), "{hub}: {reason}");
            }
            other => panic!("{hub}: unexpected {other:?}"),
        }
    }
}
