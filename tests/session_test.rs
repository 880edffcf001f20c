//! Integration tests for the connection session: the authenticated
//! greeting, close codes for expired/invalid tokens, ping/pong, malformed
//! envelopes, and cleanup on disconnect.

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

const SERVICE_TOKEN: &str = "test-service-token";

/// Helper: start the server on a random port and return
/// (base_url, addr, session_secret).
async fn start_test_server() -> (String, SocketAddr, Vec<u8>) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = bazaar_chat::db::init_db(&data_dir).expect("Failed to init DB");
    let session_secret = bazaar_chat::auth::token::load_or_generate_session_secret(&data_dir)
        .expect("Failed to generate session secret");

    let state = bazaar_chat::state::AppState {
        db,
        sessions: bazaar_chat::session::SessionRegistry::new(),
        session_secret: session_secret.clone(),
        service_token: SERVICE_TOKEN.to_string(),
    };

    let app = bazaar_chat::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), addr, session_secret)
}

fn session_token(secret: &[u8], user_id: &str, display_name: &str) -> String {
    bazaar_chat::auth::token::issue_session_token(secret, user_id, display_name, "")
        .expect("Failed to issue session token")
}

/// A token signed with the right secret whose expiry is in the past
/// (beyond the validator's leeway).
fn expired_token(secret: &[u8], user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = bazaar_chat::auth::middleware::Claims {
        sub: user_id.to_string(),
        name: "Expired User".to_string(),
        email: String::new(),
        iat: now - 600,
        exp: now - 300,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .expect("Failed to encode expired token")
}

async fn next_event(read: &mut WsRead) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for server event")
            .expect("Socket closed while waiting for server event")
            .expect("Socket error while waiting for server event");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text frame, got: {:?}", other),
        }
    }
}

/// Expect a close frame with the given application code.
async fn expect_close(read: &mut WsRead, expected_code: u16) {
    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close within timeout");
    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(
                frame.code,
                CloseCode::from(expected_code),
                "Wrong close code"
            );
        }
        Some(Ok(Message::Close(None))) | None => {
            // Closed without a frame — acceptable
        }
        other => {
            if let Some(Ok(msg)) = other {
                assert!(msg.is_close(), "Expected close message, got: {:?}", msg);
            }
        }
    }
}

#[tokio::test]
async fn test_connect_greeting_then_idle() {
    let (_base_url, addr, secret) = start_test_server().await;
    let token = session_token(&secret, "alice", "Alice");

    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    let (mut _write, mut read) = ws_stream.split();

    // Greeting: who you are, then what you have.
    let hello = next_event(&mut read).await;
    assert_eq!(hello["type"], "authenticated");
    assert_eq!(hello["user_id"], "alice");
    assert!(
        !hello["session_id"].as_str().unwrap().is_empty(),
        "Each tab gets its own session id"
    );

    let list = next_event(&mut read).await;
    assert_eq!(list["type"], "conversations.list");
    assert_eq!(list["conversations"], json!([]));

    // Then nothing until the client does something.
    let result = tokio::time::timeout(Duration::from_millis(300), read.next()).await;
    assert!(result.is_err(), "Expected idle connection, got a message");
}

#[tokio::test]
async fn test_two_tabs_get_distinct_session_ids() {
    let (_base_url, addr, secret) = start_test_server().await;
    let token = session_token(&secret, "alice", "Alice");

    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (stream1, _) = tokio_tungstenite::connect_async(&ws_url).await.unwrap();
    let (stream2, _) = tokio_tungstenite::connect_async(&ws_url).await.unwrap();
    let (_w1, mut r1) = stream1.split();
    let (_w2, mut r2) = stream2.split();

    let hello1 = next_event(&mut r1).await;
    let hello2 = next_event(&mut r2).await;
    assert_eq!(hello1["type"], "authenticated");
    assert_eq!(hello2["type"], "authenticated");
    assert_ne!(hello1["session_id"], hello2["session_id"]);
}

#[tokio::test]
async fn test_invalid_token_closes_with_4002() {
    let (_base_url, addr, _secret) = start_test_server().await;

    let ws_url = format!("ws://{}/ws?token=not-a-real-token", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Upgrade should succeed even with a bad token");
    let (mut _write, mut read) = ws_stream.split();

    // An in-band error first, so the client can tell auth failure apart
    // from a network drop, then the close frame.
    let err = next_event(&mut read).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], 401);

    expect_close(&mut read, 4002).await;
}

#[tokio::test]
async fn test_expired_token_closes_with_4001() {
    let (_base_url, addr, secret) = start_test_server().await;

    let ws_url = format!("ws://{}/ws?token={}", addr, expired_token(&secret, "alice"));
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Upgrade should succeed even with an expired token");
    let (mut _write, mut read) = ws_stream.split();

    let err = next_event(&mut read).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], 401);

    expect_close(&mut read, 4001).await;
}

#[tokio::test]
async fn test_token_signed_with_wrong_secret_rejected() {
    let (_base_url, addr, _secret) = start_test_server().await;

    // Correct claim shape, wrong signing key.
    let forged = session_token(&[7u8; 32], "alice", "Alice");
    let ws_url = format!("ws://{}/ws?token={}", addr, forged);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Upgrade should succeed even with a forged token");
    let (mut _write, mut read) = ws_stream.split();

    let err = next_event(&mut read).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], 401);

    expect_close(&mut read, 4002).await;
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let (_base_url, addr, secret) = start_test_server().await;
    let token = session_token(&secret, "alice", "Alice");

    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect");
    let (mut write, mut read) = ws_stream.split();

    // Consume the greeting first.
    next_event(&mut read).await;
    next_event(&mut read).await;

    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected pong within timeout");
    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_envelope_gets_in_band_error() {
    let (_base_url, addr, secret) = start_test_server().await;
    let token = session_token(&secret, "alice", "Alice");

    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect");
    let (mut write, mut read) = ws_stream.split();
    next_event(&mut read).await;
    next_event(&mut read).await;

    write
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    let err = next_event(&mut read).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], 400);
    assert_eq!(err["request_id"], "");

    // Unknown event type is rejected the same way, and the session
    // survives both.
    write
        .send(Message::Text(
            json!({"request_id": "r1", "type": "message.unsend"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let err = next_event(&mut read).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], 400);

    write
        .send(Message::Ping(vec![1].into()))
        .await
        .unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Session should still be alive");
    assert!(matches!(msg, Some(Ok(Message::Pong(_)))));
}

#[tokio::test]
async fn test_disconnect_cleans_up_and_allows_reconnect() {
    let (_base_url, addr, secret) = start_test_server().await;
    let token = session_token(&secret, "alice", "Alice");
    let ws_url = format!("ws://{}/ws?token={}", addr, token);

    {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .expect("Failed to connect");
        let (mut write, mut read) = ws_stream.split();
        next_event(&mut read).await;
        next_event(&mut read).await;

        write
            .send(Message::Close(None))
            .await
            .expect("Failed to send close");
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Reconnect works and gets a fresh greeting.
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to reconnect after cleanup");
    let (mut _write, mut read) = ws_stream.split();
    let hello = next_event(&mut read).await;
    assert_eq!(hello["type"], "authenticated");
    assert_eq!(hello["user_id"], "alice");
}
