//! WebSocket transport against a local tokio-tungstenite server
//!
//! Each test binds a listener on an ephemeral port, scripts one server-side
//! connection and drives a real `StreamClient` through it.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use streamer_core::transport::WebSocketConnector;
use streamer_core::{ClientConfigFile, MessageRole, SessionStatus, StreamClient, TransportConfig};

// =============================================================================
// Helpers
// =============================================================================

async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept_one(listener: TcpListener) -> WebSocketStream<TcpStream> {
    let (tcp, _) = listener.accept().await.unwrap();
    accept_async(tcp).await.unwrap()
}

/// Read the request frame and return its prompt
async fn read_prompt(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(&text).unwrap();
                return value["prompt"].as_str().unwrap().to_string();
            }
            Some(Ok(_)) => continue,
            other => panic!("expected a request frame, got {other:?}"),
        }
    }
}

/// Wait for the client's close frame and return its code
async fn read_close_code(ws: &mut WebSocketStream<TcpStream>) -> Option<u16> {
    while let Some(message) = ws.next().await {
        if let Ok(Message::Close(frame)) = message {
            return frame.map(|f| u16::from(f.code));
        }
    }
    None
}

async fn send_event(ws: &mut WebSocketStream<TcpStream>, event: Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

fn client_for(port: u16) -> StreamClient {
    let config = ClientConfigFile::default()
        .with_transport(TransportConfig {
            connect_timeout_ms: 2000,
            ..TransportConfig::websocket("127.0.0.1", port)
        })
        .with_provisional_ms(60_000);
    StreamClient::new(Box::new(WebSocketConnector::new()), &config)
}

async fn run(client: &mut StreamClient) {
    tokio::time::timeout(Duration::from_secs(5), client.run_until_idle())
        .await
        .expect("request did not finish");
}

fn contents(client: &StreamClient) -> Vec<(MessageRole, String)> {
    client
        .snapshot()
        .messages
        .into_iter()
        .map(|m| (m.role, m.content))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_websocket_streamed_reply() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_one(listener).await;
        let prompt = read_prompt(&mut ws).await;

        send_event(&mut ws, json!({"event": "log", "data": "Supervisor starting"})).await;
        send_event(&mut ws, json!({"event": "token", "data": " Hi"})).await;
        send_event(&mut ws, json!({"event": "token", "data": " there"})).await;
        send_event(&mut ws, json!({"event": "done"})).await;
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }))
        .await
        .ok();
        prompt
    });

    let mut client = client_for(port);
    client.submit("hello").unwrap();
    run(&mut client).await;

    assert_eq!(server.await.unwrap(), "hello");
    assert_eq!(client.status(), SessionStatus::Idle);
    assert_eq!(
        contents(&client),
        vec![
            (MessageRole::User, "hello".to_string()),
            (MessageRole::Assistant, "Hi there".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_websocket_abnormal_close_code() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_one(listener).await;
        read_prompt(&mut ws).await;
        send_event(&mut ws, json!({"event": "token", "data": "partial"})).await;
        ws.close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "internal error".into(),
        }))
        .await
        .ok();
    });

    let mut client = client_for(port);
    client.submit("x").unwrap();
    run(&mut client).await;
    server.await.unwrap();

    assert_eq!(
        contents(&client),
        vec![
            (MessageRole::User, "x".to_string()),
            (MessageRole::Assistant, "partial".to_string()),
            (
                MessageRole::Assistant,
                "Connection closed unexpectedly (code 1011): internal error".to_string()
            ),
        ]
    );
}

#[tokio::test]
async fn test_websocket_server_error_closes_normally() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_one(listener).await;
        read_prompt(&mut ws).await;
        send_event(&mut ws, json!({"event": "error", "data": "overloaded"})).await;
        read_close_code(&mut ws).await
    });

    let mut client = client_for(port);
    client.submit("x").unwrap();
    run(&mut client).await;

    assert_eq!(
        contents(&client).last().cloned(),
        Some((MessageRole::Assistant, "overloaded".to_string()))
    );
    let code = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, Some(1000));
}

#[tokio::test]
async fn test_websocket_cancel() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_one(listener).await;
        read_prompt(&mut ws).await;
        send_event(&mut ws, json!({"event": "token", "data": "thinking"})).await;
        read_close_code(&mut ws).await
    });

    let mut client = client_for(port);
    client.submit("x").unwrap();
    while client.snapshot().messages.len() < 2 {
        tokio::time::timeout(Duration::from_secs(5), client.next_event())
            .await
            .unwrap();
    }

    assert!(client.cancel());
    run(&mut client).await;

    assert_eq!(client.status(), SessionStatus::Idle);
    assert_eq!(
        contents(&client),
        vec![
            (MessageRole::User, "x".to_string()),
            (MessageRole::Assistant, "thinking".to_string()),
        ]
    );
    assert_eq!(server.await.unwrap(), Some(1000));
}

#[tokio::test]
async fn test_websocket_connection_refused() {
    let (listener, port) = listen().await;
    drop(listener);

    let mut client = client_for(port);
    client.submit("x").unwrap();
    run(&mut client).await;

    let last = client.snapshot().last().cloned().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert!(
        last.content.starts_with("Connection error: could not connect"),
        "{}",
        last.content
    );
}
