//! End-to-end tests over real WebSocket connections.
//!
//! Each test starts its own server on an ephemeral port. Client addresses are
//! simulated with `X-Forwarded-For`, which the test config trusts.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle_server::config::ServerConfig;
use huddle_server::message::Message;
use huddle_server::protocol::{BanEntry, ClientEvent, ServerEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &str = "s3cret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> SocketAddr {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        admin_secret: Some(SECRET.to_string()),
        text_cooldown_ms: 60_000,
        trust_forwarded_for: true,
        ..Default::default()
    };
    let (addr, _handle) = huddle_server::server::Server::new(config).start().await.unwrap();
    addr
}

/// Open a socket that the server sees as coming from `ip`.
async fn connect(addr: SocketAddr, ip: &str) -> Client {
    let mut request = format!("ws://{addr}/socket").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-forwarded-for", HeaderValue::from_str(ip).unwrap());
    let (ws, _) = timeout(TIMEOUT, tokio_tungstenite::connect_async(request))
        .await
        .expect("connect timed out")
        .expect("websocket handshake failed");
    ws
}

async fn send(ws: &mut Client, event: &ClientEvent) {
    let json = serde_json::to_string(event).unwrap();
    ws.send(WsMessage::Text(json.into())).await.unwrap();
}

async fn join(ws: &mut Client, name: &str) {
    send(
        ws,
        &ClientEvent::Join {
            name: name.to_string(),
            avatar: String::new(),
        },
    )
    .await;
}

/// Next server event, or `None` once the server has closed the socket.
async fn next_event(ws: &mut Client) -> Option<ServerEvent> {
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// Wait for a matching event, skipping others.
async fn wait_for(ws: &mut Client, predicate: impl Fn(&ServerEvent) -> bool, desc: &str) -> ServerEvent {
    let result = timeout(TIMEOUT, async {
        loop {
            match next_event(ws).await {
                Some(event) if predicate(&event) => return event,
                Some(_) => continue,
                None => panic!("Connection closed while waiting for: {desc}"),
            }
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("Timeout ({TIMEOUT:?}) waiting for: {desc}"))
}

/// Wait until the server closes the socket.
async fn wait_closed(ws: &mut Client, desc: &str) {
    let result = timeout(TIMEOUT, async { while next_event(ws).await.is_some() {} }).await;
    result.unwrap_or_else(|_| panic!("Timeout ({TIMEOUT:?}) waiting for close: {desc}"))
}

fn is_system(event: &ServerEvent, text: &str) -> bool {
    matches!(event, ServerEvent::Message { message: Message::System { text: t } } if t == text)
}

fn is_ack(event: &ServerEvent, id: u64) -> bool {
    matches!(event, ServerEvent::Ack { id: got, .. } if *got == id)
}

// ── Chat flow ──────────────────────────────────────────────────────────

#[tokio::test]
async fn late_joiner_receives_history() {
    let addr = start_server().await;

    let mut alice = connect(addr, "10.0.0.1").await;
    join(&mut alice, "alice").await;
    wait_for(&mut alice, |e| is_system(e, "alice joined the chat!"), "alice join notice").await;

    send(
        &mut alice,
        &ClientEvent::ChatMessage {
            text: "hi".into(),
            ack: Some(1),
        },
    )
    .await;
    let ack = wait_for(&mut alice, |e| is_ack(e, 1), "ack 1").await;
    assert_eq!(ack, ServerEvent::Ack { id: 1, success: true });

    let mut bob = connect(addr, "10.0.0.2").await;
    wait_for(&mut bob, |e| matches!(e, ServerEvent::Online { count: 2 }), "online 2").await;
    join(&mut bob, "bob").await;
    let history = wait_for(&mut bob, |e| matches!(e, ServerEvent::History { .. }), "history").await;
    assert_eq!(
        history,
        ServerEvent::History {
            messages: vec![Message::Text {
                author: "alice".into(),
                avatar: String::new(),
                text: "hi".into(),
            }],
        }
    );

    wait_for(&mut alice, |e| is_system(e, "bob joined the chat!"), "bob join notice").await;
}

#[tokio::test]
async fn cooldown_denies_second_message() {
    let addr = start_server().await;
    let mut alice = connect(addr, "10.0.0.1").await;
    join(&mut alice, "alice").await;

    for (ack, text) in [(1, "first"), (2, "second")] {
        send(
            &mut alice,
            &ClientEvent::ChatMessage {
                text: text.into(),
                ack: Some(ack),
            },
        )
        .await;
    }

    let first = wait_for(&mut alice, |e| is_ack(e, 1), "ack 1").await;
    let second = wait_for(&mut alice, |e| is_ack(e, 2), "ack 2").await;
    assert_eq!(first, ServerEvent::Ack { id: 1, success: true });
    assert_eq!(second, ServerEvent::Ack { id: 2, success: false });
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let addr = start_server().await;
    let mut alice = connect(addr, "10.0.0.1").await;
    join(&mut alice, "alice").await;

    alice.send(WsMessage::Text("not json".into())).await.unwrap();
    alice
        .send(WsMessage::Text(r#"{"type":"no_such_event"}"#.into()))
        .await
        .unwrap();
    alice.send(WsMessage::Binary(vec![1u8, 2, 3].into())).await.unwrap();

    send(
        &mut alice,
        &ClientEvent::ChatMessage {
            text: "still here".into(),
            ack: Some(7),
        },
    )
    .await;
    let ack = wait_for(&mut alice, |e| is_ack(e, 7), "ack 7").await;
    assert_eq!(ack, ServerEvent::Ack { id: 7, success: true });
}

// ── Moderation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn admin_ban_closes_victim_and_blocks_address() {
    let addr = start_server().await;

    let mut admin = connect(addr, "10.0.0.1").await;
    join(&mut admin, "moderator").await;
    send(
        &mut admin,
        &ClientEvent::AdminVerify {
            credential: SECRET.into(),
            ack: Some(1),
        },
    )
    .await;
    let ack = wait_for(&mut admin, |e| is_ack(e, 1), "verify ack").await;
    assert_eq!(ack, ServerEvent::Ack { id: 1, success: true });

    let mut victim = connect(addr, "1.2.3.4").await;
    join(&mut victim, "mallory").await;
    wait_for(&mut admin, |e| is_system(e, "mallory joined the chat!"), "victim join").await;

    send(&mut admin, &ClientEvent::AdminBanUser { name: "Mallory".into() }).await;

    let banned = wait_for(&mut victim, |e| matches!(e, ServerEvent::Banned { .. }), "victim banned").await;
    assert_eq!(
        banned,
        ServerEvent::Banned {
            reason: "You have been banned.".into()
        }
    );
    wait_closed(&mut victim, "victim socket").await;

    let update = wait_for(&mut admin, |e| matches!(e, ServerEvent::BanListUpdate { entries } if !entries.is_empty()), "ban list").await;
    assert_eq!(
        update,
        ServerEvent::BanListUpdate {
            entries: vec![BanEntry {
                name: "mallory".into(),
                address: Some("1.2.3.4".parse().unwrap()),
            }],
        }
    );

    // Same address, any name: rejected before join.
    let mut again = connect(addr, "1.2.3.4").await;
    let event = wait_for(&mut again, |e| matches!(e, ServerEvent::Banned { .. }), "address ban").await;
    assert_eq!(
        event,
        ServerEvent::Banned {
            reason: "Your IP is banned.".into()
        }
    );
    wait_closed(&mut again, "banned address socket").await;

    // The name is banned from other addresses too.
    let mut elsewhere = connect(addr, "5.6.7.8").await;
    join(&mut elsewhere, "MALLORY").await;
    let event = wait_for(&mut elsewhere, |e| matches!(e, ServerEvent::Banned { .. }), "name ban").await;
    assert_eq!(
        event,
        ServerEvent::Banned {
            reason: "This username is banned.".into()
        }
    );
    wait_closed(&mut elsewhere, "banned name socket").await;
}

#[tokio::test]
async fn non_admin_commands_have_no_effect() {
    let addr = start_server().await;
    let mut alice = connect(addr, "10.0.0.1").await;
    join(&mut alice, "alice").await;

    send(&mut alice, &ClientEvent::AdminClearChat).await;
    send(&mut alice, &ClientEvent::AdminBanUser { name: "alice".into() }).await;
    send(
        &mut alice,
        &ClientEvent::AdminVerify {
            credential: "wrong".into(),
            ack: Some(3),
        },
    )
    .await;

    // Everything before the ack was silently dropped.
    let result = timeout(TIMEOUT, async {
        loop {
            match next_event(&mut alice).await {
                Some(ServerEvent::Ack { id: 3, success }) => return success,
                Some(ServerEvent::ClearChat) | Some(ServerEvent::Banned { .. }) | Some(ServerEvent::BanListUpdate { .. }) => {
                    panic!("admin command took effect for a non-admin")
                }
                Some(_) => continue,
                None => panic!("connection closed"),
            }
        }
    })
    .await
    .expect("timeout waiting for ack 3");
    assert!(!result);
}

// ── HTTP ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_counters() {
    let addr = start_server().await;
    let mut alice = connect(addr, "10.0.0.1").await;
    join(&mut alice, "alice").await;
    send(
        &mut alice,
        &ClientEvent::ChatMessage {
            text: "hi".into(),
            ack: Some(1),
        },
    )
    .await;
    wait_for(&mut alice, |e| is_ack(e, 1), "ack 1").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/v1/health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    timeout(TIMEOUT, stream.read_to_string(&mut response))
        .await
        .expect("health timed out")
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let health: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["online"], 1);
    assert_eq!(health["history"], 1);
    assert_eq!(health["banned"], 0);
}
