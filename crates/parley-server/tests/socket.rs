use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use parley_server::config::Config;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    http: reqwest::Client,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            host: "127.0.0.1".into(),
            port: 0,
            db_path: dir.path().join("parley.db"),
            jwt_secret: "socket-test-secret".into(),
            token_ttl_hours: 1,
            upload_dir: dir.path().join("uploads"),
            max_upload_bytes: 1024,
        };
        let app = parley_server::app(&config).await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            http: reqwest::Client::new(),
            _dir: dir,
        }
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> Value {
        let mut request = self
            .http
            .post(format!("http://{}{}", self.addr, path))
            .json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.unwrap();
        assert!(response.status().is_success(), "{} -> {}", path, response.status());
        response.json().await.unwrap()
    }

    async fn register(&self, username: &str) -> String {
        let body = self
            .post(
                "/auth/register",
                None,
                json!({
                    "username": username,
                    "email": format!("{}@example.com", username),
                    "password": "hunter2hunter2",
                }),
            )
            .await;
        body["token"].as_str().unwrap().to_string()
    }

    async fn private_conversation(&self, token: &str, with: &str) -> String {
        let body = self
            .post("/conversations", Some(token), json!({ "participantUsername": with }))
            .await;
        body["id"].as_str().unwrap().to_string()
    }

    async fn connect(&self) -> Socket {
        let (socket, _) = connect_async(format!("ws://{}/gateway", self.addr))
            .await
            .unwrap();
        socket
    }

    /// Connect, identify and wait for `ready`.
    async fn identified(&self, token: &str) -> Socket {
        let mut socket = self.connect().await;
        send(&mut socket, json!({ "type": "identify", "data": { "token": token } })).await;
        let ready = next_event(&mut socket).await;
        assert_eq!(ready["type"], "ready");
        socket
    }
}

async fn send(socket: &mut Socket, command: Value) {
    socket.send(Message::text(command.to_string())).await.unwrap();
}

async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a gateway event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn join(socket: &mut Socket, conversation_id: &str) -> Value {
    send(
        socket,
        json!({ "type": "join-room", "data": { "conversationId": conversation_id } }),
    )
    .await;
    next_event(socket).await
}

#[tokio::test]
async fn both_members_of_a_room_receive_new_messages() {
    let server = TestServer::start().await;
    let alice = server.register("alice").await;
    let bob = server.register("bob").await;
    let conversation_id = server.private_conversation(&alice, "bob").await;

    let mut alice_socket = server.identified(&alice).await;
    let mut bob_socket = server.identified(&bob).await;

    for socket in [&mut alice_socket, &mut bob_socket] {
        let joined = join(socket, &conversation_id).await;
        assert_eq!(joined["type"], "room-joined");
        assert_eq!(joined["data"]["conversationId"], conversation_id.as_str());
    }

    send(
        &mut alice_socket,
        json!({
            "type": "send-message",
            "data": { "roomId": conversation_id, "content": "hi" },
        }),
    )
    .await;

    let to_alice = next_event(&mut alice_socket).await;
    let to_bob = next_event(&mut bob_socket).await;
    for event in [&to_alice, &to_bob] {
        assert_eq!(event["type"], "new-message");
        assert_eq!(event["data"]["conversationId"], conversation_id.as_str());
        assert_eq!(event["data"]["message"]["content"], "hi");
        assert_eq!(event["data"]["message"]["sender"]["username"], "alice");
    }
    assert_eq!(
        to_alice["data"]["message"]["id"],
        to_bob["data"]["message"]["id"]
    );

    // Messages sent over REST reach the room as well
    server
        .post(
            &format!("/message/{}", conversation_id),
            Some(&bob),
            json!({ "content": "hey" }),
        )
        .await;
    let to_alice = next_event(&mut alice_socket).await;
    assert_eq!(to_alice["type"], "new-message");
    assert_eq!(to_alice["data"]["message"]["content"], "hey");
    assert_eq!(to_alice["data"]["message"]["sender"]["username"], "bob");
}

#[tokio::test]
async fn commands_before_identify_are_refused() {
    let server = TestServer::start().await;

    let mut socket = server.connect().await;
    send(
        &mut socket,
        json!({ "type": "join-room", "data": { "conversationId": "6f1c1d52-2f7e-4f40-9d6a-8f3a3a4b9e01" } }),
    )
    .await;
    let event = next_event(&mut socket).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["data"]["kind"], "unauthorized");
}

#[tokio::test]
async fn bad_token_is_refused() {
    let server = TestServer::start().await;

    let mut socket = server.connect().await;
    send(&mut socket, json!({ "type": "identify", "data": { "token": "nope" } })).await;
    let event = next_event(&mut socket).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["data"]["kind"], "invalid_credential");
}

#[tokio::test]
async fn outsiders_cannot_join_or_post() {
    let server = TestServer::start().await;
    let alice = server.register("alice").await;
    server.register("bob").await;
    let carol = server.register("carol").await;
    let conversation_id = server.private_conversation(&alice, "bob").await;

    let mut carol_socket = server.identified(&carol).await;
    let refused = join(&mut carol_socket, &conversation_id).await;
    assert_eq!(refused["type"], "error");
    assert_eq!(refused["data"]["kind"], "forbidden");

    send(
        &mut carol_socket,
        json!({
            "type": "send-message",
            "data": { "roomId": conversation_id, "content": "let me in" },
        }),
    )
    .await;
    let refused = next_event(&mut carol_socket).await;
    assert_eq!(refused["type"], "error");
    assert_eq!(refused["data"]["kind"], "forbidden");
}
