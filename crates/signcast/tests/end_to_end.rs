//! Gateway + client library, end to end over real sockets.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use signcast::client::admin::{self, AdminEvent, AdminHandler, Target};
use signcast::client::display::{ContentDirectory, DisplayEvent, DisplayHandler, HttpContentDirectory};
use signcast::client::{ChannelClient, ClientConfig, ClientHandle, ConnectionStatus};
use signcast::core::content::{ContentRef, Presentation};
use signcast::core::protocol::{ClientId, ContentId, HeadquartersId, Role};
use signcast::gateway::{app_state::AppState, config};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn boot() -> (SocketAddr, AppState) {
    let cfg = config::load_from_str("version: 1\n").unwrap();
    let state = AppState::new(cfg).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(signcast::gateway::serve(listener, state.clone()));
    (addr, state)
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let waited = timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn connected(client: &ClientHandle) {
    let status = timeout(TIMEOUT, client.wait_for(|s| *s == ConnectionStatus::Connected))
        .await
        .unwrap();
    assert_eq!(status, ConnectionStatus::Connected);
}

fn spawn_display(
    url: &str,
    id: &str,
    hq: Option<&str>,
    directory: Option<Arc<dyn ContentDirectory>>,
) -> (ClientHandle, mpsc::Receiver<DisplayEvent>) {
    let mut cfg = ClientConfig::display(url, id);
    cfg.headquarters_id = hq.map(HeadquartersId::from);
    cfg.reconnect.base_delay_ms = 20;
    let (tx, rx) = mpsc::channel(16);
    let (client, _task) = ChannelClient::new(cfg, Arc::new(DisplayHandler::new(directory, tx))).spawn();
    (client, rx)
}

fn spawn_admin(url: &str, id: &str) -> (ClientHandle, mpsc::Receiver<AdminEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let (client, _task) =
        ChannelClient::new(ClientConfig::admin(url, id), Arc::new(AdminHandler::new(tx))).spawn();
    (client, rx)
}

/// Next admin event that is not a roster push.
async fn next_admin_event(rx: &mut mpsc::Receiver<AdminEvent>) -> AdminEvent {
    loop {
        match timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap() {
            AdminEvent::Roster(_) => continue,
            ev => return ev,
        }
    }
}

async fn next_text(ws: &mut WsStream) -> Value {
    loop {
        match timeout(TIMEOUT, ws.next()).await.unwrap() {
            Some(Ok(Message::Text(t))) => {
                let v: Value = serde_json::from_str(&t).unwrap();
                if v["type"] != "connections_list" {
                    return v;
                }
            }
            Some(Ok(_)) => continue,
            other => panic!("channel ended: {other:?}"),
        }
    }
}

#[tokio::test]
async fn broadcast_reaches_display_and_ack_returns_to_admin() {
    let (addr, state) = boot().await;
    let url = format!("ws://{addr}/ws");

    let content_api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/contents/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7, "type": "video", "file_url": "https://cdn.example/promo.mp4", "title": "Promo"
        })))
        .mount(&content_api)
        .await;

    // Admin console as a bare socket, to see frames exactly as relayed.
    let (mut admin, _) = connect_async(url.as_str()).await.unwrap();
    admin
        .send(Message::Text(json!({"type": "admin_connect", "role": "admin"}).to_string()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut admin).await["type"], "connection_established");
    assert_eq!(state.registry().list(Some(Role::Admin)).len(), 1);

    let directory: Arc<dyn ContentDirectory> =
        Arc::new(HttpContentDirectory::new(&content_api.uri(), TIMEOUT).unwrap());
    let (display, mut shown) = spawn_display(&url, "42", None, Some(directory));
    connected(&display).await;
    assert_eq!(state.registry().len(), 2);

    admin
        .send(Message::Text(
            json!({"type": "broadcast_content", "content_id": 7, "client_id": 42, "timestamp": "2024-05-01T12:00:00.000Z"})
                .to_string(),
        ))
        .await
        .unwrap();

    match timeout(TIMEOUT, shown.recv()).await.unwrap().unwrap() {
        DisplayEvent::Show { content, presentation } => {
            assert_eq!(content.id, ContentId::from(7u64));
            assert_eq!(
                presentation,
                Presentation::Video { url: "https://cdn.example/promo.mp4".into() }
            );
        }
        other => panic!("unexpected {other:?}"),
    }

    let ack = next_text(&mut admin).await;
    assert_eq!(ack["type"], "broadcast_received");
    assert_eq!(ack["content_id"], "7");
    assert_eq!(ack["client_id"], "42");
    assert_eq!(ack["status"], "success");
    assert!(ack["timestamp"].is_string());

    display.disconnect();
    assert_eq!(timeout(TIMEOUT, display.stopped()).await.unwrap(), ConnectionStatus::Disconnected);
    let registry = state.registry();
    eventually("display deregistered", || registry.list(Some(Role::Display)).is_empty()).await;
}

#[tokio::test]
async fn failed_content_lookup_is_reported_as_broadcast_error() {
    let (addr, _state) = boot().await;
    let url = format!("ws://{addr}/ws");

    let content_api = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&content_api)
        .await;

    let (admin, mut admin_events) = spawn_admin(&url, "console");
    connected(&admin).await;
    let directory: Arc<dyn ContentDirectory> =
        Arc::new(HttpContentDirectory::new(&content_api.uri(), TIMEOUT).unwrap());
    let (display, _shown) = spawn_display(&url, "8", None, Some(directory));
    connected(&display).await;

    admin.send(admin::broadcast(99u64, Target::Client(ClientId::from("8")))).unwrap();
    match next_admin_event(&mut admin_events).await {
        AdminEvent::Failed { content_id, client_id, error } => {
            assert_eq!(content_id.as_str(), "99");
            assert_eq!(client_id.unwrap().as_str(), "8");
            assert!(error.contains("404"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn broadcast_to_absent_display_fails_fast() {
    let (addr, _state) = boot().await;
    let url = format!("ws://{addr}/ws");
    let (admin, mut events) = spawn_admin(&url, "console");
    connected(&admin).await;

    admin.send(admin::broadcast(1u64, Target::Client(ClientId::from("ghost")))).unwrap();
    assert!(matches!(
        next_admin_event(&mut events).await,
        AdminEvent::Failed { .. }
    ));

    admin.send(admin::text_message(Some(ClientId::from("ghost")), "hello")).unwrap();
    match next_admin_event(&mut events).await {
        AdminEvent::DeliveryFailed { client_id, .. } => {
            assert_eq!(client_id.unwrap().as_str(), "ghost")
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn site_broadcast_with_inline_content() {
    let (addr, _state) = boot().await;
    let url = format!("ws://{addr}/ws");
    let (admin, mut events) = spawn_admin(&url, "console");
    connected(&admin).await;

    let (north_1, mut shown_1) = spawn_display(&url, "n1", Some("north"), None);
    let (north_2, mut shown_2) = spawn_display(&url, "n2", Some("north"), None);
    let (south, mut shown_s) = spawn_display(&url, "s1", Some("south"), None);
    for d in [&north_1, &north_2, &south] {
        connected(d).await;
    }

    let content = ContentRef {
        id: ContentId::from("12"),
        content_type: "image".into(),
        file_url: Some("https://cdn.example/menu.png".into()),
        title: Some("Menu".into()),
    };
    admin
        .send(admin::broadcast_inline(content, Target::Site(HeadquartersId::from("north"))))
        .unwrap();

    let mut acked = Vec::new();
    for _ in 0..2 {
        match next_admin_event(&mut events).await {
            AdminEvent::Acknowledged { content_id, client_id } => {
                assert_eq!(content_id.as_str(), "12");
                acked.push(client_id.unwrap().to_string());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    acked.sort();
    assert_eq!(acked, vec!["n1", "n2"]);

    for shown in [&mut shown_1, &mut shown_2] {
        assert!(matches!(
            timeout(TIMEOUT, shown.recv()).await.unwrap().unwrap(),
            DisplayEvent::Show { presentation: Presentation::Image { .. }, .. }
        ));
    }
    assert!(shown_s.try_recv().is_err());
}

#[tokio::test]
async fn admin_pushes_text_and_status() {
    let (addr, _state) = boot().await;
    let url = format!("ws://{addr}/ws");
    let (admin, _events) = spawn_admin(&url, "console");
    connected(&admin).await;
    let (display, mut shown) = spawn_display(&url, "42", None, None);
    connected(&display).await;

    admin.send(admin::text_message(Some(ClientId::from("42")), "hello screen")).unwrap();
    admin.send(admin::status_update(None, "maintenance")).unwrap();

    assert_eq!(
        timeout(TIMEOUT, shown.recv()).await.unwrap().unwrap(),
        DisplayEvent::Text("hello screen".into())
    );
    assert_eq!(
        timeout(TIMEOUT, shown.recv()).await.unwrap().unwrap(),
        DisplayEvent::Status("maintenance".into())
    );
}

/// TCP relay that can cut every live link without a close handshake.
struct Relay {
    addr: SocketAddr,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Relay {
    async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let links = Arc::new(Mutex::new(Vec::new()));
        let tracked = Arc::clone(&links);
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                tracked.lock().unwrap().push(link);
            }
        });
        Self { addr, links }
    }

    fn sever(&self) {
        for link in self.links.lock().unwrap().drain(..) {
            link.abort();
        }
    }
}

#[tokio::test]
async fn abnormal_close_reconnects_without_duplicate_entry() {
    let (addr, state) = boot().await;
    let relay = Relay::start(addr).await;
    let url = format!("ws://{}/ws", relay.addr);

    let (display, _shown) = spawn_display(&url, "42", None, None);
    connected(&display).await;
    let registry = state.registry();
    let before = registry.find(&ClientId::from("42")).unwrap().connection_id;

    let mut status = display.watch_status();
    relay.sever();

    // Connected -> (transport lost) -> reconnecting -> connected again.
    timeout(TIMEOUT, async {
        loop {
            status.changed().await.unwrap();
            if matches!(*status.borrow(), ConnectionStatus::Reconnecting { .. }) {
                break;
            }
        }
    })
    .await
    .unwrap();
    connected(&display).await;

    eventually("single re-registered entry", || {
        let rows: Vec<_> = registry
            .list(None)
            .into_iter()
            .filter(|c| c.client_id.as_str() == "42")
            .collect();
        rows.len() == 1 && rows[0].connection_id != before
    })
    .await;
}
