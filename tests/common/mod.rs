#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use jfrctl::api::{ApiClient, AuthState};
use jfrctl::model::Target;
use jfrctl::notify::{Level, Notification, Notifications};
use jfrctl::target::{AuthStatus, TargetContext};

pub const JMX_USER: &str = "admin";
pub const JMX_PASSWORD: &str = "secret";
/// `Basic base64("admin:secret")`.
pub const JMX_HEADER: &str = "Basic YWRtaW46c2VjcmV0";

pub async fn start_test_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

pub fn test_target() -> Target {
    Target::new("service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi", "app", 9091)
}

/// Shared client-side state wired to a mock server.
pub struct Harness {
    pub api: ApiClient,
    pub auth: AuthState,
    pub targets: TargetContext,
    pub notifications: Notifications,
}

/// A client for `addr` with [`test_target`] selected.
pub fn harness(addr: SocketAddr) -> Harness {
    let auth = AuthState::with_token("test-token", "Bearer");
    let targets = TargetContext::new();
    targets.select(test_target());
    let notifications = Notifications::new();
    let api = ApiClient::new(
        &format!("http://{addr}"),
        auth.clone(),
        targets.clone(),
        notifications.clone(),
    )
    .with_auth_timeout(Duration::from_secs(5));
    Harness {
        api,
        auth,
        targets,
        notifications,
    }
}

/// Answer every JMX challenge: store the test credentials when `supply` is
/// set, otherwise abandon.
pub fn answer_challenges(targets: &TargetContext, supply: bool) {
    let targets = targets.clone();
    let mut requests = targets.auth_requests();
    tokio::spawn(async move {
        while requests.changed().await.is_ok() {
            let status = *requests.borrow_and_update();
            if let AuthStatus::Pending(_) = status {
                match targets.current() {
                    Some(target) if supply => targets.store_credentials(&target, JMX_USER, JMX_PASSWORD),
                    _ => targets.abandon_auth(),
                }
            }
        }
    });
}

/// Drain every notification published so far.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

pub fn dangers(notes: &[Notification]) -> Vec<&Notification> {
    notes.iter().filter(|n| n.level == Level::Danger).collect()
}

pub fn has_jmx_credentials(headers: &HeaderMap) -> bool {
    headers
        .get("x-jmx-authorization")
        .and_then(|v| v.to_str().ok())
        == Some(JMX_HEADER)
}

// ── Mock command channel ──────────────────────────────────────────

/// Produces the replies for one incoming command. Receives the parsed
/// command and whether the handshake carried JMX credentials.
pub type Responder = Arc<dyn Fn(&serde_json::Value, bool) -> Vec<serde_json::Value> + Send + Sync>;

#[derive(Clone)]
struct ChannelState {
    respond: Responder,
    connections: Arc<AtomicUsize>,
}

/// A command channel server at `/api/v1/command`. Returns its address and
/// a counter of accepted connections.
pub async fn start_command_server(respond: Responder) -> (SocketAddr, Arc<AtomicUsize>) {
    let connections = Arc::new(AtomicUsize::new(0));
    let state = ChannelState {
        respond,
        connections: connections.clone(),
    };
    let app = Router::new()
        .route("/api/v1/command", get(command_ws))
        .with_state(state);
    (start_test_server(app).await, connections)
}

async fn command_ws(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<ChannelState>,
) -> Response {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let authed = has_jmx_credentials(&headers);
    ws.on_upgrade(move |socket| serve_commands(socket, state.respond, authed))
}

async fn serve_commands(mut socket: WebSocket, respond: Responder, authed: bool) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(cmd) = serde_json::from_str::<serde_json::Value>(text.as_str()) else {
            continue;
        };
        for reply in respond(&cmd, authed) {
            if socket
                .send(Message::Text(reply.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

/// A reply to `cmd` carrying its id.
pub fn reply_to(cmd: &serde_json::Value, status: i32, payload: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "id": cmd["id"],
        "commandName": cmd["command"],
        "status": status,
        "payload": payload,
    })
}
