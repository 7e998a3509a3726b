use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::MaybeTlsStream;

use super::protocol::{CommandMessage, ResponseMessage};
use crate::api::auth::{request_headers, AuthState};
use crate::target::TargetContext;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const RESPONSE_CAPACITY: usize = 256;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// State shared between the channel handles and the connection task.
pub(super) struct Shared {
    responses: Mutex<HashMap<String, broadcast::Sender<ResponseMessage>>>,
    pub(super) ready: watch::Sender<bool>,
    pub(super) auth_failed: watch::Sender<bool>,
    /// Incremented on every successful connection.
    pub(super) epoch: watch::Sender<u64>,
    pub(super) reconnect: Notify,
    /// Highest epoch a reconnect has been asked to reach.
    reconnect_target: AtomicU64,
    received: AtomicU64,
}

impl Shared {
    pub(super) fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            ready: watch::channel(false).0,
            auth_failed: watch::channel(false).0,
            epoch: watch::channel(0).0,
            reconnect: Notify::new(),
            reconnect_target: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    /// Subscribe to every reply for `command` from now on.
    pub(super) fn subscribe(&self, command: &str) -> broadcast::Receiver<ResponseMessage> {
        self.responses
            .lock()
            .entry(command.to_string())
            .or_insert_with(|| broadcast::channel(RESPONSE_CAPACITY).0)
            .subscribe()
    }

    fn dispatch(&self, msg: ResponseMessage) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let responses = self.responses.lock();
        match responses.get(&msg.command_name) {
            Some(tx) => {
                // Err only means nobody is listening right now.
                let _ = tx.send(msg);
            }
            None => {
                tracing::trace!(command = %msg.command_name, "reply with no subscribers");
            }
        }
    }

    pub(super) fn current_epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    /// Ask the connection task to replace the socket of epoch `seen`.
    ///
    /// Only the first caller for a given socket triggers a reconnect; later
    /// callers, or callers whose socket was already replaced, get `false`.
    pub(super) fn request_reconnect(&self, seen: u64) -> bool {
        if self.current_epoch() > seen {
            return false;
        }
        let previous = self.reconnect_target.fetch_max(seen + 1, Ordering::AcqRel);
        if previous > seen {
            return false;
        }
        self.reconnect.notify_one();
        true
    }

    pub(super) fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// How a single connection ended.
enum Exit {
    Shutdown,
    Disconnected,
    Reconnect,
}

/// Keep a WebSocket connection to the command endpoint alive until
/// shutdown, reconnecting with exponential backoff (1s..60s).
pub(super) async fn connection_loop(
    url: String,
    auth: AuthState,
    targets: TargetContext,
    shared: Arc<Shared>,
    mut outbound: mpsc::Receiver<CommandMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = MIN_BACKOFF;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let connect_result = match build_request(&url, &auth, &targets) {
            Ok(req) => tokio_tungstenite::connect_async(req).await,
            Err(e) => Err(e),
        };

        match connect_result {
            Ok((ws_stream, _)) => {
                backoff = MIN_BACKOFF;
                shared.auth_failed.send_replace(false);
                shared.epoch.send_modify(|e| *e += 1);
                shared.ready.send_replace(true);
                tracing::info!(%url, "command channel connected");

                let exit = run_connection(ws_stream, &shared, &mut outbound, &mut shutdown_rx).await;
                shared.ready.send_replace(false);

                match exit {
                    Exit::Shutdown => return,
                    Exit::Reconnect => {
                        tracing::debug!(%url, "reconnecting command channel with fresh credentials");
                        continue;
                    }
                    Exit::Disconnected => {
                        tracing::warn!(%url, "command channel disconnected");
                    }
                }
            }
            Err(tungstenite::Error::Http(resp))
                if resp.status() == StatusCode::UNAUTHORIZED
                    || resp.status() == StatusCode::PROXY_AUTHENTICATION_REQUIRED =>
            {
                tracing::warn!(%url, status = resp.status().as_u16(), "command channel authentication rejected");
                shared.auth_failed.send_replace(true);
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "command channel connection failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.changed() => { return; }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Handshake request carrying the current API and JMX credentials.
fn build_request(
    url: &str,
    auth: &AuthState,
    targets: &TargetContext,
) -> Result<tungstenite::handshake::client::Request, tungstenite::Error> {
    let mut req = url.into_client_request()?;
    let target = targets.current();
    req.headers_mut()
        .extend(request_headers(auth, targets, target.as_ref()));
    Ok(req)
}

async fn run_connection(
    ws_stream: WsStream,
    shared: &Shared,
    outbound: &mut mpsc::Receiver<CommandMessage>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Exit {
    let (mut sink, mut stream) = ws_stream.split();
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // Skip the first immediate tick.

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ResponseMessage>(&text) {
                            Ok(reply) => {
                                tracing::debug!(
                                    command = %reply.command_name,
                                    id = ?reply.id,
                                    status = reply.status,
                                    "reply received"
                                );
                                shared.dispatch(reply);
                            }
                            Err(e) => tracing::warn!(error = %e, "unparseable command channel message"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            return Exit::Disconnected;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Exit::Disconnected,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "command channel read failed");
                        return Exit::Disconnected;
                    }
                }
            }
            cmd = outbound.recv() => {
                let Some(cmd) = cmd else {
                    // Every channel handle is gone.
                    let _ = sink.send(Message::Close(None)).await;
                    return Exit::Shutdown;
                };
                let json = match serde_json::to_string(&cmd) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(command = %cmd.command, error = %e, "failed to encode command");
                        continue;
                    }
                };
                tracing::debug!(command = %cmd.command, id = ?cmd.id, "sending command");
                if sink.send(Message::Text(json.into())).await.is_err() {
                    return Exit::Disconnected;
                }
            }
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    return Exit::Disconnected;
                }
            }
            _ = shared.reconnect.notified() => {
                let _ = sink.send(Message::Close(None)).await;
                return Exit::Reconnect;
            }
            _ = shutdown_rx.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return Exit::Shutdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(command: &str, id: &str) -> ResponseMessage {
        ResponseMessage {
            id: Some(id.into()),
            command_name: command.into(),
            status: 0,
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_command_name() {
        let shared = Shared::new();
        let mut list = shared.subscribe("list");
        let mut saved = shared.subscribe("list-saved");

        shared.dispatch(reply("list-saved", "1"));
        shared.dispatch(reply("list", "2"));

        assert_eq!(list.recv().await.unwrap().id.as_deref(), Some("2"));
        assert_eq!(saved.recv().await.unwrap().id.as_deref(), Some("1"));
        assert!(list.try_recv().is_err());
        assert_eq!(shared.received(), 2);
    }

    #[tokio::test]
    async fn dispatch_multicasts_to_every_subscriber() {
        let shared = Shared::new();
        let mut a = shared.subscribe("stop");
        let mut b = shared.subscribe("stop");
        shared.dispatch(reply("stop", "x"));
        assert_eq!(a.recv().await.unwrap(), reply("stop", "x"));
        assert_eq!(b.recv().await.unwrap(), reply("stop", "x"));
    }

    #[test]
    fn dispatch_without_subscribers_is_dropped() {
        let shared = Shared::new();
        shared.dispatch(reply("dump", "x"));
        assert_eq!(shared.received(), 1);
    }

    #[test]
    fn one_reconnect_per_socket() {
        let shared = Shared::new();
        shared.epoch.send_replace(1);
        assert!(shared.request_reconnect(1));
        assert!(!shared.request_reconnect(1));

        shared.epoch.send_replace(2);
        assert!(!shared.request_reconnect(1));
        assert!(shared.request_reconnect(2));
    }

    #[test]
    fn handshake_carries_credentials() {
        let auth = AuthState::with_token("tok", "Bearer");
        let targets = TargetContext::new();
        let req = build_request("ws://127.0.0.1:1/api/v1/command", &auth, &targets).unwrap();
        assert_eq!(req.headers()["authorization"], "Bearer tok");
        assert!(req.headers().contains_key("sec-websocket-key"));
    }
}
