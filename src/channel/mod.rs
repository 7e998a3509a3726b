//! Client for the backend's WebSocket command channel.
//!
//! Commands are sent by name with string arguments. Replies are multicast
//! per command name to every subscriber; a caller that needs *its* reply
//! tags the command with a correlation id and filters the stream for it
//! (see [`crate::correlation`]).

mod connection;
pub mod protocol;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::api::auth::AuthState;
use crate::correlation::{first_reply, PendingRequests};
use crate::error::{ChannelError, ClientError};
use crate::model::{EventTemplate, Recording, SavedRecording, Target};
use crate::notify::Notifications;
use crate::target::TargetContext;
use crate::validation::RecordingOptions;
use connection::Shared;
use protocol::{commands, CommandMessage, ResponseMessage};

const OUTBOUND_CAPACITY: usize = 64;

/// Every reply for one command name, from subscription onwards.
pub type ResponseStream = Pin<Box<dyn Stream<Item = ResponseMessage> + Send>>;

/// Limits applied to correlated requests.
#[derive(Debug, Clone, Copy)]
pub struct ChannelTimeouts {
    /// How long to wait for the channel to become ready.
    pub ready: Duration,
    /// How long to wait for the reply to a tagged command.
    pub reply: Duration,
    /// How long to wait for re-authentication after a challenge.
    pub auth: Duration,
}

impl Default for ChannelTimeouts {
    fn default() -> Self {
        Self {
            ready: Duration::from_secs(10),
            reply: Duration::from_secs(30),
            auth: Duration::from_secs(120),
        }
    }
}

/// Cloneable handle to the command channel.
#[derive(Clone)]
pub struct CommandChannel {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<CommandMessage>,
    pending: PendingRequests,
    targets: TargetContext,
    notifications: Notifications,
    timeouts: ChannelTimeouts,
}

/// Owns the background connection task.
pub struct ChannelHandle {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ChannelHandle {
    /// Signal the connection task to close the socket and stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the connection task to finish. Consumes the handle.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// WebSocket URL of the command endpoint for an API authority.
pub fn command_url(authority: &str) -> String {
    let authority = authority.trim_end_matches('/');
    let base = if let Some(rest) = authority.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = authority.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if authority.starts_with("ws://") || authority.starts_with("wss://") {
        authority.to_string()
    } else {
        format!("ws://{}", authority)
    };
    format!("{}/api/v1/command", base)
}

impl CommandChannel {
    /// Spawn the connection task for `url` and return a channel handle
    /// plus the task's owner.
    pub fn spawn(
        url: String,
        auth: AuthState,
        targets: TargetContext,
        notifications: Notifications,
    ) -> (Self, ChannelHandle) {
        let shared = Arc::new(Shared::new());
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(connection::connection_loop(
            url,
            auth,
            targets.clone(),
            shared.clone(),
            outbound_rx,
            shutdown_rx,
        ));
        let channel = Self {
            shared,
            outbound,
            pending: PendingRequests::new(),
            targets,
            notifications,
            timeouts: ChannelTimeouts::default(),
        };
        (channel, ChannelHandle { shutdown_tx, task })
    }

    pub fn with_timeouts(mut self, timeouts: ChannelTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Connection readiness; `true` while a socket is open.
    pub fn is_ready(&self) -> watch::Receiver<bool> {
        self.shared.ready.subscribe()
    }

    /// `true` after the server rejected the handshake credentials, until the
    /// next successful connection.
    pub fn auth_failures(&self) -> watch::Receiver<bool> {
        self.shared.auth_failed.subscribe()
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Number of replies received since the channel was spawned.
    pub fn replies_received(&self) -> u64 {
        self.shared.received()
    }

    /// Wait until the channel is connected, bounded by the ready timeout.
    pub async fn wait_ready(&self) -> Result<(), ClientError> {
        let mut rx = self.is_ready();
        let ready = tokio::time::timeout(self.timeouts.ready, rx.wait_for(|ready| *ready))
            .await
            .map(|res| res.map(|_| ()));
        match ready {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ChannelError::Closed.into()),
            Err(_) => Err(ChannelError::NotReady.into()),
        }
    }

    /// Transmit a command. Without an `id` no reply is awaited.
    pub fn send_message(
        &self,
        command: &str,
        args: Vec<String>,
        id: Option<String>,
    ) -> Result<(), ClientError> {
        if !*self.shared.ready.borrow() {
            return Err(ChannelError::NotReady.into());
        }
        let msg = CommandMessage::new(command, args, id);
        self.outbound.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(command, "outbound command queue full");
                ChannelError::NotReady
            }
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })?;
        Ok(())
    }

    /// Every reply tagged with `command`, from now on.
    pub fn on_response(&self, command: &str) -> ResponseStream {
        let rx = self.shared.subscribe(command);
        let command = command.to_string();
        Box::pin(BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(msg) => Some(msg),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                tracing::warn!(%command, skipped = n, "reply subscriber lagged");
                None
            }
        }))
    }

    /// Send `command` tagged with a fresh id and wait for its reply.
    ///
    /// A JMX authentication challenge is answered once: the target context
    /// is told, re-authentication is awaited, the socket is re-established
    /// with the new credentials and the command is re-sent. A second
    /// challenge, or any other non-zero status, is a failure and produces
    /// one notification.
    pub async fn request(&self, command: &str, args: Vec<String>) -> Result<ResponseMessage, ClientError> {
        let mut challenged = false;
        loop {
            self.wait_ready().await?;

            let guard = self.pending.register(command);
            // Subscribe before sending so the reply cannot be missed.
            let replies = self.on_response(command);
            let epoch = self.shared.current_epoch();
            self.send_message(command, args.clone(), Some(guard.id().to_string()))?;

            let reply = match tokio::time::timeout(self.timeouts.reply, first_reply(replies, guard.id())).await {
                Ok(Some(reply)) => reply,
                Ok(None) => return Err(ChannelError::Closed.into()),
                Err(_) => {
                    tracing::warn!(command, id = guard.id(), "no reply within timeout");
                    self.notifications
                        .danger("Request failed", Some(&format!("No reply to '{}'", command)));
                    return Err(ChannelError::Timeout(command.to_string()).into());
                }
            };
            drop(guard);

            if reply.is_auth_challenge() {
                if challenged {
                    self.notify_failure(&reply);
                    return Err(ClientError::AuthRejected);
                }
                challenged = true;
                if self.shared.current_epoch() > epoch {
                    // Another request already re-authenticated the socket.
                    continue;
                }
                self.targets.set_auth_failure();
                match tokio::time::timeout(self.timeouts.auth, self.targets.auth_retry()).await {
                    Ok(Ok(())) => {
                        self.reconnect(epoch).await?;
                        continue;
                    }
                    Ok(Err(e)) => {
                        self.notify_failure(&reply);
                        return Err(e);
                    }
                    Err(_) => {
                        self.targets.abandon_auth();
                        self.notify_failure(&reply);
                        return Err(ClientError::AuthAbandoned);
                    }
                }
            }

            if !reply.is_success() {
                self.notify_failure(&reply);
                return Err(ChannelError::Command {
                    status: reply.status,
                    message: reply.payload_text(),
                }
                .into());
            }
            return Ok(reply);
        }
    }

    /// Replace the socket of epoch `seen` and wait for its successor, so the
    /// handshake picks up freshly stored credentials. Concurrent callers
    /// for the same socket share one reconnect.
    async fn reconnect(&self, seen: u64) -> Result<(), ClientError> {
        let mut epoch = self.shared.epoch.subscribe();
        if self.shared.request_reconnect(seen) {
            tracing::debug!(epoch = seen, "requesting command channel reconnect");
        }
        let replaced = tokio::time::timeout(self.timeouts.ready, epoch.wait_for(|e| *e > seen))
            .await
            .map(|res| res.map(|_| ()));
        match replaced {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ChannelError::Closed.into()),
            Err(_) => Err(ChannelError::NotReady.into()),
        }
    }

    fn notify_failure(&self, reply: &ResponseMessage) {
        self.notifications.danger(
            &format!("Request failed (Status {})", reply.status),
            Some(&reply.payload_text()),
        );
    }

    // ── Typed commands ─────────────────────────────────────────────

    pub async fn list_recordings(&self) -> Result<Vec<Recording>, ClientError> {
        let reply = self.request(commands::LIST, vec![]).await?;
        Ok(reply.payload_as()?)
    }

    pub async fn list_saved(&self) -> Result<Vec<SavedRecording>, ClientError> {
        let reply = self.request(commands::LIST_SAVED, vec![]).await?;
        Ok(reply.payload_as()?)
    }

    pub async fn list_event_templates(&self) -> Result<Vec<EventTemplate>, ClientError> {
        let reply = self.request(commands::LIST_EVENT_TEMPLATES, vec![]).await?;
        Ok(reply.payload_as()?)
    }

    pub async fn scan_targets(&self) -> Result<Vec<Target>, ClientError> {
        let reply = self.request(commands::SCAN_TARGETS, vec![]).await?;
        Ok(reply.payload_as()?)
    }

    /// Start a recording (continuous unless a duration is set).
    pub async fn start(&self, options: &RecordingOptions) -> Result<(), ClientError> {
        options.validate()?;
        self.request(
            commands::START,
            vec![options.name.clone(), options.events.clone()],
        )
        .await?;
        self.notifications.success("Recording created", None);
        Ok(())
    }

    /// Start a fixed-duration recording.
    pub async fn dump(&self, options: &RecordingOptions) -> Result<(), ClientError> {
        options.validate()?;
        let secs = options
            .duration_secs()
            .ok_or_else(|| ClientError::validation("duration", "must be greater than zero"))?;
        self.request(
            commands::DUMP,
            vec![options.name.clone(), secs.to_string(), options.events.clone()],
        )
        .await?;
        self.notifications.success("Recording created", None);
        Ok(())
    }

    /// Archive a recording, returning the archived name when the server
    /// reports one.
    pub async fn save(&self, name: &str) -> Result<String, ClientError> {
        let reply = self.request(commands::SAVE, vec![name.to_string()]).await?;
        let saved = reply.payload_text();
        Ok(if saved.is_empty() { name.to_string() } else { saved })
    }

    pub async fn stop(&self, name: &str) -> Result<(), ClientError> {
        self.request(commands::STOP, vec![name.to_string()]).await?;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<(), ClientError> {
        self.request(commands::DELETE, vec![name.to_string()]).await?;
        Ok(())
    }

    pub async fn delete_saved(&self, name: &str) -> Result<(), ClientError> {
        self.request(commands::DELETE_SAVED, vec![name.to_string()]).await?;
        Ok(())
    }

    /// Connect the backend to `target` and make it the selected target.
    pub async fn connect(&self, target: &Target) -> Result<(), ClientError> {
        self.request(commands::CONNECT, vec![target.id()]).await?;
        self.targets.select(target.clone());
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.targets.disconnect();
        self.request(commands::DISCONNECT, vec![]).await?;
        Ok(())
    }

    /// Ask which target the backend is connected to and sync the target
    /// context with the answer.
    pub async fn is_connected(&self) -> Result<Option<Target>, ClientError> {
        let reply = self.request(commands::IS_CONNECTED, vec![]).await?;
        let payload = reply.payload_text();
        if payload.is_empty() || payload == "false" {
            self.targets.disconnect();
            return Ok(None);
        }
        let current = self.targets.current();
        let target = match current {
            Some(t) if t.id() == payload => t,
            _ => Target::from_id(&payload).ok_or_else(|| ChannelError::Command {
                status: reply.status,
                message: format!("unrecognised target '{}'", payload),
            })?,
        };
        self.targets.select(target.clone());
        Ok(Some(target))
    }

    pub async fn upload_recording(&self, name: &str, grafana_datasource: &str) -> Result<(), ClientError> {
        self.upload(commands::UPLOAD_RECORDING, name, grafana_datasource).await
    }

    pub async fn upload_saved(&self, name: &str, grafana_datasource: &str) -> Result<(), ClientError> {
        self.upload(commands::UPLOAD_SAVED, name, grafana_datasource).await
    }

    async fn upload(&self, command: &str, name: &str, grafana_datasource: &str) -> Result<(), ClientError> {
        self.notifications
            .info("Upload started", Some(&format!("Recording \"{}\" uploading...", name)));
        let load_url = format!("{}/load", grafana_datasource.trim_end_matches('/'));
        self.request(command, vec![name.to_string(), load_url]).await?;
        self.notifications.success("Upload success", None);
        Ok(())
    }
}
