//! Command channel against an in-process mock WebSocket server.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use common::*;
use jfrctl::channel::{command_url, ChannelHandle, ChannelTimeouts, CommandChannel};
use jfrctl::error::{ChannelError, ClientError};
use jfrctl::model::{Recording, Target};
use jfrctl::notify::Level;
use jfrctl::poller::PollingList;
use jfrctl::validation::RecordingOptions;

fn connect(h: &Harness, addr: std::net::SocketAddr) -> (CommandChannel, ChannelHandle) {
    let (channel, handle) = CommandChannel::spawn(
        command_url(&format!("http://{addr}")),
        h.auth.clone(),
        h.targets.clone(),
        h.notifications.clone(),
    );
    let channel = channel.with_timeouts(ChannelTimeouts {
        ready: Duration::from_secs(5),
        reply: Duration::from_secs(5),
        auth: Duration::from_secs(5),
    });
    (channel, handle)
}

/// Replies to every command with a decoy for someone else first, then the
/// real reply echoing the first argument.
fn echo_with_decoy() -> Responder {
    Arc::new(|cmd, _| {
        let decoy = json!({
            "id": "someone-else",
            "commandName": cmd["command"],
            "status": 0,
            "payload": "decoy",
        });
        vec![decoy, reply_to(cmd, 0, cmd["args"][0].clone())]
    })
}

/// Commands received so far, as `[command, args...]`.
type Received = Arc<Mutex<Vec<Vec<String>>>>;

/// Records every command and answers it with `payload`.
fn recording_responder(payload: serde_json::Value) -> (Responder, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();
    let responder: Responder = Arc::new(move |cmd, _| {
        let mut line = vec![cmd["command"].as_str().unwrap_or_default().to_string()];
        if let Some(args) = cmd["args"].as_array() {
            line.extend(args.iter().filter_map(|a| a.as_str()).map(str::to_string));
        }
        log.lock().push(line);
        vec![reply_to(cmd, 0, payload.clone())]
    });
    (responder, received)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn concurrent_requests_get_their_own_replies() {
    let (addr, _) = start_command_server(echo_with_decoy()).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);

    let (a, b, c) = tokio::join!(
        channel.request("list", vec!["a".into()]),
        channel.request("list", vec!["b".into()]),
        channel.request("list", vec!["c".into()]),
    );
    assert_eq!(a.unwrap().payload, json!("a"));
    assert_eq!(b.unwrap().payload, json!("b"));
    assert_eq!(c.unwrap().payload, json!("c"));
    assert!(channel.pending().is_empty());

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn untagged_replies_reach_name_subscribers() {
    let responder: Responder = Arc::new(|cmd, _| vec![reply_to(cmd, 0, json!(["x.jfr"]))]);
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);
    channel.wait_ready().await.unwrap();

    let mut replies = channel.on_response("list-saved");
    channel.send_message("list-saved", vec![], None).unwrap();

    use tokio_stream::StreamExt;
    let reply = tokio::time::timeout(Duration::from_secs(5), replies.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.id, None);
    assert_eq!(reply.payload, json!(["x.jfr"]));

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn challenge_reconnects_with_credentials_and_resends() {
    let responder: Responder = Arc::new(|cmd, authed| {
        if authed {
            vec![reply_to(cmd, 0, json!([]))]
        } else {
            vec![reply_to(cmd, 407, json!("Authentication required"))]
        }
    });
    let (addr, connections) = start_command_server(responder).await;
    let h = harness(addr);
    answer_challenges(&h.targets, true);
    let (channel, handle) = connect(&h, addr);

    let recordings = channel.list_recordings().await.unwrap();
    assert!(recordings.is_empty());
    assert_eq!(connections.load(Ordering::SeqCst), 2);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_challenges_share_one_reconnect() {
    let responder: Responder = Arc::new(|cmd, authed| {
        if authed {
            vec![reply_to(cmd, 0, cmd["args"][0].clone())]
        } else {
            vec![reply_to(cmd, 407, json!("Authentication required"))]
        }
    });
    let (addr, connections) = start_command_server(responder).await;
    let h = harness(addr);
    answer_challenges(&h.targets, true);
    let (channel, handle) = connect(&h, addr);
    channel.wait_ready().await.unwrap();

    let requests = (0..5).map(|i| {
        let channel = channel.clone();
        tokio::spawn(async move { channel.request("stop", vec![format!("r{i}")]).await })
    });
    let results = futures::future::join_all(requests).await;

    for (i, result) in results.into_iter().enumerate() {
        let reply = result.unwrap().unwrap();
        assert_eq!(reply.payload, json!(format!("r{i}")));
    }
    assert_eq!(connections.load(Ordering::SeqCst), 2);
    assert!(channel.pending().is_empty());

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn repeated_challenge_is_fatal() {
    let responder: Responder = Arc::new(|cmd, _| vec![reply_to(cmd, 407, json!("denied"))]);
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let mut notes = h.notifications.subscribe();
    answer_challenges(&h.targets, true);
    let (channel, handle) = connect(&h, addr);

    let err = channel.list_recordings().await.unwrap_err();
    assert!(matches!(err, ClientError::AuthRejected), "{err:?}");
    assert_eq!(dangers(&drain(&mut notes)).len(), 1);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn failed_command_notifies_once() {
    let responder: Responder = Arc::new(|cmd, _| vec![reply_to(cmd, -1, json!("no such recording"))]);
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let mut notes = h.notifications.subscribe();
    let (channel, handle) = connect(&h, addr);

    let err = channel.stop("ghost").await.unwrap_err();
    match err {
        ClientError::Channel(ChannelError::Command { status, message }) => {
            assert_eq!(status, -1);
            assert_eq!(message, "no such recording");
        }
        other => panic!("unexpected {other:?}"),
    }
    let notes = drain(&mut notes);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].level, Level::Danger);
    assert_eq!(notes[0].title, "Request failed (Status -1)");

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn missing_reply_times_out() {
    let responder: Responder = Arc::new(|_, _| Vec::new());
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);
    let channel = channel.with_timeouts(ChannelTimeouts {
        reply: Duration::from_millis(200),
        ..ChannelTimeouts::default()
    });

    let err = channel.request("dump", vec![]).await.unwrap_err();
    assert!(matches!(err, ClientError::Channel(ChannelError::Timeout(_))), "{err:?}");
    assert!(channel.pending().is_empty());

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn is_connected_syncs_target_context() {
    let other = Target::new("service:jmx:rmi:///jndi/rmi://other:9092/jmxrmi", "", 9092);
    let other_id = other.id();
    let responder: Responder = Arc::new(move |cmd, _| vec![reply_to(cmd, 0, json!(other_id))]);
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);

    let connected = channel.is_connected().await.unwrap();
    assert_eq!(connected.as_ref(), Some(&other));
    assert_eq!(h.targets.current(), Some(other));

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn not_connected_clears_target() {
    let responder: Responder = Arc::new(|cmd, _| vec![reply_to(cmd, 0, json!("false"))]);
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);

    assert_eq!(channel.is_connected().await.unwrap(), None);
    assert_eq!(h.targets.current(), None);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn start_validates_before_sending() {
    let (addr, _) = start_command_server(echo_with_decoy()).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);
    channel.wait_ready().await.unwrap();
    let before = channel.replies_received();

    let options = jfrctl::validation::RecordingOptions::new("", "template=ALL");
    assert!(matches!(
        channel.start(&options).await,
        Err(ClientError::Validation { .. })
    ));
    assert_eq!(channel.replies_received(), before);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn connect_selects_target() {
    let (responder, received) = recording_responder(json!(null));
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);

    let other = Target::new("service:jmx:rmi:///jndi/rmi://other:9092/jmxrmi", "other", 9092);
    channel.connect(&other).await.unwrap();

    assert_eq!(h.targets.current(), Some(other.clone()));
    assert_eq!(*received.lock(), vec![vec!["connect".to_string(), other.id()]]);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn disconnect_clears_target_and_mounted_lists() {
    let (responder, received) = recording_responder(json!(null));
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);

    let list = PollingList::mount_for_target(&h.targets, None, || async {
        let rec: Recording =
            serde_json::from_value(json!({"name": "alpha", "state": "RUNNING"})).unwrap();
        Ok(vec![rec])
    });
    let view = list.view();
    let mut changes = view.changes();
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|_| view.items().len() == 1))
        .await
        .unwrap()
        .unwrap();

    channel.disconnect().await.unwrap();

    assert_eq!(h.targets.current(), None);
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|_| view.items().is_empty()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*received.lock(), vec![strings(&["disconnect"])]);

    list.unmount();
    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn dump_sends_name_duration_and_events() {
    let (responder, received) = recording_responder(json!(null));
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);

    let options = RecordingOptions::new("fixed", "template=Profiling").with_duration(Duration::from_secs(30));
    channel.dump(&options).await.unwrap();

    assert_eq!(
        *received.lock(),
        vec![strings(&["dump", "fixed", "30", "template=Profiling"])]
    );

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn upload_saved_posts_to_datasource_load_endpoint() {
    let (responder, received) = recording_responder(json!(null));
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let mut notes = h.notifications.subscribe();
    let (channel, handle) = connect(&h, addr);

    channel
        .upload_saved("app_2024.jfr", "http://grafana:8080/")
        .await
        .unwrap();

    assert_eq!(
        *received.lock(),
        vec![strings(&["upload-saved", "app_2024.jfr", "http://grafana:8080/load"])]
    );
    let levels: Vec<Level> = drain(&mut notes).into_iter().map(|n| n.level).collect();
    assert_eq!(levels, vec![Level::Info, Level::Success]);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn save_returns_archived_name() {
    let (responder, _) = recording_responder(json!("app_rec_20240101T000000Z.jfr"));
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);

    assert_eq!(channel.save("rec").await.unwrap(), "app_rec_20240101T000000Z.jfr");

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn save_without_archived_name_keeps_original() {
    let (responder, _) = recording_responder(json!(""));
    let (addr, _) = start_command_server(responder).await;
    let h = harness(addr);
    let (channel, handle) = connect(&h, addr);

    assert_eq!(channel.save("rec").await.unwrap(), "rec");

    handle.shutdown();
    handle.join().await;
}
