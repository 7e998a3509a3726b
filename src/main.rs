//! jfrctl - command-line console for JDK Flight Recorder recordings.
//!
//! Talks to a recording management server over its REST API and WebSocket
//! command channel: list and control recordings on a JVM target, manage the
//! server-side archive and event templates, and download recordings and
//! reports.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use bytes::Bytes;
use clap::{Parser as ClapParser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jfrctl::api::{ApiClient, AuthState, DownloadedFile};
use jfrctl::batch::{run_all, BatchOutcome};
use jfrctl::channel::protocol::ResponseMessage;
use jfrctl::channel::{command_url, CommandChannel};
use jfrctl::config::{default_config_path, ConsoleConfig};
use jfrctl::model::{EventTemplate, Recording, SavedRecording, Target, TemplateType};
use jfrctl::notify::Notifications;
use jfrctl::target::{AuthStatus, TargetContext};
use jfrctl::templates::{SortColumn, SortDirection, TemplateQuery};
use jfrctl::validation::RecordingOptions;
use jfrctl::views::{ActiveRecordingsView, ArchivedRecordingsView, TemplatesView};

const DEFAULT_AUTHORITY: &str = "http://localhost:8181";
const DEFAULT_AUTH_METHOD: &str = "Bearer";

/// jfrctl - manage JDK Flight Recorder recordings
#[derive(ClapParser, Debug)]
#[command(name = "jfrctl", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the recording server
    #[arg(long, env = "JFRCTL_AUTHORITY", global = true)]
    authority: Option<String>,

    /// API token
    #[arg(long, env = "JFRCTL_TOKEN", global = true)]
    token: Option<String>,

    /// Authorization scheme for the API token
    #[arg(long, global = true)]
    auth_method: Option<String>,

    /// Target JVM: alias, connect URL, or `<connect url>:<port>`
    #[arg(long, env = "JFRCTL_TARGET", global = true)]
    target: Option<String>,

    /// JMX username, used when the target asks for credentials
    #[arg(long, env = "JFRCTL_JMX_USER", global = true, requires = "jmx_password")]
    jmx_user: Option<String>,

    /// JMX password
    #[arg(long, env = "JFRCTL_JMX_PASSWORD", global = true, hide_env_values = true)]
    jmx_password: Option<String>,

    /// Config file (default: <config dir>/jfrctl/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List discoverable targets
    Targets,

    /// Recordings on the selected target
    Recordings {
        #[command(subcommand)]
        action: RecordingsCmd,
    },

    /// Recordings in the server-side archive
    Archives {
        #[command(subcommand)]
        action: ArchivesCmd,
    },

    /// Event templates
    Templates {
        #[command(subcommand)]
        action: TemplatesCmd,
    },

    /// Print a list every time it changes, until interrupted
    Watch {
        #[command(subcommand)]
        list: WatchCmd,
    },

    /// Send a raw command over the command channel and print the reply
    Channel {
        command: String,
        args: Vec<String>,

        /// Disconnect the server from the target afterwards
        #[arg(long)]
        disconnect: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RecordingsCmd {
    List,

    /// Start a recording
    Create {
        name: String,

        /// Event specifier, e.g. `jdk.CPULoad:enabled=true`
        #[arg(long, conflicts_with = "template")]
        events: Option<String>,

        /// Event template name
        #[arg(long)]
        template: Option<String>,

        /// Template type (CUSTOM or TARGET)
        #[arg(long, default_value = "TARGET")]
        template_type: TemplateType,

        /// Stop after this many seconds (continuous when omitted)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Capture a snapshot of everything currently recorded
    Snapshot,

    Stop { names: Vec<String> },

    /// Copy recordings into the archive
    Archive { names: Vec<String> },

    Delete { names: Vec<String> },

    Download { name: String },

    Report { name: String },

    /// Upload a recording to the Grafana datasource
    Grafana { name: String },
}

#[derive(Subcommand, Debug)]
enum ArchivesCmd {
    List,

    /// Upload a local .jfr file into the archive
    Upload { path: PathBuf },

    Delete { names: Vec<String> },

    Download { name: String },

    Report { name: String },

    Grafana { name: String },
}

#[derive(Subcommand, Debug)]
enum TemplatesCmd {
    List {
        #[arg(long)]
        filter: Option<String>,

        /// name, description, provider or type
        #[arg(long)]
        sort: Option<SortColumn>,

        #[arg(long)]
        desc: bool,
    },

    /// Upload a custom template (.jfc)
    Add { path: PathBuf },

    Delete { name: String },

    Download {
        name: String,

        #[arg(long, default_value = "TARGET")]
        template_type: TemplateType,
    },
}

#[derive(Subcommand, Debug)]
enum WatchCmd {
    Active,
    Archived,
    Templates,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "jfrctl=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Everything a command needs, built from config and flags.
struct Console {
    api: ApiClient,
    auth: AuthState,
    targets: TargetContext,
    notifications: Notifications,
    config: ConsoleConfig,
    target_arg: Option<String>,
}

impl Console {
    fn new(cli: &Cli) -> anyhow::Result<Self> {
        let path = cli.config.clone().or_else(default_config_path);
        let config = match &path {
            Some(path) => ConsoleConfig::load(path)?.unwrap_or_default(),
            None => ConsoleConfig::default(),
        };

        let authority = cli
            .authority
            .clone()
            .or_else(|| config.authority.clone())
            .unwrap_or_else(|| DEFAULT_AUTHORITY.to_string());
        let method = cli
            .auth_method
            .clone()
            .or_else(|| config.auth.method.clone())
            .unwrap_or_else(|| DEFAULT_AUTH_METHOD.to_string());

        let auth = AuthState::new();
        auth.set_method(method.clone());
        if let Some(token) = cli.token.clone().or_else(|| config.auth.token.clone()) {
            auth.set(token, method);
        }

        let targets = TargetContext::new();
        let notifications = Notifications::new();
        let api = ApiClient::new(&authority, auth.clone(), targets.clone(), notifications.clone())
            .with_auth_timeout(config.channel.timeouts().auth);

        spawn_auth_responder(&targets, cli.jmx_user.clone(), cli.jmx_password.clone());

        Ok(Self {
            api,
            auth,
            targets,
            notifications,
            config,
            target_arg: cli.target.clone(),
        })
    }

    /// Resolve `--target` against the discovered targets and select it.
    async fn select_target(&self) -> anyhow::Result<Target> {
        let Some(wanted) = self.target_arg.as_deref() else {
            bail!("no target given; pass --target or set JFRCTL_TARGET");
        };
        let discovered = self.api.scan_targets().await.unwrap_or_default();
        let target = discovered
            .into_iter()
            .find(|t| t.id() == wanted || t.connect_url == wanted || t.alias == wanted)
            .or_else(|| Target::from_id(wanted))
            .ok_or_else(|| anyhow!("unknown target '{}'", wanted))?;
        tracing::debug!(target_id = %target.id(), "selected target");
        self.targets.select(target.clone());
        Ok(target)
    }

    async fn save(&self, file: DownloadedFile) -> anyhow::Result<()> {
        let path = file.save_into(&self.config.download_dir()).await?;
        println!("{}", path.display());
        Ok(())
    }
}

/// Answer JMX authentication challenges with the configured credentials,
/// once per challenge, or give up when there are none.
fn spawn_auth_responder(targets: &TargetContext, user: Option<String>, password: Option<String>) {
    let targets = targets.clone();
    let mut requests = targets.auth_requests();
    tokio::spawn(async move {
        while requests.changed().await.is_ok() {
            let status = *requests.borrow_and_update();
            let AuthStatus::Pending(round) = status else {
                continue;
            };
            match (&user, &password, targets.current()) {
                (Some(user), Some(password), Some(target)) => {
                    tracing::info!(target_id = %target.id(), round, "supplying JMX credentials");
                    targets.store_credentials(&target, user, password);
                }
                _ => {
                    tracing::warn!(round, "target requires JMX credentials; pass --jmx-user and --jmx-password");
                    targets.abandon_auth();
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let console = Console::new(&cli)?;

    match cli.command {
        Commands::Targets => run_targets(&console).await,
        Commands::Recordings { action } => run_recordings(&console, action).await,
        Commands::Archives { action } => run_archives(&console, action).await,
        Commands::Templates { action } => run_templates(&console, action).await,
        Commands::Watch { list } => run_watch(&console, list).await,
        Commands::Channel {
            command,
            args,
            disconnect,
        } => run_channel(&console, &command, args, disconnect).await,
    }
}

// ── Commands ───────────────────────────────────────────────────────

async fn run_targets(console: &Console) -> anyhow::Result<()> {
    for target in console.api.scan_targets().await? {
        println!("{}\t{}", target.id(), target.label());
    }
    Ok(())
}

async fn run_recordings(console: &Console, action: RecordingsCmd) -> anyhow::Result<()> {
    console.select_target().await?;
    let api = &console.api;

    match action {
        RecordingsCmd::List => {
            for rec in api.list_recordings().await? {
                print_recording(&rec);
            }
            Ok(())
        }
        RecordingsCmd::Create {
            name,
            events,
            template,
            template_type,
            duration,
        } => {
            let events = match (events, template) {
                (Some(events), _) => events,
                (None, Some(template)) => format!("template={},type={}", template, template_type.as_str()),
                (None, None) => bail!("pass --events or --template"),
            };
            let mut options = RecordingOptions::new(name, events);
            if let Some(secs) = duration {
                options = options.with_duration(std::time::Duration::from_secs(secs));
            }
            api.create_recording(&options).await?;
            Ok(())
        }
        RecordingsCmd::Snapshot => {
            api.create_snapshot().await?;
            Ok(())
        }
        RecordingsCmd::Stop { names } => {
            let outcome = run_all("stop", names, |name| async move { api.stop_recording(&name).await }).await;
            report(&outcome)
        }
        RecordingsCmd::Archive { names } => {
            let outcome = run_all("archive", names, |name| async move { api.archive_recording(&name).await }).await;
            for (_, archived) in &outcome.succeeded {
                println!("{}", archived);
            }
            report(&outcome)
        }
        RecordingsCmd::Delete { names } => {
            let outcome = run_all("delete", names, |name| async move { api.delete_recording(&name).await }).await;
            report(&outcome)
        }
        RecordingsCmd::Download { name } => {
            let rec = find_recording(console, &name).await?;
            console.save(api.download_recording(&rec.as_saved()).await?).await
        }
        RecordingsCmd::Report { name } => {
            let rec = find_recording(console, &name).await?;
            console.save(api.download_report(&rec.as_saved()).await?).await
        }
        RecordingsCmd::Grafana { name } => {
            api.upload_active_recording_to_grafana(&name).await?;
            println!("{}", api.grafana_dashboard_url().await?);
            Ok(())
        }
    }
}

async fn run_archives(console: &Console, action: ArchivesCmd) -> anyhow::Result<()> {
    let api = &console.api;

    match action {
        ArchivesCmd::List => {
            for rec in api.list_archived_recordings().await? {
                println!("{}", rec.name);
            }
            Ok(())
        }
        ArchivesCmd::Upload { path } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let file_name = file_name(&path)?;
            let stored = api.upload_recording(&file_name, Bytes::from(data)).await?;
            println!("{}", stored);
            Ok(())
        }
        ArchivesCmd::Delete { names } => {
            let outcome = run_all("delete archived", names, |name| async move {
                api.delete_archived_recording(&name).await
            })
            .await;
            report(&outcome)
        }
        ArchivesCmd::Download { name } => {
            let rec = find_archived(console, &name).await?;
            console.save(api.download_recording(&rec).await?).await
        }
        ArchivesCmd::Report { name } => {
            let rec = find_archived(console, &name).await?;
            console.save(api.download_report(&rec).await?).await
        }
        ArchivesCmd::Grafana { name } => {
            api.upload_archived_recording_to_grafana(&name).await?;
            println!("{}", api.grafana_dashboard_url().await?);
            Ok(())
        }
    }
}

async fn run_templates(console: &Console, action: TemplatesCmd) -> anyhow::Result<()> {
    let api = &console.api;

    match action {
        TemplatesCmd::List { filter, sort, desc } => {
            console.select_target().await?;
            let mut query = TemplateQuery::new();
            if let Some(filter) = filter {
                query.set_filter(filter);
            }
            let direction = if desc {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            };
            if sort.is_some() || desc {
                query.set_sort(sort.unwrap_or(SortColumn::Name), direction);
            }
            for template in query.apply(&api.list_templates().await?) {
                print_template(&template);
            }
            Ok(())
        }
        TemplatesCmd::Add { path } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            api.add_custom_event_template(&file_name(&path)?, Bytes::from(data))
                .await?;
            Ok(())
        }
        TemplatesCmd::Delete { name } => {
            api.delete_custom_event_template(&name).await?;
            Ok(())
        }
        TemplatesCmd::Download { name, template_type } => {
            console.select_target().await?;
            let template = EventTemplate {
                name,
                description: String::new(),
                provider: String::new(),
                template_type,
            };
            if !template.is_downloadable() {
                bail!("template '{}' cannot be downloaded", template.name);
            }
            console.save(api.download_template(&template).await?).await
        }
    }
}

async fn run_watch(console: &Console, list: WatchCmd) -> anyhow::Result<()> {
    let polling = &console.config.polling;
    match list {
        WatchCmd::Active => {
            console.select_target().await?;
            let view = ActiveRecordingsView::mount(&console.api, polling.active());
            let list = view.list();
            watch_until_interrupted(list.changes(), || {
                println!("--");
                for rec in list.items() {
                    print_recording(&rec);
                }
            })
            .await?;
            view.unmount();
        }
        WatchCmd::Archived => {
            let view = ArchivedRecordingsView::mount(&console.api, polling.archived());
            let list = view.list();
            watch_until_interrupted(list.changes(), || {
                println!("--");
                for rec in list.items() {
                    println!("{}", rec.name);
                }
            })
            .await?;
            view.unmount();
        }
        WatchCmd::Templates => {
            console.select_target().await?;
            let view = TemplatesView::mount(&console.api, polling.templates());
            watch_until_interrupted(view.list().changes(), || {
                println!("--");
                for template in view.visible() {
                    print_template(&template);
                }
            })
            .await?;
            view.unmount();
        }
    }
    Ok(())
}

async fn watch_until_interrupted(
    mut changes: tokio::sync::watch::Receiver<u64>,
    mut render: impl FnMut(),
) -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("waiting for interrupt")?;
                return Ok(());
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                render();
            }
        }
    }
}

async fn run_channel(
    console: &Console,
    command: &str,
    args: Vec<String>,
    disconnect: bool,
) -> anyhow::Result<()> {
    let target = match console.target_arg {
        Some(_) => Some(console.select_target().await?),
        None => None,
    };
    let url = command_url(console.api.authority());
    let (channel, handle) = CommandChannel::spawn(
        url,
        console.auth.clone(),
        console.targets.clone(),
        console.notifications.clone(),
    );
    let channel = channel.with_timeouts(console.config.channel.timeouts());

    let result = channel_session(&channel, target.as_ref(), command, args, disconnect).await;
    handle.shutdown();
    handle.join().await;

    let reply = result?;
    println!("{}", serde_json::to_string_pretty(&reply.payload)?);
    Ok(())
}

/// Point the server at `target` (when given), run `command`, then
/// optionally disconnect again.
async fn channel_session(
    channel: &CommandChannel,
    target: Option<&Target>,
    command: &str,
    args: Vec<String>,
    disconnect: bool,
) -> anyhow::Result<ResponseMessage> {
    if let Some(target) = target {
        channel
            .connect(target)
            .await
            .with_context(|| format!("connecting to {}", target.id()))?;
    }
    let reply = channel.request(command, args).await;
    if disconnect {
        if let Err(e) = channel.disconnect().await {
            tracing::warn!(error = %e, "disconnect failed");
        }
    }
    Ok(reply?)
}

// ── Helpers ────────────────────────────────────────────────────────

async fn find_recording(console: &Console, name: &str) -> anyhow::Result<Recording> {
    console
        .api
        .list_recordings()
        .await?
        .into_iter()
        .find(|r| r.name == name)
        .ok_or_else(|| anyhow!("no recording named '{}'", name))
}

async fn find_archived(console: &Console, name: &str) -> anyhow::Result<SavedRecording> {
    console
        .api
        .list_archived_recordings()
        .await?
        .into_iter()
        .find(|r| r.name == name)
        .ok_or_else(|| anyhow!("no archived recording named '{}'", name))
}

fn file_name(path: &std::path::Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))
}

fn print_recording(rec: &Recording) {
    println!(
        "{}\t{}\t{}\t{}",
        rec.name,
        rec.state,
        rec.start_time_label(),
        rec.duration_label()
    );
}

fn print_template(template: &EventTemplate) {
    println!(
        "{}\t{}\t{}\t{}",
        template.name,
        template.template_type.label(),
        template.provider,
        template.description
    );
}

fn report<R>(outcome: &BatchOutcome<R>) -> anyhow::Result<()> {
    for (name, err) in &outcome.failed {
        eprintln!("{}: {}", name, err);
    }
    if outcome.all_succeeded() {
        Ok(())
    } else {
        bail!(
            "{} of {} failed",
            outcome.failed.len(),
            outcome.failed.len() + outcome.succeeded.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::routing::get;
    use axum::Router;
    use parking_lot::Mutex;

    type Seen = Arc<Mutex<Vec<String>>>;

    /// Command server that records each command name and answers status 0.
    async fn recording_server(seen: Seen) -> std::net::SocketAddr {
        let app = Router::new().route(
            "/api/v1/command",
            get(move |ws: WebSocketUpgrade| {
                let seen = seen.clone();
                async move { ws.on_upgrade(move |socket| answer(socket, seen)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn answer(mut socket: WebSocket, seen: Seen) {
        while let Some(Ok(Message::Text(text))) = socket.recv().await {
            let cmd: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            seen.lock().push(cmd["command"].as_str().unwrap_or_default().to_string());
            let reply = serde_json::json!({
                "id": cmd["id"],
                "commandName": cmd["command"],
                "status": 0,
                "payload": [],
            });
            if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn channel_session_connects_target_first() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let addr = recording_server(seen.clone()).await;
        let targets = TargetContext::new();
        let (channel, handle) = CommandChannel::spawn(
            command_url(&format!("http://{addr}")),
            AuthState::new(),
            targets.clone(),
            Notifications::new(),
        );

        let target = Target::new("service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi", "app", 9091);
        channel_session(&channel, Some(&target), "list", vec![], true)
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec!["connect", "list", "disconnect"]);
        assert_eq!(targets.current(), None);

        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test]
    async fn channel_session_without_target_sends_only_the_command() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let addr = recording_server(seen.clone()).await;
        let (channel, handle) = CommandChannel::spawn(
            command_url(&format!("http://{addr}")),
            AuthState::new(),
            TargetContext::new(),
            Notifications::new(),
        );

        channel_session(&channel, None, "list-saved", vec![], false)
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec!["list-saved"]);

        handle.shutdown();
        handle.join().await;
    }
}
