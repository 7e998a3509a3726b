use serde::Serialize;
use tokio::sync::broadcast;

const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Success,
    Info,
    Warning,
    Danger,
}

/// A user-visible message (the console's "toast").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: Level,
    pub title: String,
    pub message: Option<String>,
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(msg) if !msg.is_empty() => write!(f, "{}: {}", self.title, msg),
            _ => f.write_str(&self.title),
        }
    }
}

/// Fan-out hub for notifications. Every subscriber sees every notification
/// published after it subscribed; publishing with no subscribers is fine.
#[derive(Clone)]
pub struct Notifications {
    tx: broadcast::Sender<Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn success(&self, title: &str, message: Option<&str>) {
        tracing::info!(title, detail = message, "success");
        self.publish(Level::Success, title, message);
    }

    pub fn info(&self, title: &str, message: Option<&str>) {
        tracing::info!(title, detail = message, "info");
        self.publish(Level::Info, title, message);
    }

    pub fn warning(&self, title: &str, message: Option<&str>) {
        tracing::warn!(title, detail = message, "warning");
        self.publish(Level::Warning, title, message);
    }

    pub fn danger(&self, title: &str, message: Option<&str>) {
        tracing::error!(title, detail = message, "danger");
        self.publish(Level::Danger, title, message);
    }

    fn publish(&self, level: Level, title: &str, message: Option<&str>) {
        // No receivers is not an error.
        let _ = self.tx.send(Notification {
            level,
            title: title.to_string(),
            message: message.map(str::to_string),
        });
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscribers() {
        let n = Notifications::new();
        n.danger("Request failed", None);
    }

    #[tokio::test]
    async fn subscribers_receive_level_and_text() {
        let n = Notifications::new();
        let mut rx = n.subscribe();

        n.success("Recording created", None);
        n.danger("Request failed (Status 500)", Some("Internal Server Error"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.level, Level::Success);
        assert_eq!(first.to_string(), "Recording created");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.level, Level::Danger);
        assert_eq!(
            second.to_string(),
            "Request failed (Status 500): Internal Server Error"
        );
    }
}
