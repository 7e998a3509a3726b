use serde::{Deserialize, Serialize};

/// A remote JVM that recordings can be managed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub connect_url: String,
    #[serde(default)]
    pub alias: String,
    pub port: u16,
}

impl Target {
    pub fn new(connect_url: impl Into<String>, alias: impl Into<String>, port: u16) -> Self {
        Self {
            connect_url: connect_url.into(),
            alias: alias.into(),
            port,
        }
    }

    /// Identifier used in REST paths and as the `connect` argument.
    pub fn id(&self) -> String {
        format!("{}:{}", self.connect_url, self.port)
    }

    /// Parse a `host:port` target id back into a target with no alias.
    pub fn from_id(id: &str) -> Option<Self> {
        let (host, port) = id.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port = port.parse().ok()?;
        Some(Self::new(host, "", port))
    }

    /// Human-readable label, `alias (host:port)`.
    pub fn label(&self) -> String {
        if self.alias.is_empty() {
            self.id()
        } else {
            format!("{} ({})", self.alias, self.id())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
        };
        f.write_str(s)
    }
}

/// An active recording owned by the target JVM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub state: RecordingState,
    #[serde(default)]
    pub start_time: i64,
    /// Milliseconds; zero means continuous.
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default)]
    pub to_disk: bool,
    #[serde(default)]
    pub max_size: i64,
    #[serde(default)]
    pub max_age: i64,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub report_url: String,
}

impl Recording {
    /// Running or starting; only these can be stopped.
    pub fn is_active(&self) -> bool {
        matches!(self.state, RecordingState::Running | RecordingState::Starting)
    }

    pub fn duration_label(&self) -> String {
        if self.duration == 0 {
            "Continuous".to_string()
        } else {
            format!("{}s", self.duration as f64 / 1000.0)
        }
    }

    pub fn start_time_label(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.start_time)
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_else(|| self.start_time.to_string())
    }

    pub fn as_saved(&self) -> SavedRecording {
        SavedRecording {
            name: self.name.clone(),
            download_url: self.download_url.clone(),
            report_url: self.report_url.clone(),
        }
    }
}

/// A recording archived beyond the lifetime of the JVM session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecording {
    pub name: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub report_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateType {
    Custom,
    Target,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "CUSTOM",
            Self::Target => "TARGET",
        }
    }

    /// Title-cased form used in listings.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Custom => "Custom",
            Self::Target => "Target",
        }
    }
}

impl std::str::FromStr for TemplateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CUSTOM" => Ok(Self::Custom),
            "TARGET" => Ok(Self::Target),
            other => Err(format!("unknown template type '{}'", other)),
        }
    }
}

/// A named set of JFR event settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub provider: String,
    #[serde(rename = "type")]
    pub template_type: TemplateType,
}

impl EventTemplate {
    pub fn is_deletable(&self) -> bool {
        self.template_type == TemplateType::Custom
    }

    /// The built-in `ALL` target template has no document to download.
    pub fn is_downloadable(&self) -> bool {
        !(self.name == "ALL" && self.template_type == TemplateType::Target)
    }

    /// Event specifier selecting this template for a new recording.
    pub fn event_specifier(&self) -> String {
        format!("template={},type={}", self.name, self.template_type.as_str())
    }
}

/// Rows that can be tracked in a list by a stable key.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Recording {
    fn key(&self) -> &str {
        &self.name
    }
}

impl Keyed for SavedRecording {
    fn key(&self) -> &str {
        &self.name
    }
}

impl Keyed for EventTemplate {
    fn key(&self) -> &str {
        &self.name
    }
}

impl Keyed for Target {
    fn key(&self) -> &str {
        &self.connect_url
    }
}
