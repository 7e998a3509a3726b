//! Client-side checks run before any request reaches the network.

use std::time::Duration;

use crate::error::ClientError;
use crate::model::{EventTemplate, TemplateType};

const MAX_NAME_LEN: usize = 255;

/// Validate a recording name: non-empty, at most 255 characters, ASCII
/// alphanumerics, `_` and `-` only.
pub fn validate_recording_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("must not be empty".into());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!(
            "exceeds {} characters (got {})",
            MAX_NAME_LEN,
            name.len()
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(format!(
            "contains invalid character '{}' (only letters, digits, '_' and '-' allowed)",
            bad
        ));
    }
    Ok(())
}

/// Validate an event specifier string: either a template reference
/// (`template=NAME[,type=CUSTOM|TARGET]`) or a comma-free list of
/// `event:option=value` settings separated by whitespace.
pub fn validate_events(events: &str) -> Result<(), String> {
    let events = events.trim();
    if events.is_empty() {
        return Err("must select a template or at least one event".into());
    }
    if let Some(rest) = events.strip_prefix("template=") {
        let mut parts = rest.split(',');
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err("template name must not be empty".into());
        }
        for part in parts {
            match part.split_once('=') {
                Some(("type", ty)) => {
                    ty.parse::<TemplateType>()?;
                }
                _ => return Err(format!("unexpected template option '{}'", part)),
            }
        }
        return Ok(());
    }
    for spec in events.split_whitespace() {
        let Some((event, option)) = spec.split_once(':') else {
            return Err(format!("'{}' is not of the form event:option=value", spec));
        };
        if event.is_empty() || !option.contains('=') {
            return Err(format!("'{}' is not of the form event:option=value", spec));
        }
    }
    Ok(())
}

/// Parameters for starting a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingOptions {
    pub name: String,
    pub events: String,
    /// `None` means continuous.
    pub duration: Option<Duration>,
}

impl RecordingOptions {
    pub fn new(name: impl Into<String>, events: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: events.into(),
            duration: None,
        }
    }

    /// Record events from a template.
    pub fn from_template(name: impl Into<String>, template: &EventTemplate) -> Self {
        Self::new(name, template.event_specifier())
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Whole seconds for a fixed-duration recording; `None` when continuous.
    pub fn duration_secs(&self) -> Option<u64> {
        self.duration.map(|d| d.as_secs()).filter(|s| *s > 0)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        validate_recording_name(&self.name)
            .map_err(|reason| ClientError::validation("recording name", reason))?;
        validate_events(&self.events)
            .map_err(|reason| ClientError::validation("events", reason))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_names() {
        assert!(validate_recording_name("profiling_run-1").is_ok());
    }

    #[test]
    fn rejects_empty_and_symbols() {
        assert!(validate_recording_name("").is_err());
        let err = validate_recording_name("my rec").unwrap_err();
        assert!(err.contains("' '"), "{}", err);
        assert!(validate_recording_name("a/b").is_err());
    }

    #[test]
    fn rejects_overlong_name() {
        let name = "a".repeat(256);
        assert!(validate_recording_name(&name).is_err());
        assert!(validate_recording_name(&name[..255]).is_ok());
    }

    #[test]
    fn template_specifiers() {
        assert!(validate_events("template=ALL").is_ok());
        assert!(validate_events("template=Profiling,type=TARGET").is_ok());
        assert!(validate_events("template=").is_err());
        assert!(validate_events("template=X,type=BOGUS").is_err());
        assert!(validate_events("template=X,foo=bar").is_err());
    }

    #[test]
    fn event_option_specifiers() {
        assert!(validate_events("jdk.CPULoad:enabled=true jdk.GC:enabled=false").is_ok());
        assert!(validate_events("jdk.CPULoad").is_err());
        assert!(validate_events(":enabled=true").is_err());
        assert!(validate_events("   ").is_err());
    }

    #[test]
    fn duration_zero_is_continuous() {
        let opts = RecordingOptions::new("r", "template=ALL");
        assert_eq!(opts.duration_secs(), None);
        let opts = opts.with_duration(Duration::from_secs(0));
        assert_eq!(opts.duration_secs(), None);
        let opts = opts.with_duration(Duration::from_secs(30));
        assert_eq!(opts.duration_secs(), Some(30));
    }

    #[test]
    fn validate_reports_field() {
        let err = RecordingOptions::new("ok", "").validate().unwrap_err();
        match err {
            ClientError::Validation { field, .. } => assert_eq!(field, "events"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
