//! REST client for the recording management API.
//!
//! Every request goes through [`ApiClient::execute`], which attaches the
//! latest API and JMX credentials, answers a JMX authentication challenge
//! with exactly one re-authentication and retry, and turns every other
//! failure into a single user-visible notification.

pub mod auth;
pub mod download;

use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub use auth::{ApiCredentials, AuthState};
pub use download::DownloadedFile;

use crate::error::ClientError;
use crate::model::{EventTemplate, Recording, SavedRecording, Target};
use crate::notify::Notifications;
use crate::target::TargetContext;
use crate::validation::RecordingOptions;

const API_PREFIX: &str = "api/v1";
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of a request that is allowed to come back 404.
enum Outcome {
    Done(Response),
    Missing,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    authority: String,
    auth: AuthState,
    targets: TargetContext,
    notifications: Notifications,
    auth_timeout: Duration,
}

impl ApiClient {
    /// Create a client for the API served at `authority`
    /// (e.g. `https://recordings.example.com:8181`).
    pub fn new(
        authority: &str,
        auth: AuthState,
        targets: TargetContext,
        notifications: Notifications,
    ) -> Self {
        let authority = authority.trim_end_matches('/').to_string();
        tracing::debug!(%authority, "using API authority");
        Self {
            http: reqwest::Client::new(),
            authority,
            auth,
            targets,
            notifications,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    /// How long to wait for re-authentication after a JMX challenge.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    pub fn targets(&self) -> &TargetContext {
        &self.targets
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    /// Absolute URL for `/api/v1/<segments...>`, each segment encoded.
    pub fn url(&self, segments: &[&str]) -> String {
        let mut url = format!("{}/{}", self.authority, API_PREFIX);
        for segment in segments {
            url.push('/');
            url.push_str(&encode_segment(segment));
        }
        url
    }

    fn target_url(&self, target: &Target, rest: &[&str]) -> String {
        let id = target.id();
        let mut segments = vec!["targets", id.as_str()];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    // ── Authentication ─────────────────────────────────────────────

    /// Validate an API token. On success the token and scheme become the
    /// credentials for every later request; on failure the scheme the server
    /// advertises (if any) is recorded.
    pub async fn check_auth(&self, token: &str, method: &str) -> Result<bool, ClientError> {
        let mut req = self.http.post(self.url(&["auth"]));
        if !token.is_empty() && !method.is_empty() {
            req = req.header(reqwest::header::AUTHORIZATION, format!("{} {}", method, token));
        }
        let resp = req.send().await?;
        if resp.status().is_success() {
            self.auth.set(token, method);
            tracing::info!(method, "API authentication accepted");
            Ok(true)
        } else {
            let advertised = resp
                .headers()
                .get(auth::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            tracing::warn!(status = resp.status().as_u16(), %advertised, "API authentication rejected");
            self.auth.set_method(advertised);
            Ok(false)
        }
    }

    // ── Active recordings ──────────────────────────────────────────

    pub async fn list_recordings(&self) -> Result<Vec<Recording>, ClientError> {
        let target = self.targets.require()?;
        let url = self.target_url(&target, &["recordings"]);
        self.get_json(url).await
    }

    pub async fn create_recording(&self, options: &RecordingOptions) -> Result<(), ClientError> {
        options.validate()?;
        let target = self.targets.require()?;
        let url = self.target_url(&target, &["recordings"]);
        self.send(|http| {
            let mut form = Form::new()
                .text("recordingName", options.name.clone())
                .text("events", options.events.clone());
            if let Some(secs) = options.duration_secs() {
                form = form.text("duration", secs.to_string());
            }
            Ok(http.post(&url).multipart(form))
        })
        .await?;
        self.notifications.success("Recording created", None);
        Ok(())
    }

    pub async fn create_snapshot(&self) -> Result<(), ClientError> {
        let target = self.targets.require()?;
        let url = self.target_url(&target, &["snapshot"]);
        self.send(|http| Ok(http.post(&url))).await?;
        self.notifications.success("Recording created", None);
        Ok(())
    }

    /// Archive an active recording, returning the archived name.
    pub async fn archive_recording(&self, name: &str) -> Result<String, ClientError> {
        let target = self.targets.require()?;
        let url = self.target_url(&target, &["recordings", name]);
        let resp = self.send(|http| Ok(http.patch(&url).body("SAVE"))).await?;
        Ok(resp.text().await?)
    }

    pub async fn stop_recording(&self, name: &str) -> Result<(), ClientError> {
        let target = self.targets.require()?;
        let url = self.target_url(&target, &["recordings", name]);
        self.send(|http| Ok(http.patch(&url).body("STOP"))).await?;
        Ok(())
    }

    pub async fn delete_recording(&self, name: &str) -> Result<(), ClientError> {
        let target = self.targets.require()?;
        let url = self.target_url(&target, &["recordings", name]);
        self.send(|http| Ok(http.delete(&url))).await?;
        Ok(())
    }

    pub async fn upload_active_recording_to_grafana(&self, name: &str) -> Result<(), ClientError> {
        let target = self.targets.require()?;
        let url = self.target_url(&target, &["recordings", name, "upload"]);
        self.upload_to_grafana(name, url).await
    }

    // ── Archived recordings ────────────────────────────────────────

    pub async fn list_archived_recordings(&self) -> Result<Vec<SavedRecording>, ClientError> {
        self.get_json(self.url(&["recordings"])).await
    }

    pub async fn delete_archived_recording(&self, name: &str) -> Result<(), ClientError> {
        let url = self.url(&["recordings", name]);
        self.send(|http| Ok(http.delete(&url))).await?;
        Ok(())
    }

    /// Upload a local recording file into the archive, returning the name
    /// the server stored it under.
    pub async fn upload_recording(&self, file_name: &str, data: Bytes) -> Result<String, ClientError> {
        let url = self.url(&["recordings"]);
        let resp = self
            .send(|http| {
                let part = file_part(file_name, data.clone())?;
                Ok(http.post(&url).multipart(Form::new().part("recording", part)))
            })
            .await?;
        Ok(resp.text().await?)
    }

    pub async fn upload_archived_recording_to_grafana(&self, name: &str) -> Result<(), ClientError> {
        let url = self.url(&["recordings", name, "upload"]);
        self.upload_to_grafana(name, url).await
    }

    async fn upload_to_grafana(&self, name: &str, url: String) -> Result<(), ClientError> {
        self.notifications
            .info("Upload started", Some(&format!("Recording \"{}\" uploading...", name)));
        self.send(|http| Ok(http.post(&url))).await?;
        self.notifications
            .success("Upload success", Some(&format!("Recording \"{}\" uploaded", name)));
        Ok(())
    }

    // ── Event templates ────────────────────────────────────────────

    /// Templates known to the selected target. A 404 yields an empty list.
    pub async fn list_templates(&self) -> Result<Vec<EventTemplate>, ClientError> {
        let target = self.targets.require()?;
        let url = self.target_url(&target, &["templates"]);
        match self.execute(true, |http| Ok(http.get(&url))).await? {
            Outcome::Done(resp) => decode_json(resp).await,
            Outcome::Missing => Ok(Vec::new()),
        }
    }

    pub async fn add_custom_event_template(&self, file_name: &str, data: Bytes) -> Result<(), ClientError> {
        let url = self.url(&["templates"]);
        self.send(|http| {
            let part = file_part(file_name, data.clone())?;
            Ok(http.post(&url).multipart(Form::new().part("template", part)))
        })
        .await?;
        Ok(())
    }

    /// Delete a custom template. Deleting a template that no longer exists
    /// succeeds.
    pub async fn delete_custom_event_template(&self, name: &str) -> Result<(), ClientError> {
        let url = self.url(&["templates", name]);
        if let Outcome::Missing = self.execute(true, |http| Ok(http.delete(&url))).await? {
            tracing::debug!(template = name, "template already absent");
        }
        Ok(())
    }

    // ── Targets and integrations ───────────────────────────────────

    pub async fn scan_targets(&self) -> Result<Vec<Target>, ClientError> {
        self.get_json(self.url(&["targets"])).await
    }

    pub async fn grafana_datasource_url(&self) -> Result<String, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Body {
            grafana_datasource_url: String,
        }
        let body: Body = self.get_json(self.url(&["grafana_datasource_url"])).await?;
        Ok(body.grafana_datasource_url)
    }

    pub async fn grafana_dashboard_url(&self) -> Result<String, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Body {
            grafana_dashboard_url: String,
        }
        let body: Body = self.get_json(self.url(&["grafana_dashboard_url"])).await?;
        Ok(body.grafana_dashboard_url)
    }

    // ── Downloads ──────────────────────────────────────────────────

    pub async fn download_recording(&self, recording: &SavedRecording) -> Result<DownloadedFile, ClientError> {
        let resp = self
            .send(|http| Ok(http.get(&recording.download_url)))
            .await?;
        Ok(DownloadedFile {
            filename: download::recording_filename(&recording.name),
            content_type: download::RECORDING_CONTENT_TYPE,
            data: resp.bytes().await?,
        })
    }

    pub async fn download_report(&self, recording: &SavedRecording) -> Result<DownloadedFile, ClientError> {
        let resp = self.send(|http| Ok(http.get(&recording.report_url))).await?;
        Ok(DownloadedFile {
            filename: download::report_filename(&recording.name),
            content_type: download::REPORT_CONTENT_TYPE,
            data: resp.bytes().await?,
        })
    }

    pub async fn download_template(&self, template: &EventTemplate) -> Result<DownloadedFile, ClientError> {
        let target = self.targets.require()?;
        let url = self.target_url(
            &target,
            &["templates", &template.name, "type", template.template_type.as_str()],
        );
        let resp = self.send(|http| Ok(http.get(&url))).await?;
        Ok(DownloadedFile {
            filename: download::template_filename(&template.name),
            content_type: download::TEMPLATE_CONTENT_TYPE,
            data: resp.bytes().await?,
        })
    }

    // ── Generic access ─────────────────────────────────────────────

    /// GET `/api/v1/<path>` and decode the JSON body. `path` is used
    /// verbatim, so dynamic segments must already be encoded with
    /// [`encode_segment`].
    pub async fn do_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}/{}/{}", self.authority, API_PREFIX, path.trim_start_matches('/'));
        self.get_json(url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ClientError> {
        let resp = self.send(|http| Ok(http.get(&url))).await?;
        decode_json(resp).await
    }

    async fn send<F>(&self, build: F) -> Result<Response, ClientError>
    where
        F: Fn(&reqwest::Client) -> Result<RequestBuilder, ClientError>,
    {
        match self.execute(false, build).await? {
            Outcome::Done(resp) => Ok(resp),
            Outcome::Missing => Err(ClientError::Http {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: "Not Found".to_string(),
            }),
        }
    }

    /// Issue a request built by `build`, re-building it for the single
    /// retry that follows a JMX authentication challenge.
    async fn execute<F>(&self, allow_missing: bool, build: F) -> Result<Outcome, ClientError>
    where
        F: Fn(&reqwest::Client) -> Result<RequestBuilder, ClientError>,
    {
        let mut challenged = false;
        loop {
            let target = self.targets.current();
            let headers = auth::request_headers(&self.auth, &self.targets, target.as_ref());
            let resp = match build(&self.http)?.headers(headers).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    self.notifications.danger("Request failed", Some(&e.to_string()));
                    return Err(e.into());
                }
            };

            let status = resp.status();
            if status.is_success() {
                return Ok(Outcome::Done(resp));
            }

            if is_jmx_challenge(&resp) {
                if challenged {
                    tracing::warn!(url = %resp.url(), "JMX credentials rejected after retry");
                    self.notify_failure(status, "Target authentication failed");
                    return Err(ClientError::AuthRejected);
                }
                challenged = true;
                tracing::info!(url = %resp.url(), "JMX authentication challenge, awaiting credentials");
                self.targets.set_auth_failure();
                match tokio::time::timeout(self.auth_timeout, self.targets.auth_retry()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => {
                        self.notify_failure(status, "Target authentication was not completed");
                        return Err(e);
                    }
                    Err(_) => {
                        self.targets.abandon_auth();
                        self.notify_failure(status, "Target authentication timed out");
                        return Err(ClientError::AuthAbandoned);
                    }
                }
            }

            if allow_missing && status == StatusCode::NOT_FOUND {
                tracing::debug!(url = %resp.url(), "resource not found");
                return Ok(Outcome::Missing);
            }

            let reason = status.canonical_reason().unwrap_or_default().to_string();
            let message = match resp.text().await {
                Ok(text) if !text.trim().is_empty() => text,
                _ => reason,
            };
            self.notify_failure(status, &message);
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }
    }

    fn notify_failure(&self, status: StatusCode, message: &str) {
        self.notifications.danger(
            &format!("Request failed (Status {})", status.as_u16()),
            Some(message),
        );
    }
}

/// A 407 carrying `X-JMX-Authenticate: Basic`.
fn is_jmx_challenge(resp: &Response) -> bool {
    resp.status() == StatusCode::PROXY_AUTHENTICATION_REQUIRED
        && resp
            .headers()
            .get(auth::JMX_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|scheme| scheme.trim() == "Basic")
}

async fn decode_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let body = resp.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

fn file_part(file_name: &str, data: Bytes) -> Result<Part, ClientError> {
    let mime = mime_guess::from_path(file_name).first_or_octet_stream();
    Ok(Part::bytes(data.to_vec())
        .file_name(file_name.to_string())
        .mime_str(mime.essence_str())?)
}

/// Percent-encode a single path segment.
pub fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).as_bytes() {
                    encoded.push_str(&format!("%{:02X}", b));
                }
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::new(
            "http://localhost:8181/",
            AuthState::new(),
            TargetContext::new(),
            Notifications::new(),
        )
    }

    #[test]
    fn encode_segment_escapes_reserved_characters() {
        assert_eq!(encode_segment("my-rec_1.jfr"), "my-rec_1.jfr");
        assert_eq!(encode_segment("localhost:9091"), "localhost%3A9091");
        assert_eq!(encode_segment("a b/c"), "a%20b%2Fc");
        assert_eq!(encode_segment("é"), "%C3%A9");
    }

    #[test]
    fn url_joins_encoded_segments_under_api_prefix() {
        let api = client();
        assert_eq!(api.authority(), "http://localhost:8181");
        assert_eq!(
            api.url(&["targets", "localhost:9091", "recordings"]),
            "http://localhost:8181/api/v1/targets/localhost%3A9091/recordings"
        );
    }

    #[tokio::test]
    async fn target_scoped_calls_fail_fast_without_target() {
        // Nothing listens on this authority; NoTarget must win before any I/O.
        let api = ApiClient::new(
            "http://127.0.0.1:9",
            AuthState::new(),
            TargetContext::new(),
            Notifications::new(),
        );
        assert!(matches!(api.list_recordings().await, Err(ClientError::NoTarget)));
        assert!(matches!(api.stop_recording("r").await, Err(ClientError::NoTarget)));
        assert!(matches!(api.create_snapshot().await, Err(ClientError::NoTarget)));
        assert!(matches!(api.list_templates().await, Err(ClientError::NoTarget)));
    }

    #[tokio::test]
    async fn invalid_recording_options_rejected_before_target_lookup() {
        let api = client();
        let opts = RecordingOptions::new("bad name!", "template=ALL");
        let err = api.create_recording(&opts).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation { .. }));
    }
}
