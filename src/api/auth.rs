use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use crate::model::Target;
use crate::target::TargetContext;

pub const JMX_AUTHORIZATION: &str = "X-JMX-Authorization";
pub const JMX_AUTHENTICATE: &str = "X-JMX-Authenticate";
pub const WWW_AUTHENTICATE: &str = "X-WWW-Authenticate";

/// Bearer token and scheme used to authenticate against the API itself
/// (as opposed to JMX credentials for a target).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub token: String,
    pub method: String,
}

/// Latest known API credentials, shared by the REST client and the
/// command channel. Every request reads the current value.
#[derive(Clone, Default)]
pub struct AuthState {
    inner: Arc<RwLock<AuthInner>>,
}

#[derive(Default)]
struct AuthInner {
    token: Option<String>,
    method: Option<String>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>, method: impl Into<String>) -> Self {
        let state = Self::new();
        state.set(token, method);
        state
    }

    pub fn set(&self, token: impl Into<String>, method: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.token = Some(token.into());
        inner.method = Some(method.into());
    }

    /// Record the scheme the server asked for without a usable token.
    pub fn set_method(&self, method: impl Into<String>) {
        self.inner.write().method = Some(method.into());
    }

    pub fn method(&self) -> Option<String> {
        self.inner.read().method.clone()
    }

    /// Both token and method, when known and non-empty.
    pub fn credentials(&self) -> Option<ApiCredentials> {
        let inner = self.inner.read();
        match (&inner.token, &inner.method) {
            (Some(token), Some(method)) if !token.is_empty() && !method.is_empty() => {
                Some(ApiCredentials {
                    token: token.clone(),
                    method: method.clone(),
                })
            }
            _ => None,
        }
    }

    /// `Authorization` header value, e.g. `Bearer abc`.
    pub fn authorization(&self) -> Option<String> {
        self.credentials()
            .map(|c| format!("{} {}", c.method, c.token))
    }
}

/// Build the headers for one request attempt: the API authorization plus,
/// if the target has stored credentials, the target-specific JMX
/// authorization.
pub fn request_headers(
    auth: &AuthState,
    targets: &TargetContext,
    target: Option<&Target>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(value) = auth.authorization() {
        match HeaderValue::from_str(&value) {
            Ok(v) => {
                headers.insert(AUTHORIZATION, v);
            }
            Err(e) => tracing::warn!(error = %e, "API token is not a valid header value"),
        }
    }
    if let Some(target) = target {
        if let Some(creds) = targets.credentials(target) {
            if let Ok(v) = HeaderValue::from_str(&format!("Basic {}", creds)) {
                headers.insert(JMX_AUTHORIZATION, v);
            }
        }
    }
    headers
}
