use crate::api::{http_error, BackendApi};
use crate::error::AuthError;
use crate::http::{HttpRequest, HttpResponse, Method};
use crate::refresh::{RefreshCoordinator, RefreshOutcome};
use crate::session::SessionState;
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// The only path from feature code to the backend.
///
/// Attaches the bearer token, and on a 401 waits for the refresh coordinator
/// before replaying the request exactly once.
pub struct AuthorizedRequestExecutor {
    api: Arc<BackendApi>,
    state: Arc<SessionState>,
    refresh: Arc<RefreshCoordinator>,
    timeout: Duration,
}

impl AuthorizedRequestExecutor {
    pub fn new(
        api: Arc<BackendApi>,
        state: Arc<SessionState>,
        refresh: Arc<RefreshCoordinator>,
        timeout: Duration,
    ) -> Self {
        Self {
            api,
            state,
            refresh,
            timeout,
        }
    }

    pub fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, AuthError> {
        let token = self.state.access_token();
        let resp = self.execute(method, path, body, token.as_deref())?;
        if resp.status != 401 {
            return decode(resp);
        }

        let unauthorized = http_error(&resp, "Unauthorized");
        let rejected = token.unwrap_or_default();
        match self.refresh.refresh(&rejected) {
            RefreshOutcome::Proceed => {
                debug!("Replaying {} {} after refresh", method, path);
                let token = self.state.access_token();
                // a second 401 is returned as-is
                decode(self.execute(method, path, body, token.as_deref())?)
            }
            RefreshOutcome::Fail => Err(unauthorized),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        self.request(Method::Get, path, None)
    }

    pub fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, AuthError> {
        self.request(Method::Post, path, Some(body))
    }

    pub fn put<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, AuthError> {
        self.request(Method::Put, path, Some(body))
    }

    pub fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        self.request(Method::Delete, path, None)
    }

    /// One authorized attempt with no refresh handling
    pub fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, AuthError> {
        let token = self.state.access_token();
        self.execute(method, path, body, token.as_deref())
    }

    fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<HttpResponse, AuthError> {
        let mut request = HttpRequest::new(method, self.api.resolve(path))
            .header("Content-Type", "application/json")
            .timeout(self.timeout);
        if let Some(token) = token {
            request = request.header("Authorization", &format!("Bearer {}", token));
        }
        if let Some(body) = body {
            request = request.json(body.clone());
        }
        Ok(self.api.transport().send(&request)?)
    }
}

fn decode<T: DeserializeOwned>(resp: HttpResponse) -> Result<T, AuthError> {
    if !resp.is_success() {
        return Err(http_error(&resp, "Request failed"));
    }
    let body = if resp.body.trim().is_empty() {
        "null"
    } else {
        resp.body.as_str()
    };
    serde_json::from_str(body).map_err(|e| AuthError::Decode(e.to_string()))
}
