//! Wire types and unauthenticated calls to the tracker backend.

use crate::error::AuthError;
use crate::http::{HttpRequest, HttpResponse, Method, Transport};
use crate::session::Session;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const LOGIN_PATH: &str = "/users/login";
pub const REGISTER_PATH: &str = "/users/register";
pub const REFRESH_PATH: &str = "/users/refresh-token";
pub const LOGOUT_PATH: &str = "/users/logout";
pub const HEALTH_PATH: &str = "/health";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Envelope every backend endpoint answers with
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<Value>,
}

/// `data` of a successful login or refresh
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    pub token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expiration: String,
}

impl From<AuthPayload> for Session {
    fn from(payload: AuthPayload) -> Self {
        Session {
            user_id: payload.user_id,
            email: payload.email,
            roles: payload.roles.unwrap_or_default().into_iter().collect(),
            access_token: payload.token,
            refresh_token: payload.refresh_token,
            expiration: payload.expiration,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Unauthenticated backend endpoints: login, register, refresh, health
pub struct BackendApi {
    transport: Arc<dyn Transport>,
    base_url: String,
    request_timeout: Duration,
}

impl BackendApi {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str, request_timeout: Duration) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Relative paths join the base URL; absolute URLs pass through
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn post(&self, path: &str, body: Value, timeout: Duration) -> Result<HttpResponse, AuthError> {
        let request = HttpRequest::new(Method::Post, self.resolve(path))
            .header("Content-Type", "application/json")
            .json(body)
            .timeout(timeout);
        Ok(self.transport.send(&request)?)
    }

    pub fn login(&self, request: &LoginRequest) -> Result<AuthPayload, AuthError> {
        let body = serde_json::to_value(request).map_err(|e| AuthError::Decode(e.to_string()))?;
        let resp = self.post(LOGIN_PATH, body, self.request_timeout)?;
        unwrap_envelope(resp, "Login failed")
    }

    pub fn register(&self, request: &RegisterRequest) -> Result<Value, AuthError> {
        let body = serde_json::to_value(request).map_err(|e| AuthError::Decode(e.to_string()))?;
        let resp = self.post(REGISTER_PATH, body, self.request_timeout)?;
        let envelope = unwrap_envelope_optional::<Value>(resp, "Registration failed")?;
        Ok(envelope.unwrap_or(Value::Null))
    }

    /// Exchange a refresh token for a new session; `timeout` bounds the call
    pub fn refresh(&self, refresh_token: &str, timeout: Duration) -> Result<AuthPayload, AuthError> {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: refresh_token.to_string(),
        })
        .map_err(|e| AuthError::Decode(e.to_string()))?;
        let resp = self.post(REFRESH_PATH, body, timeout)?;
        unwrap_envelope(resp, "Token refresh failed")
    }

    /// Any 2xx from the health endpoint means the server is up
    pub fn health(&self) -> bool {
        let request = HttpRequest::new(Method::Get, self.resolve(HEALTH_PATH)).timeout(HEALTH_TIMEOUT);
        match self.transport.send(&request) {
            Ok(resp) => resp.is_success(),
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }
}

/// Message from an error body (`{"message": ...}`), if it has one
pub fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("message")?
        .as_str()
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Map a non-2xx response to an error, keeping status and raw body
pub fn http_error(resp: &HttpResponse, fallback: &str) -> AuthError {
    AuthError::Http {
        status: resp.status,
        message: error_message(&resp.body).unwrap_or_else(|| fallback.to_string()),
        body: resp.body.clone(),
    }
}

fn unwrap_envelope<T: DeserializeOwned>(resp: HttpResponse, fallback: &str) -> Result<T, AuthError> {
    let status = resp.status;
    unwrap_envelope_optional(resp, fallback)?.ok_or_else(|| AuthError::Api {
        status: Some(status),
        message: fallback.to_string(),
    })
}

fn unwrap_envelope_optional<T: DeserializeOwned>(
    resp: HttpResponse,
    fallback: &str,
) -> Result<Option<T>, AuthError> {
    if !resp.is_success() {
        warn!("{} (HTTP {})", fallback, resp.status);
        return Err(http_error(&resp, fallback));
    }

    let envelope: ApiResponse<T> =
        serde_json::from_str(&resp.body).map_err(|e| AuthError::Decode(e.to_string()))?;
    if !envelope.success {
        return Err(AuthError::Api {
            status: Some(resp.status),
            message: envelope
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| fallback.to_string()),
        });
    }
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{auth_envelope, json_response, ScriptedTransport};
    use serde_json::json;

    fn api(transport: Arc<ScriptedTransport>) -> BackendApi {
        BackendApi::new(transport, "http://localhost:5279/api/", Duration::from_secs(5))
    }

    #[test]
    fn test_resolve() {
        let api = api(ScriptedTransport::ok_empty());
        assert_eq!(api.resolve("/projects"), "http://localhost:5279/api/projects");
        assert_eq!(api.resolve("projects/1"), "http://localhost:5279/api/projects/1");
        assert_eq!(api.resolve("https://files.example.com/a"), "https://files.example.com/a");
    }

    #[test]
    fn test_login_success() {
        let transport = ScriptedTransport::new(|req| {
            assert_eq!(req.body.as_ref().unwrap()["email"], "a@b.com");
            assert!(req.bearer().is_none());
            Ok(json_response(200, auth_envelope("u-1", "t.t.t", "r-1")))
        });
        let payload = api(transport.clone())
            .login(&LoginRequest {
                email: "a@b.com".into(),
                password: "x".into(),
            })
            .unwrap();
        assert_eq!(payload.user_id, "u-1");
        assert_eq!(payload.refresh_token, "r-1");
        assert_eq!(transport.calls()[0].url, "http://localhost:5279/api/users/login");

        let session = Session::from(payload);
        assert!(session.roles.contains("Developer"));
    }

    #[test]
    fn test_login_unsuccessful_envelope_uses_message() {
        let transport = ScriptedTransport::new(|_| {
            Ok(json_response(200, json!({ "success": false, "message": "Bad credentials" })))
        });
        let err = api(transport)
            .login(&LoginRequest {
                email: "a@b.com".into(),
                password: "x".into(),
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "Bad credentials");
        assert_eq!(err.status(), Some(200));
    }

    #[test]
    fn test_login_http_error_keeps_status() {
        let transport = ScriptedTransport::new(|_| Ok(json_response(400, json!({ "errors": ["x"] }))));
        let err = api(transport)
            .login(&LoginRequest {
                email: "a@b.com".into(),
                password: "x".into(),
            })
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("Login failed"));
    }

    #[test]
    fn test_refresh_success_without_data_is_error() {
        let transport = ScriptedTransport::new(|_| Ok(json_response(200, json!({ "success": true }))));
        let err = api(transport)
            .refresh("r-1", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, AuthError::Api { .. }));
    }

    #[test]
    fn test_refresh_sends_token_and_timeout() {
        let transport = ScriptedTransport::new(|req| {
            assert_eq!(req.body.as_ref().unwrap()["refreshToken"], "r-1");
            assert_eq!(req.timeout, Some(Duration::from_millis(250)));
            Ok(json_response(200, auth_envelope("u-1", "n.n.n", "r-2")))
        });
        let payload = api(transport)
            .refresh("r-1", Duration::from_millis(250))
            .unwrap();
        assert_eq!(payload.token, "n.n.n");
    }

    #[test]
    fn test_register_returns_data() {
        let transport = ScriptedTransport::new(|req| {
            assert_eq!(req.body.as_ref().unwrap()["firstName"], "Ada");
            Ok(json_response(200, json!({ "success": true, "data": { "id": "u-3" } })))
        });
        let data = api(transport)
            .register(&RegisterRequest {
                email: "ada@x.com".into(),
                first_name: "Ada".into(),
                last_name: "L".into(),
                password: "pw".into(),
            })
            .unwrap();
        assert_eq!(data["id"], "u-3");
    }

    #[test]
    fn test_health() {
        assert!(api(ScriptedTransport::ok_empty()).health());
        let down = ScriptedTransport::new(|_| {
            Err(crate::error::TransportError::Network("refused".into()))
        });
        assert!(!api(down).health());
        let failing = ScriptedTransport::new(|_| Ok(json_response(503, json!({}))));
        assert!(!api(failing).health());
    }

    #[test]
    fn test_envelope_without_data_field() {
        let resp = json_response(200, json!({ "success": true, "message": "ok" }));
        let data = unwrap_envelope_optional::<AuthPayload>(resp, "Login failed").unwrap();
        assert!(data.is_none());
    }

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(r#"{"message":"nope"}"#), Some("nope".to_string()));
        assert_eq!(error_message(r#"{"message":""}"#), None);
        assert_eq!(error_message("<html>"), None);
    }
}
