//! Fixtures shared by the unit tests.

use crate::error::TransportError;
use crate::guards::{Navigation, Navigator};
use crate::http::{HttpRequest, HttpResponse, Transport};
use crate::session::Session;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

/// Three-segment token whose payload is `claims`
pub fn make_token(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

/// Token for `a@b.com` that expires `secs` from now (negative: already expired)
pub fn token_expiring_in(secs: i64) -> String {
    make_token(json!({
        "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier": "u-1",
        "sub": "a@b.com",
        "firstName": "Ada",
        "lastName": "Lovelace",
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/role": ["Developer"],
        "exp": Utc::now().timestamp() + secs,
        // keeps tokens minted in the same second distinct
        "jti": uuid::Uuid::new_v4().to_string(),
    }))
}

pub fn session_for(user_id: &str, token: &str) -> Session {
    Session {
        user_id: user_id.to_string(),
        email: "a@b.com".to_string(),
        roles: ["Developer".to_string()].into_iter().collect(),
        access_token: token.to_string(),
        refresh_token: "refresh-1".to_string(),
        expiration: String::new(),
    }
}

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string(),
    }
}

/// Successful login/refresh envelope
pub fn auth_envelope(user_id: &str, token: &str, refresh_token: &str) -> Value {
    json!({
        "success": true,
        "message": "ok",
        "data": {
            "userId": user_id,
            "email": "a@b.com",
            "roles": ["Developer"],
            "token": token,
            "refreshToken": refresh_token,
            "expiration": "2030-01-01T00:00:00Z"
        },
        "errors": null
    })
}

/// Transport that answers from a closure and records every request
pub struct ScriptedTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers everything with `200 {}`
    pub fn ok_empty() -> Arc<Self> {
        Self::new(|_| Ok(json_response(200, json!({}))))
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    navigations: Mutex<Vec<Navigation>>,
}

impl RecordingNavigator {
    pub fn snapshot(&self) -> Vec<Navigation> {
        self.navigations.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, navigation: Navigation) {
        self.navigations.lock().unwrap().push(navigation);
    }
}
