//! The session facade the rest of the client talks to.
//!
//! `AuthService` owns the whole chain: credential store, session state,
//! refresh coordinator, request executor, expiry monitor and route guards.
//! It is built once per process by [`AuthService::bootstrap`].

use crate::api::{BackendApi, LoginRequest, RegisterRequest, LOGOUT_PATH};
use crate::claims::ClaimsDecoder;
use crate::config::Config;
use crate::error::AuthError;
use crate::executor::AuthorizedRequestExecutor;
use crate::guards::{Navigator, RedirectMemory, SessionGuards};
use crate::http::{Method, Transport};
use crate::journal::Journal;
use crate::monitor::ExpiryMonitor;
use crate::refresh::RefreshCoordinator;
use crate::session::{CredentialStore, Session, SessionState};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

const ADMIN_ROLE: &str = "Admin";

/// Who is signed in, merged from the session record and the token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub roles: Vec<String>,
}

pub struct AuthService {
    api: Arc<BackendApi>,
    state: Arc<SessionState>,
    refresh: Arc<RefreshCoordinator>,
    executor: AuthorizedRequestExecutor,
    monitor: ExpiryMonitor,
    guards: SessionGuards,
    redirect: Arc<RedirectMemory>,
    journal: Arc<Journal>,
}

impl AuthService {
    /// Wire everything up and rehydrate the session from `store`.
    ///
    /// The store is read here and nowhere else. A restored session starts
    /// the expiry monitor right away.
    pub fn bootstrap(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        journal: Arc<Journal>,
    ) -> Self {
        let session = &config.session;
        let api = Arc::new(BackendApi::new(
            transport,
            &config.api_url(),
            session.request_timeout(),
        ));
        let state = Arc::new(SessionState::rehydrate(
            store,
            ClaimsDecoder::new(config.claims.clone()),
        ));
        let refresh = Arc::new(RefreshCoordinator::new(
            Arc::clone(&state),
            Arc::clone(&api),
            session.refresh_timeout(),
            Arc::clone(&journal),
        ));
        let executor = AuthorizedRequestExecutor::new(
            Arc::clone(&api),
            Arc::clone(&state),
            Arc::clone(&refresh),
            session.request_timeout(),
        );
        let monitor = ExpiryMonitor::new(
            session.expiry_check_interval(),
            &config.routes.sign_in,
            Arc::clone(&refresh),
            Arc::clone(&navigator),
            Arc::clone(&journal),
        );
        let redirect = Arc::new(RedirectMemory::default());
        let guards = SessionGuards::new(
            Arc::clone(&state),
            Arc::clone(&refresh),
            navigator,
            Arc::clone(&redirect),
            config.routes.clone(),
            Arc::clone(&journal),
        );

        let service = Self {
            api,
            state,
            refresh,
            executor,
            monitor,
            guards,
            redirect,
            journal,
        };
        if service.state.is_present() {
            service.monitor.start();
        }
        service
    }

    /// Exchange credentials for a session
    pub fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let payload = self.api.login(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;
        let session = Session::from(payload);
        if !session.is_present() {
            return Err(AuthError::Api {
                status: None,
                message: "Login failed".to_string(),
            });
        }

        self.refresh.establish(session.clone());
        self.monitor.start();
        self.journal.login(&session.user_id);
        info!("Signed in as {}", session.email);
        Ok(session)
    }

    /// Create an account; does not sign in
    pub fn register(&self, request: &RegisterRequest) -> Result<Value, AuthError> {
        self.api.register(request)
    }

    /// Sign out. The backend is told on a best-effort basis; the local
    /// session is cleared whatever it answers.
    pub fn logout(&self) {
        let remote_ok = if self.state.is_present() {
            match self
                .executor
                .send_once(Method::Post, LOGOUT_PATH, Some(&json!({})))
            {
                Ok(resp) if resp.is_success() => true,
                Ok(resp) => {
                    warn!("Logout request answered HTTP {}", resp.status);
                    false
                }
                Err(e) => {
                    warn!("Logout request failed: {}", e);
                    false
                }
            }
        } else {
            false
        };

        self.monitor.stop();
        self.refresh.invalidate();
        self.journal.logout(remote_ok);
        info!("Signed out");
    }

    /// Authorized backend call with transparent refresh
    pub fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, AuthError> {
        self.executor.request(method, path, body)
    }

    pub fn executor(&self) -> &AuthorizedRequestExecutor {
        &self.executor
    }

    pub fn guards(&self) -> &SessionGuards {
        &self.guards
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn subscribe(&self) -> Receiver<Option<Session>> {
        self.state.subscribe()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state.current()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.is_present()
    }

    pub fn is_token_valid(&self) -> bool {
        self.state.is_valid()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    pub fn monitor_running(&self) -> bool {
        self.monitor.is_running()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        let session = self.state.current().filter(Session::is_present)?;
        let claims = self.state.claims().unwrap_or_default();

        let roles = if session.roles.is_empty() {
            claims.roles.clone()
        } else {
            session.roles.iter().cloned().collect()
        };
        let pick = |primary: &str, fallback: &str| {
            if primary.is_empty() {
                fallback.to_string()
            } else {
                primary.to_string()
            }
        };

        Some(UserProfile {
            user_id: pick(&session.user_id, &claims.user_id),
            email: pick(&session.email, &claims.email),
            full_name: claims.display_name(),
            first_name: claims.first_name,
            last_name: claims.last_name,
            roles,
        })
    }

    /// Name to greet the user with: full name, then email, then "User"
    pub fn display_name(&self) -> String {
        match self.current_user() {
            Some(user) if !user.full_name.is_empty() => user.full_name,
            Some(user) if !user.email.is_empty() => user.email,
            _ => "User".to_string(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.current_user()
            .is_some_and(|u| u.roles.iter().any(|r| r == role))
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.current_user()
            .is_some_and(|u| u.roles.iter().any(|r| roles.contains(&r.as_str())))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    pub fn set_redirect_url(&self, url: &str) {
        self.redirect.set(url);
    }

    /// The remembered destination, cleared on read
    pub fn take_redirect_url(&self) -> Option<String> {
        self.redirect.take()
    }

    /// Is the backend reachable
    pub fn ping(&self) -> bool {
        self.api.health()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

impl Drop for AuthService {
    fn drop(&mut self) {
        self.monitor.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::guards::NavigationReason;
    use crate::http::HttpResponse;
    use crate::session::MemoryCredentialStore;
    use crate::testing::{
        auth_envelope, json_response, make_token, session_for, token_expiring_in,
        RecordingNavigator, ScriptedTransport,
    };
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    fn service(
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryCredentialStore>,
    ) -> (AuthService, Arc<RecordingNavigator>) {
        let mut config = Config::default();
        config.override_api_url("http://api");
        let navigator = Arc::new(RecordingNavigator::default());
        let service = AuthService::bootstrap(
            &config,
            transport,
            store,
            navigator.clone(),
            Arc::new(Journal::disabled()),
        );
        (service, navigator)
    }

    #[test]
    fn test_login_then_guarded_route() {
        let token = token_expiring_in(3600);
        let issued = token.clone();
        let transport = ScriptedTransport::new(move |req| {
            assert!(req.url.ends_with("/users/login"));
            Ok(json_response(200, auth_envelope("u-1", &issued, "r-1")))
        });
        let store = Arc::new(MemoryCredentialStore::new());
        let (auth, navigator) = service(transport, store.clone());
        assert!(!auth.is_logged_in());
        assert!(!auth.monitor_running());

        let session = auth.login("a@b.com", "pw").unwrap();
        assert_eq!(session.access_token, token);
        assert!(auth.is_logged_in());
        assert!(auth.is_token_valid());
        assert!(auth.monitor_running());
        assert_eq!(store.load().unwrap().access_token, token);

        assert!(auth.guards().require_session("/projects"));
        assert!(navigator.snapshot().is_empty());
        assert!(auth.has_role("Developer"));
        assert!(!auth.is_admin());
        assert_eq!(auth.display_name(), "Ada Lovelace");
    }

    #[test]
    fn test_login_failure_keeps_anonymous() {
        let transport = ScriptedTransport::new(|_| {
            Ok(json_response(400, json!({"message": "Invalid credentials"})))
        });
        let (auth, _) = service(transport, Arc::new(MemoryCredentialStore::new()));

        let err = auth.login("a@b.com", "nope").unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("Invalid credentials"));
        assert!(!auth.is_logged_in());
        assert!(!auth.monitor_running());
    }

    #[test]
    fn test_bootstrap_restores_and_starts_monitor() {
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .save(&session_for("u-1", &token_expiring_in(3600)))
            .unwrap();
        let (auth, _) = service(ScriptedTransport::ok_empty(), store);
        assert!(auth.is_logged_in());
        assert!(auth.monitor_running());
        assert_eq!(auth.current_user().unwrap().user_id, "u-1");
    }

    #[test]
    fn test_logout_clears_even_when_backend_fails() {
        let transport = ScriptedTransport::new(|_| Err(TransportError::Network("down".into())));
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .save(&session_for("u-1", &token_expiring_in(3600)))
            .unwrap();
        let (auth, _) = service(transport.clone(), store.clone());

        auth.logout();
        assert!(!auth.is_logged_in());
        assert!(store.load().is_none());
        assert!(!auth.monitor_running());

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].url.ends_with("/users/logout"));
        assert!(calls[0].bearer().is_some());
    }

    #[test]
    fn test_logout_does_not_refresh_on_401() {
        let transport = ScriptedTransport::new(|_| Ok(json_response(401, json!({}))));
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .save(&session_for("u-1", &token_expiring_in(3600)))
            .unwrap();
        let (auth, _) = service(transport.clone(), store);

        auth.logout();
        assert!(!auth.is_logged_in());
        assert_eq!(transport.calls().len(), 1);
        assert!(!auth.is_refreshing());
    }

    #[test]
    fn test_logout_wins_over_inflight_refresh() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let transport = ScriptedTransport::new(move |req| {
            if req.url.ends_with("/users/refresh-token") {
                let _ = release_rx.lock().unwrap().recv();
                let fresh = token_expiring_in(3600);
                return Ok(json_response(200, auth_envelope("u-1", &fresh, "r-2")));
            }
            if req.url.ends_with("/users/logout") {
                return Ok(json_response(200, json!({"success": true})));
            }
            Ok(json_response(401, json!({})))
        });
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .save(&session_for("u-1", &token_expiring_in(3600)))
            .unwrap();
        let (auth, _) = service(transport, store.clone());
        let auth = Arc::new(auth);

        let worker = {
            let auth = Arc::clone(&auth);
            thread::spawn(move || auth.request::<Value>(Method::Get, "/projects", None))
        };
        for _ in 0..200 {
            if auth.is_refreshing() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(auth.is_refreshing());

        auth.logout();
        release_tx.send(()).unwrap();

        let result = worker.join().unwrap();
        assert_eq!(result.unwrap_err().status(), Some(401));
        assert!(!auth.is_logged_in());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_login_wins_over_previous_users_refresh() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let transport = ScriptedTransport::new(move |req| {
            if req.url.ends_with("/users/refresh-token") {
                let _ = release_rx.lock().unwrap().recv();
                let fresh = token_expiring_in(3600);
                return Ok(json_response(200, auth_envelope("user-a", &fresh, "r-a")));
            }
            if req.url.ends_with("/users/login") {
                let token = token_expiring_in(3600);
                return Ok(json_response(200, auth_envelope("user-b", &token, "r-b")));
            }
            Ok(json_response(401, json!({})))
        });
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .save(&session_for("user-a", &token_expiring_in(3600)))
            .unwrap();
        let (auth, _) = service(transport, store.clone());
        let auth = Arc::new(auth);

        let worker = {
            let auth = Arc::clone(&auth);
            thread::spawn(move || auth.request::<Value>(Method::Get, "/projects", None))
        };
        for _ in 0..200 {
            if auth.is_refreshing() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let refreshing = auth.is_refreshing();

        let login = auth.login("b@b.com", "pw");
        release_tx.send(()).unwrap();
        let result = worker.join().unwrap();

        assert!(refreshing);
        assert_eq!(login.unwrap().user_id, "user-b");
        assert!(result.unwrap_err().is_unauthorized());
        assert_eq!(auth.current_session().unwrap().user_id, "user-b");
        assert_eq!(store.load().unwrap().user_id, "user-b");
    }

    #[test]
    fn test_current_user_uses_token_claims() {
        let token = make_token(json!({
            "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier": "u-9",
            "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name": "Grace Hopper",
            "role": ["Admin", "Developer"],
            "exp": chrono::Utc::now().timestamp() + 600,
        }));
        let store = Arc::new(MemoryCredentialStore::new());
        let mut session = session_for("u-9", &token);
        session.roles.clear();
        session.email = String::new();
        store.save(&session).unwrap();
        let (auth, _) = service(ScriptedTransport::ok_empty(), store);

        let user = auth.current_user().unwrap();
        assert_eq!(user.full_name, "Grace Hopper");
        assert!(auth.is_admin());
        assert!(auth.has_any_role(&["Tester", "Developer"]));
        assert!(!auth.has_any_role(&["Tester"]));
        assert_eq!(auth.display_name(), "Grace Hopper");
    }

    #[test]
    fn test_display_name_falls_back() {
        let (auth, _) = service(ScriptedTransport::ok_empty(), Arc::new(MemoryCredentialStore::new()));
        assert_eq!(auth.display_name(), "User");
        assert!(auth.current_user().is_none());

        let store = Arc::new(MemoryCredentialStore::new());
        let token = make_token(json!({ "exp": chrono::Utc::now().timestamp() + 600 }));
        store.save(&session_for("u-1", &token)).unwrap();
        let (auth, _) = service(ScriptedTransport::ok_empty(), store);
        assert_eq!(auth.display_name(), "a@b.com");
    }

    #[test]
    fn test_redirect_url_is_taken_once() {
        let (auth, navigator) = service(ScriptedTransport::ok_empty(), Arc::new(MemoryCredentialStore::new()));
        assert!(!auth.guards().require_session("/tickets/3"));
        assert_eq!(navigator.snapshot()[0].reason, NavigationReason::SessionRequired);
        assert_eq!(auth.take_redirect_url(), Some("/tickets/3".to_string()));
        assert!(auth.take_redirect_url().is_none());

        auth.set_redirect_url("/projects");
        assert_eq!(auth.take_redirect_url(), Some("/projects".to_string()));
    }

    #[test]
    fn test_ping() {
        let up = ScriptedTransport::new(|req| {
            assert!(req.url.ends_with("/health"));
            assert_eq!(req.timeout, Some(Duration::from_secs(5)));
            Ok(HttpResponse {
                status: 204,
                body: String::new(),
            })
        });
        let (auth, _) = service(up, Arc::new(MemoryCredentialStore::new()));
        assert!(auth.ping());

        let down = ScriptedTransport::new(|_| Err(TransportError::Timeout));
        let (auth, _) = service(down, Arc::new(MemoryCredentialStore::new()));
        assert!(!auth.ping());
    }
}
