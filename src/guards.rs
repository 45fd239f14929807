//! Route predicates consulted by the router before navigating.
//!
//! Guards only read session state and never touch the network.

use crate::config::RoutesConfig;
use crate::journal::Journal;
use crate::refresh::RefreshCoordinator;
use crate::session::SessionState;
use log::{debug, info};
use std::sync::{Arc, Mutex, PoisonError};

/// Machine-readable reason attached to a redirect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationReason {
    TokenExpired,
    SessionRequired,
    AlreadySignedIn,
}

impl NavigationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenExpired => "token_expired",
            Self::SessionRequired => "session_required",
            Self::AlreadySignedIn => "already_signed_in",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub target: String,
    pub reason: NavigationReason,
    /// Replace the current history entry instead of pushing
    pub replace: bool,
}

/// The router side of a redirect
pub trait Navigator: Send + Sync {
    fn navigate(&self, navigation: Navigation);
}

/// Navigator that only logs; for hosts without a router
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, navigation: Navigation) {
        info!(
            "Redirect to {} ({})",
            navigation.target,
            navigation.reason.as_str()
        );
    }
}

/// Where the user was headed when they were sent to sign in
#[derive(Debug, Default)]
pub struct RedirectMemory {
    url: Mutex<Option<String>>,
}

impl RedirectMemory {
    pub fn set(&self, url: &str) {
        *self.url.lock().unwrap_or_else(PoisonError::into_inner) = Some(url.to_string());
    }

    pub fn peek(&self) -> Option<String> {
        self.url.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn take(&self) -> Option<String> {
        self.url.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

pub struct SessionGuards {
    state: Arc<SessionState>,
    refresh: Arc<RefreshCoordinator>,
    navigator: Arc<dyn Navigator>,
    redirect: Arc<RedirectMemory>,
    routes: RoutesConfig,
    journal: Arc<Journal>,
}

impl SessionGuards {
    pub fn new(
        state: Arc<SessionState>,
        refresh: Arc<RefreshCoordinator>,
        navigator: Arc<dyn Navigator>,
        redirect: Arc<RedirectMemory>,
        routes: RoutesConfig,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            state,
            refresh,
            navigator,
            redirect,
            routes,
            journal,
        }
    }

    fn signed_in(&self) -> bool {
        self.state.validate().is_ok()
    }

    /// Allow iff a valid session exists; otherwise clear it, remember `path`
    /// and send the user to sign in.
    pub fn require_session(&self, path: &str) -> bool {
        let reason = match self.state.validate() {
            Ok(_) => {
                debug!("Session guard allows {}", path);
                return true;
            }
            Err(reason) => reason,
        };

        info!("Denying {} ({}), redirecting to sign in", path, reason);
        self.refresh.invalidate();
        self.redirect.set(path);
        self.journal.guard_denied("require_session", path);
        self.navigator.navigate(Navigation {
            target: self.routes.sign_in.clone(),
            reason: NavigationReason::SessionRequired,
            replace: false,
        });
        false
    }

    /// Allow iff no valid session exists; a stale one is cleared on the way.
    pub fn require_no_session(&self, path: &str) -> bool {
        if self.signed_in() {
            debug!("Already signed in, leaving {}", path);
            self.journal.guard_denied("require_no_session", path);
            self.navigator.navigate(Navigation {
                target: self.routes.landing.clone(),
                reason: NavigationReason::AlreadySignedIn,
                replace: true,
            });
            return false;
        }

        if self.state.is_present() {
            debug!("Clearing stale session before {}", path);
            self.refresh.invalidate();
        }
        true
    }
}
