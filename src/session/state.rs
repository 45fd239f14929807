use super::{CredentialStore, Session};
use crate::claims::{Claims, ClaimsDecoder};
use crate::error::AuthError;
use chrono::{DateTime, Utc};
use log::{debug, error};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Observable "current session or none".
///
/// `set` is the only write path and always persists through the credential
/// store before any reader can see the new value.
pub struct SessionState {
    current: RwLock<Option<Session>>,
    store: Arc<dyn CredentialStore>,
    decoder: ClaimsDecoder,
    subscribers: Mutex<Vec<Sender<Option<Session>>>>,
}

impl SessionState {
    /// Build the state, reading the store exactly once
    pub fn rehydrate(store: Arc<dyn CredentialStore>, decoder: ClaimsDecoder) -> Self {
        let restored = store.load().filter(Session::is_present);
        if let Some(session) = &restored {
            debug!("Restored session for user {}", session.user_id);
        }
        Self {
            current: RwLock::new(restored),
            store,
            decoder,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|s| s.is_present())
            .map(|s| s.access_token.clone())
    }

    /// Is a user logged in (token non-empty)
    pub fn is_present(&self) -> bool {
        self.access_token().is_some()
    }

    /// Can requests be authorized right now
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Undecodable tokens and tokens without expiry are invalid
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.validate_at(now).is_ok()
    }

    /// Claims of a usable token, or why there is none
    pub fn validate(&self) -> Result<Claims, AuthError> {
        self.validate_at(Utc::now())
    }

    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let token = self.access_token().ok_or(AuthError::Unauthenticated)?;
        let claims = self
            .decoder
            .decode(&token)
            .ok_or(AuthError::MalformedToken)?;
        if claims.is_expired_at(now) {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    /// Claims of the current token, decoded on every call
    pub fn claims(&self) -> Option<Claims> {
        self.access_token()
            .and_then(|token| self.decoder.decode(&token))
    }

    pub fn decoder(&self) -> &ClaimsDecoder {
        &self.decoder
    }

    /// Replace the session and persist it; subscribers see every transition
    /// in commit order
    pub fn set(&self, session: Option<Session>) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let persisted = match &session {
            Some(s) => self.store.save(s),
            None => self.store.clear(),
        };
        if let Err(e) = persisted {
            error!("Failed to persist session change: {}", e);
        }
        *current = session.clone();
        self.notify(session);
    }

    pub fn subscribe(&self) -> Receiver<Option<Session>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn notify(&self, session: Option<Session>) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropped receivers fall out here
        subscribers.retain(|tx| tx.send(session.clone()).is_ok());
    }
}
