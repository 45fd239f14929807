//! Single-flight credential refresh.
//!
//! At most one refresh call is outstanding at any time. Every caller that
//! reports an unauthorized response while a refresh is in flight attaches to
//! that flight and is released with its outcome once the coordinator is back
//! to idle and the session has been written (or cleared).
//!
//! Explicit logouts bump a generation counter; a flight that started under an
//! older generation settles as a failure and never writes its session.

use crate::api::BackendApi;
use crate::error::AuthError;
use crate::journal::Journal;
use crate::session::{Session, SessionState};
use log::{debug, info, warn};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// What a caller waiting on a refresh should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A fresh token is in the session; replay the request once
    Proceed,
    /// The session is gone; surface the original unauthorized error
    Fail,
}

/// One refresh attempt shared by its leader and every follower
struct Flight {
    outcome: Mutex<Option<RefreshOutcome>>,
    settled: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            settled: Condvar::new(),
        }
    }

    fn wait(&self) -> RefreshOutcome {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(done) = *outcome {
                return done;
            }
            outcome = self
                .settled
                .wait(outcome)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn settle(&self, result: RefreshOutcome) {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if outcome.is_none() {
            *outcome = Some(result);
            self.settled.notify_all();
        }
    }
}

enum Phase {
    Idle,
    Refreshing(Arc<Flight>),
}

struct Inner {
    phase: Phase,
    generation: u64,
    refreshes: u64,
}

pub struct RefreshCoordinator {
    inner: Mutex<Inner>,
    state: Arc<SessionState>,
    api: Arc<BackendApi>,
    timeout: Duration,
    journal: Arc<Journal>,
}

impl RefreshCoordinator {
    pub fn new(
        state: Arc<SessionState>,
        api: Arc<BackendApi>,
        timeout: Duration,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                generation: 0,
                refreshes: 0,
            }),
            state,
            api,
            timeout,
            journal,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.lock().phase, Phase::Refreshing(_))
    }

    /// Number of refresh calls issued so far
    pub fn refresh_count(&self) -> u64 {
        self.lock().refreshes
    }

    /// Called after `rejected_token` drew a 401.
    ///
    /// Joins the flight in progress if there is one. If the session already
    /// moved past `rejected_token` the caller proceeds without a new call.
    pub fn refresh(&self, rejected_token: &str) -> RefreshOutcome {
        let (flight, generation) = {
            let mut inner = self.lock();
            if let Phase::Refreshing(flight) = &inner.phase {
                let flight = Arc::clone(flight);
                drop(inner);
                debug!("Joining in-flight token refresh");
                return flight.wait();
            }

            match self.state.access_token() {
                None => return RefreshOutcome::Fail,
                Some(current) if current != rejected_token => {
                    debug!("Token already rotated, replaying without refresh");
                    return RefreshOutcome::Proceed;
                }
                Some(_) => {}
            }

            let flight = Arc::new(Flight::new());
            inner.phase = Phase::Refreshing(Arc::clone(&flight));
            inner.refreshes += 1;
            (flight, inner.generation)
        };

        let mut pending = PendingFlight {
            coordinator: self,
            flight,
            generation,
            done: false,
        };
        let result = self.call_refresh();
        pending.finish(result)
    }

    fn call_refresh(&self) -> Result<Session, AuthError> {
        let refresh_token = self
            .state
            .current()
            .filter(Session::has_refresh_token)
            .map(|s| s.refresh_token)
            .ok_or_else(|| AuthError::RefreshFailed("no refresh token".to_string()))?;

        info!("Refreshing access token");
        let payload = self.api.refresh(&refresh_token, self.timeout)?;
        let session = Session::from(payload);
        if !session.is_present() {
            return Err(AuthError::RefreshFailed("empty access token".to_string()));
        }
        Ok(session)
    }

    /// Commit the result of the flight started under `generation` and release waiters
    fn settle(
        &self,
        flight: &Flight,
        generation: u64,
        result: Result<Session, AuthError>,
    ) -> RefreshOutcome {
        let outcome = {
            let mut inner = self.lock();
            let outcome = if inner.generation != generation {
                info!("Discarding refresh result superseded by logout");
                self.journal.refresh_discarded();
                RefreshOutcome::Fail
            } else {
                match result {
                    Ok(session) => {
                        self.journal.refresh_ok(&session.user_id);
                        self.state.set(Some(session));
                        RefreshOutcome::Proceed
                    }
                    Err(e) => {
                        warn!("Token refresh failed, signing out: {}", e);
                        self.journal.refresh_failed(&e.to_string());
                        inner.generation += 1;
                        self.state.set(None);
                        RefreshOutcome::Fail
                    }
                }
            };
            inner.phase = Phase::Idle;
            outcome
        };
        flight.settle(outcome);
        outcome
    }

    /// Drop the local session and supersede any refresh in flight.
    ///
    /// Every local sign-out goes through here so a late refresh cannot
    /// resurrect the session.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        self.state.set(None);
    }

    /// Install a freshly signed-in session. A refresh still in flight for
    /// the previous session is superseded and cannot overwrite it.
    pub fn establish(&self, session: Session) {
        let mut inner = self.lock();
        inner.generation += 1;
        self.state.set(Some(session));
    }

    /// Clear the session only if it is present and no longer usable.
    ///
    /// Checked under the coordinator lock; while a refresh is in flight the
    /// session is left to the refresh. Returns why the session was cleared.
    pub fn invalidate_if_expired(&self) -> Option<AuthError> {
        let mut inner = self.lock();
        if matches!(inner.phase, Phase::Refreshing(_)) {
            debug!("Expiry check deferred to in-flight refresh");
            return None;
        }
        match self.state.validate() {
            Ok(_) | Err(AuthError::Unauthenticated) => None,
            Err(reason) => {
                inner.generation += 1;
                self.state.set(None);
                Some(reason)
            }
        }
    }
}

/// Settles its flight exactly once, also when the leader unwinds
struct PendingFlight<'a> {
    coordinator: &'a RefreshCoordinator,
    flight: Arc<Flight>,
    generation: u64,
    done: bool,
}

impl PendingFlight<'_> {
    fn finish(&mut self, result: Result<Session, AuthError>) -> RefreshOutcome {
        self.done = true;
        self.coordinator.settle(&self.flight, self.generation, result)
    }
}

impl Drop for PendingFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.coordinator.settle(
                &self.flight,
                self.generation,
                Err(AuthError::RefreshFailed("refresh aborted".to_string())),
            );
        }
    }
}
