use crate::guards::{Navigation, NavigationReason, Navigator};
use crate::journal::Journal;
use crate::refresh::RefreshCoordinator;
use log::{debug, info};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Running {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Background check that signs the user out when an idle session's token
/// expires. At most one timer thread runs at a time.
pub struct ExpiryMonitor {
    interval: Duration,
    sign_in: String,
    refresh: Arc<RefreshCoordinator>,
    navigator: Arc<dyn Navigator>,
    journal: Arc<Journal>,
    running: Mutex<Option<Running>>,
}

impl ExpiryMonitor {
    pub fn new(
        interval: Duration,
        sign_in: &str,
        refresh: Arc<RefreshCoordinator>,
        navigator: Arc<dyn Navigator>,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            interval,
            sign_in: sign_in.to_string(),
            refresh,
            navigator,
            journal,
            running: Mutex::new(None),
        }
    }

    /// Start checking; an active timer is stopped first
    pub fn start(&self) {
        self.stop();

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = self.interval;
        let sign_in = self.sign_in.clone();
        let refresh = Arc::clone(&self.refresh);
        let navigator = Arc::clone(&self.navigator);
        let journal = Arc::clone(&self.journal);

        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(reason) = refresh.invalidate_if_expired() {
                        info!("Signing out: {}", reason);
                        journal.forced_logout(NavigationReason::TokenExpired.as_str());
                        navigator.navigate(Navigation {
                            target: sign_in.clone(),
                            reason: NavigationReason::TokenExpired,
                            replace: false,
                        });
                        break;
                    }
                }
                // stop requested, or the monitor itself went away
                _ => break,
            }
        });

        debug!("Expiry monitor started ({:?} interval)", self.interval);
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Running { stop_tx, handle });
    }

    /// Stop the timer and wait for it; stopping a stopped monitor is a no-op
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return;
        };

        let _ = running.stop_tx.send(());
        // The navigator may call back into stop() from the timer thread itself
        if running.handle.thread().id() != thread::current().id() {
            let _ = running.handle.join();
        }
        debug!("Expiry monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for ExpiryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
