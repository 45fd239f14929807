//! Session and credential coordination for the bug tracking client.
//!
//! Feature code only ever sees [`AuthService`]: it signs users in and out,
//! authorizes backend calls (refreshing the token once for any number of
//! concurrent 401s), signs idle users out when their token expires, and
//! answers route guards.

pub mod api;
pub mod auth;
pub mod claims;
pub mod config;
pub mod error;
pub mod executor;
pub mod guards;
pub mod http;
pub mod journal;
pub mod monitor;
pub mod refresh;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthService, UserProfile};
pub use claims::{Claims, ClaimsDecoder};
pub use config::Config;
pub use error::{AuthError, ErrorCategory, TransportError};
pub use executor::AuthorizedRequestExecutor;
pub use guards::{LogNavigator, Navigation, NavigationReason, Navigator, SessionGuards};
pub use http::{HttpRequest, HttpResponse, Method, Transport, UnknownMethod, UreqTransport};
pub use journal::Journal;
pub use monitor::ExpiryMonitor;
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use session::{CredentialStore, FileCredentialStore, MemoryCredentialStore, Session, SessionState};
