pub mod state;
pub mod store;

pub use state::SessionState;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The signed-in identity and its credentials.
///
/// Expiry is read from the access token's claims, never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Expiration as reported by the backend; informational only
    #[serde(default)]
    pub expiration: String,
}

impl Session {
    /// A session counts as present only with a non-empty access token
    pub fn is_present(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}
