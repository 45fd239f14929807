use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// One deployment target of the backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub production: bool,
    pub api_url: String,
    #[serde(default)]
    pub file_server_url: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_app_name() -> String {
    "Bug Tracking System".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Timing and persistence knobs for the session core
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_expiry_check_interval_secs")]
    pub expiry_check_interval_secs: u64,
    /// Where the credential record lives; defaults under the user data dir
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    /// Lifetime of the persisted record, independent of token expiry
    #[serde(default = "default_persist_days")]
    pub persist_days: u32,
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub journal_enabled: bool,
}

fn default_refresh_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_expiry_check_interval_secs() -> u64 {
    30
}

fn default_persist_days() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_timeout_ms: default_refresh_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            expiry_check_interval_secs: default_expiry_check_interval_secs(),
            credentials_path: None,
            persist_days: default_persist_days(),
            journal_path: None,
            journal_enabled: default_true(),
        }
    }
}

impl SessionConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn expiry_check_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_check_interval_secs)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_path
            .clone()
            .unwrap_or_else(|| data_dir().join("session.json"))
    }

    pub fn journal_path(&self) -> PathBuf {
        self.journal_path
            .clone()
            .unwrap_or_else(|| data_dir().join("journal.jsonl"))
    }
}

/// Navigation targets the guards redirect to
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutesConfig {
    #[serde(default = "default_sign_in")]
    pub sign_in: String,
    #[serde(default = "default_landing")]
    pub landing: String,
}

fn default_sign_in() -> String {
    "/login".to_string()
}

fn default_landing() -> String {
    "/".to_string()
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            sign_in: default_sign_in(),
            landing: default_landing(),
        }
    }
}

/// Claim names to look up in the token payload, in priority order
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClaimKeys {
    #[serde(default = "default_user_id_keys")]
    pub user_id: Vec<String>,
    #[serde(default = "default_email_keys")]
    pub email: Vec<String>,
    #[serde(default = "default_first_name_keys")]
    pub first_name: Vec<String>,
    #[serde(default = "default_last_name_keys")]
    pub last_name: Vec<String>,
    #[serde(default = "default_full_name_keys")]
    pub full_name: Vec<String>,
    #[serde(default = "default_roles_keys")]
    pub roles: Vec<String>,
    #[serde(default = "default_expires_at_keys")]
    pub expires_at: Vec<String>,
}

const XML_SOAP_CLAIMS: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims";
const MS_CLAIMS: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims";

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn default_user_id_keys() -> Vec<String> {
    vec![
        format!("{}/nameidentifier", XML_SOAP_CLAIMS),
        "userId".to_string(),
        "nameid".to_string(),
    ]
}

fn default_email_keys() -> Vec<String> {
    vec![
        "sub".to_string(),
        "email".to_string(),
        format!("{}/emailaddress", XML_SOAP_CLAIMS),
    ]
}

fn default_first_name_keys() -> Vec<String> {
    vec![
        "firstName".to_string(),
        "given_name".to_string(),
        format!("{}/givenname", XML_SOAP_CLAIMS),
    ]
}

fn default_last_name_keys() -> Vec<String> {
    vec![
        "lastName".to_string(),
        "family_name".to_string(),
        format!("{}/surname", XML_SOAP_CLAIMS),
    ]
}

fn default_full_name_keys() -> Vec<String> {
    vec![format!("{}/name", XML_SOAP_CLAIMS), "name".to_string()]
}

fn default_roles_keys() -> Vec<String> {
    vec![
        format!("{}/role", MS_CLAIMS),
        "roles".to_string(),
        "role".to_string(),
    ]
}

fn default_expires_at_keys() -> Vec<String> {
    keys(&["exp"])
}

impl Default for ClaimKeys {
    fn default() -> Self {
        Self {
            user_id: default_user_id_keys(),
            email: default_email_keys(),
            first_name: default_first_name_keys(),
            last_name: default_last_name_keys(),
            full_name: default_full_name_keys(),
            roles: default_roles_keys(),
            expires_at: default_expires_at_keys(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "builtin_environments")]
    pub environments: HashMap<String, EnvironmentConfig>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    #[serde(default)]
    pub claims: ClaimKeys,
}

fn default_environment() -> String {
    "development".to_string()
}

fn builtin_environments() -> HashMap<String, EnvironmentConfig> {
    let mut environments = HashMap::new();

    environments.insert(
        "development".to_string(),
        EnvironmentConfig {
            production: false,
            api_url: "http://localhost:5279/api".to_string(),
            file_server_url: "http://localhost:5279".to_string(),
            app_name: default_app_name(),
            version: default_version(),
        },
    );

    environments.insert(
        "staging".to_string(),
        EnvironmentConfig {
            production: false,
            api_url: "http://system-bug-ticketing.runasp.net/api".to_string(),
            file_server_url: "http://system-bug-ticketing.runasp.net".to_string(),
            app_name: "Bug Tracking System (Staging)".to_string(),
            version: default_version(),
        },
    );

    environments.insert(
        "production".to_string(),
        EnvironmentConfig {
            production: true,
            api_url: "http://system-bug-ticketing.runasp.net/api".to_string(),
            file_server_url: "http://system-bug-ticketing.runasp.net".to_string(),
            app_name: default_app_name(),
            version: default_version(),
        },
    );

    environments
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            environments: builtin_environments(),
            session: SessionConfig::default(),
            routes: RoutesConfig::default(),
            claims: ClaimKeys::default(),
        }
    }
}

/// Per-user data directory for credentials, journal and shell history
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("bugtrack"))
        .unwrap_or_else(|| PathBuf::from(".bugtrack"))
}

impl Config {
    /// Load configuration from default paths, then `explicit` if given.
    /// Priority: explicit > project (.bugtrack/config.toml) > user (<config dir>/bugtrack/config.toml)
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        if let Some(dir) = dirs::config_dir() {
            let user_config = dir.join("bugtrack").join("config.toml");
            if user_config.exists() {
                merge_values(&mut merged, read_value(&user_config)?);
            }
        }

        let project_config = Path::new(".bugtrack").join("config.toml");
        if project_config.exists() {
            merge_values(&mut merged, read_value(&project_config)?);
        }

        if let Some(path) = explicit {
            merge_values(&mut merged, read_value(path)?);
        }

        let mut config: Config = merged.try_into().context("Invalid configuration")?;
        config.restore_builtin_environments();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.restore_builtin_environments();
        Ok(config)
    }

    /// A file that names only some environments still gets the built-in ones
    fn restore_builtin_environments(&mut self) {
        for (name, env) in builtin_environments() {
            self.environments.entry(name).or_insert(env);
        }
    }

    /// Select an environment by name (e.g. from `--env`)
    pub fn select_environment(&mut self, name: &str) {
        self.environment = name.to_lowercase();
    }

    /// Override the API URL of the active environment
    pub fn override_api_url(&mut self, url: &str) {
        let name = self.environment.clone();
        let entry = self
            .environments
            .entry(name)
            .or_insert_with(|| EnvironmentConfig {
                production: false,
                api_url: String::new(),
                file_server_url: String::new(),
                app_name: default_app_name(),
                version: default_version(),
            });
        entry.api_url = url.trim_end_matches('/').to_string();
    }

    pub fn active_environment(&self) -> Option<&EnvironmentConfig> {
        self.environments.get(&self.environment)
    }

    /// API base URL of the active environment, falling back to development
    pub fn api_url(&self) -> String {
        self.active_environment()
            .map(|env| env.api_url.clone())
            .unwrap_or_else(|| "http://localhost:5279/api".to_string())
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        match self.active_environment() {
            None => errors.push(ValidationError {
                field: "environment".to_string(),
                message: format!(
                    "Unknown environment '{}'. Available: {:?}",
                    self.environment,
                    self.environments.keys().collect::<Vec<_>>()
                ),
            }),
            Some(env) => {
                if !env.api_url.starts_with("http://") && !env.api_url.starts_with("https://") {
                    errors.push(ValidationError {
                        field: format!("environments.{}.api_url", self.environment),
                        message: format!("Expected an http(s) URL, got '{}'", env.api_url),
                    });
                }
            }
        }

        let positive = [
            ("session.refresh_timeout_ms", self.session.refresh_timeout_ms),
            ("session.request_timeout_ms", self.session.request_timeout_ms),
            (
                "session.expiry_check_interval_secs",
                self.session.expiry_check_interval_secs,
            ),
            ("session.persist_days", u64::from(self.session.persist_days)),
        ];
        for (field, value) in positive {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "Must be greater than 0".to_string(),
                });
            }
        }

        for (field, route) in [
            ("routes.sign_in", &self.routes.sign_in),
            ("routes.landing", &self.routes.landing),
        ] {
            if !route.starts_with('/') {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("Route must start with '/', got '{}'", route),
                });
            }
        }

        let claim_lists = [
            ("claims.user_id", &self.claims.user_id),
            ("claims.email", &self.claims.email),
            ("claims.first_name", &self.claims.first_name),
            ("claims.last_name", &self.claims.last_name),
            ("claims.full_name", &self.claims.full_name),
            ("claims.roles", &self.claims.roles),
            ("claims.expires_at", &self.claims.expires_at),
        ];
        for (field, list) in claim_lists {
            if list.is_empty() {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "At least one claim key is required".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn read_value(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config {}", path.display()))
}

/// Deep-merge `overlay` into `base`; tables merge key by key, everything else is replaced
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api_url(), "http://localhost:5279/api");
        assert_eq!(config.routes.sign_in, "/login");
        assert_eq!(config.session.expiry_check_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
environment = "production"

[session]
refresh_timeout_ms = 2500
"#,
        )
        .unwrap();
        assert_eq!(config.session.refresh_timeout_ms, 2500);
        assert_eq!(config.session.request_timeout_ms, 30_000);
        assert!(config.active_environment().unwrap().production);
        assert!(config.environments.contains_key("development"));
        assert_eq!(config.claims.expires_at, vec!["exp".to_string()]);
    }

    #[test]
    fn test_custom_environment_and_override() {
        let mut config = Config::from_toml_str(
            r#"
environment = "local"

[environments.local]
api_url = "http://127.0.0.1:9000/api"
"#,
        )
        .unwrap();
        assert_eq!(config.api_url(), "http://127.0.0.1:9000/api");
        assert_eq!(config.active_environment().unwrap().app_name, "Bug Tracking System");

        config.override_api_url("https://bugs.example.com/api/");
        assert_eq!(config.api_url(), "https://bugs.example.com/api");
    }

    #[test]
    fn test_validate_unknown_environment() {
        let mut config = Config::default();
        config.select_environment("Nowhere");
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "environment");
    }

    #[test]
    fn test_validate_zero_interval_and_bad_route() {
        let mut config = Config::default();
        config.session.expiry_check_interval_secs = 0;
        config.routes.sign_in = "login".to_string();
        config.claims.expires_at.clear();
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "session.expiry_check_interval_secs"));
        assert!(errors.iter().any(|e| e.message.contains("start with '/'")));
        assert!(errors.iter().any(|e| e.field == "claims.expires_at"));
    }

    #[test]
    fn test_validate_bad_api_url() {
        let mut config = Config::default();
        config.override_api_url("localhost:5279");
        let errors = config.validate().unwrap_err();
        assert!(errors[0].field.ends_with("api_url"));
    }

    #[test]
    fn test_merge_values_is_deep() {
        let mut base: toml::Value = toml::from_str(
            r#"
[session]
refresh_timeout_ms = 1
request_timeout_ms = 2
"#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
[session]
request_timeout_ms = 5
"#,
        )
        .unwrap();
        merge_values(&mut base, overlay);
        assert_eq!(base["session"]["refresh_timeout_ms"].as_integer(), Some(1));
        assert_eq!(base["session"]["request_timeout_ms"].as_integer(), Some(5));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[routes]\nsign_in = \"/signin\"\n[session]\ncredentials_path = \"/tmp/x.json\"\n",
        )
        .unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.routes.sign_in, "/signin");
        assert_eq!(config.routes.landing, "/");
        assert_eq!(config.session.credentials_path(), PathBuf::from("/tmp/x.json"));
    }
}
