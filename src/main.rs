mod cli;

use anyhow::Result;
use bugtrack_session::config::{self, Config};
use bugtrack_session::{AuthService, FileCredentialStore, Journal, UreqTransport};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bugtrack", about = "Bug tracker session client")]
pub struct Args {
    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "BUGTRACK_ENV", help = "Environment: development, staging, production")]
    pub env: Option<String>,

    #[arg(long, env = "BUGTRACK_API_URL", help = "Override the backend API URL")]
    pub api_url: Option<String>,

    #[arg(long, help = "Debug output (HTTP details and session transitions)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sign in and persist the session
    Login {
        #[arg(long)]
        email: Option<String>,
        #[arg(long, env = "BUGTRACK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long, env = "BUGTRACK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign out here and on the backend
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Show session and token state
    Status,
    /// Authorized request, e.g. `request GET /projects`
    Request {
        method: String,
        path: String,
        #[arg(long, help = "JSON body")]
        body: Option<String>,
    },
    /// Check that the backend is reachable
    Ping,
    /// Interactive shell keeping one session alive
    Shell,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut cfg = Config::load(args.config.as_deref())?;
    if let Some(env) = &args.env {
        cfg.select_environment(env);
    }
    if let Some(url) = &args.api_url {
        cfg.override_api_url(url);
    }
    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error: {}", e);
        }
        return Err(anyhow::anyhow!("Invalid configuration ({} errors)", errors.len()));
    }

    if args.debug {
        eprintln!("[DEBUG] Environment: {}", cfg.environment);
        eprintln!("[DEBUG] API URL: {}", cfg.api_url());
        eprintln!(
            "[DEBUG] Credentials: {}",
            cfg.session.credentials_path().display()
        );
    }

    let journal = if cfg.session.journal_enabled {
        Journal::open(&cfg.session.journal_path())?
    } else {
        Journal::disabled()
    };
    let store = FileCredentialStore::new(
        &cfg.session.credentials_path(),
        cfg.session.persist_days,
    );
    let navigator = Arc::new(cli::ShellNavigator::new(&cfg.routes.landing));
    let auth = AuthService::bootstrap(
        &cfg,
        Arc::new(UreqTransport::new()),
        Arc::new(store),
        navigator.clone(),
        Arc::new(journal),
    );

    let ctx = cli::Context {
        config: cfg,
        auth,
        navigator,
        history_path: config::data_dir().join("history.txt"),
    };

    match args.command {
        Command::Shell => cli::run_repl(&ctx),
        command => cli::run_command(&ctx, command),
    }
}
