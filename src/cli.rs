use crate::Command;
use anyhow::{anyhow, Context as _, Result};
use bugtrack_session::api::RegisterRequest;
use bugtrack_session::{AuthError, AuthService, Config, Method, Navigation, Navigator};
use rustyline::error::ReadlineError;
use rpassword::prompt_password;
use rustyline::DefaultEditor;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

pub struct Context {
    pub config: Config,
    pub auth: AuthService,
    pub navigator: std::sync::Arc<ShellNavigator>,
    pub history_path: PathBuf,
}

/// Keeps the shell's current location and prints every redirect
pub struct ShellNavigator {
    location: Mutex<String>,
}

impl ShellNavigator {
    pub fn new(start: &str) -> Self {
        Self {
            location: Mutex::new(start.to_string()),
        }
    }

    pub fn location(&self) -> String {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn arrive(&self, path: &str) {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = path.to_string();
    }
}

impl Navigator for ShellNavigator {
    fn navigate(&self, navigation: Navigation) {
        println!(
            "\n-> {} ({})",
            navigation.target,
            navigation.reason.as_str()
        );
        self.arrive(&navigation.target);
    }
}

fn prompt_line(label: &str) -> Result<String> {
    let mut rl = DefaultEditor::new()?;
    let line = rl.readline(label)?;
    Ok(line.trim().to_string())
}

/// Read a password from the terminal without echoing it
fn read_password() -> Result<String> {
    let password = prompt_password("Password: ").context("could not read password")?;
    if password.is_empty() {
        return Err(anyhow!("entered password is empty"));
    }
    Ok(password)
}

fn describe(e: &AuthError) -> String {
    format!("{} [{}]", e, e.category())
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!("{}", value),
    }
}

pub fn run_command(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let email = match email {
                Some(e) => e,
                None => prompt_line("Email: ")?,
            };
            let password = match password {
                Some(p) => p,
                None => read_password()?,
            };
            login(ctx, &email, &password)
        }
        Command::Register {
            email,
            first_name,
            last_name,
            password,
        } => {
            let password = match password {
                Some(p) => p,
                None => read_password()?,
            };
            let data = ctx
                .auth
                .register(&RegisterRequest {
                    email,
                    first_name,
                    last_name,
                    password,
                })
                .map_err(|e| anyhow!(describe(&e)))?;
            println!("Registered. Sign in with `bugtrack login`.");
            if !data.is_null() {
                print_json(&data);
            }
            Ok(())
        }
        Command::Logout => {
            ctx.auth.logout();
            println!("Signed out");
            Ok(())
        }
        Command::Whoami => {
            whoami(ctx);
            Ok(())
        }
        Command::Status => {
            status(ctx);
            Ok(())
        }
        Command::Request { method, path, body } => {
            let body = body
                .map(|b| serde_json::from_str::<Value>(&b))
                .transpose()
                .context("--body is not valid JSON")?;
            request(ctx, &method, &path, body.as_ref())
        }
        Command::Ping => {
            if ctx.auth.ping() {
                println!("Backend at {} is up", ctx.config.api_url());
                Ok(())
            } else {
                Err(anyhow!("Backend at {} is unreachable", ctx.config.api_url()))
            }
        }
        Command::Shell => run_repl(ctx),
    }
}

fn login(ctx: &Context, email: &str, password: &str) -> Result<()> {
    let session = ctx
        .auth
        .login(email, password)
        .map_err(|e| anyhow!(describe(&e)))?;
    println!("Signed in as {} ({})", ctx.auth.display_name(), session.email);
    Ok(())
}

fn whoami(ctx: &Context) {
    match ctx.auth.current_user() {
        Some(user) => match serde_json::to_value(&user) {
            Ok(v) => print_json(&v),
            Err(_) => println!("{}", ctx.auth.display_name()),
        },
        None => println!("Not signed in"),
    }
}

fn status(ctx: &Context) {
    let env = ctx.config.active_environment();
    println!("Environment:  {}", ctx.config.environment);
    if let Some(env) = env {
        println!("Application:  {} {}", env.app_name, env.version);
    }
    println!("API:          {}", ctx.config.api_url());
    println!("Signed in:    {}", ctx.auth.is_logged_in());
    println!("Token valid:  {}", ctx.auth.is_token_valid());
    if let Some(exp) = ctx
        .auth
        .state()
        .claims()
        .and_then(|c| c.expires_at_datetime())
    {
        println!("Expires:      {}", exp.to_rfc3339());
    }
    println!("Monitor:      {}", if ctx.auth.monitor_running() { "running" } else { "stopped" });
    println!(
        "Credentials:  {}",
        ctx.config.session.credentials_path().display()
    );
    if let Some(path) = ctx.auth.journal().path() {
        println!("Journal:      {}", path.display());
    }
}

fn request(ctx: &Context, method: &str, path: &str, body: Option<&Value>) -> Result<()> {
    let method: Method = method.parse()?;
    let value: Value = ctx
        .auth
        .request(method, path, body)
        .map_err(|e| anyhow!(describe(&e)))?;
    print_json(&value);
    Ok(())
}

/// Follow a path the way the router would, consulting the guards first
fn goto(ctx: &Context, path: &str) {
    let public = path == ctx.config.routes.sign_in || path == "/register";
    let allowed = if public {
        ctx.auth.guards().require_no_session(path)
    } else {
        ctx.auth.guards().require_session(path)
    };
    if allowed {
        ctx.navigator.arrive(path);
    }
}

pub fn run_repl(ctx: &Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(&ctx.history_path);

    println!("bugtrack shell - type /help for commands, /exit to quit");
    println!("Signed in as: {}", if ctx.auth.is_logged_in() { ctx.auth.display_name() } else { "-".to_string() });

    loop {
        let prompt = format!("{}> ", ctx.navigator.location());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                if handle_command(ctx, line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(parent) = ctx.history_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    rl.save_history(&ctx.history_path)?;
    Ok(())
}

/// `/login <email>`; a password typed inline would land in history
fn shell_login_email<'a>(email: Option<&'a str>, extra: Option<&str>) -> Result<&'a str> {
    match (email, extra) {
        (Some(email), None) => Ok(email),
        (Some(_), Some(_)) => Err(anyhow!(
            "Enter the password at the prompt, not on the command line"
        )),
        (None, _) => Err(anyhow!("Usage: /login <email>")),
    }
}

fn handle_command(ctx: &Context, cmd: &str) -> bool {
    let parts: Vec<&str> = cmd.splitn(3, ' ').collect();
    let arg = |i: usize| parts.get(i).map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match parts[0] {
        "/exit" | "/quit" => return true,
        "/help" => {
            println!("Commands:");
            println!("  /login <email>            - sign in (prompts for the password)");
            println!("  /logout                   - sign out");
            println!("  /whoami                   - show the signed-in user");
            println!("  /status                   - show session state");
            println!("  /get <path>               - authorized GET");
            println!("  /post <path> [json]       - authorized POST");
            println!("  /put <path> [json]        - authorized PUT");
            println!("  /delete <path>            - authorized DELETE");
            println!("  /goto <path>              - navigate through the route guards");
            println!("  /exit                     - quit");
            Ok(())
        }
        "/login" => shell_login_email(arg(1), arg(2)).and_then(|email| {
            let password = read_password()?;
            login(ctx, email, &password)?;
            let target = ctx
                .auth
                .take_redirect_url()
                .unwrap_or_else(|| ctx.config.routes.landing.clone());
            goto(ctx, &target);
            Ok(())
        }),
        "/logout" => {
            ctx.auth.logout();
            ctx.navigator.arrive(&ctx.config.routes.sign_in);
            println!("Signed out");
            Ok(())
        }
        "/whoami" => {
            whoami(ctx);
            Ok(())
        }
        "/status" => {
            status(ctx);
            Ok(())
        }
        "/get" | "/post" | "/put" | "/delete" => match arg(1) {
            Some(path) => {
                let body = arg(2)
                    .map(serde_json::from_str::<Value>)
                    .transpose()
                    .context("Body is not valid JSON");
                body.and_then(|body| request(ctx, &parts[0][1..], path, body.as_ref()))
            }
            None => Err(anyhow!("Usage: {} <path>", parts[0])),
        },
        "/goto" => match arg(1) {
            Some(path) => {
                goto(ctx, path);
                Ok(())
            }
            None => Err(anyhow!("Usage: /goto <path>")),
        },
        other => Err(anyhow!("Unknown command: {} (try /help)", other)),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }
    false
}
