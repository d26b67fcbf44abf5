//! authsession -- inspect and drive the stored session from a terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use authsession::config::Config;
use authsession::models::PersonName;
use authsession::{AuthFlow, IdentityBridge, ProviderCredential, StaticIdentityBridge};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Status,
    Check,
    Refresh,
    Whoami,
    Health,
    Login(LoginArgs),
    Logout,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct LoginArgs {
    identity_token: String,
    user_id: String,
    email: Option<String>,
    code: Option<String>,
    name: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    config_path: Option<PathBuf>,
    command: Command,
}

enum Parsed {
    Run(CliArgs),
    Help,
    Version,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Parsed, String> {
    let mut args = args.into_iter();
    let mut config_path = None;
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or("--config requires a path argument")?;
                config_path = Some(PathBuf::from(path));
            }
            "--help" | "-h" => return Ok(Parsed::Help),
            "--version" | "-V" => return Ok(Parsed::Version),
            "status" => command = Some(Command::Status),
            "check" => command = Some(Command::Check),
            "refresh" => command = Some(Command::Refresh),
            "whoami" => command = Some(Command::Whoami),
            "health" => command = Some(Command::Health),
            "logout" => command = Some(Command::Logout),
            "login" => {
                command = Some(Command::Login(parse_login(&mut args)?));
            }
            other => return Err(format!("Unknown argument: {other}")),
        }
    }

    let command = command.ok_or("No command given")?;
    Ok(Parsed::Run(CliArgs {
        config_path,
        command,
    }))
}

fn parse_login(args: &mut impl Iterator<Item = String>) -> Result<LoginArgs, String> {
    let mut login = LoginArgs::default();
    while let Some(flag) = args.next() {
        let mut value = || args.next().ok_or(format!("{flag} requires a value"));
        match flag.as_str() {
            "--identity-token" => login.identity_token = value()?,
            "--user-id" => login.user_id = value()?,
            "--email" => login.email = Some(value()?),
            "--code" => login.code = Some(value()?),
            "--name" => login.name = Some(value()?),
            other => return Err(format!("Unknown login option: {other}")),
        }
    }
    if login.identity_token.is_empty() {
        return Err("login requires --identity-token".to_string());
    }
    if login.user_id.is_empty() {
        return Err("login requires --user-id".to_string());
    }
    Ok(login)
}

fn print_usage() {
    println!(
        "\
authsession {version} -- session credential tool

USAGE:
    authsession [OPTIONS] <COMMAND>

COMMANDS:
    status                 Show the stored session
    check                  Restore the session, refreshing if needed
    refresh                Force a token refresh
    whoami                 Fetch the signed-in user's profile
    health                 Probe the backend
    login                  Exchange a provider credential for a session
        --identity-token <TOKEN>   Provider identity token (required)
        --user-id <ID>             Provider user id (required)
        --email <EMAIL>
        --name <NAME>
        --code <CODE>              Provider authorization code
    logout                 Sign out and clear the stored session

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: authsession.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    AUTHSESSION_CONFIG     Alternative to --config flag
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(Parsed::Run(cli)) => cli,
        Ok(Parsed::Help) => {
            print_usage();
            return Ok(());
        }
        Ok(Parsed::Version) => {
            println!("authsession {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run with --help for usage information.");
            std::process::exit(2);
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?
        .block_on(run(cli))
}

async fn run(cli: CliArgs) -> anyhow::Result<()> {
    // Allow AUTHSESSION_CONFIG env var as alternative to --config flag
    let config_path = cli
        .config_path
        .or_else(|| std::env::var("AUTHSESSION_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("authsession.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    init_tracing(&config);
    log_env_overrides(&config);
    config.validate()?;

    let bridge: Arc<dyn IdentityBridge> = match &cli.command {
        Command::Login(login) => Arc::new(StaticIdentityBridge::new(credential_from(login))),
        _ => Arc::new(StaticIdentityBridge::unavailable()),
    };
    let flow = AuthFlow::from_config(&config, bridge)?;

    match cli.command {
        Command::Status => {
            let status = flow.session().status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Check => {
            if flow.initialize().await {
                println!("Session ready");
            } else {
                anyhow::bail!("No usable session; sign in again");
            }
        }
        Command::Refresh => {
            flow.session().refresh_token().await?;
            println!("Token refreshed");
        }
        Command::Whoami => {
            let user = flow.current_user().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::Health => {
            let health = flow.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Command::Login(_) => {
            let identity = flow.sign_in().await?;
            println!("{}", serde_json::to_string_pretty(&identity)?);
        }
        Command::Logout => {
            flow.sign_out().await;
            println!("Signed out");
        }
    }
    Ok(())
}

fn credential_from(login: &LoginArgs) -> ProviderCredential {
    ProviderCredential {
        external_id: login.user_id.clone(),
        email: login.email.clone(),
        full_name: login.name.as_deref().map(split_name),
        identity_token: login.identity_token.clone(),
        authorization_code: login.code.clone(),
    }
}

fn split_name(name: &str) -> PersonName {
    let mut parts = name.trim().splitn(2, char::is_whitespace);
    PersonName {
        given_name: parts.next().filter(|p| !p.is_empty()).map(str::to_string),
        family_name: parts.next().map(str::trim).filter(|p| !p.is_empty()).map(str::to_string),
    }
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn log_env_overrides(config: &Config) {
    let mut overrides: Vec<_> = config.env_overrides.all().iter().collect();
    overrides.sort();
    for (setting, env_var) in overrides {
        info!(setting = %setting, env_var = %env_var, "Setting taken from environment");
    }
}

fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("authsession={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
