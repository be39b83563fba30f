//! travelpass - command line front-end for the travel app's auth server.
//!
//! Stands in for the app's login/signup/home screens: every command calls
//! into `travelpass-core` and reacts to the session outcome it reports.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use travelpass_core::{
    ApiClient, ApiError, Config, KeyringStore, Method, RequestDescriptor, SessionEvent,
};

#[derive(Parser)]
#[command(name = "travelpass", version, about = "Log in to the travel app API and make authenticated requests")]
struct Cli {
    /// API base URL (overrides config and TRAVELPASS_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show whether a session is stored
    Status,
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account
    Signup {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        nickname: Option<String>,
    },
    /// Log in with a Google ID token
    GoogleLogin { id_token: String },
    /// Log out and forget stored tokens
    Logout,
    /// Send an authenticated request and print the response body
    Request {
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load config")?;
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }
    info!(base_url = %config.base_url, "travelpass starting");

    let api = ApiClient::from_config(&config, Arc::new(KeyringStore::new()))?;
    let mut events = api.session().subscribe();

    let result = run(cli.command, &api, &mut config).await;
    report_events(&mut events);

    if let Err(e) = result {
        match e.downcast_ref::<ApiError>() {
            Some(api_error) => eprintln!("Error: {}", api_error.user_message()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Command, api: &ApiClient, config: &mut Config) -> Result<()> {
    match command {
        Command::Status => {
            if api.check_session().await {
                println!("Logged in");
            } else {
                println!("Logged out");
            }
        }
        Command::Login { email } => {
            let email = match email {
                Some(email) => email,
                None => prompt_with_default("Email", config.last_email.as_deref())?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            let pair = api.login(&email, &password).await?;
            println!("Logged in. Access token valid for {} seconds.", pair.expires_in);

            config.last_email = Some(email.trim().to_string());
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
        }
        Command::Signup { email, nickname } => {
            let email = match email {
                Some(email) => email,
                None => prompt("Email")?,
            };
            let nickname = match nickname {
                Some(nickname) => nickname,
                None => prompt("Nickname")?,
            };
            let password = rpassword::prompt_password("Password (8-20 characters): ")?;
            let response = api.signup(&email, &password, &nickname).await?;
            println!("{}", response.message);
        }
        Command::GoogleLogin { id_token } => {
            api.login_with_google(&id_token).await?;
            println!("Logged in with Google.");
        }
        Command::Logout => {
            api.logout().await?;
            println!("Logged out.");
        }
        Command::Request { method, path, data } => {
            let method = method
                .to_uppercase()
                .parse::<Method>()
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            let mut request = RequestDescriptor::new(method, path);
            if let Some(data) = data {
                let body: serde_json::Value =
                    serde_json::from_str(&data).context("--data is not valid JSON")?;
                request = request.with_body(body);
            }

            match api.send(request).await {
                Ok(response) => {
                    let body = response.text().await.context("Failed to read response body")?;
                    println!("{}", body);
                }
                Err(e) => {
                    // A failed refresh clears the store; re-check before reporting
                    if e.is_unauthorized() && !api.check_session().await {
                        println!("Session ended. Please log in again.");
                    }
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

/// Print session transitions that happened during the command
fn report_events(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::LoginSucceeded { expires_at } => {
                info!(expires_at = %expires_at, "Session started");
            }
            SessionEvent::SessionExpired => eprintln!("Your session has expired."),
            SessionEvent::LoggedOut => info!("Session ended by logout"),
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn prompt_with_default(label: &str, default: Option<&str>) -> Result<String> {
    let Some(default) = default else {
        return prompt(label);
    };
    let input = prompt(&format!("{} [{}]", label, default))?;
    if input.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(input)
    }
}
