//! Dentgate CLI
//!
//! Command-line access to the dentgate clinic API through the authenticated
//! gateway.
//!
//! # Usage
//!
//! ```bash
//! # Log in and store the token pair
//! dentgate login --email front-desk@example.com
//!
//! # Fetch a resource, refreshing the access token if it expired
//! dentgate request GET patients/42
//!
//! # Fire eight requests at once; an expired token is refreshed only once
//! dentgate request GET appointments --query day=today --concurrency 8
//! ```

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dentgate_cli::config::{self, CliConfig};
use dentgate_core::{
    AuthGateway, CredentialStore, GatewayError, Method, RequestEnvelope, Secret, create_store,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "dentgate")]
#[command(about = "Authenticated access to the dentgate clinic API")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "DENTGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the returned token pair
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "DENTGATE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Remove stored credentials
    Logout,

    /// Show which credentials are stored
    Status,

    /// Send an authorized request
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Path relative to the API base URL (e.g., patients/42)
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query", value_parser = parse_query_pair)]
        query: Vec<(String, String)>,

        /// Number of identical requests to send concurrently
        #[arg(short = 'n', long, default_value_t = 1)]
        concurrency: usize,
    },

    /// Force a token refresh
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(&config.log_level, cli.verbose);
    info!("Loaded configuration from {:?}", config.config_path);

    let gateway = build_gateway(&config)?;

    match cli.command {
        Commands::Login { email, password } => login(&gateway, &email, password).await,
        Commands::Logout => logout(&gateway),
        Commands::Status => status(&gateway, &config),
        Commands::Request {
            method,
            path,
            data,
            query,
            concurrency,
        } => request(gateway, &method, &path, data.as_deref(), query, concurrency).await,
        Commands::Refresh => refresh(&gateway).await,
    }
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_gateway(config: &CliConfig) -> Result<AuthGateway> {
    let store = create_store(config.store, config.credentials_path.clone())
        .with_context(|| format!("Failed to open {} credential store", config.store))?;

    AuthGateway::new(config.gateway.clone(), store).context("Failed to build gateway")
}

fn parse_query_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

async fn login(gateway: &AuthGateway, email: &str, password: Option<String>) -> Result<()> {
    let Some(password) = password else {
        bail!("Password required: pass --password or set DENTGATE_PASSWORD");
    };
    let password = Secret::new(password);

    gateway
        .login(email, &password)
        .await
        .map_err(explain)
        .context("Login failed")?;

    println!("Logged in as {}", email);
    Ok(())
}

fn logout(gateway: &AuthGateway) -> Result<()> {
    gateway.logout().context("Failed to clear credentials")?;
    println!("Logged out");
    Ok(())
}

fn status(gateway: &AuthGateway, config: &CliConfig) -> Result<()> {
    let store = gateway.store();
    let has_access = store.get_access_token()?.is_some();
    let has_refresh = store.get_refresh_token()?.is_some();

    println!("API:           {}", config.gateway.base_url);
    println!("Store:         {}", config.store);
    println!("Access token:  {}", if has_access { "present" } else { "missing" });
    println!("Refresh token: {}", if has_refresh { "present" } else { "missing" });

    if let Some(issued) = store.issued_at()? {
        let age = Utc::now() - issued;
        println!(
            "Issued:        {} ({} min ago)",
            issued.format("%Y-%m-%d %H:%M:%S UTC"),
            age.num_minutes()
        );
    }

    if !(has_access && has_refresh) {
        println!("Not logged in. Run `dentgate login --email <EMAIL>`.");
    }
    Ok(())
}

async fn request(
    gateway: AuthGateway,
    method: &str,
    path: &str,
    data: Option<&str>,
    query: Vec<(String, String)>,
    concurrency: usize,
) -> Result<()> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", method))?;
    let body = data
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("Request body is not valid JSON")?;

    let gateway = Arc::new(gateway);
    let mut tasks = JoinSet::new();

    for index in 0..concurrency.max(1) {
        let mut envelope = RequestEnvelope::new(method.clone(), path);
        envelope.query = query.clone();
        envelope.body = body.clone();

        let gateway = Arc::clone(&gateway);
        tasks.spawn(async move { (index, gateway.authorized_request(envelope).await) });
    }

    let mut results = Vec::with_capacity(concurrency);
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.context("Request task failed")?);
    }
    results.sort_by_key(|(index, _)| *index);

    let total = results.len();
    let mut failures = 0;
    for (index, result) in results {
        let prefix = if total > 1 {
            format!("[{}] ", index)
        } else {
            String::new()
        };
        match result {
            Ok(response) => {
                println!("{}{}", prefix, response.status);
                println!("{}", response.text());
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}{:#}", prefix, explain(e));
            }
        }
    }

    if gateway.coordinator().refresh_count() > 0 {
        info!(
            "Access token refreshed {} time(s) for {} request(s)",
            gateway.coordinator().refresh_count(),
            total
        );
    }

    if failures > 0 {
        bail!("{} of {} request(s) failed", failures, total);
    }
    Ok(())
}

async fn refresh(gateway: &AuthGateway) -> Result<()> {
    gateway
        .refresh_now()
        .await
        .map_err(explain)
        .context("Refresh failed")?;
    println!("Access token refreshed");
    Ok(())
}

/// Add a login hint to terminal authentication failures.
fn explain(err: GatewayError) -> anyhow::Error {
    if err.is_terminal_auth() {
        anyhow::Error::new(err).context("Session is no longer valid, run `dentgate login`")
    } else {
        anyhow::Error::new(err)
    }
}
