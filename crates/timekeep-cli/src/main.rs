//! timekeep - track work time against clients and projects from the terminal.
//!
//! The access credential is never persisted, so each invocation signs in
//! (prompting for the password) before running its command.

mod format;

use std::io;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use timekeep_core::api::Resource;
use timekeep_core::models::{Client, NewTimeEntry, Project, Tag, Team, TimeEntry};
use timekeep_core::{ApiClient, AuthEvent, Config, LogoutReason};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use format::{format_duration, format_timestamp, truncate_string};

/// Column width for names in list output
const NAME_WIDTH: usize = 32;

#[derive(Parser)]
#[command(name = "timekeep", version, about = "Track work time against clients and projects")]
struct Cli {
    /// Backend base URL (overrides config and TIMEKEEP_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Account email (defaults to the last one used)
    #[arg(long, global = true)]
    email: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and remember the email for next time
    Login,
    /// Show the signed-in user
    Whoami,
    Clients,
    Projects,
    Tags,
    Teams,
    /// List time entries
    Entries,
    /// Start a timer
    Start {
        #[arg(long)]
        project: Option<i64>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Stop a running timer
    Stop {
        #[arg(long)]
        id: i64,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

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
    let mut config = Config::load()?;
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = url;
    }

    let client = ApiClient::from_config(&config).context("Failed to create API client")?;
    spawn_auth_listener(&client);

    sign_in(&client, &mut config, cli.email.as_deref()).await?;
    run(&client, cli.command).await
}

/// Report forced logouts; the credential is already gone by the time this fires.
fn spawn_auth_listener(client: &ApiClient) {
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AuthEvent::LoggedOut { reason } if reason != LogoutReason::UserRequested => {
                    eprintln!("Signed out: {}. Run `timekeep login` again.", reason);
                }
                other => info!(event = ?other, "Auth event"),
            }
        }
    });
}

async fn sign_in(client: &ApiClient, config: &mut Config, email: Option<&str>) -> Result<()> {
    let email = match email.map(str::to_string).or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    let session = client
        .login(&email, &password)
        .await
        .context("Login failed")?;

    if config.last_email.as_deref() != Some(email.as_str()) {
        config.last_email = Some(email);
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }
    if let Some(user) = session.user {
        info!(user = user.display_name(), "Signed in");
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Login => {
            println!("Signed in.");
        }
        Command::Whoami => {
            let user = client.current_user().await?;
            println!("{} <{}>", user.display_name(), user.email);
        }
        Command::Clients => {
            let clients: Vec<Client> = client.resource(Resource::Clients).list().await?;
            for c in clients {
                println!("{:>6}  {}", c.id, truncate_string(&c.name, NAME_WIDTH));
            }
        }
        Command::Projects => {
            let projects: Vec<Project> = client.resource(Resource::Projects).list().await?;
            for p in projects.iter().filter(|p| !p.archived) {
                let client_id = p.client_id.map(|id| id.to_string()).unwrap_or_default();
                println!("{:>6}  {:<w$}  {}", p.id, truncate_string(&p.name, NAME_WIDTH), client_id, w = NAME_WIDTH);
            }
        }
        Command::Tags => {
            let tags: Vec<Tag> = client.resource(Resource::Tags).list().await?;
            for t in tags {
                println!("{:>6}  {}", t.id, t.name);
            }
        }
        Command::Teams => {
            let teams: Vec<Team> = client.resource(Resource::Teams).list().await?;
            for t in teams {
                println!("{:>6}  {:<w$}  {} members", t.id, truncate_string(&t.name, NAME_WIDTH), t.member_ids.len(), w = NAME_WIDTH);
            }
        }
        Command::Entries => {
            let entries: Vec<TimeEntry> = client.resource(Resource::TimeEntries).list().await?;
            for e in entries {
                let marker = if e.is_running() { "*" } else { " " };
                println!(
                    "{:>6}{} {}  {:>9}  {}",
                    e.id,
                    marker,
                    format_timestamp(&e.started_at),
                    format_duration(e.duration()),
                    truncate_string(e.description.as_deref().unwrap_or(""), NAME_WIDTH)
                );
            }
        }
        Command::Start { project, description } => {
            let entry = NewTimeEntry {
                project_id: project,
                description,
                started_at: Some(Utc::now()),
                ..Default::default()
            };
            let created: TimeEntry = client.resource(Resource::TimeEntries).create(&entry).await?;
            println!("Started entry {}", created.id);
        }
        Command::Stop { id } => {
            let update = serde_json::json!({ "endedAt": Utc::now() });
            let stopped: TimeEntry = client.resource(Resource::TimeEntries).update(id, &update).await?;
            println!("Stopped entry {} after {}", stopped.id, format_duration(stopped.duration()));
        }
    }
    Ok(())
}
