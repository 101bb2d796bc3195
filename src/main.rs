use clap::{Parser, Subcommand};
use schedule_sync::application::commands::{
    clear_schedule_impl, push_schedule_impl, required_access_token, resolve_conflicts_impl,
    validate_schedule_impl, AppState,
};
use schedule_sync::infrastructure::error::InfraError;
use schedule_sync::infrastructure::google_calendar_client::ReqwestGoogleCalendarClient;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schedule-sync")]
#[command(about = "Keeps a fixed daily schedule on Google Calendar", long_about = None)]
struct Cli {
    /// Workspace holding config/ and logs/ (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check config/schedule.json without touching the calendar
    Validate,
    /// Create schedule events that are not on the calendar yet
    Push {
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete every event whose title belongs to the schedule
    Clear {
        #[arg(long)]
        dry_run: bool,
    },
    /// Move blocks that collide with manual entries
    Resolve {
        /// Target day as YYYY-MM-DD (default: today in the configured timezone)
        #[arg(long)]
        date: Option<String>,

        /// Write the new times back to the calendar
        #[arg(long)]
        apply: bool,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Validate => "validate",
            Command::Push { .. } => "push",
            Command::Clear { .. } => "clear",
            Command::Resolve { .. } => "resolve",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(path) => path,
            Err(error) => {
                eprintln!("error: cannot resolve current directory: {error}");
                return ExitCode::FAILURE;
            }
        },
    };

    let state = match AppState::new(workspace_root) {
        Ok(state) => state,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };

    let command_name = cli.command.name();
    match run(&state, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {}", state.command_error(command_name, &error));
            ExitCode::FAILURE
        }
    }
}

async fn run(state: &AppState, command: Command) -> Result<(), InfraError> {
    match command {
        Command::Validate => print_json(&validate_schedule_impl(state)?),
        Command::Push { dry_run } => {
            let token = required_access_token()?;
            let client = Arc::new(ReqwestGoogleCalendarClient::new());
            print_json(&push_schedule_impl(state, client, &token, dry_run).await?)
        }
        Command::Clear { dry_run } => {
            let token = required_access_token()?;
            let client = Arc::new(ReqwestGoogleCalendarClient::new());
            print_json(&clear_schedule_impl(state, client, &token, dry_run).await?)
        }
        Command::Resolve { date, apply } => {
            let token = required_access_token()?;
            let client = Arc::new(ReqwestGoogleCalendarClient::new());
            print_json(&resolve_conflicts_impl(state, client, &token, date, apply).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), InfraError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
