use crate::application::bootstrap::bootstrap_workspace;
use crate::application::calendar_sync::{CalendarSyncService, ClearReport, PushReport};
use crate::application::reconcile::{reconcile, ReconcileOutcome, RunSummary};
use crate::domain::conflict::detect_conflicts;
use crate::domain::schedule::ScheduleBlock;
use crate::infrastructure::config::{load_schedule, load_sync_settings, SyncSettings};
use crate::infrastructure::credential_store::{
    resolve_access_token_from_env, KeyringCredentialStore,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::google_calendar_client::GoogleCalendarClient;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

const RUN_LOG: &str = "runs.log";

pub struct AppState {
    config_dir: PathBuf,
    logs_dir: PathBuf,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;

        Ok(Self {
            config_dir: bootstrap.config_dir,
            logs_dir: bootstrap.logs_dir,
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, "message", serde_json::json!(message));
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, "message", serde_json::json!(message));
    }

    pub fn log_summary<T: Serialize>(&self, command: &str, summary: &T) {
        let value = serde_json::to_value(summary).unwrap_or(serde_json::Value::Null);
        self.append_log("info", command, "summary", value);
    }

    fn append_log(&self, level: &str, command: &str, key: &str, value: serde_json::Value) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join(RUN_LOG);
        let mut payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
        });
        if let Some(object) = payload.as_object_mut() {
            object.insert(key.to_string(), value);
        }

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn load_run_inputs(&self) -> Result<(SyncSettings, Vec<ScheduleBlock>), InfraError> {
        let settings = load_sync_settings(self.config_dir())?;
        let blocks = load_schedule(self.config_dir(), settings.timezone)?;
        Ok((settings, blocks))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidateScheduleResponse {
    pub blocks: usize,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    pub titles: Vec<String>,
    pub timezone: String,
}

pub fn validate_schedule_impl(state: &AppState) -> Result<ValidateScheduleResponse, InfraError> {
    let (settings, blocks) = state.load_run_inputs()?;
    let first_date = blocks.iter().map(ScheduleBlock::date).min();
    let last_date = blocks.iter().map(ScheduleBlock::date).max();
    let titles = blocks
        .iter()
        .map(|block| block.title.clone())
        .collect::<BTreeSet<_>>();

    let response = ValidateScheduleResponse {
        blocks: blocks.len(),
        first_date: first_date.map(|date| date.to_string()),
        last_date: last_date.map(|date| date.to_string()),
        titles: titles.into_iter().collect(),
        timezone: settings.timezone.name().to_string(),
    };
    state.log_info(
        "validate",
        &format!("schedule valid: {} blocks", response.blocks),
    );
    Ok(response)
}

pub async fn push_schedule_impl<C>(
    state: &AppState,
    calendar_client: Arc<C>,
    access_token: &str,
    dry_run: bool,
) -> Result<PushReport, InfraError>
where
    C: GoogleCalendarClient,
{
    let (settings, blocks) = state.load_run_inputs()?;
    let service = sync_service(&settings, calendar_client, access_token);
    let report = service
        .push_schedule(
            &blocks,
            &settings.policy.completion_prefix,
            settings.batch_size,
            dry_run,
        )
        .await?;
    state.log_summary("push", &report);
    Ok(report)
}

pub async fn clear_schedule_impl<C>(
    state: &AppState,
    calendar_client: Arc<C>,
    access_token: &str,
    dry_run: bool,
) -> Result<ClearReport, InfraError>
where
    C: GoogleCalendarClient,
{
    let (settings, blocks) = state.load_run_inputs()?;
    let service = sync_service(&settings, calendar_client, access_token);
    let report = service
        .clear_schedule(&blocks, &settings.policy.completion_prefix, dry_run)
        .await?;
    state.log_summary("clear", &report);
    Ok(report)
}

/// One conflict-resolution run for `date` (today in the configured zone when
/// omitted). Nothing is written unless `apply` is set.
pub async fn resolve_conflicts_impl<C>(
    state: &AppState,
    calendar_client: Arc<C>,
    access_token: &str,
    date: Option<String>,
    apply: bool,
) -> Result<RunSummary, InfraError>
where
    C: GoogleCalendarClient,
{
    let (settings, blocks) = state.load_run_inputs()?;
    let date = match date {
        Some(raw) => parse_date_input(&raw)?,
        None => Utc::now().with_timezone(&settings.timezone).date_naive(),
    };

    if !blocks.iter().any(|block| block.date() == date) {
        info!(%date, "no schedule blocks on target date");
        let summary = ReconcileOutcome {
            applied: apply,
            ..ReconcileOutcome::default()
        }
        .summary(date);
        state.log_summary("resolve", &summary);
        return Ok(summary);
    }

    let service = sync_service(&settings, calendar_client, access_token);
    let entries = service.fetch_day(date).await?;
    let conflicts = detect_conflicts(
        &entries,
        &blocks,
        date,
        settings.timezone,
        &settings.policy,
    );
    info!(%date, entries = entries.len(), conflicts = conflicts.len(), apply, "conflicts detected");

    let outcome = reconcile(
        &conflicts,
        &entries,
        &blocks,
        &settings.policy,
        settings.timezone,
        apply,
        &service,
    )
    .await;
    let summary = outcome.summary(date);
    state.log_summary("resolve", &summary);
    Ok(summary)
}

pub fn required_access_token() -> Result<String, InfraError> {
    resolve_access_token_from_env(&KeyringCredentialStore::default())
}

fn sync_service<C>(
    settings: &SyncSettings,
    calendar_client: Arc<C>,
    access_token: &str,
) -> CalendarSyncService<C>
where
    C: GoogleCalendarClient,
{
    CalendarSyncService::new(
        calendar_client,
        access_token,
        settings.calendar_id.clone(),
        settings.timezone,
    )
    .with_retry_policy((&settings.retry).into())
}

fn parse_date_input(value: &str) -> Result<NaiveDate, InfraError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|error| InfraError::InvalidConfig(format!("date must be YYYY-MM-DD: {error}")))
}
