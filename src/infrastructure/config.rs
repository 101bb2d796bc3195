use crate::domain::models::{parse_hhmm, ReschedulePolicy, WindowPreference};
use crate::domain::schedule::{validate_schedule, ScheduleBlock};
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

const SYNC_JSON: &str = "sync.json";
const SCHEDULE_JSON: &str = "schedule.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowBounds {
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

/// Raw shape of `config/sync.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfigFile {
    pub schema: u64,
    pub timezone: String,
    pub calendar_id: String,
    pub buffer_minutes: u32,
    pub max_end_time: String,
    pub min_overlap_minutes: i64,
    pub completion_prefix: String,
    pub batch_size: usize,
    pub window_keyword_preferences: BTreeMap<String, WindowBounds>,
    pub retry: RetryConfig,
}

impl Default for SyncConfigFile {
    fn default() -> Self {
        Self {
            schema: SUPPORTED_SCHEMA,
            timezone: "Europe/Tirane".to_string(),
            calendar_id: "primary".to_string(),
            buffer_minutes: 15,
            max_end_time: "23:59".to_string(),
            min_overlap_minutes: 1,
            completion_prefix: "✓ ".to_string(),
            batch_size: 50,
            window_keyword_preferences: BTreeMap::new(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub timezone: Tz,
    pub calendar_id: String,
    pub policy: ReschedulePolicy,
    pub batch_size: usize,
    pub retry: RetryConfig,
}

fn default_files() -> Result<HashMap<&'static str, serde_json::Value>, InfraError> {
    Ok(HashMap::from([
        (SYNC_JSON, serde_json::to_value(SyncConfigFile::default())?),
        (
            SCHEDULE_JSON,
            serde_json::json!({
                "schema": 1,
                "blocks": [
                    ["Spanish video", 2025, 7, 7, 6, 45, 7, 15],
                    ["Deep Work 1", 2025, 7, 7, 7, 15, 9, 15],
                    ["Spanish writing", 2025, 7, 7, 9, 30, 10, 10],
                    ["Deep Work 2", 2025, 7, 7, 10, 15, 12, 15],
                    ["Gym", 2025, 7, 7, 17, 45, 19, 15],
                    ["Reflection", 2025, 7, 7, 21, 0, 21, 20]
                ]
            }),
        ),
    ]))
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files()? {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_sync_settings(config_dir: &Path) -> Result<SyncSettings, InfraError> {
    let path = config_dir.join(SYNC_JSON);
    let file: SyncConfigFile = serde_json::from_value(read_config(&path)?)
        .map_err(|error| InfraError::InvalidConfig(format!("{}: {error}", path.display())))?;
    sync_settings_from_file(file)
}

pub fn sync_settings_from_file(file: SyncConfigFile) -> Result<SyncSettings, InfraError> {
    let timezone = file.timezone.trim().parse::<Tz>().map_err(|_| {
        InfraError::InvalidConfig(format!("timezone '{}' is not an IANA zone", file.timezone))
    })?;
    let calendar_id = file.calendar_id.trim();
    if calendar_id.is_empty() {
        return Err(InfraError::InvalidConfig(
            "calendarId must not be empty".to_string(),
        ));
    }
    if file.batch_size == 0 {
        return Err(InfraError::InvalidConfig("batchSize must be >= 1".to_string()));
    }

    let window_preferences = file
        .window_keyword_preferences
        .iter()
        .map(|(keyword, bounds)| {
            let before = parse_hhmm(
                &bounds.before,
                &format!("windowKeywordPreferences.{keyword}.before"),
            )?;
            let after = parse_hhmm(
                &bounds.after,
                &format!("windowKeywordPreferences.{keyword}.after"),
            )?;
            WindowPreference::new(keyword.as_str(), before, after)
        })
        .collect::<Result<Vec<_>, String>>()
        .map_err(InfraError::InvalidConfig)?;

    let policy = ReschedulePolicy {
        buffer_minutes: file.buffer_minutes,
        max_end_time: parse_hhmm(&file.max_end_time, "maxEndTime")
            .map_err(InfraError::InvalidConfig)?,
        min_overlap_minutes: file.min_overlap_minutes,
        completion_prefix: file.completion_prefix,
        window_preferences,
    };
    policy.validate().map_err(InfraError::InvalidConfig)?;

    Ok(SyncSettings {
        timezone,
        calendar_id: calendar_id.to_string(),
        policy,
        batch_size: file.batch_size,
        retry: file.retry,
    })
}

/// Reads `config/schedule.json` and validates every row before anything
/// touches the network.
pub fn load_schedule(config_dir: &Path, timezone: Tz) -> Result<Vec<ScheduleBlock>, InfraError> {
    let path = config_dir.join(SCHEDULE_JSON);
    let schedule = read_config(&path)?;
    let rows = schedule
        .get("blocks")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            InfraError::InvalidConfig(format!("missing blocks array in {}", path.display()))
        })?;
    validate_schedule(rows, timezone).map_err(InfraError::Validation)
}
