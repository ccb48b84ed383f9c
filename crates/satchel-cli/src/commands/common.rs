use std::env;
use std::path::Path;

use chrono::{NaiveDate, TimeZone, Utc};
use satchel_core::models::{Record, RecordId, SyncConflict};
use satchel_core::sync::{HttpTransport, SyncCoordinator, SyncSettings};
use satchel_core::SatchelService;
use serde::Serialize;

use crate::error::CliError;

const SHORT_ID_CHARS: usize = 13;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub content: Option<String>,
    pub url: Option<String>,
    pub tags: Vec<String>,
    pub priority: String,
    pub completed: bool,
    pub version: u64,
    pub sync_state: String,
    pub updated_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub record_id: String,
    pub local_version: u64,
    pub remote_version: u64,
    pub resolved_version: u64,
    pub winner_device: String,
    pub strategy: String,
    pub resolved_at: i64,
}

pub async fn open_service(db_path: &Path) -> Result<SatchelService, CliError> {
    Ok(SatchelService::open_path(db_path).await?)
}

/// Resolve a record by exact id or unique id prefix
pub async fn resolve_record(
    service: &SatchelService,
    query: &str,
) -> Result<Record, CliError> {
    let normalized = normalize_identifier(query)?;

    if let Ok(record_id) = normalized.parse::<RecordId>() {
        if let Some(record) = service.get(&record_id).await? {
            if record.is_live() {
                return Ok(record);
            }
        }
    }

    let matching_ids = service.list_ids_by_prefix(&normalized, 3).await?;
    match matching_ids.len() {
        0 => Err(CliError::RecordNotFound(normalized)),
        1 => {
            let resolved_id = matching_ids[0]
                .parse::<RecordId>()
                .map_err(|_| CliError::RecordNotFound(normalized.clone()))?;
            service
                .get(&resolved_id)
                .await?
                .filter(Record::is_live)
                .ok_or(CliError::RecordNotFound(normalized))
        }
        _ => {
            let options = matching_ids
                .iter()
                .take(3)
                .map(|id| short_id(id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{normalized}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Build the sync coordinator from the environment, if configured
pub fn sync_coordinator_from_env(
    service: &SatchelService,
) -> Result<SyncCoordinator<HttpTransport>, CliError> {
    let url = env::var("SATCHEL_REMOTE_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
        .ok_or(CliError::SyncNotConfigured)?;
    let token = env::var("SATCHEL_REMOTE_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty());

    tracing::info!("Sync remote configured at {url}");
    let transport = HttpTransport::new(url, token)?;
    Ok(SyncCoordinator::new(
        service,
        transport,
        SyncSettings::default().without_auto_sync(),
    ))
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = short_id(record.id.as_str());
            let kind = record.kind.as_str();
            let title = preview(&record.payload.title, 40);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            let tags = render_tags(record);

            if tags.is_empty() {
                format!("{id:<13}  {kind:<8}  {title:<40}  {relative_time}")
            } else {
                format!("{id:<13}  {kind:<8}  {title:<40}  {relative_time:<10}  {tags}")
            }
        })
        .collect()
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    let mut tags = record.payload.tags.clone();
    tags.sort();

    RecordListItem {
        id: record.id.to_string(),
        kind: record.kind.as_str().to_string(),
        title: record.payload.title.clone(),
        content: record.payload.content.clone(),
        url: record.payload.url.clone(),
        tags,
        priority: format!("{:?}", record.payload.priority).to_lowercase(),
        completed: record.payload.completed,
        version: record.version,
        sync_state: record.sync_state.as_str().to_string(),
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
    }
}

pub fn conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        record_id: conflict.record_id.clone(),
        local_version: conflict.local_version,
        remote_version: conflict.remote_version,
        resolved_version: conflict.resolved_version,
        winner_device: conflict.winner_device.clone(),
        strategy: conflict.strategy.clone(),
        resolved_at: conflict.resolved_at,
    }
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{:<13}  v{} vs v{} -> v{}  won by {}  {}",
                short_id(&conflict.record_id),
                conflict.local_version,
                conflict.remote_version,
                conflict.resolved_version,
                short_id(&conflict.winner_device),
                format_relative_time(conflict.resolved_at, now_ms)
            )
        })
        .collect()
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_CHARS).collect()
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

fn render_tags(record: &Record) -> String {
    let mut tags = record.payload.tags.clone();
    tags.sort();
    tags.into_iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Parse a YYYY-MM-DD due date into Unix ms at local midnight UTC
pub fn parse_due_date(raw: &str) -> Result<i64, CliError> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDueDate(raw.to_string()))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CliError::InvalidDueDate(raw.to_string()))?;
    Ok(Utc.from_utc_datetime(&midnight).timestamp_millis())
}
