//! Record model and sync metadata

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A stable per-install device identifier
///
/// Generated once on first run with no cross-device coordination; every
/// write is stamped with the device that produced it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Generate a fresh random device id using UUID v7
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Get the string representation of this id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidPayload("device id must not be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// A globally unique record identifier: `{device_id}-{counter}`
///
/// Allocated client-side so records can be created fully offline; the
/// device prefix plus a per-device monotonic counter guarantees ids never
/// collide across devices, even for records created in the same
/// millisecond.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Build a record id from its device prefix and counter
    #[must_use]
    pub fn new(device_id: &DeviceId, counter: u64) -> Self {
        Self(format!("{device_id}-{counter}"))
    }

    /// Get the string representation of this id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let valid = trimmed
            .rsplit_once('-')
            .is_some_and(|(device, counter)| {
                !device.is_empty() && counter.parse::<u64>().is_ok()
            });
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(Error::InvalidPayload(format!("invalid record id: {s}")))
        }
    }
}

/// The unit of capture tracked by the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Task,
    Note,
    Bookmark,
}

impl RecordKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Note => "note",
            Self::Bookmark => "bookmark",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "task" => Ok(Self::Task),
            "note" => Ok(Self::Note),
            "bookmark" => Ok(Self::Bookmark),
            other => Err(Error::InvalidPayload(format!("unknown record kind: {other}"))),
        }
    }
}

/// Task priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Kind of attachment referenced by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Photo,
    Voice,
    Link,
    Document,
}

/// Reference to an attachment stored elsewhere
///
/// Sync carries references only; blob transfer is out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub kind: AttachmentKind,
    pub uri: String,
    pub name: String,
}

/// Kind-specific record content
///
/// Every field is always serialized so the canonical JSON encoding is
/// byte-stable: two payloads are byte-identical on the wire iff they
/// compare equal here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    pub title: String,
    pub content: Option<String>,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub tags: Vec<String>,
    // Task fields
    pub completed: bool,
    pub priority: Priority,
    pub due_date: Option<i64>,
    // Bookmark fields
    pub collections: Vec<String>,
    pub attachments: Vec<AttachmentRef>,
}

impl Payload {
    /// Validate the payload for the given kind
    ///
    /// Rejected payloads never reach the store.
    pub fn validate(&self, kind: RecordKind) -> Result<()> {
        match kind {
            RecordKind::Task | RecordKind::Bookmark => {
                if self.title.trim().is_empty() {
                    return Err(Error::InvalidPayload(format!(
                        "{kind} title must not be empty"
                    )));
                }
            }
            RecordKind::Note => {
                let has_content = self
                    .content
                    .as_deref()
                    .is_some_and(|content| !content.trim().is_empty());
                if self.title.trim().is_empty() && !has_content {
                    return Err(Error::InvalidPayload(
                        "note requires a title or content".into(),
                    ));
                }
            }
        }

        if kind == RecordKind::Bookmark && self.url.as_deref().unwrap_or("").trim().is_empty() {
            return Err(Error::InvalidPayload("bookmark requires a url".into()));
        }

        Ok(())
    }

    /// Canonical JSON encoding used for storage and byte-equality checks
    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Sync lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    /// Created locally, never pushed
    LocalOnly,
    /// Local mutations queued for push
    Pending,
    /// Local copy matches the acknowledged remote state
    Synced,
    /// Ambiguous resolution was detected; read-only until repaired
    Conflict,
}

impl SyncState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalOnly => "local-only",
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
        }
    }
}

impl FromStr for SyncState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local-only" => Ok(Self::LocalOnly),
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            other => Err(Error::InvalidPayload(format!("unknown sync state: {other}"))),
        }
    }
}

/// A task, note, or bookmark with its sync metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier, immutable for the record's whole lifetime
    pub id: RecordId,
    pub kind: RecordKind,
    pub payload: Payload,
    /// Creation timestamp (Unix ms, monotonic per device)
    pub created_at: i64,
    /// Last mutation timestamp; tie-breaker only, `version` orders history
    pub updated_at: i64,
    /// Device that produced the most recent write
    pub device_id: DeviceId,
    /// Strictly increases on every mutation, local or merged
    pub version: u64,
    /// Logically deleted but retained for conflict resolution
    pub tombstone: bool,
    pub sync_state: SyncState,
    /// Highest version of this record's lineage known to be on the server;
    /// the merge base for divergence detection
    pub synced_version: u64,
}

impl Record {
    /// Build a freshly created local record at version 1
    #[must_use]
    pub fn new(id: RecordId, kind: RecordKind, payload: Payload, device_id: DeviceId, now: i64) -> Self {
        Self {
            id,
            kind,
            payload,
            created_at: now,
            updated_at: now,
            device_id,
            version: 1,
            tombstone: false,
            sync_state: SyncState::LocalOnly,
            synced_version: 0,
        }
    }

    /// Whether the record is visible to default projections
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.tombstone
    }

    /// Whether local mutations exist that the server has not acknowledged
    #[must_use]
    pub const fn has_unsynced_changes(&self) -> bool {
        self.version > self.synced_version
    }
}

/// Field-level updates applied by `update`
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub tags: Option<Vec<String>>,
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    pub due_date: Option<i64>,
    pub collections: Option<Vec<String>>,
}

impl RecordPatch {
    /// True when the patch carries no changes
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.url.is_none()
            && self.tags.is_none()
            && self.completed.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.collections.is_none()
    }

    /// Apply the patch to a payload in place
    pub fn apply_to(&self, payload: &mut Payload) {
        if let Some(title) = &self.title {
            payload.title.clone_from(title);
        }
        if let Some(content) = &self.content {
            payload.content = Some(content.clone());
        }
        if let Some(url) = &self.url {
            payload.url = Some(url.clone());
        }
        if let Some(tags) = &self.tags {
            payload.tags.clone_from(tags);
        }
        if let Some(completed) = self.completed {
            payload.completed = completed;
        }
        if let Some(priority) = self.priority {
            payload.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            payload.due_date = Some(due_date);
        }
        if let Some(collections) = &self.collections {
            payload.collections.clone_from(collections);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_payload(title: &str) -> Payload {
        Payload {
            title: title.to_string(),
            ..Payload::default()
        }
    }

    #[test]
    fn record_id_embeds_device_and_counter() {
        let device = DeviceId::generate();
        let id = RecordId::new(&device, 42);
        assert!(id.as_str().starts_with(device.as_str()));
        assert!(id.as_str().ends_with("-42"));
    }

    #[test]
    fn record_id_parse_round_trip() {
        let device = DeviceId::generate();
        let id = RecordId::new(&device, 7);
        let parsed: RecordId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn record_id_rejects_malformed() {
        assert!("".parse::<RecordId>().is_err());
        assert!("no-counter-here".parse::<RecordId>().is_err());
        assert!("-5".parse::<RecordId>().is_err());
    }

    #[test]
    fn record_ids_unique_across_devices() {
        let a = RecordId::new(&DeviceId::generate(), 1);
        let b = RecordId::new(&DeviceId::generate(), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn new_record_starts_at_version_one() {
        let device = DeviceId::generate();
        let record = Record::new(
            RecordId::new(&device, 1),
            RecordKind::Task,
            task_payload("Buy milk"),
            device,
            1_000,
        );
        assert_eq!(record.version, 1);
        assert_eq!(record.sync_state, SyncState::LocalOnly);
        assert_eq!(record.synced_version, 0);
        assert!(record.is_live());
        assert!(record.has_unsynced_changes());
    }

    #[test]
    fn validate_rejects_empty_task_title() {
        let payload = task_payload("   ");
        assert!(payload.validate(RecordKind::Task).is_err());
    }

    #[test]
    fn validate_requires_bookmark_url() {
        let payload = task_payload("Rust book");
        assert!(payload.validate(RecordKind::Bookmark).is_err());

        let payload = Payload {
            url: Some("https://doc.rust-lang.org/book/".to_string()),
            ..task_payload("Rust book")
        };
        assert!(payload.validate(RecordKind::Bookmark).is_ok());
    }

    #[test]
    fn validate_accepts_note_with_content_only() {
        let payload = Payload {
            content: Some("just a thought".to_string()),
            ..Payload::default()
        };
        assert!(payload.validate(RecordKind::Note).is_ok());
        assert!(Payload::default().validate(RecordKind::Note).is_err());
    }

    #[test]
    fn canonical_json_is_byte_stable() {
        let a = task_payload("Same");
        let b = task_payload("Same");
        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut payload = task_payload("Original");
        payload.priority = Priority::Low;

        let patch = RecordPatch {
            title: Some("Updated".to_string()),
            completed: Some(true),
            ..RecordPatch::default()
        };
        patch.apply_to(&mut payload);

        assert_eq!(payload.title, "Updated");
        assert!(payload.completed);
        assert_eq!(payload.priority, Priority::Low);
    }

    #[test]
    fn sync_state_round_trips_through_str() {
        for state in [
            SyncState::LocalOnly,
            SyncState::Pending,
            SyncState::Synced,
            SyncState::Conflict,
        ] {
            assert_eq!(state.as_str().parse::<SyncState>().unwrap(), state);
        }
    }
}
