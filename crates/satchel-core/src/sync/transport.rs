//! Remote transport contract and implementations
//!
//! The coordinator only ever talks to the backend through
//! [`RemoteTransport`]; both calls are safe to retry with the same
//! arguments because the server upserts idempotently per
//! `(record_id, device_id, version)`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ChangeEntry, Record, RecordId, SyncCursor};
use crate::resolver::{reconcile_upsert, Upsert};

/// Per-entry result of a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PushOutcome {
    Accepted {
        record_id: RecordId,
        version: u64,
    },
    Rejected {
        record_id: RecordId,
        version: u64,
        reason: String,
    },
}

/// Push request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub entries: Vec<ChangeEntry>,
}

/// Push response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub outcomes: Vec<PushOutcome>,
}

/// One page of remote changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    pub records: Vec<Record>,
    /// Position to resume from; echo it back on the next pull
    pub next_cursor: Option<String>,
    /// More pages are immediately available
    pub has_more: bool,
}

/// Backend channel the sync coordinator drains into and from
#[allow(async_fn_in_trait)]
pub trait RemoteTransport {
    /// Deliver a batch of change entries; returns one outcome per entry
    async fn push(&self, batch: &[ChangeEntry]) -> Result<Vec<PushOutcome>>;

    /// Fetch remote changes since the cursor
    async fn pull(&self, cursor: &SyncCursor) -> Result<PullResponse>;
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// reqwest-backed transport against a satchel-api style backend
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build a transport for the given base URL
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let base_url = normalize_endpoint(base_url.into())?;
        Ok(Self {
            base_url,
            auth_token,
            client: reqwest::Client::builder().build()?,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl RemoteTransport for HttpTransport {
    async fn push(&self, batch: &[ChangeEntry]) -> Result<Vec<PushOutcome>> {
        let request = self
            .client
            .post(format!("{}/v1/changes", self.base_url))
            .json(&PushRequest {
                entries: batch.to_vec(),
            });
        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(parse_api_error(status, &body)));
        }

        let payload = response.json::<PushResponse>().await?;
        Ok(payload.outcomes)
    }

    async fn pull(&self, cursor: &SyncCursor) -> Result<PullResponse> {
        let mut request = self.client.get(format!("{}/v1/changes", self.base_url));
        if let Some(token) = &cursor.token {
            request = request.query(&[("since", token.as_str())]);
        }
        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(parse_api_error(status, &body)));
        }

        Ok(response.json::<PullResponse>().await?)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Transport("endpoint must not be empty".to_string()));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(Error::Transport(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// In-memory backend honoring the transport contract
///
/// Runs the same reconcile policy as the reference backend. Clones share
/// state, so two service instances wired to clones of one
/// `MemoryTransport` behave like two devices against one server; the
/// failure knobs let tests stage transport outages and lost
/// acknowledgments.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    server: Arc<Mutex<MemoryServer>>,
    fail_next_push: Arc<AtomicBool>,
    drop_ack_next_push: Arc<AtomicBool>,
}

#[derive(Default)]
struct MemoryServer {
    records: HashMap<RecordId, Record>,
    log: Vec<(u64, RecordId)>,
    next_seq: u64,
    /// Idempotency ledger keyed by (record, device, version)
    seen: HashSet<(String, String, u64)>,
}

const MEMORY_PAGE_SIZE: usize = 100;

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next push before the server applies anything
    pub fn fail_next_push(&self) {
        self.fail_next_push.store(true, Ordering::SeqCst);
    }

    /// Apply the next push server-side but lose the acknowledgment
    pub fn drop_ack_next_push(&self) {
        self.drop_ack_next_push.store(true, Ordering::SeqCst);
    }

    /// Current server-side copy of a record
    #[must_use]
    pub fn record(&self, id: &RecordId) -> Option<Record> {
        self.lock().records.get(id).cloned()
    }

    /// Number of records the server holds
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryServer> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryServer {
    fn apply_entry(&mut self, entry: &ChangeEntry) -> PushOutcome {
        if let Err(error) = entry.snapshot.payload.validate(entry.snapshot.kind) {
            return PushOutcome::Rejected {
                record_id: entry.record_id.clone(),
                version: entry.version,
                reason: error.to_string(),
            };
        }

        let key = (
            entry.record_id.to_string(),
            entry.device_id.to_string(),
            entry.version,
        );
        if self.seen.contains(&key) {
            // Duplicate delivery of an already-applied change.
            return PushOutcome::Accepted {
                record_id: entry.record_id.clone(),
                version: entry.version,
            };
        }
        self.seen.insert(key);

        let upsert = reconcile_upsert(self.records.get(&entry.record_id), &entry.snapshot);
        match upsert {
            Upsert::Inserted(record)
            | Upsert::FastForwarded(record)
            | Upsert::Resolved(record) => {
                self.next_seq += 1;
                self.log.push((self.next_seq, entry.record_id.clone()));
                self.records.insert(entry.record_id.clone(), record);
            }
            Upsert::Unchanged => {}
        }

        PushOutcome::Accepted {
            record_id: entry.record_id.clone(),
            version: entry.version,
        }
    }

    fn page_since(&self, since: u64) -> PullResponse {
        // Latest sequence number per record past the cursor.
        let mut latest: HashMap<&RecordId, u64> = HashMap::new();
        for (seq, id) in self.log.iter().filter(|(seq, _)| *seq > since) {
            let slot = latest.entry(id).or_insert(*seq);
            *slot = (*slot).max(*seq);
        }

        let mut ordered: Vec<(u64, &RecordId)> =
            latest.into_iter().map(|(id, seq)| (seq, id)).collect();
        ordered.sort_unstable_by_key(|(seq, _)| *seq);

        let total = ordered.len();
        let page: Vec<(u64, &RecordId)> = ordered.into_iter().take(MEMORY_PAGE_SIZE).collect();
        let has_more = total > page.len();
        let next_cursor = page
            .last()
            .map(|(seq, _)| seq.to_string())
            .or_else(|| Some(since.to_string()));

        let records = page
            .iter()
            .filter_map(|(_, id)| self.records.get(*id).cloned())
            .collect();

        PullResponse {
            records,
            next_cursor,
            has_more,
        }
    }
}

impl RemoteTransport for MemoryTransport {
    async fn push(&self, batch: &[ChangeEntry]) -> Result<Vec<PushOutcome>> {
        if self.fail_next_push.swap(false, Ordering::SeqCst) {
            return Err(Error::Transport("injected push failure".to_string()));
        }

        let drop_ack = self.drop_ack_next_push.swap(false, Ordering::SeqCst);
        let outcomes = {
            let mut server = self.lock();
            batch
                .iter()
                .map(|entry| server.apply_entry(entry))
                .collect::<Vec<_>>()
        };

        if drop_ack {
            return Err(Error::Transport(
                "injected failure after server applied the batch".to_string(),
            ));
        }
        Ok(outcomes)
    }

    async fn pull(&self, cursor: &SyncCursor) -> Result<PullResponse> {
        let since = cursor
            .token
            .as_deref()
            .and_then(|token| token.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(self.lock().page_since(since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeOp, DeviceId, Payload, Record, RecordKind};

    fn entry(device: &DeviceId, counter: u64, version: u64, title: &str) -> ChangeEntry {
        let mut record = Record::new(
            RecordId::new(device, counter),
            RecordKind::Task,
            Payload {
                title: title.to_string(),
                ..Payload::default()
            },
            device.clone(),
            1_000 + version as i64,
        );
        record.version = version;
        record.updated_at = 1_000 + version as i64;
        ChangeEntry::from_snapshot(ChangeOp::Create, record, 1_000)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_then_pull_round_trips() {
        let transport = MemoryTransport::new();
        let device = DeviceId::generate();

        let outcomes = transport
            .push(&[entry(&device, 1, 1, "Buy milk")])
            .await
            .unwrap();
        assert!(matches!(outcomes[0], PushOutcome::Accepted { .. }));

        let page = transport.pull(&SyncCursor::default()).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].payload.title, "Buy milk");
        assert!(!page.has_more);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_push_is_idempotent() {
        let transport = MemoryTransport::new();
        let device = DeviceId::generate();
        let change = entry(&device, 1, 1, "Once only");

        transport.push(&[change.clone()]).await.unwrap();
        transport.push(&[change.clone()]).await.unwrap();

        assert_eq!(transport.record_count(), 1);
        let stored = transport.record(&change.record_id).unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_entry_is_rejected_per_entry() {
        let transport = MemoryTransport::new();
        let device = DeviceId::generate();

        let good = entry(&device, 1, 1, "Fine");
        let bad = entry(&device, 2, 1, "   ");

        let outcomes = transport.push(&[good, bad]).await.unwrap();
        assert!(matches!(outcomes[0], PushOutcome::Accepted { .. }));
        assert!(matches!(outcomes[1], PushOutcome::Rejected { .. }));
        assert_eq!(transport.record_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_resumes_from_cursor() {
        let transport = MemoryTransport::new();
        let device = DeviceId::generate();

        transport.push(&[entry(&device, 1, 1, "First")]).await.unwrap();
        let first = transport.pull(&SyncCursor::default()).await.unwrap();
        assert_eq!(first.records.len(), 1);

        transport.push(&[entry(&device, 2, 1, "Second")]).await.unwrap();
        let resumed = transport
            .pull(&SyncCursor {
                last_pulled_at: 0,
                token: first.next_cursor,
            })
            .await
            .unwrap();
        assert_eq!(resumed.records.len(), 1);
        assert_eq!(resumed.records[0].payload.title, "Second");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drop_ack_applies_server_side_then_errors() {
        let transport = MemoryTransport::new();
        let device = DeviceId::generate();
        let change = entry(&device, 1, 1, "Almost lost");

        transport.drop_ack_next_push();
        let error = transport.push(&[change.clone()]).await.unwrap_err();
        assert!(matches!(error, Error::Transport(_)));
        assert_eq!(transport.record_count(), 1);

        // Retry of the same batch is accepted without duplication.
        let outcomes = transport.push(&[change.clone()]).await.unwrap();
        assert!(matches!(outcomes[0], PushOutcome::Accepted { .. }));
        assert_eq!(transport.record_count(), 1);
        assert_eq!(transport.record(&change.record_id).unwrap().version, 1);
    }

    #[test]
    fn http_transport_normalizes_endpoint_and_redacts_token() {
        assert!(HttpTransport::new("  ", None).is_err());
        assert!(HttpTransport::new("api.example.com", None).is_err());

        let transport =
            HttpTransport::new("https://sync.example.com/", Some("secret".to_string())).unwrap();
        let debug = format!("{transport:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("https://sync.example.com"));
    }
}
