//! Server-side record state
//!
//! Holds the highest resolved version of every record plus an ordered
//! change sequence for cursor pulls. Pushes run through the same
//! deterministic resolver the clients use, so two devices that push
//! divergent copies of one version see the server mint exactly the
//! resolution each computes locally.

use std::collections::{HashMap, HashSet};

use satchel_core::models::{ChangeEntry, Record, RecordId};
use satchel_core::resolver::{reconcile_upsert, Upsert};
use satchel_core::sync::{PullResponse, PushOutcome};

const DEFAULT_PAGE_SIZE: usize = 100;

pub struct ServerStore {
    records: HashMap<RecordId, Record>,
    log: Vec<(u64, RecordId)>,
    next_seq: u64,
    /// Idempotency ledger keyed by (record, device, version)
    seen: HashSet<(String, String, u64)>,
    page_size: usize,
}

impl Default for ServerStore {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl ServerStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            records: HashMap::new(),
            log: Vec::new(),
            next_seq: 0,
            seen: HashSet::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Apply one pushed entry, idempotently
    pub fn apply_entry(&mut self, entry: &ChangeEntry) -> PushOutcome {
        if let Err(error) = entry.snapshot.payload.validate(entry.snapshot.kind) {
            return PushOutcome::Rejected {
                record_id: entry.record_id.clone(),
                version: entry.version,
                reason: error.to_string(),
            };
        }
        if entry.snapshot.id != entry.record_id {
            return PushOutcome::Rejected {
                record_id: entry.record_id.clone(),
                version: entry.version,
                reason: "snapshot id does not match entry".to_string(),
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

        match reconcile_upsert(self.records.get(&entry.record_id), &entry.snapshot) {
            Upsert::Inserted(record) => self.adopt(entry, record, "insert"),
            Upsert::FastForwarded(record) => self.adopt(entry, record, "fast-forward"),
            Upsert::Resolved(record) => self.adopt(entry, record, "resolution"),
            Upsert::Unchanged => {}
        }

        PushOutcome::Accepted {
            record_id: entry.record_id.clone(),
            version: entry.version,
        }
    }

    fn adopt(&mut self, entry: &ChangeEntry, record: Record, how: &str) {
        tracing::debug!(
            "Adopted {} v{} from {} via {how}",
            record.id,
            record.version,
            entry.device_id
        );
        self.next_seq += 1;
        self.log.push((self.next_seq, record.id.clone()));
        self.records.insert(record.id.clone(), record);
    }

    /// One page of changes past the cursor position
    pub fn page_since(&self, since: u64) -> PullResponse {
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
        let page: Vec<(u64, &RecordId)> = ordered.into_iter().take(self.page_size).collect();
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

    /// Parse a client-supplied cursor token
    pub fn parse_cursor(token: Option<&str>) -> u64 {
        token.and_then(|raw| raw.parse::<u64>().ok()).unwrap_or(0)
    }
}
