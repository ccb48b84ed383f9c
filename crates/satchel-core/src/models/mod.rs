//! Data models for Satchel

mod change;
mod conflict;
mod cursor;
mod record;

pub use change::{ChangeEntry, ChangeOp};
pub use conflict::SyncConflict;
pub use cursor::SyncCursor;
pub use record::{
    AttachmentKind, AttachmentRef, DeviceId, Payload, Priority, Record, RecordId, RecordKind,
    RecordPatch, SyncState,
};
