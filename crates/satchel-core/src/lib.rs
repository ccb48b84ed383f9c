//! satchel-core - Core library for Satchel
//!
//! This crate contains the record model, local store, change log, and
//! multi-device sync engine used by all Satchel clients (extension
//! bridge, mobile shell, CLI).

pub mod ai;
pub mod capture;
pub mod db;
pub mod device;
pub mod error;
pub mod models;
pub mod resolver;
pub mod service;
pub mod sync;

pub use error::{Error, Result};
pub use models::{Payload, Record, RecordId, RecordKind, SyncState};
pub use service::SatchelService;
