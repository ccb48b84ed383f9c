//! Page-capture helpers
//!
//! Turns a page context handed over by a capture surface (extension,
//! mobile share sheet, CLI) into a draft payload. Only the data shaping
//! lives here; content extraction itself happens in the clients.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Payload, RecordKind};

/// Snapshot of the page a capture originated from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub domain: String,
    pub favicon: Option<String>,
    /// Capture timestamp (Unix ms)
    pub captured_at: i64,
}

/// Site category detected from the capture context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    Youtube,
    Shopping,
    Booking,
    Generic,
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Youtube => "youtube",
            Self::Shopping => "shopping",
            Self::Booking => "booking",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// Classify the capture source from the page domain
#[must_use]
pub fn detect_source(context: &PageContext) -> CaptureSource {
    let domain = context.domain.to_lowercase();

    if domain.contains("youtube.com") || domain.contains("youtu.be") {
        return CaptureSource::Youtube;
    }

    if domain.contains("amazon.")
        || domain.contains("ebay.")
        || domain.contains("shop")
        || domain.contains("store")
    {
        return CaptureSource::Shopping;
    }

    if domain.contains("booking.")
        || domain.contains("hotel")
        || domain.contains("airbnb.")
        || domain.contains("expedia.")
    {
        return CaptureSource::Booking;
    }

    CaptureSource::Generic
}

/// Extract #tags from text
///
/// Valid tags match the pattern: `#[a-zA-Z][a-zA-Z0-9_-]*`
/// Tags are returned in lowercase, deduplicated, and sorted.
#[must_use]
pub fn extract_tags(text: &str) -> Vec<String> {
    let re = Regex::new(r"#([a-zA-Z][a-zA-Z0-9_-]*)").expect("Invalid regex");
    let mut tags: Vec<String> = re
        .captures_iter(text)
        .map(|cap| cap[1].to_lowercase())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    tags.sort();
    tags
}

/// Build a draft payload for a capture
///
/// The source category lands in the tags so it survives the trip through
/// sync without a dedicated column.
#[must_use]
pub fn draft_payload(context: &PageContext, kind: RecordKind, content: &str) -> Payload {
    let mut tags = extract_tags(content);
    let source = detect_source(context);
    if source != CaptureSource::Generic {
        let source_tag = source.to_string();
        if !tags.contains(&source_tag) {
            tags.push(source_tag);
            tags.sort();
        }
    }

    let trimmed = content.trim();
    Payload {
        title: context.title.trim().to_string(),
        content: if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        },
        url: Some(context.url.clone()),
        domain: Some(context.domain.clone()),
        tags,
        collections: if kind == RecordKind::Bookmark {
            vec!["inbox".to_string()]
        } else {
            Vec::new()
        },
        ..Payload::default()
    }
}
