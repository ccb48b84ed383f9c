//! Content-analysis seam
//!
//! Analysis itself is out of scope for the sync engine; capture surfaces
//! plug their own implementation in behind this trait. The no-op
//! implementation keeps the seam honest without pulling in any model
//! dependency.

use serde::{Deserialize, Serialize};

use crate::models::Payload;

/// Derived annotations for a captured payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: Option<String>,
    pub suggested_tags: Vec<String>,
    pub action_items: Vec<String>,
}

/// Pluggable analyzer interface
pub trait ContentAnalyzer {
    /// Annotate a payload; must never fail the capture path
    fn analyze(&self, payload: &Payload) -> Analysis;
}

/// Analyzer that annotates nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyzer;

impl ContentAnalyzer for NoopAnalyzer {
    fn analyze(&self, _payload: &Payload) -> Analysis {
        Analysis::default()
    }
}
