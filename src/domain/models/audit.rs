use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::IntakeDecision;

/// One line of the intake audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub target_id: String,
    pub severity: f64,
    pub detected_at: DateTime<Utc>,
    #[serde(flatten)]
    pub decision: IntakeDecision,
    /// Events folded into the resulting request so far, when there is one.
    pub coalesced_count: Option<u32>,
}
