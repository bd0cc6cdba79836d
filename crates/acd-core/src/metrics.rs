use crate::status::AgentStatus;
use chrono::{DateTime, Utc};

/// Numbers the dashboard renders, derived from the last status poll.
///
/// `confidence` is the agent's activity score (nominally in `[0, 1]`) scaled
/// to a percentage and clamped to `[0, 100]`. Fields the hub did not supply
/// count as zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayMetrics {
    pub confidence: f64,
    pub active_agents: u32,
    pub repos_count: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl DisplayMetrics {
    pub const CONFIDENCE_SCALE: f64 = 100.0;

    pub fn from_status(status: Option<&AgentStatus>) -> Self {
        let Some(status) = status else {
            return Self::default();
        };
        Self {
            confidence: (status.score() * Self::CONFIDENCE_SCALE).clamp(0.0, 100.0),
            active_agents: u32::from(status.running),
            repos_count: status.repos_count(),
            last_update: timestamp(status.ts()),
        }
    }

    pub fn confidence_label(&self) -> String {
        format!("{:.1}%", self.confidence)
    }
}

fn timestamp(ts: f64) -> Option<DateTime<Utc>> {
    if ts <= 0.0 || !ts.is_finite() {
        return None;
    }
    let secs = ts.trunc() as i64;
    let nanos = ((ts - ts.trunc()) * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
}
