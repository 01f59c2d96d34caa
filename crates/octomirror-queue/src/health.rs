//! Queue health snapshot for operator tooling.

use crate::error::QueueError;
use crate::store::QueueStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;

/// Overall queue health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    fn worst(self, other: Self) -> Self {
        use HealthStatus::*;
        match (self, other) {
            (Critical, _) | (_, Critical) => Critical,
            (Warning, _) | (_, Warning) => Warning,
            _ => Ok,
        }
    }
}

/// Thresholds used to classify queue health
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub warning_pending: usize,
    pub critical_pending: usize,
    pub warning_oldest_pending: Duration,
    pub critical_oldest_pending: Duration,
    pub warning_dead_letter: usize,
    pub critical_dead_letter: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            warning_pending: 100,
            critical_pending: 1000,
            warning_oldest_pending: Duration::minutes(5),
            critical_oldest_pending: Duration::minutes(30),
            warning_dead_letter: 1,
            critical_dead_letter: 25,
        }
    }
}

/// Point-in-time queue health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub status: HealthStatus,
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub dead_letter: usize,
    pub oldest_pending_age_ms: Option<i64>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub alerts: Vec<String>,
}

impl QueueHealth {
    /// Collect a snapshot from the store and classify it against thresholds
    pub async fn collect(
        store: &dyn QueueStore,
        thresholds: &HealthThresholds,
        now: DateTime<Utc>,
    ) -> Result<Self, QueueError> {
        let counts = store.counts().await?;
        let oldest_pending = store.oldest_pending_age(now).await?;
        let last_processed_at = store.last_processed_at().await?;

        let mut status = HealthStatus::Ok;
        let mut alerts = Vec::new();

        if counts.pending >= thresholds.critical_pending {
            status = status.worst(HealthStatus::Critical);
            alerts.push(format!("pending backlog at {} items", counts.pending));
        } else if counts.pending >= thresholds.warning_pending {
            status = status.worst(HealthStatus::Warning);
            alerts.push(format!("pending backlog growing ({} items)", counts.pending));
        }

        if let Some(age) = oldest_pending {
            if age >= thresholds.critical_oldest_pending {
                status = status.worst(HealthStatus::Critical);
                alerts.push(format!(
                    "oldest pending item is {} minutes old",
                    age.num_minutes()
                ));
            } else if age >= thresholds.warning_oldest_pending {
                status = status.worst(HealthStatus::Warning);
                alerts.push(format!(
                    "oldest pending item is {} seconds old",
                    age.num_seconds()
                ));
            }
        }

        if counts.dead_letter >= thresholds.critical_dead_letter {
            status = status.worst(HealthStatus::Critical);
            alerts.push(format!("{} items in dead letter", counts.dead_letter));
        } else if counts.dead_letter >= thresholds.warning_dead_letter {
            status = status.worst(HealthStatus::Warning);
            alerts.push(format!("{} items in dead letter", counts.dead_letter));
        }

        Ok(Self {
            status,
            pending: counts.pending,
            processing: counts.processing,
            failed: counts.failed,
            dead_letter: counts.dead_letter,
            oldest_pending_age_ms: oldest_pending.map(|age| age.num_milliseconds()),
            last_processed_at,
            alerts,
        })
    }
}
