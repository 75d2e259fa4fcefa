//! Ingestion health snapshot.

use serde::Serialize;

use crate::circuit_breaker::BreakerState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionHealth {
    pub can_ingest: bool,
    /// None until the disk monitor has run once
    pub free_space_percentage: Option<f64>,
    pub breaker_state: BreakerState,
    pub staged_backlog: Option<usize>,
    pub running: bool,
}

impl IngestionHealth {
    pub fn is_healthy(&self) -> bool {
        self.can_ingest && self.running && self.breaker_state != BreakerState::Tripped
    }
}
