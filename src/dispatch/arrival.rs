//! Arrival monitoring (spec §4.3.3): after a successful assignment, poll
//! incident status at a fixed cadence until a terminal arrival state is
//! reached or the hard deadline fires.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::concurrency::CancelToken;
use crate::dispatch::engine::DispatchEngine;
use crate::ids::{IncidentId, VendorId};

pub enum ArrivalOutcome {
    /// The incident reached `vendor_arrived`, `work_in_progress`, or
    /// `work_completed`; the dispatch engine's responsibility ends here.
    Arrived,
    /// The hard deadline fired without a terminal arrival state.
    TimedOut,
    /// The incident was cancelled while awaiting arrival.
    Cancelled,
}

/// Polls (or would, against a push-based store, await) incident status
/// changes at `config.arrival_poll_interval_minutes` cadence, up to a hard
/// deadline of `config.arrival_deadline_minutes` from assignment.
#[instrument(skip(engine, cancel), fields(incident_id = %incident_id, vendor_id = %vendor_id))]
pub async fn monitor(engine: &Arc<DispatchEngine>, incident_id: IncidentId, vendor_id: VendorId, cancel: &CancelToken) -> ArrivalOutcome {
    let deps = engine.deps();
    let config = deps.config.matching().await;
    let deadline = deps.clock.now() + chrono::Duration::minutes(config.arrival_deadline_minutes as i64);
    let poll_interval = Duration::from_secs(config.arrival_poll_interval_minutes * 60);

    loop {
        if let Ok(Some(incident)) = deps.incidents.get(incident_id).await {
            if incident.status.is_terminal_arrival() {
                return ArrivalOutcome::Arrived;
            }
            if incident.status == crate::domain::IncidentStatus::Cancelled {
                return ArrivalOutcome::Cancelled;
            }
        }
        if cancel.is_cancelled() {
            return ArrivalOutcome::Cancelled;
        }
        if deps.clock.now() >= deadline {
            return ArrivalOutcome::TimedOut;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = cancel.cancelled() => {}
        }
    }
}
