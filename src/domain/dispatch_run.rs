//! `DispatchRun`: per-incident ephemeral record held by the engine while a
//! dispatch attempt loop is in flight. Destroyed on terminal outcome.
//!
//! Grounded in the teacher's explicit-state-record pattern (`case.rs`):
//! rather than holding state implicitly across `.await` points in a closure,
//! the attempt loop is a plain loop over this record's fields.

use chrono::{DateTime, Utc};

use crate::ids::{IncidentId, OfferId, VendorId};

#[derive(Debug, Clone)]
pub struct DispatchRun {
    pub incident_id: IncidentId,
    /// 1-based attempt index. Monotonically non-decreasing within a run
    /// (spec §8 "monotonic attempts"); reset to 1 only by a fresh run
    /// (vendor timeout or manual reassignment).
    pub attempt: u32,
    /// Current search radius in miles. Non-decreasing within a run until
    /// reset by a fresh run.
    pub radius_miles: f64,
    /// Deadline for the current attempt's offer batch (earliest offer expiry).
    pub attempt_deadline: Option<DateTime<Utc>>,
    /// Offer identifiers live in the current batch.
    pub live_offers: Vec<OfferId>,
    pub escalated: bool,
    /// Vendors excluded from candidate selection for this run's remaining
    /// lifetime (accumulates across runs for a given incident).
    pub excluded_vendors: Vec<VendorId>,
}

impl DispatchRun {
    pub fn new(incident_id: IncidentId, default_radius: f64, excluded_vendors: Vec<VendorId>) -> Self {
        Self {
            incident_id,
            attempt: 1,
            radius_miles: default_radius,
            attempt_deadline: None,
            live_offers: Vec::new(),
            escalated: false,
            excluded_vendors,
        }
    }

    pub fn expand_radius(&mut self, factor: f64, max_radius: f64) {
        self.radius_miles = (self.radius_miles * (1.0 + factor)).min(max_radius);
        self.attempt += 1;
    }

    pub fn exhausted(&self, max_attempts: u32) -> bool {
        self.attempt >= max_attempts
    }
}
