//! Event envelope and the domain event types the core consumes and emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ScoreBreakdown;
use crate::ids::{EventId, IncidentId, OfferId, VendorId};

/// Source service names the envelope's `source` field is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    DispatchEngine,
    IncidentIntake,
    DriverApp,
    VendorApp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventType {
    // Consumed
    IncidentCreated {
        incident_id: IncidentId,
    },
    IncidentCancelled {
        incident_id: IncidentId,
        reason: Option<String>,
    },
    // Emitted
    OfferCreated {
        offer_id: OfferId,
        incident_id: IncidentId,
        vendor_id: VendorId,
        match_score: f64,
        breakdown: ScoreBreakdown,
        estimated_payout: f64,
        expires_at: DateTime<Utc>,
        attempt: u32,
    },
    OfferAccepted {
        offer_id: OfferId,
        incident_id: IncidentId,
        vendor_id: VendorId,
    },
    OfferDeclined {
        offer_id: OfferId,
        incident_id: IncidentId,
        vendor_id: VendorId,
        reason: Option<String>,
    },
    OfferExpired {
        offer_id: OfferId,
        incident_id: IncidentId,
        vendor_id: VendorId,
    },
    OfferCancelled {
        offer_id: OfferId,
        incident_id: IncidentId,
        vendor_id: VendorId,
        reason: String,
    },
    IncidentAssigned {
        incident_id: IncidentId,
        vendor_id: VendorId,
    },
    IncidentEscalated {
        incident_id: IncidentId,
        attempts: u32,
        final_radius_miles: f64,
        reason: String,
    },
    VendorTimeout {
        incident_id: IncidentId,
        vendor_id: VendorId,
    },
    IncidentStatusChanged {
        incident_id: IncidentId,
        from: String,
        to: String,
    },
}

/// Domain event envelope. Every write and every emitted event carries the
/// originating `event_id` so consumers can deduplicate (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub source: Source,
    #[serde(flatten)]
    pub detail: EventType,
}

impl Event {
    pub fn new(event_id: EventId, timestamp: DateTime<Utc>, source: Source, detail: EventType) -> Self {
        Self {
            event_id,
            timestamp,
            version: "1.0".to_string(),
            source,
            detail,
        }
    }
}
