//! Offer aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IncidentId, OfferId, VendorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

impl OfferStatus {
    /// Offers in any of {accepted, declined, expired, cancelled} never
    /// transition again (spec §3 / §8 "no resurrection").
    pub fn is_terminal(self) -> bool {
        !matches!(self, OfferStatus::Pending)
    }
}

/// Per-factor score breakdown; each field and the weighted sum lie in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance: f64,
    pub capability: f64,
    pub availability: f64,
    pub acceptance_rate: f64,
    pub rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub incident_id: IncidentId,
    pub vendor_id: VendorId,
    pub status: OfferStatus,
    pub match_score: f64,
    pub breakdown: ScoreBreakdown,
    pub estimated_payout: f64,
    pub expires_at: DateTime<Utc>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
}

impl Offer {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        // An offer whose expiresAt equals now is expired (strict <), spec §8.
        now >= self.expires_at
    }
}
