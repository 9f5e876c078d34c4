//! Incident aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IncidentId, VendorId};

/// Service type requested by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Tire,
    Engine,
    Tow,
}

/// Incident lifecycle status. Transitions are constrained by
/// [`IncidentStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Created,
    VendorAssigned,
    VendorEnRoute,
    VendorArrived,
    WorkInProgress,
    WorkCompleted,
    PaymentPending,
    Closed,
    Cancelled,
    Escalated,
}

impl IncidentStatus {
    /// Whether a move from `self` to `to` is legal. The dispatch engine only
    /// ever drives `Created -> VendorAssigned` (via conditional write) and
    /// `VendorAssigned -> Created` (vendor timeout reset); the remaining
    /// forward transitions belong to downstream collaborators (vendor
    /// mobile app, payment flow) and are accepted here as valid targets so
    /// the store can record them, but are never produced by this crate.
    pub fn can_transition_to(self, to: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (self, to),
            (Created, VendorAssigned)
                | (Created, Cancelled)
                | (Created, Escalated)
                | (VendorAssigned, VendorEnRoute)
                | (VendorAssigned, VendorArrived)
                | (VendorAssigned, Created) // vendor timeout reset
                | (VendorAssigned, Cancelled)
                | (VendorEnRoute, VendorArrived)
                | (VendorEnRoute, Created) // vendor timeout reset
                | (VendorEnRoute, Cancelled)
                | (VendorArrived, WorkInProgress)
                | (WorkInProgress, WorkCompleted)
                | (WorkCompleted, PaymentPending)
                | (PaymentPending, Closed)
        )
    }

    /// Arrival states that end this crate's responsibility for the incident
    /// once assigned (spec §4.3.3).
    pub fn is_terminal_arrival(self) -> bool {
        matches!(
            self,
            IncidentStatus::VendorArrived | IncidentStatus::WorkInProgress | IncidentStatus::WorkCompleted
        )
    }

    /// Wire-format label, matching the `snake_case` serde representation.
    /// Used by `IncidentStatusChanged` events rather than `{:?}` so the
    /// string an event consumer sees matches the JSON the rest of the
    /// envelope uses.
    pub fn as_str(self) -> &'static str {
        use IncidentStatus::*;
        match self {
            Created => "created",
            VendorAssigned => "vendor_assigned",
            VendorEnRoute => "vendor_en_route",
            VendorArrived => "vendor_arrived",
            WorkInProgress => "work_in_progress",
            WorkCompleted => "work_completed",
            PaymentPending => "payment_pending",
            Closed => "closed",
            Cancelled => "cancelled",
            Escalated => "escalated",
        }
    }
}

/// A single timeline entry. Append-only; never edited or removed (retained
/// per compliance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub from: IncidentStatus,
    pub to: IncidentStatus,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Standard,
    Priority,
    Premium,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub driver_id: String,
    pub service_type: ServiceType,
    pub status: IncidentStatus,
    pub location: GeoPoint,
    pub priority: PriorityTier,
    pub assigned_vendor: Option<VendorId>,
    /// Vendors excluded from future matching attempts for this incident's
    /// remaining lifetime (populated on vendor timeout, spec §4.3.3).
    pub excluded_vendors: Vec<VendorId>,
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn new(id: IncidentId, driver_id: String, service_type: ServiceType, location: GeoPoint, priority: PriorityTier, now: DateTime<Utc>) -> Self {
        Self {
            id,
            driver_id,
            service_type,
            status: IncidentStatus::Created,
            location,
            priority,
            assigned_vendor: None,
            excluded_vendors: Vec::new(),
            timeline: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn required_capabilities(&self) -> &'static [super::vendor::Capability] {
        use super::vendor::Capability::*;
        match self.service_type {
            ServiceType::Tire => &[TireRepair, TireReplacement],
            ServiceType::Engine => &[EngineRepair],
            ServiceType::Tow => &[Towing],
        }
    }
}
