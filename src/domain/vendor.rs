//! Vendor aggregate.

use serde::{Deserialize, Serialize};

use crate::domain::incident::{GeoPoint, ServiceType};
use crate::ids::{IncidentId, VendorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TireRepair,
    TireReplacement,
    EngineRepair,
    Towing,
    Jumpstart,
    FuelDelivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VendorMetrics {
    /// Acceptance rate in [0, 1].
    pub acceptance_rate: f64,
    /// Rating in [0, 5].
    pub rating: f64,
    /// Completion rate in [0, 1].
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceSchedule {
    pub base_price: f64,
    pub per_mile_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub capabilities: Vec<Capability>,
    pub coverage_center: GeoPoint,
    pub coverage_radius_miles: f64,
    pub availability: Availability,
    pub active_incident: Option<IncidentId>,
    pub metrics: VendorMetrics,
    /// Pricing per service type this vendor can price; absent entries price at 0.
    pub pricing: std::collections::HashMap<ServiceType, PriceSchedule>,
}

impl Vendor {
    pub fn has_capability(&self, required: &[Capability]) -> bool {
        required.iter().any(|c| self.capabilities.contains(c))
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }

    pub fn price_for(&self, service_type: ServiceType, miles: f64) -> f64 {
        match self.pricing.get(&service_type) {
            Some(schedule) => (schedule.base_price + miles * schedule.per_mile_rate).round(),
            None => 0.0,
        }
    }
}

