//! Vendor Directory & Geo-Index: vendor profiles, capabilities,
//! availability, rating, acceptance rate; supports `vendorsWithinRadius`.
//!
//! Spec's Non-goals exclude the geo-index's internal representation: the
//! core only requires the `findWithinRadius` query. This in-memory
//! implementation scans and filters (acceptable for small catalogs per the
//! teacher's design notes on scan-and-filter geo-queries), hidden behind
//! the [`VendorDirectory`] trait so a real index can be swapped in without
//! touching the matcher. Grounded in the teacher's `DashMap`-backed hot
//! cache (`cache.rs`) for concurrent reads without external locking.

use dashmap::DashMap;
use std::sync::Arc;

use crate::domain::{GeoPoint, Vendor};
use crate::error::DispatchResult;
use crate::geo::haversine_miles;
use crate::ids::VendorId;

#[async_trait::async_trait]
pub trait VendorDirectory: Send + Sync {
    /// `DispatchResult` rather than a bare `Vec` so a real backend's
    /// transient failures (spec §4.3.5 "geo-query failures") flow through
    /// the same retry/escalation classification as store and event-bus
    /// calls. The in-memory implementation never fails.
    async fn find_within_radius(&self, point: GeoPoint, miles: f64) -> DispatchResult<Vec<Vendor>>;
    async fn get(&self, id: VendorId) -> DispatchResult<Option<Vendor>>;
    /// Used by the offer-accept path to flip a vendor to busy once they
    /// accept, so subsequent matching attempts (for other incidents) see
    /// up-to-date availability (spec §5 "naturally enforced... visible on
    /// the next attempt's query").
    async fn mark_busy(&self, id: VendorId, incident_id: crate::ids::IncidentId);
    async fn mark_available(&self, id: VendorId);
}

#[derive(Clone, Default)]
pub struct InMemoryVendorDirectory {
    vendors: Arc<DashMap<VendorId, Vendor>>,
}

impl InMemoryVendorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, vendor: Vendor) {
        self.vendors.insert(vendor.id, vendor);
    }
}

#[async_trait::async_trait]
impl VendorDirectory for InMemoryVendorDirectory {
    async fn find_within_radius(&self, point: GeoPoint, miles: f64) -> DispatchResult<Vec<Vendor>> {
        Ok(self
            .vendors
            .iter()
            .filter(|entry| {
                // Boundary-inclusive: a vendor exactly on the radius is included (spec §8).
                haversine_miles(point, entry.coverage_center) <= miles
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get(&self, id: VendorId) -> DispatchResult<Option<Vendor>> {
        Ok(self.vendors.get(&id).map(|entry| entry.value().clone()))
    }

    async fn mark_busy(&self, id: VendorId, incident_id: crate::ids::IncidentId) {
        if let Some(mut entry) = self.vendors.get_mut(&id) {
            entry.availability = crate::domain::Availability::Busy;
            entry.active_incident = Some(incident_id);
        }
    }

    async fn mark_available(&self, id: VendorId) {
        if let Some(mut entry) = self.vendors.get_mut(&id) {
            entry.availability = crate::domain::Availability::Available;
            entry.active_incident = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Availability, Capability, VendorMetrics};

    fn sample_vendor(id: VendorId, lat: f64, lon: f64) -> Vendor {
        Vendor {
            id,
            capabilities: vec![Capability::TireRepair],
            coverage_center: GeoPoint { lat, lon },
            coverage_radius_miles: 50.0,
            availability: Availability::Available,
            active_incident: None,
            metrics: VendorMetrics {
                acceptance_rate: 0.8,
                rating: 4.5,
                completion_rate: 0.9,
            },
            pricing: Default::default(),
        }
    }

    #[tokio::test]
    async fn finds_vendors_within_radius_and_excludes_far_ones() {
        let dir = InMemoryVendorDirectory::new();
        let near = VendorId::new();
        let far = VendorId::new();
        dir.upsert(sample_vendor(near, 40.72, -74.00));
        dir.upsert(sample_vendor(far, 34.05, -118.24)); // Los Angeles, far from NYC

        let found = dir.find_within_radius(GeoPoint { lat: 40.7128, lon: -74.0060 }, 50.0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, near);
    }

    #[tokio::test]
    async fn marking_busy_is_visible_on_next_query() {
        let dir = InMemoryVendorDirectory::new();
        let id = VendorId::new();
        dir.upsert(sample_vendor(id, 40.72, -74.00));
        dir.mark_busy(id, crate::ids::IncidentId::new()).await;
        let vendor = dir.get(id).await.unwrap().unwrap();
        assert_eq!(vendor.availability, Availability::Busy);
    }
}
