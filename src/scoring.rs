//! Scoring Engine: pure, deterministic, side-effect free mapping of
//! (vendor, incident, weights) to a score in [0, 1] with a per-factor
//! breakdown.
//!
//! Grounded in the teacher's preference for small pure functions at the
//! core of a larger stateful service (see `state/manager.rs`'s transition
//! predicates) kept entirely free of I/O so they are trivially testable.

use crate::config::ScoringWeights;
use crate::domain::{Incident, ScoreBreakdown, Vendor};
use crate::geo::haversine_miles;

/// A candidate vendor paired with its computed score; `None` candidates
/// (capability or availability factor of 0) are filtered out before this
/// type is constructed.
#[derive(Debug, Clone)]
pub struct ScoredVendor {
    pub vendor: Vendor,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Scores a single vendor against an incident under the given weights and
/// max radius. Returns `None` if the vendor lacks a required capability or
/// is unavailable (such vendors are dropped before ranking, spec §4.1).
pub fn score_vendor(vendor: &Vendor, incident: &Incident, weights: &ScoringWeights, max_radius_miles: f64) -> Option<ScoredVendor> {
    let capability = if vendor.has_capability(incident.required_capabilities()) { 1.0 } else { 0.0 };
    let availability = if vendor.is_available() { 1.0 } else { 0.0 };
    if capability == 0.0 || availability == 0.0 {
        return None;
    }

    let distance_miles = haversine_miles(incident.location, vendor.coverage_center);
    let distance = (1.0 - distance_miles / max_radius_miles).max(0.0);
    let acceptance_rate = vendor.metrics.acceptance_rate.clamp(0.0, 1.0);
    let rating = (vendor.metrics.rating / 5.0).clamp(0.0, 1.0);

    let breakdown = ScoreBreakdown {
        distance,
        capability,
        availability,
        acceptance_rate,
        rating,
    };

    let score = weights.distance * breakdown.distance
        + weights.capability * breakdown.capability
        + weights.availability * breakdown.availability
        + weights.acceptance_rate * breakdown.acceptance_rate
        + weights.rating * breakdown.rating;

    Some(ScoredVendor { vendor: vendor.clone(), score, breakdown })
}

/// Ranks scored candidates per spec §4.1 tie-break: higher score, then
/// higher distance factor, then higher acceptance rate, then lexicographic
/// vendor id (for deterministic test ordering).
pub fn rank(mut candidates: Vec<ScoredVendor>) -> Vec<ScoredVendor> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap()
            .then_with(|| b.breakdown.distance.partial_cmp(&a.breakdown.distance).unwrap())
            .then_with(|| b.breakdown.acceptance_rate.partial_cmp(&a.breakdown.acceptance_rate).unwrap())
            .then_with(|| a.vendor.id.0.cmp(&b.vendor.id.0))
    });
    candidates
}

/// Estimated payout using the winning vendor's own pricing (spec §4.1).
pub fn estimated_payout(vendor: &Vendor, incident: &Incident) -> f64 {
    let miles = haversine_miles(incident.location, vendor.coverage_center);
    vendor.price_for(incident.service_type, miles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Availability, Capability, GeoPoint, PriceSchedule, PriorityTier, ServiceType, VendorMetrics};
    use crate::ids::{IncidentId, VendorId};
    use std::collections::HashMap;

    fn incident_at(lat: f64, lon: f64) -> Incident {
        Incident::new(
            IncidentId::new(),
            "driver-1".into(),
            ServiceType::Tire,
            GeoPoint { lat, lon },
            PriorityTier::Standard,
            chrono::Utc::now(),
        )
    }

    fn vendor_at(lat: f64, lon: f64, acceptance_rate: f64, rating: f64) -> Vendor {
        Vendor {
            id: VendorId::new(),
            capabilities: vec![Capability::TireRepair],
            coverage_center: GeoPoint { lat, lon },
            coverage_radius_miles: 50.0,
            availability: Availability::Available,
            active_incident: None,
            metrics: VendorMetrics { acceptance_rate, rating, completion_rate: 0.9 },
            pricing: HashMap::from([(ServiceType::Tire, PriceSchedule { base_price: 50.0, per_mile_rate: 1.5 })]),
        }
    }

    #[test]
    fn unavailable_or_uncapable_vendors_score_zero_and_are_filtered() {
        let incident = incident_at(40.7128, -74.0060);
        let weights = crate::config::MatchingConfig::default().weights;

        let mut unavailable = vendor_at(40.72, -74.0, 0.8, 4.0);
        unavailable.availability = Availability::Busy;
        assert!(score_vendor(&unavailable, &incident, &weights, 200.0).is_none());

        let mut uncapable = vendor_at(40.72, -74.0, 0.8, 4.0);
        uncapable.capabilities = vec![Capability::Towing];
        assert!(score_vendor(&uncapable, &incident, &weights, 200.0).is_none());
    }

    #[test]
    fn score_is_weighted_sum_within_bounds() {
        let incident = incident_at(40.7128, -74.0060);
        let weights = crate::config::MatchingConfig::default().weights;
        let vendor = vendor_at(40.72, -74.0, 0.8, 4.5);

        let scored = score_vendor(&vendor, &incident, &weights, 200.0).unwrap();
        assert!((0.0..=1.0).contains(&scored.score));
        let expected = weights.distance * scored.breakdown.distance
            + weights.capability * scored.breakdown.capability
            + weights.availability * scored.breakdown.availability
            + weights.acceptance_rate * scored.breakdown.acceptance_rate
            + weights.rating * scored.breakdown.rating;
        assert!((expected - scored.score).abs() < 1e-9);
    }

    #[test]
    fn ranking_breaks_ties_by_distance_then_acceptance_rate_then_id() {
        let incident = incident_at(40.7128, -74.0060);
        let weights = crate::config::MatchingConfig::default().weights;

        // Two vendors with identical coordinates and metrics score identically;
        // only their ids differ, so id order decides.
        let v1 = vendor_at(40.72, -74.0, 0.8, 4.5);
        let v2 = vendor_at(40.72, -74.0, 0.8, 4.5);
        let mut candidates = vec![
            score_vendor(&v1, &incident, &weights, 200.0).unwrap(),
            score_vendor(&v2, &incident, &weights, 200.0).unwrap(),
        ];
        candidates.sort_by(|a, b| a.vendor.id.0.cmp(&b.vendor.id.0));
        let expected_first = candidates[0].vendor.id;

        let ranked = rank(candidates);
        assert_eq!(ranked[0].vendor.id, expected_first);
    }

    #[test]
    fn payout_rounds_base_plus_per_mile() {
        let incident = incident_at(40.7128, -74.0060);
        let vendor = vendor_at(40.7128, -74.0060, 0.8, 4.5); // co-located: 0 miles
        assert_eq!(estimated_payout(&vendor, &incident), 50.0);
    }
}
