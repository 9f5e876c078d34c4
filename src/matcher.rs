//! Matcher: orchestrates a single matching attempt: query the vendor
//! directory, drop ineligible vendors, score and rank the rest, return the
//! top N candidates (spec §4.2).

use crate::config::MatchingConfig;
use crate::domain::Incident;
use crate::error::DispatchResult;
use crate::scoring::{rank, score_vendor, ScoredVendor};
use crate::vendor_directory::VendorDirectory;

/// Result of one `matchOnce` call: a ranked list of candidates, already
/// filtered to capable + available vendors and truncated to
/// `config.max_concurrent_offers_per_attempt`.
pub type RankedList = Vec<ScoredVendor>;

/// Performs one matching attempt at `radius_miles` (already clamped to
/// `config.max_radius_miles` by the caller). The vendor-exclusion list
/// (populated after a vendor timeout, spec §4.3.3) is applied here so a
/// timed-out vendor never resurfaces for this incident's remaining
/// lifetime.
pub async fn match_once(
    directory: &dyn VendorDirectory,
    incident: &Incident,
    radius_miles: f64,
    config: &MatchingConfig,
) -> DispatchResult<RankedList> {
    let candidates = directory.find_within_radius(incident.location, radius_miles).await?;

    let scored: Vec<ScoredVendor> = candidates
        .into_iter()
        .filter(|vendor| !incident.excluded_vendors.contains(&vendor.id))
        .filter_map(|vendor| score_vendor(&vendor, incident, &config.weights, config.max_radius_miles))
        .collect();

    let ranked = rank(scored);
    Ok(ranked.into_iter().take(config.max_concurrent_offers_per_attempt).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Availability, Capability, GeoPoint, PriceSchedule, PriorityTier, ServiceType, VendorMetrics};
    use crate::ids::{IncidentId, VendorId};
    use crate::vendor_directory::InMemoryVendorDirectory;
    use std::collections::HashMap;

    fn vendor(lat: f64, lon: f64, acceptance_rate: f64, rating: f64) -> crate::domain::Vendor {
        crate::domain::Vendor {
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

    #[tokio::test]
    async fn returns_top_n_ranked_candidates() {
        let directory = InMemoryVendorDirectory::new();
        directory.upsert(vendor(40.72, -74.00, 0.90, 4.8));
        directory.upsert(vendor(40.73, -74.01, 0.70, 4.0));
        directory.upsert(vendor(40.74, -74.02, 0.50, 3.5));
        directory.upsert(vendor(40.75, -74.03, 0.40, 3.0)); // should be excluded once N=3

        let incident = Incident::new(
            IncidentId::new(),
            "driver-1".into(),
            ServiceType::Tire,
            GeoPoint { lat: 40.7128, lon: -74.0060 },
            PriorityTier::Standard,
            chrono::Utc::now(),
        );
        let config = MatchingConfig::default();

        let ranked = match_once(&directory, &incident, config.default_radius_miles, &config).await.unwrap();
        assert_eq!(ranked.len(), config.max_concurrent_offers_per_attempt);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn excludes_vendors_in_incident_exclusion_list() {
        let directory = InMemoryVendorDirectory::new();
        let timed_out = vendor(40.72, -74.00, 0.90, 4.8);
        let timed_out_id = timed_out.id;
        directory.upsert(timed_out);
        directory.upsert(vendor(40.73, -74.01, 0.70, 4.0));

        let mut incident = Incident::new(
            IncidentId::new(),
            "driver-1".into(),
            ServiceType::Tire,
            GeoPoint { lat: 40.7128, lon: -74.0060 },
            PriorityTier::Standard,
            chrono::Utc::now(),
        );
        incident.excluded_vendors.push(timed_out_id);

        let config = MatchingConfig::default();
        let ranked = match_once(&directory, &incident, config.default_radius_miles, &config).await.unwrap();
        assert!(ranked.iter().all(|c| c.vendor.id != timed_out_id));
    }

    #[tokio::test]
    async fn empty_directory_yields_empty_ranked_list() {
        let directory = InMemoryVendorDirectory::new();
        let incident = Incident::new(
            IncidentId::new(),
            "driver-1".into(),
            ServiceType::Tire,
            GeoPoint { lat: 40.7128, lon: -74.0060 },
            PriorityTier::Standard,
            chrono::Utc::now(),
        );
        let config = MatchingConfig::default();
        let ranked = match_once(&directory, &incident, config.default_radius_miles, &config).await.unwrap();
        assert!(ranked.is_empty());
    }
}
