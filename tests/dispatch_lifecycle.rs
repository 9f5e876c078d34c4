//! End-to-end dispatch lifecycle scenarios, driven against the in-memory
//! reference collaborators wired together the same way `dispatchd` wires
//! them. Waits are bounded with `tokio::time::timeout` over a short real
//! poll rather than fighting paused virtual time, since the engine's own
//! polling interval is 50ms and every scenario here resolves in well under
//! a second.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use roadcall_dispatch::clock::{Clock, SystemClock};
use roadcall_dispatch::config::{ConfigProvider, MatchingConfig, StaticConfigProvider};
use roadcall_dispatch::dispatch::DispatchEngine;
use roadcall_dispatch::domain::{
    Availability, Capability, GeoPoint, Incident, IncidentStatus, OfferStatus, PriceSchedule, PriorityTier, ServiceType, Vendor, VendorMetrics,
};
use roadcall_dispatch::error::DispatchError;
use roadcall_dispatch::eventbus::InMemoryEventBus;
use roadcall_dispatch::events::EventType;
use roadcall_dispatch::geo::haversine_miles;
use roadcall_dispatch::ids::{Ids, UuidIds, VendorId};
use roadcall_dispatch::stores::{IncidentStore, InMemoryIncidentStore, InMemoryOfferStore, OfferStore};
use roadcall_dispatch::vendor_directory::InMemoryVendorDirectory;

const NYC: GeoPoint = GeoPoint { lat: 40.7128, lon: -74.0060 };

struct Harness {
    engine: Arc<DispatchEngine>,
    directory: Arc<InMemoryVendorDirectory>,
    incidents: Arc<InMemoryIncidentStore>,
    offers: Arc<InMemoryOfferStore>,
    events: Arc<InMemoryEventBus>,
    ids: Arc<UuidIds>,
    clock: Arc<dyn Clock>,
}

fn build(config: MatchingConfig) -> Harness {
    let directory = Arc::new(InMemoryVendorDirectory::new());
    let incidents = Arc::new(InMemoryIncidentStore::new());
    let offers = Arc::new(InMemoryOfferStore::new());
    let events = Arc::new(InMemoryEventBus::default());
    let ids = Arc::new(UuidIds);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let engine = DispatchEngine::new(
        directory.clone(),
        incidents.clone(),
        offers.clone(),
        events.clone(),
        Arc::new(StaticConfigProvider::new(config)) as Arc<dyn ConfigProvider>,
        clock.clone(),
        ids.clone(),
    );
    engine.subscribe_to_incident_events();

    Harness { engine, directory, incidents, offers, events, ids, clock }
}

fn sample_vendor(lat: f64, lon: f64) -> Vendor {
    Vendor {
        id: VendorId::new(),
        capabilities: vec![Capability::TireRepair, Capability::TireReplacement],
        coverage_center: GeoPoint { lat, lon },
        coverage_radius_miles: 50.0,
        availability: Availability::Available,
        active_incident: None,
        metrics: VendorMetrics { acceptance_rate: 0.8, rating: 4.5, completion_rate: 0.9 },
        pricing: HashMap::from([(ServiceType::Tire, PriceSchedule { base_price: 45.0, per_mile_rate: 1.25 })]),
    }
}

impl Harness {
    async fn report_incident(&self, location: GeoPoint) -> roadcall_dispatch::ids::IncidentId {
        let incident = Incident::new(self.ids.new_incident_id(), "driver-1".into(), ServiceType::Tire, location, PriorityTier::Standard, self.clock.now());
        let id = incident.id;
        self.incidents.create(incident).await.expect("incident store insert cannot fail in-memory");
        self.engine.handle_incident_created(id);
        id
    }
}

async fn wait_for_pending_offers(offers: &InMemoryOfferStore, incident_id: roadcall_dispatch::ids::IncidentId, count: usize) -> Vec<roadcall_dispatch::domain::Offer> {
    timeout(Duration::from_secs(2), async {
        loop {
            let pending = offers.list_pending_for_incident(incident_id).await.unwrap();
            if pending.len() >= count {
                return pending;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("offers were never created within the timeout")
}

async fn wait_for_incident_status(incidents: &InMemoryIncidentStore, incident_id: roadcall_dispatch::ids::IncidentId, status: IncidentStatus) -> Incident {
    timeout(Duration::from_secs(2), async {
        loop {
            let incident = incidents.get(incident_id).await.unwrap().unwrap();
            if incident.status == status {
                return incident;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("incident never reached {status:?} within the timeout"))
}

fn has_event(events: &InMemoryEventBus, matches: impl Fn(&EventType) -> bool) -> bool {
    events.published_events().iter().any(|e| matches(&e.detail))
}

#[tokio::test]
async fn happy_path_offer_is_accepted_and_incident_assigned() {
    let harness = build(MatchingConfig::default());
    let vendor = sample_vendor(40.72, -74.00);
    let vendor_id = vendor.id;
    harness.directory.upsert(vendor);

    let incident_id = harness.report_incident(NYC).await;

    let pending = wait_for_pending_offers(&harness.offers, incident_id, 1).await;
    let offer = &pending[0];
    assert_eq!(offer.vendor_id, vendor_id);

    let updated = harness.engine.accept(offer.id, vendor_id).await.unwrap();
    assert_eq!(updated.status, IncidentStatus::VendorAssigned);
    assert_eq!(updated.assigned_vendor, Some(vendor_id));

    assert!(has_event(&harness.events, |e| matches!(e, EventType::OfferAccepted { vendor_id: v, .. } if *v == vendor_id)));
    assert!(has_event(&harness.events, |e| matches!(e, EventType::IncidentAssigned { vendor_id: v, .. } if *v == vendor_id)));
    assert!(has_event(&harness.events, |e| matches!(e, EventType::IncidentStatusChanged { to, .. } if to == "vendor_assigned")));
}

#[tokio::test]
async fn radius_expansion_finds_a_vendor_outside_the_default_radius() {
    let mut config = MatchingConfig::default();
    config.default_radius_miles = 10.0;
    config.max_radius_miles = 100.0;
    config.radius_expansion_factor = 1.0; // doubles the radius each expansion
    config.max_expansion_attempts = 3;
    let harness = build(config);

    // ~15 miles north of the incident: outside the 10mi default radius,
    // inside the 20mi radius reached after one expansion.
    const DEGREE_MILES: f64 = 69.11;
    let vendor = sample_vendor(NYC.lat + 15.0 / DEGREE_MILES, NYC.lon);
    let vendor_id = vendor.id;
    let distance = haversine_miles(NYC, vendor.coverage_center);
    assert!((10.0..20.0).contains(&distance), "test fixture distance {distance} must sit between the default and expanded radius");
    harness.directory.upsert(vendor);

    let incident_id = harness.report_incident(NYC).await;

    let pending = wait_for_pending_offers(&harness.offers, incident_id, 1).await;
    assert_eq!(pending[0].vendor_id, vendor_id);
    assert_eq!(pending[0].attempt, 2, "the match should only succeed after one radius expansion");
}

#[tokio::test]
async fn exhausting_expansion_attempts_escalates_the_incident() {
    let mut config = MatchingConfig::default();
    config.max_expansion_attempts = 2;
    let harness = build(config);
    // No vendors seeded at all: every attempt's match is empty.

    let incident_id = harness.report_incident(NYC).await;

    let incident = wait_for_incident_status(&harness.incidents, incident_id, IncidentStatus::Escalated).await;
    assert!(incident.timeline.iter().any(|t| t.to == IncidentStatus::Escalated));
    assert!(has_event(&harness.events, |e| matches!(e, EventType::IncidentEscalated { reason, .. } if reason == "no_match")));
}

#[tokio::test]
async fn only_one_concurrent_acceptance_wins_the_incident() {
    let harness = build(MatchingConfig::default());
    let v1 = sample_vendor(40.72, -74.00);
    let v2 = sample_vendor(40.73, -74.01);
    let (v1_id, v2_id) = (v1.id, v2.id);
    harness.directory.upsert(v1);
    harness.directory.upsert(v2);

    let incident_id = harness.report_incident(NYC).await;
    let pending = wait_for_pending_offers(&harness.offers, incident_id, 2).await;
    let offer_a = pending.iter().find(|o| o.vendor_id == v1_id).unwrap().clone();
    let offer_b = pending.iter().find(|o| o.vendor_id == v2_id).unwrap().clone();

    let engine_a = harness.engine.clone();
    let engine_b = harness.engine.clone();
    let (result_a, result_b) = tokio::join!(engine_a.accept(offer_a.id, v1_id), engine_b.accept(offer_b.id, v2_id));

    let outcomes = [result_a.is_ok(), result_b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1, "exactly one acceptance must win the race");

    let loser = if result_a.is_ok() { result_b } else { result_a };
    assert!(matches!(loser.unwrap_err(), DispatchError::Conflict(_)));

    let incident = harness.incidents.get(incident_id).await.unwrap().unwrap();
    assert!(incident.assigned_vendor == Some(v1_id) || incident.assigned_vendor == Some(v2_id));
}

#[tokio::test]
async fn vendor_timeout_excludes_vendor_and_triggers_reassignment() {
    let mut config = MatchingConfig::default();
    // Fires the arrival deadline on the very first check, without a real or
    // virtual wait: `monitor`'s deadline is `clock.now()` at entry, and the
    // next `clock.now()` call (a real `SystemClock`) is always later.
    config.arrival_deadline_minutes = 0;
    let harness = build(config);

    let vendor = sample_vendor(40.72, -74.00);
    let vendor_id = vendor.id;
    harness.directory.upsert(vendor);

    let incident_id = harness.report_incident(NYC).await;
    let pending = wait_for_pending_offers(&harness.offers, incident_id, 1).await;
    harness.engine.accept(pending[0].id, vendor_id).await.unwrap();

    timeout(Duration::from_secs(2), async {
        loop {
            if has_event(&harness.events, |e| matches!(e, EventType::VendorTimeout { vendor_id: v, .. } if *v == vendor_id)) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("vendor timeout was never observed");

    // The only vendor is now excluded, so the fresh run finds nothing and escalates.
    let incident = wait_for_incident_status(&harness.incidents, incident_id, IncidentStatus::Escalated).await;
    assert!(incident.excluded_vendors.contains(&vendor_id));
}

#[tokio::test]
async fn cancelling_an_incident_mid_attempt_cancels_its_pending_offers() {
    let harness = build(MatchingConfig::default());
    let vendor = sample_vendor(40.72, -74.00);
    harness.directory.upsert(vendor);

    let incident_id = harness.report_incident(NYC).await;
    let pending = wait_for_pending_offers(&harness.offers, incident_id, 1).await;
    let offer_id = pending[0].id;

    harness.engine.handle_incident_cancelled(incident_id);

    wait_for_incident_status(&harness.incidents, incident_id, IncidentStatus::Cancelled).await;

    let offer = harness.offers.get(offer_id).await.unwrap().unwrap();
    assert_eq!(offer.status, OfferStatus::Cancelled);
    assert!(has_event(&harness.events, |e| matches!(e, EventType::IncidentCancelled { incident_id: id, .. } if *id == incident_id)));
}
