//! The top-level Dispatch Engine: owns the collaborator interfaces, the set
//! of live [`crate::domain::DispatchRun`] tasks, and the accept/decline
//! command surface.
//!
//! Grounded in the teacher's pattern of explicit dependency passing into a
//! service constructor (design note, §9: "Shared mutable globals... replace
//! with explicit dependency passing"), and its `state::manager` owning a
//! registry of in-flight case handles.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::concurrency::CancelToken;
use crate::config::ConfigProvider;
use crate::domain::{Incident, Offer, OfferStatus};
use crate::error::{DispatchError, DispatchResult};
use crate::eventbus::EventBus;
use crate::events::{Event, EventType, Source};
use crate::ids::{EventId, Ids, IncidentId, OfferId, VendorId};
use crate::resilience::RetryPolicy;
use crate::stores::{ConditionalAssignOutcome, IncidentStore, OfferStore};
use crate::vendor_directory::VendorDirectory;

/// Bound on the consumed-event dedup cache (spec §5 "consumers dedupe by
/// event id"). The core is itself a consumer of `IncidentCreated` and
/// `IncidentCancelled`, so it keeps the same kind of bounded recency cache
/// a downstream consumer would.
const SEEN_EVENTS_CAPACITY: usize = 4096;

/// Bookkeeping for one live `DispatchRun` task.
struct RunHandle {
    cancel: CancelToken,
    wake: Arc<Notify>,
    join: JoinHandle<()>,
}

/// Shared dependency bundle. Cloneable so the spawned per-incident tasks in
/// `dispatch::run` can hold their own `Arc` without borrowing the engine.
#[derive(Clone)]
pub struct DispatchDeps {
    pub directory: Arc<dyn VendorDirectory>,
    pub incidents: Arc<dyn IncidentStore>,
    pub offers: Arc<dyn OfferStore>,
    pub events: Arc<dyn EventBus>,
    pub config: Arc<dyn ConfigProvider>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn Ids>,
    pub retry: RetryPolicy,
}

pub struct DispatchEngine {
    deps: DispatchDeps,
    runs: DashMap<IncidentId, RunHandle>,
    /// Root of the cancellation hierarchy; every `DispatchRun` task holds a
    /// child token of this one, so engine shutdown cancels every run even
    /// if a run's own handle was already removed from `runs`.
    root_cancel: CancelToken,
    /// Recently-consumed event ids, so a redelivered `IncidentCreated` or
    /// `IncidentCancelled` (at-least-once bus delivery) is a no-op rather
    /// than spawning a duplicate run or double-cancelling one.
    seen_events: Mutex<LruCache<EventId, ()>>,
}

impl DispatchEngine {
    pub fn new(
        directory: Arc<dyn VendorDirectory>,
        incidents: Arc<dyn IncidentStore>,
        offers: Arc<dyn OfferStore>,
        events: Arc<dyn EventBus>,
        config: Arc<dyn ConfigProvider>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn Ids>,
    ) -> Arc<Self> {
        Self::with_retry(directory, incidents, offers, events, config, clock, ids, RetryPolicy::default())
    }

    pub fn with_retry(
        directory: Arc<dyn VendorDirectory>,
        incidents: Arc<dyn IncidentStore>,
        offers: Arc<dyn OfferStore>,
        events: Arc<dyn EventBus>,
        config: Arc<dyn ConfigProvider>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn Ids>,
        retry: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            deps: DispatchDeps { directory, incidents, offers, events, config, clock, ids, retry },
            runs: DashMap::new(),
            root_cancel: CancelToken::new(),
            seen_events: Mutex::new(LruCache::new(NonZeroUsize::new(SEEN_EVENTS_CAPACITY).expect("capacity is nonzero"))),
        })
    }

    pub fn deps(&self) -> &DispatchDeps {
        &self.deps
    }

    /// Records `event_id` as consumed, returning `true` if it was already
    /// seen (the caller should then treat the delivery as a no-op).
    fn already_consumed(&self, event_id: EventId) -> bool {
        let mut seen = self.seen_events.lock();
        if seen.contains(&event_id) {
            true
        } else {
            seen.put(event_id, ());
            false
        }
    }

    /// Subscribes this engine to its own event bus so externally published
    /// `IncidentCreated`/`IncidentCancelled` events (spec §6 "event types
    /// consumed by the core") drive the same entry points as the direct
    /// method calls. Optional: callers that prefer to invoke
    /// [`Self::handle_incident_created`] directly (e.g. right after
    /// creating the incident, in the same request) can skip this.
    pub fn subscribe_to_incident_events(self: &Arc<Self>) {
        let created = self.clone();
        self.deps.events.subscribe(Arc::new(crate::eventbus::FnHandler {
            predicate: Arc::new(|event: &Event| matches!(event.detail, EventType::IncidentCreated { .. })),
            f: move |event: Event| {
                let engine = created.clone();
                async move {
                    if let EventType::IncidentCreated { incident_id } = event.detail {
                        engine.handle_incident_created(incident_id);
                    }
                    Ok(())
                }
            },
        }));

        let cancelled = self.clone();
        self.deps.events.subscribe(Arc::new(crate::eventbus::FnHandler {
            predicate: Arc::new(|event: &Event| matches!(event.detail, EventType::IncidentCancelled { .. })),
            f: move |event: Event| {
                let engine = cancelled.clone();
                async move {
                    if let EventType::IncidentCancelled { incident_id, .. } = event.detail {
                        engine.handle_incident_cancelled(incident_id);
                    }
                    Ok(())
                }
            },
        }));
    }

    /// Entry point for an `IncidentCreated` event: starts a fresh
    /// `DispatchRun` task for the incident, excluding no vendors.
    #[instrument(skip(self))]
    pub fn handle_incident_created(self: &Arc<Self>, incident_id: IncidentId) {
        self.spawn_run(incident_id, Vec::new());
    }

    /// Re-enters the attempt loop for an incident with a fresh run, as
    /// driven by an explicit dispatcher command (spec §4.3.4). Any vendors
    /// already excluded on the incident record (e.g. from a prior vendor
    /// timeout) are carried forward.
    #[instrument(skip(self))]
    pub async fn manual_reassign(self: &Arc<Self>, incident_id: IncidentId) -> DispatchResult<()> {
        if self.runs.contains_key(&incident_id) {
            return Err(DispatchError::Conflict(format!("incident {incident_id} already has an active dispatch run")));
        }
        let incident = self
            .deps
            .incidents
            .get(incident_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("incident {incident_id}")))?;
        self.spawn_run(incident_id, incident.excluded_vendors.clone());
        Ok(())
    }

    fn spawn_run(self: &Arc<Self>, incident_id: IncidentId, excluded_vendors: Vec<VendorId>) {
        let cancel = self.root_cancel.child_token();
        let wake = Arc::new(Notify::new());
        let engine = self.clone();
        let run_cancel = cancel.clone();
        let run_wake = wake.clone();

        let join = tokio::spawn(async move {
            crate::dispatch::run::drive(engine.clone(), incident_id, excluded_vendors, run_cancel, run_wake).await;
            engine.runs.remove(&incident_id);
        });

        self.runs.insert(incident_id, RunHandle { cancel, wake, join });
    }

    /// Signals cancellation to an active run (spec §5 cancellation). A
    /// no-op if no run is currently active for this incident.
    #[instrument(skip(self))]
    pub fn handle_incident_cancelled(&self, incident_id: IncidentId) {
        if let Some(handle) = self.runs.get(&incident_id) {
            handle.cancel.cancel();
        }
    }

    /// Wakes a waiting run so it re-checks offer outcomes without waiting
    /// for the next poll tick. Called by [`Self::accept`] and
    /// [`Self::decline`] after a terminal offer write.
    fn wake_run(&self, incident_id: IncidentId) {
        if let Some(handle) = self.runs.get(&incident_id) {
            handle.wake.notify_waiters();
        }
    }

    /// Acceptance command (spec §4.3.2, §6). Exposed on the offer store's
    /// command surface rather than the attempt loop itself, per the design
    /// note that acceptance coordinates with the run only through the
    /// incident store's conditional write.
    #[instrument(skip(self))]
    pub async fn accept(&self, offer_id: OfferId, vendor_id: VendorId) -> DispatchResult<Incident> {
        let now = self.deps.clock.now();
        let offer = self
            .deps
            .offers
            .get(offer_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("offer {offer_id}")))?;

        if offer.vendor_id != vendor_id {
            return Err(DispatchError::Validation(format!("offer {offer_id} does not belong to vendor {vendor_id}")));
        }
        if offer.status != OfferStatus::Pending {
            return Err(DispatchError::Conflict(format!("offer {offer_id} is already {:?}", offer.status)));
        }
        if offer.is_expired(now) {
            return Err(DispatchError::Expired);
        }

        // The single linearization point: only one acceptance per incident
        // can win this conditional write.
        let outcome = self.deps.incidents.conditional_assign(offer.incident_id, vendor_id, now).await?;
        if outcome == ConditionalAssignOutcome::Conflict {
            return Err(DispatchError::Conflict("incident already assigned".to_string()));
        }

        self.deps.offers.terminate(offer_id, OfferStatus::Accepted, None, now).await?;
        self.deps.directory.mark_busy(vendor_id, offer.incident_id).await;
        self.publish_status_changed(offer.incident_id, crate::domain::IncidentStatus::Created, crate::domain::IncidentStatus::VendorAssigned, now).await;

        let event_id = self.deps.ids.new_event_id();
        self.deps
            .events
            .publish(Event::new(
                event_id,
                now,
                Source::DispatchEngine,
                EventType::OfferAccepted { offer_id, incident_id: offer.incident_id, vendor_id },
            ))
            .await?;
        let event_id = self.deps.ids.new_event_id();
        self.deps
            .events
            .publish(Event::new(
                event_id,
                now,
                Source::DispatchEngine,
                EventType::IncidentAssigned { incident_id: offer.incident_id, vendor_id },
            ))
            .await?;

        // Cancel every sibling pending offer for this incident (spec §4.3.2).
        let siblings = self.deps.offers.list_pending_for_incident(offer.incident_id).await?;
        for sibling in siblings {
            if sibling.id == offer_id {
                continue;
            }
            self.cancel_offer(&sibling, "superseded".to_string(), now).await?;
        }

        self.wake_run(offer.incident_id);

        self.deps
            .incidents
            .get(offer.incident_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("incident {}", offer.incident_id)))
    }

    /// Decline command (spec §4.3.2, §6). Does not itself trigger radius
    /// expansion; expansion waits for the whole batch to terminate.
    #[instrument(skip(self))]
    pub async fn decline(&self, offer_id: OfferId, vendor_id: VendorId, reason: Option<String>) -> DispatchResult<()> {
        let now = self.deps.clock.now();
        let offer = self
            .deps
            .offers
            .get(offer_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("offer {offer_id}")))?;

        if offer.vendor_id != vendor_id {
            return Err(DispatchError::Validation(format!("offer {offer_id} does not belong to vendor {vendor_id}")));
        }

        self.deps.offers.terminate(offer_id, OfferStatus::Declined, reason.clone(), now).await?;
        let event_id = self.deps.ids.new_event_id();
        self.deps
            .events
            .publish(Event::new(
                event_id,
                now,
                Source::DispatchEngine,
                EventType::OfferDeclined { offer_id, incident_id: offer.incident_id, vendor_id, reason },
            ))
            .await?;

        self.wake_run(offer.incident_id);
        Ok(())
    }

    /// Emits the generic `IncidentStatusChanged` projection event (spec §6)
    /// alongside whatever more specific event a transition already carries
    /// (`IncidentAssigned`, `IncidentEscalated`, `VendorTimeout`,
    /// `IncidentCancelled`). Best-effort: a publish failure here must not
    /// fail the transition that already committed to the store.
    pub(crate) async fn publish_status_changed(
        &self,
        incident_id: IncidentId,
        from: crate::domain::IncidentStatus,
        to: crate::domain::IncidentStatus,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let event_id = self.deps.ids.new_event_id();
        if let Err(e) = self
            .deps
            .events
            .publish(Event::new(
                event_id,
                now,
                Source::DispatchEngine,
                EventType::IncidentStatusChanged { incident_id, from: from.as_str().to_string(), to: to.as_str().to_string() },
            ))
            .await
        {
            warn!(error = %e, "failed to publish IncidentStatusChanged");
        }
    }

    pub(crate) async fn cancel_offer(&self, offer: &Offer, reason: String, now: chrono::DateTime<chrono::Utc>) -> DispatchResult<()> {
        self.deps.offers.terminate(offer.id, OfferStatus::Cancelled, Some(reason.clone()), now).await?;
        let event_id = self.deps.ids.new_event_id();
        self.deps
            .events
            .publish(Event::new(
                event_id,
                now,
                Source::DispatchEngine,
                EventType::OfferCancelled { offer_id: offer.id, incident_id: offer.incident_id, vendor_id: offer.vendor_id, reason },
            ))
            .await
    }

    /// Cancels every active run and waits up to `grace_period` for each
    /// task to observe its cancellation token and exit before abandoning
    /// the wait (ambient graceful-shutdown concern, not a named spec
    /// feature, grounded in the teacher's supervisor shutdown sequence).
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace_period: Duration) {
        self.root_cancel.cancel();
        let handles: Vec<(IncidentId, CancelToken)> = self.runs.iter().map(|e| (*e.key(), e.cancel.clone())).collect();
        for (_, cancel) in &handles {
            cancel.cancel();
        }

        let joins: Vec<JoinHandle<()>> = handles
            .iter()
            .filter_map(|(incident_id, _)| self.runs.remove(incident_id).map(|(_, handle)| handle.join))
            .collect();

        let wait = async {
            for join in joins {
                let _ = join.await;
            }
        };
        if tokio::time::timeout(grace_period, wait).await.is_err() {
            warn!("dispatch engine shutdown grace period elapsed with runs still in flight");
        } else {
            info!("dispatch engine shut down cleanly");
        }
    }

    /// Snapshot of incident ids with an active run, for diagnostics.
    pub fn active_runs(&self) -> Vec<IncidentId> {
        self.runs.iter().map(|e| *e.key()).collect()
    }
}

/// Convenience constructor bundling the four in-memory reference stores
/// with a `StaticConfigProvider` and system clock/ids, used by the binary
/// and by integration tests that don't need custom collaborators.
pub fn in_memory_engine(config: crate::config::MatchingConfig) -> DispatchResult<Arc<DispatchEngine>> {
    config.validate()?;
    let engine = DispatchEngine::new(
        Arc::new(crate::vendor_directory::InMemoryVendorDirectory::new()),
        Arc::new(crate::stores::InMemoryIncidentStore::new()),
        Arc::new(crate::stores::InMemoryOfferStore::new()),
        Arc::new(crate::eventbus::InMemoryEventBus::default()),
        Arc::new(crate::config::StaticConfigProvider::new(config)),
        Arc::new(crate::clock::SystemClock),
        Arc::new(crate::ids::UuidIds),
    );
    engine.subscribe_to_incident_events();
    Ok(engine)
}

