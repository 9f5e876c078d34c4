//! Incident Store: durable incident record with conditional-update
//! semantics. `conditional_assign` is the single linearization point for
//! vendor assignment (spec §4.3.2, §5, design note on "race on
//! `assignedVendorRef` guarded only by get-then-put").
//!
//! Grounded in the teacher's `DashMap`-backed hot store (`cache.rs`) plus
//! its `state::manager` transition-table pattern, combined here: each key's
//! shard lock makes the read-check-write in `conditional_assign` atomic
//! without a separate external lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::domain::{Incident, IncidentStatus, TimelineEntry};
use crate::error::{DispatchError, DispatchResult};
use crate::ids::{IncidentId, VendorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalAssignOutcome {
    Ok,
    Conflict,
}

#[async_trait::async_trait]
pub trait IncidentStore: Send + Sync {
    async fn create(&self, incident: Incident) -> DispatchResult<()>;

    async fn get(&self, id: IncidentId) -> DispatchResult<Option<Incident>>;

    /// Succeeds only if `assigned_vendor` is currently empty and the
    /// incident's status is the pre-assignment precondition state
    /// (`Created`). This is the only path that may set `assigned_vendor`.
    async fn conditional_assign(&self, id: IncidentId, vendor: VendorId, now: DateTime<Utc>) -> DispatchResult<ConditionalAssignOutcome>;

    /// Validated state transition; rejects moves `IncidentStatus::can_transition_to` disallows.
    async fn transition(
        &self,
        id: IncidentId,
        from: IncidentStatus,
        to: IncidentStatus,
        actor: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Incident>;

    /// Vendor-timeout reset (spec §4.3.3): clears `assigned_vendor`, reverts
    /// status to `Created`, and excludes `timed_out_vendor` from future
    /// matching attempts for this incident.
    async fn reset_for_timeout(&self, id: IncidentId, timed_out_vendor: VendorId, now: DateTime<Utc>) -> DispatchResult<Incident>;

    async fn cancel(&self, id: IncidentId, reason: Option<String>, now: DateTime<Utc>) -> DispatchResult<Incident>;
}

#[derive(Clone, Default)]
pub struct InMemoryIncidentStore {
    incidents: Arc<DashMap<IncidentId, Incident>>,
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn create(&self, incident: Incident) -> DispatchResult<()> {
        self.incidents.insert(incident.id, incident);
        Ok(())
    }

    async fn get(&self, id: IncidentId) -> DispatchResult<Option<Incident>> {
        Ok(self.incidents.get(&id).map(|entry| entry.value().clone()))
    }

    async fn conditional_assign(&self, id: IncidentId, vendor: VendorId, now: DateTime<Utc>) -> DispatchResult<ConditionalAssignOutcome> {
        let mut entry = self
            .incidents
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("incident {id}")))?;

        // Single linearization point: the shard lock held by `get_mut` makes
        // this check-then-set atomic against any concurrent acceptance for
        // the same incident.
        if entry.assigned_vendor.is_some() || entry.status != IncidentStatus::Created {
            return Ok(ConditionalAssignOutcome::Conflict);
        }

        let from = entry.status;
        entry.assigned_vendor = Some(vendor);
        entry.status = IncidentStatus::VendorAssigned;
        entry.updated_at = now;
        entry.timeline.push(TimelineEntry {
            from,
            to: IncidentStatus::VendorAssigned,
            timestamp: now,
            actor: format!("vendor:{vendor}"),
            reason: None,
        });
        Ok(ConditionalAssignOutcome::Ok)
    }

    async fn transition(
        &self,
        id: IncidentId,
        from: IncidentStatus,
        to: IncidentStatus,
        actor: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Incident> {
        let mut entry = self
            .incidents
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("incident {id}")))?;

        if entry.status != from {
            return Err(DispatchError::Conflict(format!(
                "incident {id} is in status {:?}, expected {:?}",
                entry.status, from
            )));
        }
        if !from.can_transition_to(to) {
            return Err(DispatchError::Validation(format!("illegal transition {:?} -> {:?}", from, to)));
        }

        entry.status = to;
        entry.updated_at = now;
        entry.timeline.push(TimelineEntry {
            from,
            to,
            timestamp: now,
            actor: actor.to_string(),
            reason,
        });
        Ok(entry.clone())
    }

    async fn reset_for_timeout(&self, id: IncidentId, timed_out_vendor: VendorId, now: DateTime<Utc>) -> DispatchResult<Incident> {
        let mut entry = self
            .incidents
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("incident {id}")))?;

        let from = entry.status;
        entry.assigned_vendor = None;
        entry.status = IncidentStatus::Created;
        entry.updated_at = now;
        if !entry.excluded_vendors.contains(&timed_out_vendor) {
            entry.excluded_vendors.push(timed_out_vendor);
        }
        entry.timeline.push(TimelineEntry {
            from,
            to: IncidentStatus::Created,
            timestamp: now,
            actor: "dispatch-engine".to_string(),
            reason: Some(format!("vendor_timeout:{timed_out_vendor}")),
        });
        Ok(entry.clone())
    }

    async fn cancel(&self, id: IncidentId, reason: Option<String>, now: DateTime<Utc>) -> DispatchResult<Incident> {
        let mut entry = self
            .incidents
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("incident {id}")))?;

        let from = entry.status;
        entry.status = IncidentStatus::Cancelled;
        entry.updated_at = now;
        entry.timeline.push(TimelineEntry {
            from,
            to: IncidentStatus::Cancelled,
            timestamp: now,
            actor: "driver".to_string(),
            reason,
        });
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GeoPoint, PriorityTier, ServiceType};

    fn new_incident(now: DateTime<Utc>) -> Incident {
        Incident::new(
            IncidentId::new(),
            "driver-1".into(),
            ServiceType::Tire,
            GeoPoint { lat: 40.7128, lon: -74.0060 },
            PriorityTier::Standard,
            now,
        )
    }

    #[tokio::test]
    async fn only_one_conditional_assign_wins() {
        let store = InMemoryIncidentStore::new();
        let now = Utc::now();
        let incident = new_incident(now);
        let id = incident.id;
        store.create(incident).await.unwrap();

        let v1 = VendorId::new();
        let v2 = VendorId::new();

        let r1 = store.conditional_assign(id, v1, now).await.unwrap();
        let r2 = store.conditional_assign(id, v2, now).await.unwrap();

        assert_eq!(r1, ConditionalAssignOutcome::Ok);
        assert_eq!(r2, ConditionalAssignOutcome::Conflict);

        let incident = store.get(id).await.unwrap().unwrap();
        assert_eq!(incident.assigned_vendor, Some(v1));
        assert_eq!(incident.status, IncidentStatus::VendorAssigned);
    }

    #[tokio::test]
    async fn timeout_reset_excludes_vendor_and_reverts_status() {
        let store = InMemoryIncidentStore::new();
        let now = Utc::now();
        let incident = new_incident(now);
        let id = incident.id;
        store.create(incident).await.unwrap();

        let v1 = VendorId::new();
        store.conditional_assign(id, v1, now).await.unwrap();
        let reset = store.reset_for_timeout(id, v1, now).await.unwrap();

        assert_eq!(reset.status, IncidentStatus::Created);
        assert!(reset.assigned_vendor.is_none());
        assert!(reset.excluded_vendors.contains(&v1));

        // The incident can now be reassigned to a fresh vendor.
        let v2 = VendorId::new();
        let outcome = store.conditional_assign(id, v2, now).await.unwrap();
        assert_eq!(outcome, ConditionalAssignOutcome::Ok);
    }

    #[tokio::test]
    async fn transition_rejects_mismatched_from_state() {
        let store = InMemoryIncidentStore::new();
        let now = Utc::now();
        let incident = new_incident(now);
        let id = incident.id;
        store.create(incident).await.unwrap();

        let result = store
            .transition(id, IncidentStatus::VendorAssigned, IncidentStatus::VendorEnRoute, "vendor-app", None, now)
            .await;
        assert!(result.is_err());
    }
}
