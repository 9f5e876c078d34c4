//! Offer Store: pending/accepted/declined/expired/cancelled offers with
//! per-offer expiry. Mutated only by terminal transitions out of `pending`
//! (spec §3 invariant: "no resurrection").

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::domain::{Offer, OfferStatus};
use crate::error::{DispatchError, DispatchResult};
use crate::ids::{IncidentId, OfferId};

#[async_trait::async_trait]
pub trait OfferStore: Send + Sync {
    async fn create(&self, offer: Offer) -> DispatchResult<()>;

    async fn get(&self, id: OfferId) -> DispatchResult<Option<Offer>>;

    /// Transitions an offer from `pending` to `new_status`. Fails with
    /// `Conflict` if the offer is already terminal (no resurrection).
    async fn terminate(&self, id: OfferId, new_status: OfferStatus, reason: Option<String>, now: DateTime<Utc>) -> DispatchResult<Offer>;

    async fn list_pending_for_incident(&self, incident_id: IncidentId) -> DispatchResult<Vec<Offer>>;

    /// Sweeps every still-`pending` offer whose `expires_at` has passed into
    /// `expired`, returning the ones it changed. Mirrors the spec's
    /// time-based expiry sweeper (§4.3.2), independent of the engine's own
    /// deadline-driven detection.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> DispatchResult<Vec<Offer>>;
}

#[derive(Clone, Default)]
pub struct InMemoryOfferStore {
    offers: Arc<DashMap<OfferId, Offer>>,
}

impl InMemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl OfferStore for InMemoryOfferStore {
    async fn create(&self, offer: Offer) -> DispatchResult<()> {
        self.offers.insert(offer.id, offer);
        Ok(())
    }

    async fn get(&self, id: OfferId) -> DispatchResult<Option<Offer>> {
        Ok(self.offers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn terminate(&self, id: OfferId, new_status: OfferStatus, reason: Option<String>, now: DateTime<Utc>) -> DispatchResult<Offer> {
        let mut entry = self.offers.get_mut(&id).ok_or_else(|| DispatchError::NotFound(format!("offer {id}")))?;

        if entry.status.is_terminal() {
            return Err(DispatchError::Conflict(format!("offer {id} is already {:?}", entry.status)));
        }

        entry.status = new_status;
        entry.responded_at = Some(now);
        entry.decline_reason = reason;
        Ok(entry.clone())
    }

    async fn list_pending_for_incident(&self, incident_id: IncidentId) -> DispatchResult<Vec<Offer>> {
        Ok(self
            .offers
            .iter()
            .filter(|entry| entry.incident_id == incident_id && entry.status == OfferStatus::Pending)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> DispatchResult<Vec<Offer>> {
        let expired_ids: Vec<OfferId> = self
            .offers
            .iter()
            .filter(|entry| entry.status == OfferStatus::Pending && entry.is_expired(now))
            .map(|entry| entry.id)
            .collect();

        let mut swept = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(mut entry) = self.offers.get_mut(&id) {
                if entry.status == OfferStatus::Pending {
                    entry.status = OfferStatus::Expired;
                    entry.responded_at = Some(now);
                    swept.push(entry.clone());
                }
            }
        }
        Ok(swept)
    }
}
