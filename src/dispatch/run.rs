//! The attempt loop (spec §4.3.1) and assignment-wait protocol (§4.3.2).
//!
//! Grounded in the teacher's explicit state-record loop (`case.rs`): rather
//! than holding attempt/radius/deadline implicitly across awaits in a
//! handler closure (the re-architecture note in design notes §9), this is a
//! plain `loop` over a [`DispatchRun`] record.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, instrument, warn};

use crate::concurrency::CancelToken;
use crate::dispatch::arrival::{self, ArrivalOutcome};
use crate::dispatch::engine::DispatchEngine;
use crate::domain::{DispatchRun, Offer, OfferStatus, ScoreBreakdown};
use crate::error::DispatchError;
use crate::events::{Event, EventType, Source};
use crate::ids::{IncidentId, OfferId, VendorId};

/// Outcome of waiting on one attempt's offer batch (spec §4.3.1 step 5).
enum AttemptOutcome {
    Accepted { vendor_id: VendorId },
    AllTerminalNonAccepted,
    Cancelled,
}

/// Drives one incident's dispatch lifecycle end to end: repeated attempts
/// with radius expansion, through to acceptance, arrival monitoring, and,
/// on vendor timeout, a fresh run. Returns once the incident reaches a
/// terminal dispatch outcome or the cancellation token fires.
#[instrument(skip(engine, cancel, wake), fields(incident_id = %incident_id))]
pub async fn drive(engine: Arc<DispatchEngine>, incident_id: IncidentId, excluded_vendors: Vec<VendorId>, cancel: CancelToken, wake: Arc<Notify>) {
    let config = engine.deps().config.matching().await;
    let mut run = DispatchRun::new(incident_id, config.default_radius_miles, excluded_vendors);

    loop {
        if cancel.is_cancelled() {
            handle_cancellation(&engine, incident_id, &run).await;
            return;
        }

        match run_one_attempt(&engine, incident_id, &mut run, &cancel, &wake).await {
            Ok(AttemptOutcome::Accepted { vendor_id }) => match arrival::monitor(&engine, incident_id, vendor_id, &cancel).await {
                ArrivalOutcome::Arrived => {
                    info!("incident reached a terminal arrival state; dispatch engine's responsibility ends");
                    return;
                }
                ArrivalOutcome::Cancelled => {
                    handle_cancellation(&engine, incident_id, &run).await;
                    return;
                }
                ArrivalOutcome::TimedOut => {
                    if let Err(e) = handle_vendor_timeout(&engine, incident_id, vendor_id).await {
                        error!(error = %e, "failed to process vendor timeout");
                        return;
                    }
                    // Re-enter the attempt loop with a fresh run: attempt 1,
                    // default radius, the timed-out vendor now excluded
                    // (spec §4.3.3; does not count against maxExpansionAttempts).
                    let config = engine.deps().config.matching().await;
                    let mut excluded = run.excluded_vendors.clone();
                    if !excluded.contains(&vendor_id) {
                        excluded.push(vendor_id);
                    }
                    run = DispatchRun::new(incident_id, config.default_radius_miles, excluded);
                }
            },
            Ok(AttemptOutcome::AllTerminalNonAccepted) => {
                if run.exhausted(engine.deps().config.matching().await.max_expansion_attempts) {
                    escalate(&engine, incident_id, &run).await;
                    return;
                }
                let config = engine.deps().config.matching().await;
                run.expand_radius(config.radius_expansion_factor, config.max_radius_miles);
            }
            Ok(AttemptOutcome::Cancelled) => {
                handle_cancellation(&engine, incident_id, &run).await;
                return;
            }
            Err(e) if e.severity() == crate::error::Severity::Fatal => {
                error!(error = %e, "fatal error in dispatch run; escalating with reason internal");
                escalate_internal(&engine, incident_id, &run).await;
                return;
            }
            Err(e) => {
                // Transient failures exhausted their retries: per spec
                // §4.3.1 step 6, treated as "no vendor found" this attempt.
                warn!(error = %e, "attempt failed after retries; counting as no vendor found");
                if run.exhausted(engine.deps().config.matching().await.max_expansion_attempts) {
                    escalate(&engine, incident_id, &run).await;
                    return;
                }
                let config = engine.deps().config.matching().await;
                run.expand_radius(config.radius_expansion_factor, config.max_radius_miles);
            }
        }
    }
}

/// Runs exactly one attempt: match, create offers, wait for an outcome.
async fn run_one_attempt(
    engine: &Arc<DispatchEngine>,
    incident_id: IncidentId,
    run: &mut DispatchRun,
    cancel: &CancelToken,
    wake: &Arc<Notify>,
) -> Result<AttemptOutcome, DispatchError> {
    let deps = engine.deps();
    let config = deps.config.matching().await;

    let incident = deps
        .incidents
        .get(incident_id)
        .await?
        .ok_or_else(|| DispatchError::Fatal(format!("incident {incident_id} vanished mid-run")))?;

    let radius = run.radius_miles.min(config.max_radius_miles);
    let ranked = deps
        .retry
        .execute(|| async { crate::matcher::match_once(deps.directory.as_ref(), &incident, radius, &config).await })
        .await?;

    if ranked.is_empty() {
        return Ok(AttemptOutcome::AllTerminalNonAccepted);
    }

    let now = deps.clock.now();
    let expires_at = now + chrono::Duration::seconds(config.offer_timeout_seconds as i64);
    let mut created: Vec<Offer> = Vec::with_capacity(ranked.len());

    for candidate in &ranked {
        let offer = Offer {
            id: deps.ids.new_offer_id(),
            incident_id,
            vendor_id: candidate.vendor.id,
            status: OfferStatus::Pending,
            match_score: candidate.score,
            breakdown: ScoreBreakdown {
                distance: candidate.breakdown.distance,
                capability: candidate.breakdown.capability,
                availability: candidate.breakdown.availability,
                acceptance_rate: candidate.breakdown.acceptance_rate,
                rating: candidate.breakdown.rating,
            },
            estimated_payout: crate::scoring::estimated_payout(&candidate.vendor, &incident),
            expires_at,
            attempt: run.attempt,
            created_at: now,
            responded_at: None,
            decline_reason: None,
        };

        deps.retry.execute(|| async { deps.offers.create(offer.clone()).await }).await?;

        let event_id = deps.ids.new_event_id();
        deps.retry
            .execute(|| async {
                deps.events
                    .publish(Event::new(
                        event_id,
                        now,
                        Source::DispatchEngine,
                        EventType::OfferCreated {
                            offer_id: offer.id,
                            incident_id,
                            vendor_id: offer.vendor_id,
                            match_score: offer.match_score,
                            breakdown: offer.breakdown,
                            estimated_payout: offer.estimated_payout,
                            expires_at: offer.expires_at,
                            attempt: offer.attempt,
                        },
                    ))
                    .await
            })
            .await?;

        created.push(offer);
    }

    run.live_offers = created.iter().map(|o| o.id).collect();
    run.attempt_deadline = Some(expires_at);

    Ok(wait_for_offer_outcome(engine, incident_id, &run.live_offers, expires_at, cancel, wake).await)
}

/// Polls offer outcomes until the batch resolves, the deadline passes, or
/// cancellation fires. A real deployment would drive this off store change
/// notifications; this in-memory implementation polls at a short interval,
/// which is sufficient given the store lives in the same process.
async fn wait_for_offer_outcome(
    engine: &Arc<DispatchEngine>,
    incident_id: IncidentId,
    offer_ids: &[OfferId],
    deadline: chrono::DateTime<chrono::Utc>,
    cancel: &CancelToken,
    wake: &Arc<Notify>,
) -> AttemptOutcome {
    const POLL_INTERVAL: Duration = Duration::from_millis(50);
    let deps = engine.deps();

    loop {
        let now = deps.clock.now();
        if let Ok(swept) = deps.offers.sweep_expired(now).await {
            for offer in swept {
                let event_id = deps.ids.new_event_id();
                let _ = deps
                    .events
                    .publish(Event::new(
                        event_id,
                        now,
                        Source::DispatchEngine,
                        EventType::OfferExpired { offer_id: offer.id, incident_id: offer.incident_id, vendor_id: offer.vendor_id },
                    ))
                    .await;
            }
        }

        let mut any_pending = false;
        for id in offer_ids {
            if let Ok(Some(offer)) = deps.offers.get(*id).await {
                match offer.status {
                    OfferStatus::Accepted => return AttemptOutcome::Accepted { vendor_id: offer.vendor_id },
                    OfferStatus::Pending => any_pending = true,
                    _ => {}
                }
            }
        }

        if !any_pending {
            return AttemptOutcome::AllTerminalNonAccepted;
        }
        if cancel.is_cancelled() {
            cancel_pending_batch(engine, incident_id, offer_ids, "incident_cancelled").await;
            return AttemptOutcome::Cancelled;
        }
        if now >= deadline {
            continue; // loop once more; sweep_expired above will have cleared stale pendings
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = wake.notified() => {}
            _ = cancel.cancelled() => {}
        }
    }
}

async fn cancel_pending_batch(engine: &Arc<DispatchEngine>, _incident_id: IncidentId, offer_ids: &[OfferId], reason: &str) {
    let deps = engine.deps();
    let now = deps.clock.now();
    for id in offer_ids {
        if let Ok(Some(offer)) = deps.offers.get(*id).await {
            if offer.status == OfferStatus::Pending {
                let _ = engine.cancel_offer(&offer, reason.to_string(), now).await;
            }
        }
    }
}

async fn handle_cancellation(engine: &Arc<DispatchEngine>, incident_id: IncidentId, run: &DispatchRun) {
    let deps = engine.deps();
    cancel_pending_batch(engine, incident_id, &run.live_offers, "incident_cancelled").await;
    let now = deps.clock.now();
    let from_status = deps.incidents.get(incident_id).await.ok().flatten().map(|i| i.status);
    if let Err(e) = deps.incidents.cancel(incident_id, Some("driver_cancelled".to_string()), now).await {
        warn!(error = %e, "failed to mark incident cancelled");
    } else if let Some(from_status) = from_status {
        engine.publish_status_changed(incident_id, from_status, crate::domain::IncidentStatus::Cancelled, now).await;
    }
    let event_id = deps.ids.new_event_id();
    let _ = deps
        .events
        .publish(Event::new(
            event_id,
            now,
            Source::DispatchEngine,
            EventType::IncidentCancelled { incident_id, reason: Some("driver_cancelled".to_string()) },
        ))
        .await;
    info!("dispatch run terminated on cancellation");
}

async fn escalate(engine: &Arc<DispatchEngine>, incident_id: IncidentId, run: &DispatchRun) {
    escalate_with_reason(engine, incident_id, run, "no_match").await;
}

async fn escalate_internal(engine: &Arc<DispatchEngine>, incident_id: IncidentId, run: &DispatchRun) {
    escalate_with_reason(engine, incident_id, run, "internal").await;
}

async fn escalate_with_reason(engine: &Arc<DispatchEngine>, incident_id: IncidentId, run: &DispatchRun, reason: &str) {
    let deps = engine.deps();
    let now = deps.clock.now();
    if let Err(e) = deps
        .incidents
        .transition(incident_id, crate::domain::IncidentStatus::Created, crate::domain::IncidentStatus::Escalated, "dispatch-engine", Some(reason.to_string()), now)
        .await
    {
        warn!(error = %e, "failed to transition incident to escalated");
    } else {
        engine.publish_status_changed(incident_id, crate::domain::IncidentStatus::Created, crate::domain::IncidentStatus::Escalated, now).await;
    }
    let event_id = deps.ids.new_event_id();
    let _ = deps
        .events
        .publish(Event::new(
            event_id,
            now,
            Source::DispatchEngine,
            EventType::IncidentEscalated { incident_id, attempts: run.attempt, final_radius_miles: run.radius_miles, reason: reason.to_string() },
        ))
        .await;
    warn!(attempts = run.attempt, radius = run.radius_miles, reason, "incident escalated");
}

async fn handle_vendor_timeout(engine: &Arc<DispatchEngine>, incident_id: IncidentId, vendor_id: VendorId) -> Result<(), DispatchError> {
    let deps = engine.deps();
    let now = deps.clock.now();
    let from_status = deps.incidents.get(incident_id).await?.map(|i| i.status).unwrap_or(crate::domain::IncidentStatus::VendorAssigned);
    deps.incidents.reset_for_timeout(incident_id, vendor_id, now).await?;
    deps.directory.mark_available(vendor_id).await;
    engine.publish_status_changed(incident_id, from_status, crate::domain::IncidentStatus::Created, now).await;
    let event_id = deps.ids.new_event_id();
    deps.events
        .publish(Event::new(event_id, now, Source::DispatchEngine, EventType::VendorTimeout { incident_id, vendor_id }))
        .await?;
    Ok(())
}
