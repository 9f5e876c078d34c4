pub mod incident_store;
pub mod offer_store;

pub use incident_store::{ConditionalAssignOutcome, IncidentStore, InMemoryIncidentStore};
pub use offer_store::{InMemoryOfferStore, OfferStore};
