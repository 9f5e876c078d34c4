//! Collision-free identifier minting.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(#[serde(with = "uuid::serde::compact")] pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(IncidentId);
uuid_id!(VendorId);
uuid_id!(OfferId);
uuid_id!(EventId);

/// Minting interface for identifiers, kept as a trait so tests can supply
/// deterministic sequences.
pub trait Ids: Send + Sync {
    fn new_incident_id(&self) -> IncidentId;
    fn new_offer_id(&self) -> OfferId;
    fn new_event_id(&self) -> EventId;
}

/// Default identifier source backed by UUIDv4.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl Ids for UuidIds {
    fn new_incident_id(&self) -> IncidentId {
        IncidentId::new()
    }

    fn new_offer_id(&self) -> OfferId {
        OfferId::new()
    }

    fn new_event_id(&self) -> EventId {
        EventId::new()
    }
}
