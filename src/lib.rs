//! Roadside-assistance incident dispatch engine.
//!
//! The crate's core is the incident-lifecycle dispatch engine
//! ([`dispatch::DispatchEngine`]): matching and scoring ([`scoring`],
//! [`matcher`]), offer fan-out with timeout and expanding-radius retry,
//! at-most-one-winner assignment under racing acceptances
//! ([`stores::incident_store`]'s conditional write), arrival monitoring
//! with vendor-timeout reassignment, and escalation.
//!
//! External collaborators (vendor directory, stores, event bus,
//! configuration, clock, identifiers) are modeled as traits with in-memory
//! reference implementations; production backends are out of scope.

pub mod clock;
pub mod concurrency;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod eventbus;
pub mod events;
pub mod geo;
pub mod ids;
pub mod matcher;
pub mod resilience;
pub mod scoring;
pub mod stores;
pub mod vendor_directory;

pub use dispatch::DispatchEngine;
pub use error::{DispatchError, DispatchResult};
