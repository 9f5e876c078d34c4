pub mod dispatch_run;
pub mod incident;
pub mod offer;
pub mod vendor;

pub use dispatch_run::DispatchRun;
pub use incident::{GeoPoint, Incident, IncidentStatus, PriorityTier, ServiceType, TimelineEntry};
pub use offer::{Offer, OfferStatus, ScoreBreakdown};
pub use vendor::{Availability, Capability, PriceSchedule, Vendor, VendorMetrics};
