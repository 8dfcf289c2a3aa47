//! Coordinator-side reach into pages: reachability probing and delivery.

pub mod delivery;
pub mod probe;

pub use delivery::{Courier, DeliveryFailure, DeliveryPolicy};
pub use probe::{ProbeFailure, ProbeReason, Prober, Reachable};
