//! REST control plane for the FleetSim device engine.
//!
//! A thin façade: handlers decode the request, call the device manager and
//! encode the result. The webhook endpoint is the only runtime-dispatched
//! route; everything else is static.

pub mod error;
pub mod handlers;
pub mod router;

pub use error::{ApiError, ErrorResponse};
pub use router::create_router;
