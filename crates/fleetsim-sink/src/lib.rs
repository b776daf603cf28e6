//! Batched, lossy, non-blocking metrics writer.
//!
//! Every component of the engine submits tagged [`MetricPoint`]s here; the
//! sink batches them (5000 points or 1s, whichever first) and ships them to
//! an InfluxDB-compatible endpoint as line protocol. The buffer is bounded
//! and drops oldest under overflow; the sink never applies backpressure to
//! devices.

pub mod error;
pub mod line;
pub mod point;
pub mod points;
pub mod sink;

pub use error::{Result, SinkError};
pub use point::{DeviceScope, MetricPoint, MetricValue};
pub use sink::{MetricsSink, SinkConfig};
