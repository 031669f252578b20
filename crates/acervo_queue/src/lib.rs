//! Job scheduling and observation.
//!
//! The scheduler runs up to `max_concurrent` workers over the persistent
//! queue: claim, run the extraction cascade, persist the outcome. The
//! progress registry is the push half of the observation surface; the
//! control module is the request/response API the binary (and anything
//! else) drives the system through.

pub mod control;
pub mod convert;
pub mod metrics;
pub mod progress;
pub mod scheduler;

pub use control::{ControlHandler, ControlRequest, ControlResponse};
pub use convert::requirements_from_services;
pub use metrics::METRICS;
pub use progress::ProgressRegistry;
pub use scheduler::Scheduler;
