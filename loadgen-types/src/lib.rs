//! Shared data model of the load generator.
//!
//! These types are exchanged between the controller and the nodes it drives:
//!
//!  - [`Distribution`] is a ramp of [`Level`]s describing a target request rate over time
//!  - [`RequestType`] names a unit of work and the tags passed to the test harness
//!  - [`ProfileDefinition`] is the plain-text profile file pushed to every node
//!  - [`Outcome`] is the result recorded for every request
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod distribution;
pub mod error;
pub mod profile;
pub mod request;

pub use distribution::{Distribution, Level};
pub use error::ConfigError;
pub use profile::{ProfileDefinition, ProfileKind};
pub use request::{END_TO_END, Outcome, RequestType, WHOLE_TEST, validate_name};
