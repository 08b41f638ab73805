//! Concrete domains registered by default.

pub mod measurement;
pub mod workout;

pub use measurement::{measurement_schema, MeasurementDomain};
pub use workout::{workout_schema, WorkoutDomain};
