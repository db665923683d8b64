//! Dispatch-geometry reduction: find the smallest global work size for
//! which a defect still reproduces, so downstream minimization pays for
//! the cheapest possible dispatch on every trial.

pub mod search;

pub use search::GeometryReducer;
