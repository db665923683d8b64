//! Interestingness oracle for OpenCL kernel triage.
//!
//! Given a kernel file and a named criterion, the oracle answers one
//! question: does this kernel still exhibit the targeted defect class?
//! The answer comes from an ordered, short-circuiting pipeline of checks,
//! cheapest first:
//!
//! 1. structural text checks (geometry header, result-buffer indexing,
//!    the canonical linear-id formula, struct def-before-use),
//! 2. compiler diagnostics against a deny-list,
//! 3. static-analyzer diagnostics against a second deny-list,
//! 4. a clean dynamic-checker run on both execution paths,
//! 5. byte-for-byte comparison of optimised vs unoptimised output.
//!
//! Verdicts are values, never errors: a tool timing out, a missing
//! header, or an unknown criterion name all yield a negative verdict.

pub mod criterion;
pub mod denylist;
pub mod geometry;
pub mod kernel;
pub mod pipeline;

pub use criterion::Criterion;
pub use geometry::DispatchGeometry;
pub use kernel::KernelSnapshot;
pub use pipeline::{Oracle, Stage, Verdict};
