//! Bounded execution of external toolchain processes.
//!
//! Every external tool CLTriage talks to (the compiler front end, the
//! dynamic checker, the kernel launcher, the fuzzer) runs through the
//! [`ToolRunner`] trait defined here: spawn with explicit arguments and
//! environment, wait under a hard deadline, capture merged output, and on
//! timeout kill the entire spawned process tree.

pub mod runner;

pub use runner::{default_runner, ToolCommand, ToolOutput, ToolRunner};
