//! Facade over the three external tools CLTriage judges kernels with: the
//! clang front end (diagnostics and static analysis), the Oclgrind dynamic
//! checker, and the cl_launcher kernel runner.
//!
//! The [`KernelToolchain`] trait is the seam the interestingness pipeline
//! consumes; [`Toolchain`] is the real implementation on top of
//! `cltriage-exec`. All invocations share one hard timeout.

pub mod config;
pub mod facade;

pub use config::{DeviceConfig, ToolchainConfig};
pub use facade::{KernelToolchain, Toolchain, TOOL_TIMEOUT};
