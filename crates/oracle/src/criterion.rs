//! Named interestingness criteria.

use std::fmt;

/// A predicate class the oracle can evaluate over a kernel file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Criterion {
    /// Text-only checks: header, result access, linear id, struct chain.
    Structural,
    /// Structural plus clean compiler diagnostics and static analysis.
    StaticallyValid,
    /// Statically valid plus a clean dynamic-checker run on both paths.
    Valid,
    /// Fully gated differential mismatch.
    Miscompilation,
    /// Differential mismatch with the dynamic checker as the execution
    /// engine.
    OclgrindMiscompilation,
    /// The optimised path completes cleanly under the dynamic checker.
    OclgrindOptimised,
    /// Optimised run clean, unoptimised run fails to produce a result.
    CrashUnoptimised,
    /// The static analyzer still flags the kernel (analyzer regression).
    CsaInvalid,
    /// The compile emits the named vector-size regression error.
    ErrorVector,
    /// Raw differential mismatch, no validity gating.
    WrongCode,
}

impl Criterion {
    pub const ALL: &'static [Criterion] = &[
        Criterion::Structural,
        Criterion::StaticallyValid,
        Criterion::Valid,
        Criterion::Miscompilation,
        Criterion::OclgrindMiscompilation,
        Criterion::OclgrindOptimised,
        Criterion::CrashUnoptimised,
        Criterion::CsaInvalid,
        Criterion::ErrorVector,
        Criterion::WrongCode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Criterion::Structural => "structural",
            Criterion::StaticallyValid => "statically-valid",
            Criterion::Valid => "valid",
            Criterion::Miscompilation => "miscompilation",
            Criterion::OclgrindMiscompilation => "oclgrind-miscompilation",
            Criterion::OclgrindOptimised => "oclgrind-optimised",
            Criterion::CrashUnoptimised => "crash-unoptimised",
            Criterion::CsaInvalid => "csa-invalid",
            Criterion::ErrorVector => "error-vector",
            Criterion::WrongCode => "wrong-code",
        }
    }

    /// Unknown names are not an error; the oracle answers them
    /// negatively.
    pub fn from_name(name: &str) -> Option<Criterion> {
        Criterion::ALL
            .iter()
            .copied()
            .find(|criterion| criterion.name() == name)
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
