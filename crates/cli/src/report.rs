//! JSON campaign reports for `cltriage hunt`.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// How one kernel came out of a hunt campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KernelStatus {
    Generated,
    Preprocessed,
    Correct,
    Miscompiled,
    AbortedGeneration,
    AbortedPreprocess,
    AbortedOptimised,
    AbortedUnoptimised,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelOutcome {
    pub kernel: String,
    pub status: KernelStatus,
}

/// One hunt campaign's worth of per-kernel outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuntReport {
    pub generated_at_unix_ms: u64,
    pub kernels: Vec<KernelOutcome>,
}

impl HuntReport {
    pub fn new() -> Self {
        let generated_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            generated_at_unix_ms,
            kernels: Vec::new(),
        }
    }

    pub fn record(&mut self, kernel: impl Into<String>, status: KernelStatus) {
        self.kernels.push(KernelOutcome {
            kernel: kernel.into(),
            status,
        });
    }

    pub fn miscompiled(&self) -> usize {
        self.kernels
            .iter()
            .filter(|k| k.status == KernelStatus::Miscompiled)
            .count()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl Default for HuntReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_kebab_case() {
        let mut report = HuntReport::new();
        report.record("CLProg_0.cl", KernelStatus::Miscompiled);
        report.record("CLProg_1.cl", KernelStatus::AbortedOptimised);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"miscompiled\""));
        assert!(json.contains("\"aborted-optimised\""));

        let parsed: HuntReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kernels.len(), 2);
        assert_eq!(parsed.miscompiled(), 1);
    }
}
