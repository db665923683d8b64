//! The verdict pipeline: ordered, short-circuiting checks per criterion.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use cltriage_exec::ToolOutput;
use cltriage_toolchain::{KernelToolchain, TOOL_TIMEOUT};
use tracing::{debug, warn};

use crate::criterion::Criterion;
use crate::denylist::{self, ANALYZER_DENYLIST, COMPILER_DENYLIST, VECTOR_SIZE_ERROR};
use crate::kernel::KernelSnapshot;

/// Pipeline stage that decided a negative verdict. Diagnostics only;
/// control flow never branches on it outside this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GeometryHeader,
    ResultAccess,
    LinearId,
    StructInit,
    CompilerDiagnostics,
    StaticAnalyzer,
    DynamicChecker,
    DifferentialRun,
}

/// Outcome of one criterion evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub interesting: bool,
    pub failed_stage: Option<Stage>,
}

impl Verdict {
    fn positive() -> Self {
        Self {
            interesting: true,
            failed_stage: None,
        }
    }

    fn negative(stage: Stage) -> Self {
        Self {
            interesting: false,
            failed_stage: Some(stage),
        }
    }

    /// Exit-status convention for standalone interestingness tests:
    /// zero means interesting.
    pub fn exit_code(&self) -> i32 {
        if self.interesting {
            0
        } else {
            1
        }
    }
}

/// Which engine executes the kernel for a differential comparison.
#[derive(Clone, Copy)]
enum DiffEngine {
    Launcher,
    Oclgrind,
}

type StageResult = std::result::Result<(), Stage>;

/// Judges one kernel file against named criteria.
///
/// The source snapshot is taken once at construction; the file itself is
/// re-read only by the external tools, so a caller that rewrites the file
/// must construct a fresh oracle.
pub struct Oracle<T> {
    kernel: KernelSnapshot,
    kernel_path: PathBuf,
    toolchain: T,
    platform: String,
    device: String,
    timeout: Duration,
    output_log: Option<PathBuf>,
}

impl<T: KernelToolchain> Oracle<T> {
    pub fn new(
        kernel_path: impl Into<PathBuf>,
        toolchain: T,
        platform: impl Into<String>,
        device: impl Into<String>,
    ) -> Result<Self> {
        let kernel_path = kernel_path.into();
        let kernel = KernelSnapshot::from_path(&kernel_path)?;
        Ok(Self {
            kernel,
            kernel_path,
            toolchain,
            platform: platform.into(),
            device: device.into(),
            timeout: TOOL_TIMEOUT,
            output_log: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Append captured tool output to `path` after every external check.
    pub fn with_output_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_log = Some(path.into());
        self
    }

    pub fn kernel(&self) -> &KernelSnapshot {
        &self.kernel
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Evaluate a criterion given by name. Unknown names yield a negative
    /// verdict.
    pub fn run_named(&self, name: &str) -> Verdict {
        match Criterion::from_name(name) {
            Some(criterion) => self.run_test(criterion),
            None => {
                debug!(criterion = name, "unknown criterion");
                Verdict {
                    interesting: false,
                    failed_stage: None,
                }
            }
        }
    }

    /// Evaluate one criterion, running the minimum necessary stages in
    /// cost order. Never retries; a tool timeout or crash simply fails
    /// the stage it occurred in.
    pub fn run_test(&self, criterion: Criterion) -> Verdict {
        let outcome = match criterion {
            Criterion::Structural => self.structural(),
            Criterion::StaticallyValid => self.statically_valid(),
            Criterion::Valid => self
                .statically_valid()
                .and_then(|()| self.dynamic_clean()),
            Criterion::Miscompilation => self
                .statically_valid()
                .and_then(|()| self.dynamic_clean())
                .and_then(|()| self.differs(DiffEngine::Launcher)),
            Criterion::OclgrindMiscompilation => self
                .statically_valid()
                .and_then(|()| self.differs(DiffEngine::Oclgrind)),
            Criterion::OclgrindOptimised => self.oclgrind_optimised_clean(),
            Criterion::CrashUnoptimised => self
                .structural()
                .and_then(|()| self.crash_unoptimised()),
            Criterion::CsaInvalid => self
                .structural()
                .and_then(|()| self.compiler_clean())
                .and_then(|()| self.analyzer_flags()),
            Criterion::ErrorVector => self.vector_size_error(),
            Criterion::WrongCode => self.differs(DiffEngine::Launcher),
        };
        let verdict = match outcome {
            Ok(()) => Verdict::positive(),
            Err(stage) => Verdict::negative(stage),
        };
        debug!(
            criterion = %criterion,
            interesting = verdict.interesting,
            failed_stage = ?verdict.failed_stage,
            "verdict"
        );
        verdict
    }

    fn structural(&self) -> StageResult {
        debug!("geometry header");
        if !self.kernel.has_geometry_header() {
            return Err(Stage::GeometryHeader);
        }
        debug!("result access");
        if !self.kernel.result_access_is_linear() {
            return Err(Stage::ResultAccess);
        }
        debug!("linear id");
        if !self.kernel.linear_id_is_canonical() {
            return Err(Stage::LinearId);
        }
        debug!("struct chain");
        if !self.kernel.struct_init_chain_ok() {
            return Err(Stage::StructInit);
        }
        Ok(())
    }

    fn statically_valid(&self) -> StageResult {
        self.structural()?;
        self.compiler_clean()?;
        self.analyzer_clean()
    }

    fn compiler_clean(&self) -> StageResult {
        debug!("compiler diagnostics");
        let output = self
            .toolchain
            .compile_diagnostics(&self.kernel_path, self.timeout)
            .ok_or(Stage::CompilerDiagnostics)?;
        self.log_tool_output(&output.text);
        if !output.success() {
            return Err(Stage::CompilerDiagnostics);
        }
        if let Some(rule) = denylist::first_match(&output.text, COMPILER_DENYLIST) {
            debug!(needle = rule.needle, meaning = rule.meaning, "deny-listed diagnostic");
            return Err(Stage::CompilerDiagnostics);
        }
        Ok(())
    }

    fn analyzer_clean(&self) -> StageResult {
        debug!("static analyzer");
        let output = self.analyzer_output().ok_or(Stage::StaticAnalyzer)?;
        if !output.success() {
            return Err(Stage::StaticAnalyzer);
        }
        if let Some(rule) = denylist::first_match(&output.text, ANALYZER_DENYLIST) {
            debug!(needle = rule.needle, meaning = rule.meaning, "deny-listed analyzer finding");
            return Err(Stage::StaticAnalyzer);
        }
        Ok(())
    }

    /// Inverse of [`analyzer_clean`]: interesting when the analyzer does
    /// flag the kernel. Exit status is ignored; the finding text decides.
    fn analyzer_flags(&self) -> StageResult {
        debug!("static analyzer (expecting a finding)");
        let output = self.analyzer_output().ok_or(Stage::StaticAnalyzer)?;
        match denylist::first_match(&output.text, ANALYZER_DENYLIST) {
            Some(rule) => {
                debug!(needle = rule.needle, "analyzer regression reproduced");
                Ok(())
            }
            None => Err(Stage::StaticAnalyzer),
        }
    }

    fn analyzer_output(&self) -> Option<ToolOutput> {
        let output = self
            .toolchain
            .compile_static_analysis(&self.kernel_path, self.timeout)?;
        self.log_tool_output(&output.text);
        Some(output)
    }

    fn dynamic_clean(&self) -> StageResult {
        debug!("dynamic checker");
        for optimised in [true, false] {
            let output = self
                .toolchain
                .run_dynamic_checker(&self.kernel_path, self.timeout, optimised)
                .ok_or(Stage::DynamicChecker)?;
            self.log_tool_output(&output.text);
            if !output.success() {
                return Err(Stage::DynamicChecker);
            }
        }
        Ok(())
    }

    fn oclgrind_optimised_clean(&self) -> StageResult {
        debug!("dynamic checker, optimised path only");
        let output = self
            .toolchain
            .run_dynamic_checker(&self.kernel_path, self.timeout, true)
            .ok_or(Stage::DynamicChecker)?;
        self.log_tool_output(&output.text);
        if output.success() {
            Ok(())
        } else {
            Err(Stage::DynamicChecker)
        }
    }

    /// Run both paths to completion and compare their captured output
    /// byte-for-byte. Interesting exactly when they differ; the oracle
    /// never interprets why.
    fn differs(&self, engine: DiffEngine) -> StageResult {
        debug!("run optimised");
        let optimised = self
            .execute(engine, true)
            .filter(ToolOutput::success)
            .ok_or(Stage::DifferentialRun)?;
        debug!("run unoptimised");
        let unoptimised = self
            .execute(engine, false)
            .filter(ToolOutput::success)
            .ok_or(Stage::DifferentialRun)?;
        debug!("diff");
        if optimised.text == unoptimised.text {
            return Err(Stage::DifferentialRun);
        }
        Ok(())
    }

    /// The inverse asymmetry of a miscompilation: the optimised path runs
    /// cleanly while the unoptimised one crashes, hangs, or exits dirty.
    fn crash_unoptimised(&self) -> StageResult {
        debug!("run optimised");
        self.execute(DiffEngine::Launcher, true)
            .filter(ToolOutput::success)
            .ok_or(Stage::DifferentialRun)?;
        debug!("run unoptimised, expecting failure");
        match self.execute(DiffEngine::Launcher, false) {
            Some(output) if output.success() => Err(Stage::DifferentialRun),
            _ => Ok(()),
        }
    }

    fn vector_size_error(&self) -> StageResult {
        debug!("compiler diagnostics (vector-size regression)");
        // The compile is expected to fail; only the diagnostic text
        // matters.
        let output = self
            .toolchain
            .compile_diagnostics(&self.kernel_path, self.timeout)
            .ok_or(Stage::CompilerDiagnostics)?;
        self.log_tool_output(&output.text);
        if output.text.contains(VECTOR_SIZE_ERROR.needle) {
            Ok(())
        } else {
            Err(Stage::CompilerDiagnostics)
        }
    }

    fn execute(&self, engine: DiffEngine, optimised: bool) -> Option<ToolOutput> {
        match engine {
            DiffEngine::Launcher => self.toolchain.run_kernel(
                &self.platform,
                &self.device,
                &self.kernel_path,
                self.timeout,
                optimised,
            ),
            DiffEngine::Oclgrind => {
                let output =
                    self.toolchain
                        .run_dynamic_checker(&self.kernel_path, self.timeout, optimised)?;
                self.log_tool_output(&output.text);
                Some(output)
            }
        }
    }

    fn log_tool_output(&self, text: &str) {
        let Some(path) = &self.output_log else {
            return;
        };
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{text}"));
        if let Err(err) = appended {
            warn!(path = %path.display(), %err, "failed to append tool output log");
        }
    }
}
