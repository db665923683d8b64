//! One operation per external tool, all sharing the timeout/kill contract
//! of `cltriage-exec`.

use std::path::Path;
use std::time::Duration;

use cltriage_exec::{default_runner, ToolCommand, ToolOutput, ToolRunner};
use tracing::debug;

use crate::config::ToolchainConfig;

/// Hard limit shared by every external tool invocation.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Clang language/include setup for OpenCL C kernels.
const CLANG_OPENCL_ARGS: &[&str] = &[
    "-x",
    "cl",
    "-fno-builtin",
    "-Dcl_clang_storage_class_specifiers",
];

/// Diagnostic-only compile: everything on, quiet output, light opt level
/// so flow-sensitive warnings fire.
const CLANG_DIAG_ARGS: &[&str] = &[
    "-g",
    "-c",
    "-Wall",
    "-Wextra",
    "-pedantic",
    "-Wconditional-uninitialized",
    "-Weverything",
    "-Wno-reserved-id-macro",
    "-fno-caret-diagnostics",
    "-fno-diagnostics-fixit-info",
    "-O1",
];

const CLANG_ANALYZER_ARGS: &[&str] = &[
    "-Xclang",
    "-analyze",
    "-Xclang",
    "-analyzer-checker",
    "-Xclang",
    "alpha,core,security,unix",
];

const OCLGRIND_ARGS: &[&str] = &["-Wall", "--uninitialized", "--data-races"];

/// Operations the interestingness pipeline needs from the toolchain.
///
/// Each returns the adapter's result unchanged; `None` is the no-result
/// sentinel (timeout, spawn failure, crash) and callers treat it as a
/// failed check, never as an error.
pub trait KernelToolchain {
    /// Compile in diagnostic-only mode.
    fn compile_diagnostics(&self, kernel: &Path, timeout: Duration) -> Option<ToolOutput>;

    /// Compile with the static analyzer checkers enabled.
    fn compile_static_analysis(&self, kernel: &Path, timeout: Duration) -> Option<ToolOutput>;

    /// Run the kernel under the Oclgrind dynamic checker.
    fn run_dynamic_checker(
        &self,
        kernel: &Path,
        timeout: Duration,
        optimised: bool,
    ) -> Option<ToolOutput>;

    /// Run the kernel on the device under test and capture its result
    /// buffer dump.
    fn run_kernel(
        &self,
        platform: &str,
        device: &str,
        kernel: &Path,
        timeout: Duration,
        optimised: bool,
    ) -> Option<ToolOutput>;
}

impl<T: KernelToolchain + ?Sized> KernelToolchain for &T {
    fn compile_diagnostics(&self, kernel: &Path, timeout: Duration) -> Option<ToolOutput> {
        (**self).compile_diagnostics(kernel, timeout)
    }

    fn compile_static_analysis(&self, kernel: &Path, timeout: Duration) -> Option<ToolOutput> {
        (**self).compile_static_analysis(kernel, timeout)
    }

    fn run_dynamic_checker(
        &self,
        kernel: &Path,
        timeout: Duration,
        optimised: bool,
    ) -> Option<ToolOutput> {
        (**self).run_dynamic_checker(kernel, timeout, optimised)
    }

    fn run_kernel(
        &self,
        platform: &str,
        device: &str,
        kernel: &Path,
        timeout: Duration,
        optimised: bool,
    ) -> Option<ToolOutput> {
        (**self).run_kernel(platform, device, kernel, timeout, optimised)
    }
}

pub struct Toolchain {
    config: ToolchainConfig,
    runner: Box<dyn ToolRunner>,
}

impl Toolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self::with_runner(config, default_runner())
    }

    pub fn with_runner(config: ToolchainConfig, runner: Box<dyn ToolRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    fn clang_frontend(&self) -> ToolCommand {
        ToolCommand::new(&self.config.clang)
            .args(CLANG_OPENCL_ARGS)
            .arg("-I")
            .arg(&self.config.libclc_include)
            .args(["-include", "clc/clc.h"])
    }

    fn launcher_args(&self, platform: &str, device: &str, kernel: &Path) -> Vec<String> {
        vec![
            "-p".into(),
            platform.into(),
            "-d".into(),
            device.into(),
            "-f".into(),
            kernel.display().to_string(),
        ]
    }

    /// Preprocess a kernel with the fuzzer's support headers resolvable,
    /// writing the result to `output`.
    pub fn preprocess(
        &self,
        include_dir: &Path,
        kernel: &Path,
        output: &Path,
        timeout: Duration,
    ) -> Option<ToolOutput> {
        let command = ToolCommand::new(&self.config.clang)
            .arg("-I")
            .arg(include_dir)
            .args(["-E", "-CC", "-o"])
            .arg(output)
            .arg(kernel);
        debug!(kernel = %kernel.display(), "preprocessing kernel");
        self.runner.run(&command, timeout)
    }
}

impl KernelToolchain for Toolchain {
    fn compile_diagnostics(&self, kernel: &Path, timeout: Duration) -> Option<ToolOutput> {
        let command = self.clang_frontend().args(CLANG_DIAG_ARGS).arg(kernel);
        debug!(kernel = %kernel.display(), "clang diagnostic compile");
        self.runner.run(&command, timeout)
    }

    fn compile_static_analysis(&self, kernel: &Path, timeout: Duration) -> Option<ToolOutput> {
        let command = self
            .clang_frontend()
            .args(CLANG_ANALYZER_ARGS)
            .args(CLANG_DIAG_ARGS)
            .arg(kernel);
        debug!(kernel = %kernel.display(), "clang static analysis");
        self.runner.run(&command, timeout)
    }

    fn run_dynamic_checker(
        &self,
        kernel: &Path,
        timeout: Duration,
        optimised: bool,
    ) -> Option<ToolOutput> {
        let mut command = ToolCommand::new(&self.config.oclgrind)
            .args(OCLGRIND_ARGS)
            .arg(&self.config.cl_launcher)
            .args(self.launcher_args(
                &self.config.oclgrind_platform.to_string(),
                &self.config.oclgrind_device.to_string(),
                kernel,
            ))
            // Oclgrind installations that shim the launcher read their
            // options from the environment; pass them per invocation
            // instead of mutating the parent's environment.
            .env("OCLGRIND_DIAGNOSTIC_OPTIONS", "-Wall")
            .env("OCLGRIND_UNINITIALIZED", "1")
            .env("OCLGRIND_DATA_RACES", "1");
        if !optimised {
            // cl_launcher spells this flag with three dashes.
            command = command.arg("---disable_opts");
        }
        debug!(kernel = %kernel.display(), optimised, "oclgrind run");
        self.runner.run(&command, timeout)
    }

    fn run_kernel(
        &self,
        platform: &str,
        device: &str,
        kernel: &Path,
        timeout: Duration,
        optimised: bool,
    ) -> Option<ToolOutput> {
        let mut command = ToolCommand::new(&self.config.cl_launcher)
            .args(self.launcher_args(platform, device, kernel));
        if !optimised {
            command = command.arg("---disable_opts");
        }
        debug!(kernel = %kernel.display(), platform, device, optimised, "kernel run");
        self.runner.run(&command, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    fn config() -> ToolchainConfig {
        ToolchainConfig {
            clang: PathBuf::from("/opt/clang"),
            cl_launcher: PathBuf::from("/opt/cl_launcher"),
            libclc_include: PathBuf::from("/opt/libclc"),
            oclgrind: PathBuf::from("oclgrind"),
            oclgrind_platform: 0,
            oclgrind_device: 0,
        }
    }

    /// Records each spawned command instead of running it.
    struct RecordingRunner {
        seen: Arc<Mutex<Vec<ToolCommand>>>,
    }

    impl ToolRunner for RecordingRunner {
        fn run(&self, command: &ToolCommand, _timeout: Duration) -> Option<ToolOutput> {
            self.seen.lock().unwrap().push(command.clone());
            Some(ToolOutput {
                text: String::new(),
                status: 0,
            })
        }
    }

    fn recorded(run: impl Fn(&Toolchain)) -> Vec<ToolCommand> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let runner = Box::new(RecordingRunner {
            seen: Arc::clone(&seen),
        });
        let toolchain = Toolchain::with_runner(config(), runner);
        run(&toolchain);
        let seen = seen.lock().unwrap();
        seen.clone()
    }

    #[test]
    fn unoptimised_run_disables_opts() {
        let seen = recorded(|toolchain| {
            toolchain.run_kernel("1", "2", Path::new("k.cl"), TOOL_TIMEOUT, false);
        });
        let args = seen[0].arg_list();
        assert_eq!(seen[0].program(), Path::new("/opt/cl_launcher"));
        assert_eq!(args.last().unwrap(), "---disable_opts");
        assert!(args.iter().any(|a| a == "-p"));
    }

    #[test]
    fn diagnostics_compile_uses_opencl_frontend() {
        let seen = recorded(|toolchain| {
            toolchain.compile_diagnostics(Path::new("k.cl"), TOOL_TIMEOUT);
        });
        let args = seen[0].arg_list();
        assert_eq!(args[0], "-x");
        assert_eq!(args[1], "cl");
        assert!(args.iter().any(|a| a == "-Weverything"));
        assert!(args.iter().all(|a| a != "-analyze"));
    }

    #[test]
    fn analyzer_compile_adds_checkers() {
        let seen = recorded(|toolchain| {
            toolchain.compile_static_analysis(Path::new("k.cl"), TOOL_TIMEOUT);
        });
        let args = seen[0].arg_list();
        assert!(args.iter().any(|a| a == "-analyze"));
        assert!(args.iter().any(|a| a == "alpha,core,security,unix"));
    }

    #[test]
    fn dynamic_checker_wraps_launcher() {
        let seen = recorded(|toolchain| {
            toolchain.run_dynamic_checker(Path::new("k.cl"), TOOL_TIMEOUT, true);
        });
        let args = seen[0].arg_list();
        assert_eq!(seen[0].program(), Path::new("oclgrind"));
        assert!(args.iter().any(|a| a == "--data-races"));
        assert!(args.iter().any(|a| a == "/opt/cl_launcher"));
        assert!(args.iter().all(|a| a != "---disable_opts"));
    }
}
