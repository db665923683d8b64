//! Batch kernel campaign: generate, preprocess, and differentially test.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cltriage_exec::{default_runner, ToolCommand};
use cltriage_toolchain::{DeviceConfig, KernelToolchain, Toolchain, ToolchainConfig, TOOL_TIMEOUT};
use tracing::{info, warn};

use crate::cli::StopAfter;
use crate::report::{HuntReport, KernelStatus};

/// Support headers the fuzzer's kernels include; copied next to
/// unpreprocessed kernels so the launcher can compile them.
const CLSMITH_HEADERS: &[&str] = &["CLSmith.h", "safe_math_macros.h", "cl_safe_math_macros.h"];

pub struct HuntOptions {
    pub generate: Option<usize>,
    pub kernel_dir: Option<PathBuf>,
    pub kernels: Vec<PathBuf>,
    pub preprocess: bool,
    pub preprocessed: bool,
    pub stop_after: Option<StopAfter>,
    pub output: Option<PathBuf>,
}

impl HuntOptions {
    fn needs_clsmith(&self) -> bool {
        self.generate.is_some() || self.preprocess || !self.preprocessed
    }

    fn runs_kernels(&self) -> bool {
        self.stop_after != Some(StopAfter::Generate)
    }
}

pub fn run(options: HuntOptions) -> Result<HuntReport> {
    let clsmith_path = if options.needs_clsmith() {
        Some(required_env("CLSMITH_PATH")?)
    } else {
        None
    };

    // Fail fast on missing configuration before any kernel work starts.
    let toolchain = if options.runs_kernels() {
        Some((Toolchain::new(ToolchainConfig::from_env()?), DeviceConfig::from_env()?))
    } else {
        None
    };

    let workdir = if options.needs_clsmith() {
        Some(working_directory(options.output.as_deref())?)
    } else {
        None
    };

    if !options.preprocess && !options.preprocessed {
        if let (Some(clsmith), Some(workdir)) = (&clsmith_path, &workdir) {
            copy_support_headers(clsmith, workdir)?;
        }
    }

    let inputs = input_kernels(&options, workdir.as_deref())?;
    info!(kernels = inputs.len(), "starting hunt");

    let mut report = HuntReport::new();
    for input in inputs {
        let name = kernel_name(&input);
        let status = hunt_one(
            &options,
            clsmith_path.as_deref(),
            workdir.as_deref(),
            toolchain.as_ref(),
            &input,
            &name,
        );
        info!(kernel = %name, status = ?status, "kernel judged");
        println!("{name} {}", status_word(status));
        report.record(name, status);
    }
    Ok(report)
}

fn hunt_one(
    options: &HuntOptions,
    clsmith_path: Option<&Path>,
    workdir: Option<&Path>,
    toolchain: Option<&(Toolchain, DeviceConfig)>,
    input: &Path,
    name: &str,
) -> KernelStatus {
    let mut kernel = input.to_path_buf();

    if options.generate.is_some() {
        let Some((clsmith, workdir)) = clsmith_path.zip(workdir) else {
            return KernelStatus::AbortedGeneration;
        };
        if let Err(err) = generate_kernel(clsmith, workdir, &kernel) {
            warn!(kernel = %name, %err, "generation aborted");
            return KernelStatus::AbortedGeneration;
        }
    }
    if options.stop_after == Some(StopAfter::Generate) {
        return KernelStatus::Generated;
    }

    let Some((toolchain, device)) = toolchain else {
        return KernelStatus::AbortedOptimised;
    };

    if options.preprocess {
        let Some((clsmith, workdir)) = clsmith_path.zip(workdir) else {
            return KernelStatus::AbortedPreprocess;
        };
        match preprocess_kernel(toolchain, clsmith, workdir, &kernel, name) {
            Ok(preprocessed) => kernel = preprocessed,
            Err(err) => {
                warn!(kernel = %name, %err, "preprocessing aborted");
                return KernelStatus::AbortedPreprocess;
            }
        }
    }
    if options.stop_after == Some(StopAfter::Preprocess) {
        return KernelStatus::Preprocessed;
    }

    // Raw differential run; validity gating is `cltriage test`'s job.
    let optimised = toolchain.run_kernel(&device.platform, &device.device, &kernel, TOOL_TIMEOUT, true);
    let Some(optimised) = optimised.filter(|o| o.success()) else {
        return KernelStatus::AbortedOptimised;
    };
    let unoptimised =
        toolchain.run_kernel(&device.platform, &device.device, &kernel, TOOL_TIMEOUT, false);
    let Some(unoptimised) = unoptimised.filter(|o| o.success()) else {
        return KernelStatus::AbortedUnoptimised;
    };

    if optimised.text != unoptimised.text {
        KernelStatus::Miscompiled
    } else {
        KernelStatus::Correct
    }
}

/// The fuzzer always writes `CLProg.c` into its working directory; rename
/// it to the kernel's own name.
fn generate_kernel(clsmith: &Path, workdir: &Path, kernel: &Path) -> Result<()> {
    let tool = clsmith.join("CLSmith");
    let command = ToolCommand::new(&tool).current_dir(workdir);
    let output = default_runner()
        .run(&command, TOOL_TIMEOUT)
        .filter(|o| o.success());
    if output.is_none() {
        bail!("{} produced no kernel", tool.display());
    }
    fs::rename(workdir.join("CLProg.c"), kernel)
        .with_context(|| format!("renaming generated kernel to {}", kernel.display()))?;
    Ok(())
}

fn preprocess_kernel(
    toolchain: &Toolchain,
    clsmith: &Path,
    workdir: &Path,
    kernel: &Path,
    name: &str,
) -> Result<PathBuf> {
    let staged = workdir.join(format!("_{name}"));
    let output = toolchain
        .preprocess(clsmith, kernel, &staged, TOOL_TIMEOUT)
        .filter(|o| o.success());
    if output.is_none() {
        bail!("preprocessor produced no output for {name}");
    }
    let destination = workdir.join(name);
    fs::rename(&staged, &destination)
        .with_context(|| format!("renaming preprocessed kernel to {}", destination.display()))?;
    Ok(destination)
}

fn input_kernels(options: &HuntOptions, workdir: Option<&Path>) -> Result<Vec<PathBuf>> {
    if let Some(count) = options.generate {
        let workdir = workdir.map(Path::to_path_buf).unwrap_or_default();
        return Ok((0..count)
            .map(|i| workdir.join(format!("CLProg_{i}.cl")))
            .collect());
    }
    if !options.kernels.is_empty() {
        return options
            .kernels
            .iter()
            .map(|kernel| {
                fs::canonicalize(kernel)
                    .with_context(|| format!("resolving kernel {}", kernel.display()))
            })
            .collect();
    }
    if let Some(dir) = &options.kernel_dir {
        let mut kernels = Vec::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("reading kernel directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() {
                kernels.push(path);
            }
        }
        kernels.sort();
        return Ok(kernels);
    }
    bail!("no input kernels: pass --generate, --kernels, or --kernel-dir");
}

fn working_directory(output: Option<&Path>) -> Result<PathBuf> {
    match output {
        Some(path) => {
            if !path.exists() {
                fs::create_dir_all(path)
                    .with_context(|| format!("creating output directory {}", path.display()))?;
            }
            Ok(path.to_path_buf())
        }
        None => {
            let dir = tempfile::Builder::new()
                .prefix("kernels.")
                .tempdir_in(".")
                .context("creating working directory")?;
            // The campaign's artifacts outlive the process.
            Ok(dir.keep())
        }
    }
}

fn copy_support_headers(clsmith: &Path, workdir: &Path) -> Result<()> {
    for header in CLSMITH_HEADERS {
        let from = clsmith.join(header);
        let to = workdir.join(header);
        fs::copy(&from, &to)
            .with_context(|| format!("copying {} into {}", from.display(), workdir.display()))?;
    }
    Ok(())
}

fn kernel_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn status_word(status: KernelStatus) -> &'static str {
    match status {
        KernelStatus::Generated => "generated",
        KernelStatus::Preprocessed => "preprocessed",
        KernelStatus::Correct => "correct",
        KernelStatus::Miscompiled => "miscompiled",
        KernelStatus::AbortedGeneration => "aborted generation",
        KernelStatus::AbortedPreprocess => "aborted preprocessing",
        KernelStatus::AbortedOptimised => "aborted optimised",
        KernelStatus::AbortedUnoptimised => "aborted unoptimised",
    }
}

fn required_env(name: &str) -> Result<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => bail!("{name} not defined!"),
    }
}
