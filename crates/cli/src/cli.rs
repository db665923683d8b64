//! CLI wiring for the CLTriage driver.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command as HostCommand, ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cltriage_oracle::{Criterion, Oracle};
use cltriage_reducer::GeometryReducer;
use cltriage_toolchain::{DeviceConfig, Toolchain, ToolchainConfig};
use tracing::info;

use crate::hunt::{self, HuntOptions};

#[derive(Parser, Debug)]
#[command(name = "cltriage", about = "Differential triage for OpenCL kernels")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopAfter {
    Generate,
    Preprocess,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate and differentially run a batch of kernels, reporting which
    /// miscompile.
    Hunt {
        /// Generate this many fresh kernels with CLSmith.
        #[arg(long)]
        generate: Option<usize>,
        /// Judge every file in this directory.
        #[arg(long, conflicts_with = "generate")]
        kernel_dir: Option<PathBuf>,
        /// Judge these kernel files.
        #[arg(long, num_args = 1.., conflicts_with_all = ["generate", "kernel_dir"])]
        kernels: Vec<PathBuf>,
        /// Preprocess kernels before running them.
        #[arg(long)]
        preprocess: bool,
        /// Inputs are already preprocessed; skip the fuzzer headers.
        #[arg(long, conflicts_with = "preprocess")]
        preprocessed: bool,
        /// Stop the campaign after this phase.
        #[arg(long, value_enum)]
        stop_after: Option<StopAfter>,
        /// Directory for generated and preprocessed kernels.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Write a JSON report of every kernel's outcome.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Judge one kernel against a named criterion. Exit code zero means
    /// interesting, matching the C-Reduce interestingness contract.
    Test {
        kernel: PathBuf,
        #[arg(long, default_value = "miscompilation")]
        criterion: String,
        /// Append captured tool output to this file.
        #[arg(long)]
        log_output: Option<PathBuf>,
    },
    /// Shrink a kernel's dispatch geometry to the smallest global size
    /// that still reproduces the defect, rewriting the file in place.
    ReduceGeometry {
        kernel: PathBuf,
        /// Probe with the raw differential check, skipping validity
        /// gating.
        #[arg(long)]
        unchecked: bool,
    },
    /// Launch a C-Reduce run over a kernel, threading the toolchain
    /// configuration into the interestingness test's environment.
    StartReduction {
        kernel: PathBuf,
        /// Use this interestingness script instead of a generated one.
        #[arg(long)]
        test_script: Option<PathBuf>,
        /// Criterion for the generated script.
        #[arg(long, default_value = "miscompilation")]
        criterion: String,
        #[arg(long)]
        verbose: bool,
        /// Override CREDUCE_TEST_CLLAUNCHER.
        #[arg(long)]
        cl_launcher: Option<PathBuf>,
        /// Override CREDUCE_TEST_CLANG.
        #[arg(long)]
        clang: Option<PathBuf>,
        /// Override CREDUCE_TEST_LIBCLC_INCLUDE_PATH.
        #[arg(long)]
        libclc_include: Option<PathBuf>,
        /// Override CREDUCE_TEST_PLATFORM.
        #[arg(long)]
        platform: Option<String>,
        /// Override CREDUCE_TEST_DEVICE.
        #[arg(long)]
        device: Option<String>,
    },
}

pub fn run_cli(cli: Cli) -> Result<ExitCode> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match cli.command {
        Command::Hunt {
            generate,
            kernel_dir,
            kernels,
            preprocess,
            preprocessed,
            stop_after,
            output,
            report,
        } => {
            let outcome = hunt::run(HuntOptions {
                generate,
                kernel_dir,
                kernels,
                preprocess,
                preprocessed,
                stop_after,
                output,
            })?;
            println!(
                "{} miscompiled out of {} kernels",
                outcome.miscompiled(),
                outcome.kernels.len()
            );
            if let Some(path) = report {
                outcome.save(&path)?;
                info!(path = %path.display(), "report written");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Test {
            kernel,
            criterion,
            log_output,
        } => {
            let toolchain = Toolchain::new(ToolchainConfig::from_env()?);
            let device = DeviceConfig::from_env()?;
            let mut oracle = Oracle::new(&kernel, toolchain, device.platform, device.device)?;
            if let Some(path) = log_output {
                oracle = oracle.with_output_log(path);
            }
            let verdict = oracle.run_named(&criterion);
            info!(
                kernel = %kernel.display(),
                criterion,
                interesting = verdict.interesting,
                failed_stage = ?verdict.failed_stage,
                "verdict"
            );
            Ok(ExitCode::from(verdict.exit_code() as u8))
        }
        Command::ReduceGeometry { kernel, unchecked } => {
            let criterion = if unchecked {
                Criterion::WrongCode
            } else {
                Criterion::Miscompilation
            };
            let config = ToolchainConfig::from_env()?;
            let device = DeviceConfig::from_env()?;
            let mut reducer = GeometryReducer::new(&kernel)?;
            info!(kernel = %kernel.display(), %criterion, "reducing dispatch geometry");
            let reduced = reducer.reduce(|path| {
                // The file changes between trials and the oracle snapshots
                // the source at construction, so each probe gets a fresh
                // oracle.
                let toolchain = Toolchain::new(config.clone());
                match Oracle::new(
                    path,
                    toolchain,
                    device.platform.clone(),
                    device.device.clone(),
                ) {
                    Ok(oracle) => oracle.run_test(criterion).interesting,
                    Err(_) => false,
                }
            })?;
            match reduced {
                Some(geometry) => {
                    println!(
                        "reduced to -g {},{},{} -l {},{},{}",
                        geometry.global[0],
                        geometry.global[1],
                        geometry.global[2],
                        geometry.local[0],
                        geometry.local[1],
                        geometry.local[2]
                    );
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    println!("no smaller dispatch reproduces; kernel left unchanged");
                    Ok(ExitCode::from(1))
                }
            }
        }
        Command::StartReduction {
            kernel,
            test_script,
            criterion,
            verbose,
            cl_launcher,
            clang,
            libclc_include,
            platform,
            device,
        } => {
            let kernel = fs::canonicalize(&kernel)
                .with_context(|| format!("resolving kernel {}", kernel.display()))?;

            let mut env = Vec::new();
            if let Some(path) = cl_launcher {
                env.push(("CREDUCE_TEST_CLLAUNCHER", canonical_string(&path)?));
            }
            if let Some(path) = clang {
                env.push(("CREDUCE_TEST_CLANG", canonical_string(&path)?));
            }
            if let Some(path) = libclc_include {
                env.push(("CREDUCE_TEST_LIBCLC_INCLUDE_PATH", canonical_string(&path)?));
            }
            if let Some(platform) = platform {
                env.push(("CREDUCE_TEST_PLATFORM", platform));
            }
            if let Some(device) = device {
                env.push(("CREDUCE_TEST_DEVICE", device));
            }

            let script = match test_script {
                Some(path) => fs::canonicalize(&path)
                    .with_context(|| format!("resolving test script {}", path.display()))?,
                None => write_test_script(&kernel, &criterion)?,
            };

            let mut creduce = HostCommand::new("creduce");
            creduce.args(["-n", "1"]);
            if verbose {
                creduce.arg("--verbose");
            }
            creduce.arg(&script).arg(&kernel).envs(env);

            info!(kernel = %kernel.display(), script = %script.display(), "launching creduce");
            // C-Reduce runs for as long as it needs; no deadline here.
            let status = creduce.status().context("launching creduce")?;
            Ok(if status.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
    }
}

/// Write a shell script that judges the kernel with our own `test`
/// subcommand. C-Reduce copies the kernel into a scratch directory and
/// runs the script there with no arguments, so the script refers to the
/// kernel by file name only.
fn write_test_script(kernel: &Path, criterion: &str) -> Result<PathBuf> {
    let exe = std::env::current_exe().context("locating own executable")?;
    let name = kernel
        .file_name()
        .context("kernel path has no file name")?
        .to_string_lossy();

    let (mut file, path) = tempfile::Builder::new()
        .prefix("cltriage-test.")
        .suffix(".sh")
        .tempfile()
        .context("creating interestingness script")?
        .keep()
        .context("keeping interestingness script")?;
    writeln!(file, "#!/bin/sh")?;
    writeln!(
        file,
        "exec \"{}\" test --criterion {} \"{}\"",
        exe.display(),
        criterion,
        name
    )?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("marking {} executable", path.display()))?;
    }

    Ok(path)
}

fn canonical_string(path: &Path) -> Result<String> {
    let resolved = fs::canonicalize(path)
        .with_context(|| format!("resolving {}", path.display()))?;
    Ok(resolved.display().to_string())
}
