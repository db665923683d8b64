//! Resolution of the external-tool environment contract.
//!
//! The variable names follow the C-Reduce interestingness-test
//! convention, so an existing reduction setup works unchanged.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};

/// Locations of the external tools.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// clang front end used for diagnostics, analysis, and preprocessing.
    pub clang: PathBuf,
    /// cl_launcher binary that compiles and runs a kernel file.
    pub cl_launcher: PathBuf,
    /// libclc include directory for `clc/clc.h`.
    pub libclc_include: PathBuf,
    /// Oclgrind wrapper binary.
    pub oclgrind: PathBuf,
    /// Platform/device indices the launcher targets when running under
    /// Oclgrind.
    pub oclgrind_platform: u32,
    pub oclgrind_device: u32,
}

impl ToolchainConfig {
    /// Resolve from the environment. Missing required variables are fatal
    /// before any pipeline work starts.
    pub fn from_env() -> Result<Self> {
        let cl_launcher = required_path("CREDUCE_TEST_CLLAUNCHER")?;
        let libclc_include = required_path("CREDUCE_TEST_LIBCLC_INCLUDE_PATH")?;
        let clang = env::var_os("CREDUCE_TEST_CLANG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("clang"));
        Ok(Self {
            clang,
            cl_launcher,
            libclc_include,
            oclgrind: PathBuf::from("oclgrind"),
            oclgrind_platform: 0,
            oclgrind_device: 0,
        })
    }
}

/// Platform and device identifiers of the implementation under test.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub platform: String,
    pub device: String,
}

impl DeviceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            platform: required_string("CREDUCE_TEST_PLATFORM")?,
            device: required_string("CREDUCE_TEST_DEVICE")?,
        })
    }
}

fn required_string(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => bail!("{name} not defined!"),
    }
}

fn required_path(name: &str) -> Result<PathBuf> {
    required_string(name).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_variable_is_fatal() {
        env::remove_var("CREDUCE_TEST_PLATFORM");
        env::remove_var("CREDUCE_TEST_DEVICE");
        let err = DeviceConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("CREDUCE_TEST_PLATFORM"));
    }

    #[test]
    fn toolchain_config_defaults_clang() {
        env::set_var("CREDUCE_TEST_CLLAUNCHER", "/opt/cl_launcher");
        env::set_var("CREDUCE_TEST_LIBCLC_INCLUDE_PATH", "/opt/libclc");
        env::remove_var("CREDUCE_TEST_CLANG");
        let config = ToolchainConfig::from_env().unwrap();
        assert_eq!(config.clang, PathBuf::from("clang"));
        assert_eq!(config.cl_launcher, PathBuf::from("/opt/cl_launcher"));
    }
}
