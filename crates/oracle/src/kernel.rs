//! Read-only kernel snapshot and the structural validity checks.
//!
//! These are pure text checks: they guard against minimizer rewrites that
//! would change the dispatch semantics instead of shrinking the defect
//! (dropping the geometry header, bending the result-buffer indexing, or
//! leaving a struct chain uninitialised so the differential comparison
//! reads garbage).

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::geometry::{self, DispatchGeometry};

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern must compile")
}

fn result_access_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"result\s*\["))
}

fn canonical_access_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"result\s*\[\s*get_linear_global_id\s*\(\s*\)\s*\]"))
}

/// `(gid(2) * gsize(1) + gid(1)) * gsize(0) + gid(0)`, whitespace-free.
fn linear_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        re(r"return\s*\(\s*get_global_id\s*\(\s*2\s*\)\s*\*\s*get_global_size\s*\(\s*1\s*\)\s*\+\s*get_global_id\s*\(\s*1\s*\)\s*\)\s*\*\s*get_global_size\s*\(\s*0\s*\)\s*\+\s*get_global_id\s*\(\s*0\s*\)\s*;")
    })
}

fn struct_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"struct\s+S[0-9]+\s+c_([0-9]+)\s*;"))
}

/// Immutable view of a kernel's source text, taken once at construction.
pub struct KernelSnapshot {
    source: String,
}

impl KernelSnapshot {
    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading kernel {}", path.display()))?;
        Ok(Self::from_source(source))
    }

    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn geometry(&self) -> Option<DispatchGeometry> {
        geometry::parse_header(&self.source)
    }

    pub fn has_geometry_header(&self) -> bool {
        self.geometry().is_some()
    }

    /// Every access to the result buffer must be the canonical
    /// `result[get_linear_global_id()]`; any other indexing form fails.
    /// A kernel that never touches the buffer passes.
    pub fn result_access_is_linear(&self) -> bool {
        let accesses = result_access_re().find_iter(&self.source).count();
        let canonical = canonical_access_re().find_iter(&self.source).count();
        accesses == canonical
    }

    /// The linear-id helper must keep the canonical formula, or a geometry
    /// change would silently change which work-item writes where.
    pub fn linear_id_is_canonical(&self) -> bool {
        linear_id_re().is_match(&self.source)
    }

    /// Def-before-use chase for the first struct assigned in the entry
    /// kernel: the pointer to it must be initialised, the assignment must
    /// exist, and the assigned source value must carry a literal aggregate
    /// initializer. A kernel with no struct passes vacuously.
    pub fn struct_init_chain_ok(&self) -> bool {
        let Some(caps) = struct_decl_re().captures(&self.source) else {
            debug!("no struct declaration");
            return true;
        };
        let target = &caps[1];

        let pointer = re(&format!(
            r"struct\s+S[0-9]+(?:\s*\*\s+|\s+\*\s*)p_[0-9]+\s*=\s*&\s*c_{target}\s*;"
        ));
        if !pointer.is_match(&self.source) {
            debug!(struct_id = target, "struct pointer never initialised");
            return false;
        }

        let assignment = re(&format!(r"c_{target}\s*=\s*c_([0-9]+)\s*;"));
        let Some(caps) = assignment.captures(&self.source) else {
            debug!(struct_id = target, "struct never assigned");
            return false;
        };
        let source_value = &caps[1];

        let literal = re(&format!(r"struct\s+S[0-9]+\s+c_{source_value}\s*=\s*\{{"));
        if !literal.is_match(&self.source) {
            debug!(struct_id = source_value, "assigned struct value not initialised");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINEAR_ID: &str = "int get_linear_global_id() {\n    return (get_global_id(2) * get_global_size(1) + get_global_id(1)) * get_global_size(0) + get_global_id(0);\n}\n";

    #[test]
    fn missing_header_detected() {
        let snapshot = KernelSnapshot::from_source("__kernel void k() {}\n");
        assert!(!snapshot.has_geometry_header());
    }

    #[test]
    fn canonical_result_access_passes() {
        let snapshot = KernelSnapshot::from_source(
            "result[get_linear_global_id()] = x;\nresult [ get_linear_global_id () ] ^= y;\n",
        );
        assert!(snapshot.result_access_is_linear());
    }

    #[test]
    fn any_other_result_access_fails() {
        let snapshot = KernelSnapshot::from_source(
            "result[get_linear_global_id()] = x;\nresult[0] = y;\n",
        );
        assert!(!snapshot.result_access_is_linear());
    }

    #[test]
    fn no_result_access_passes() {
        assert!(KernelSnapshot::from_source("int x = 1;\n").result_access_is_linear());
    }

    #[test]
    fn canonical_linear_id_recognised() {
        assert!(KernelSnapshot::from_source(LINEAR_ID).linear_id_is_canonical());
        let rewritten = "int get_linear_global_id() { return get_global_id(0); }\n";
        assert!(!KernelSnapshot::from_source(rewritten).linear_id_is_canonical());
    }

    #[test]
    fn struct_chain_passes_when_fully_initialised() {
        let source = "\
struct S0 c_2 = {0, 1};
struct S1 c_1;
struct S1 * p_3 = &c_1;
c_1 = c_2;
";
        assert!(KernelSnapshot::from_source(source).struct_init_chain_ok());
    }

    #[test]
    fn struct_chain_fails_without_pointer_init() {
        let source = "struct S1 c_1;\nc_1 = c_2;\nstruct S0 c_2 = {0};\n";
        assert!(!KernelSnapshot::from_source(source).struct_init_chain_ok());
    }

    #[test]
    fn struct_chain_fails_without_assignment() {
        let source = "struct S1 c_1;\nstruct S1 *p_3 = &c_1;\n";
        assert!(!KernelSnapshot::from_source(source).struct_init_chain_ok());
    }

    #[test]
    fn struct_chain_fails_with_uninitialised_source() {
        let source = "struct S1 c_1;\nstruct S1 *p_3 = &c_1;\nc_1 = c_2;\nstruct S0 c_2;\n";
        assert!(!KernelSnapshot::from_source(source).struct_init_chain_ok());
    }

    #[test]
    fn no_struct_is_vacuously_fine() {
        assert!(KernelSnapshot::from_source("__kernel void k() {}\n").struct_init_chain_ok());
    }
}
