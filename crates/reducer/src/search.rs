//! Monotone per-axis probe over dispatch geometries.
//!
//! The criterion is treated as an opaque, expensive oracle: no bisection,
//! just a bottom-up linear probe per axis, snapped to the divisibility
//! requirement and bounded by the geometry the kernel shipped with. The
//! first geometry at which the defect reappears is reported as minimal.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cltriage_oracle::geometry::{self, DispatchGeometry};
use tracing::{debug, info};

/// Rewrites a kernel's geometry header in place and searches for the
/// smallest global size still satisfying a bound criterion.
///
/// Only the header line is ever rewritten; the kernel body below it is
/// preserved byte-for-byte. The reducer owns the file for the duration of
/// one search session.
#[derive(Debug)]
pub struct GeometryReducer {
    path: PathBuf,
    body: String,
    original: DispatchGeometry,
}

impl GeometryReducer {
    /// Fails when the kernel carries no recognizable geometry header or
    /// an unaligned one; no search is attempted in either case.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let source = fs::read_to_string(&path)
            .with_context(|| format!("reading kernel {}", path.display()))?;
        let Some((original, body)) = geometry::split_header(&source) else {
            bail!("kernel {} has no geometry header", path.display());
        };
        if !original.is_aligned() {
            bail!(
                "kernel {} ships an unaligned geometry (global must be a per-axis multiple of local)",
                path.display()
            );
        }
        Ok(Self {
            path,
            body: body.to_string(),
            original,
        })
    }

    pub fn original(&self) -> &DispatchGeometry {
        &self.original
    }

    /// Probe geometries from the bottom up until `probe` holds, rewriting
    /// the kernel header before every trial. Trials are strictly
    /// sequential: one geometry is written and tested to completion
    /// before the next is computed.
    ///
    /// Returns the first satisfying geometry, or `None` once every axis
    /// is saturated at the original size; on exhaustion the original
    /// header is restored.
    pub fn reduce(&mut self, mut probe: impl FnMut(&Path) -> bool) -> Result<Option<DispatchGeometry>> {
        let local = self.original.local;
        let mut global = self.first_candidate();
        loop {
            self.write_geometry(global, local)?;
            debug!(?global, ?local, "probing geometry");
            if probe(&self.path) {
                let found = DispatchGeometry {
                    global,
                    local,
                    meta: self.original.meta.clone(),
                };
                info!(?global, ?local, "defect reproduced at reduced geometry");
                return Ok(Some(found));
            }
            let next = self.advance(global);
            if next == global {
                debug!("search exhausted, restoring original geometry");
                self.write_geometry(self.original.global, self.original.local)?;
                return Ok(None);
            }
            global = next;
        }
    }

    /// Smallest geometry that can legally be written: every axis at the
    /// first multiple of its local size. Equals (1,1,1) whenever the
    /// local size is all ones.
    fn first_candidate(&self) -> [u64; 3] {
        let mut global = [1; 3];
        for axis in 0..3 {
            global[axis] = advance_axis(0, self.original.local[axis], self.original.global[axis]);
        }
        global
    }

    fn advance(&self, global: [u64; 3]) -> [u64; 3] {
        let mut next = global;
        for axis in 0..3 {
            next[axis] = advance_axis(
                global[axis],
                self.original.local[axis],
                self.original.global[axis],
            );
        }
        next
    }

    fn write_geometry(&self, global: [u64; 3], local: [u64; 3]) -> Result<()> {
        let header = DispatchGeometry {
            global,
            local,
            meta: self.original.meta.clone(),
        };
        let mut contents = header.header_line();
        contents.push_str(&self.body);
        fs::write(&self.path, contents)
            .with_context(|| format!("rewriting kernel {}", self.path.display()))
    }
}

/// Next candidate on one axis: one past the current value, snapped up to
/// the next multiple of the local size, clamped at the original bound.
/// A saturated axis keeps its value, which is what lets the caller detect
/// the fixpoint.
fn advance_axis(current: u64, local: u64, bound: u64) -> u64 {
    if current >= bound {
        return current;
    }
    let mut next = current + 1;
    while next % local != 0 && next < bound {
        next += 1;
    }
    next.min(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_snaps_to_local_multiples() {
        assert_eq!(advance_axis(0, 8, 64), 8);
        assert_eq!(advance_axis(8, 8, 64), 16);
        assert_eq!(advance_axis(9, 8, 64), 16);
    }

    #[test]
    fn advance_steps_by_one_for_unit_local() {
        assert_eq!(advance_axis(0, 1, 4), 1);
        assert_eq!(advance_axis(1, 1, 4), 2);
    }

    #[test]
    fn advance_saturates_at_the_bound() {
        assert_eq!(advance_axis(64, 8, 64), 64);
        // Snapping may not pass the bound either.
        assert_eq!(advance_axis(63, 8, 64), 64);
        assert_eq!(advance_axis(1, 1, 1), 1);
    }
}
