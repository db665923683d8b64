//! Reduction search behavior against stub probes on real kernel files.

use std::fs;
use std::io::Write;
use std::path::Path;

use cltriage_oracle::geometry;
use cltriage_reducer::GeometryReducer;
use tempfile::NamedTempFile;

const KERNEL: &str = "\
// seed42 -g 64,1,1 -l 8,1,1
__kernel void entry(__global ulong *result) {
    result[get_linear_global_id()] = 1;
}
";

fn kernel_file(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp kernel");
    file.write_all(source.as_bytes()).expect("write kernel");
    file
}

#[test]
fn construction_fails_without_geometry_header() {
    let file = kernel_file("__kernel void entry() {}\n");
    let err = GeometryReducer::new(file.path()).unwrap_err();
    assert!(err.to_string().contains("no geometry header"));
}

#[test]
fn construction_fails_on_unaligned_geometry() {
    let file = kernel_file("// seed -g 63,1,1 -l 8,1,1\n__kernel void entry() {}\n");
    assert!(GeometryReducer::new(file.path()).is_err());
}

#[test]
fn always_true_probe_returns_the_trivial_geometry_immediately() {
    let file = kernel_file("// seed -g 16,4,2 -l 1,1,1\nint body;\n");
    let mut reducer = GeometryReducer::new(file.path()).unwrap();

    let mut probes = 0;
    let found = reducer
        .reduce(|_| {
            probes += 1;
            true
        })
        .unwrap()
        .expect("geometry found");

    assert_eq!(found.global, [1, 1, 1]);
    assert_eq!(found.local, [1, 1, 1]);
    assert_eq!(probes, 1);
}

#[test]
fn always_false_probe_terminates_and_restores_the_file() {
    let file = kernel_file(KERNEL);
    let mut reducer = GeometryReducer::new(file.path()).unwrap();

    let found = reducer.reduce(|_| false).unwrap();
    assert!(found.is_none());
    assert_eq!(fs::read_to_string(file.path()).unwrap(), KERNEL);
}

#[test]
fn snaps_to_the_next_local_multiple() {
    let file = kernel_file(KERNEL);
    let mut reducer = GeometryReducer::new(file.path()).unwrap();

    let mut seen = Vec::new();
    let found = reducer
        .reduce(|path: &Path| {
            let source = fs::read_to_string(path).unwrap();
            let current = geometry::parse_header(&source).unwrap();
            seen.push(current.global);
            current.global[0] >= 16
        })
        .unwrap()
        .expect("geometry found");

    assert_eq!(found.global, [16, 1, 1]);
    assert_eq!(found.local, [8, 1, 1]);
    assert_eq!(seen, vec![[8, 1, 1], [16, 1, 1]]);
}

#[test]
fn probed_geometries_stay_bounded_and_aligned() {
    let file = kernel_file("// s -g 8,4,1 -l 2,4,1\nint body;\n");
    let mut reducer = GeometryReducer::new(file.path()).unwrap();
    let original = reducer.original().clone();

    reducer
        .reduce(|path: &Path| {
            let source = fs::read_to_string(path).unwrap();
            let current = geometry::parse_header(&source).unwrap();
            assert!(current.is_aligned());
            for axis in 0..3 {
                assert!(current.global[axis] <= original.global[axis]);
            }
            false
        })
        .unwrap();
}

#[test]
fn kernel_body_survives_every_rewrite() {
    let file = kernel_file(KERNEL);
    let mut reducer = GeometryReducer::new(file.path()).unwrap();
    let body = KERNEL.splitn(2, '\n').nth(1).unwrap();

    let found = reducer
        .reduce(|path: &Path| {
            let source = fs::read_to_string(path).unwrap();
            assert!(source.ends_with(body));
            let current = geometry::parse_header(&source).unwrap();
            current.global[0] >= 16
        })
        .unwrap()
        .expect("geometry found");

    // The file is left at the reduced geometry with the body intact.
    let reduced = fs::read_to_string(file.path()).unwrap();
    assert_eq!(reduced, format!("{}{}", found.header_line(), body));
    assert_eq!(found.meta, " seed42");
}
