//! Dispatch geometry: the global/local work-size triples embedded in a
//! kernel's leading header comment.
//!
//! Header format, bit-exact: `//<meta> -g X,Y,Z -l X,Y,Z\n` as the first
//! line of the file, six base-10 sizes, free-form metadata preserved
//! verbatim.

use std::sync::OnceLock;

use regex::Regex;

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"//(.*) -g ([0-9]+),([0-9]+),([0-9]+) -l ([0-9]+),([0-9]+),([0-9]+)\n")
            .expect("built-in header pattern must compile")
    })
}

/// The pair of work-size triples a kernel is dispatched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchGeometry {
    pub global: [u64; 3],
    pub local: [u64; 3],
    /// Metadata text from the header comment, preserved verbatim.
    pub meta: String,
}

impl DispatchGeometry {
    /// Render the header line, trailing newline included.
    pub fn header_line(&self) -> String {
        format!(
            "//{} -g {},{},{} -l {},{},{}\n",
            self.meta,
            self.global[0],
            self.global[1],
            self.global[2],
            self.local[0],
            self.local[1],
            self.local[2],
        )
    }

    /// Hardware dispatch requirement: every global size is an exact
    /// multiple of the local size on the same axis.
    pub fn is_aligned(&self) -> bool {
        self.global
            .iter()
            .zip(&self.local)
            .all(|(g, l)| *l != 0 && g % l == 0)
    }

    pub fn work_items(&self) -> u64 {
        self.global.iter().product()
    }
}

/// Split a kernel source into its geometry header and the untouched body.
/// `None` when the first line is not a recognizable header.
pub fn split_header(source: &str) -> Option<(DispatchGeometry, &str)> {
    let caps = header_re().captures(source)?;
    let whole = caps.get(0)?;
    if whole.start() != 0 {
        return None;
    }
    let size = |index: usize| caps.get(index)?.as_str().parse::<u64>().ok();
    let geometry = DispatchGeometry {
        global: [size(2)?, size(3)?, size(4)?],
        local: [size(5)?, size(6)?, size(7)?],
        meta: caps.get(1)?.as_str().to_string(),
    };
    Some((geometry, &source[whole.end()..]))
}

/// Header parse without the body split.
pub fn parse_header(source: &str) -> Option<DispatchGeometry> {
    split_header(source).map(|(geometry, _)| geometry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "// seed42 -g 64,1,1 -l 8,1,1\n";

    #[test]
    fn parses_sizes_and_meta() {
        let source = format!("{HEADER}__kernel void k() {{}}\n");
        let (geometry, body) = split_header(&source).unwrap();
        assert_eq!(geometry.global, [64, 1, 1]);
        assert_eq!(geometry.local, [8, 1, 1]);
        assert_eq!(geometry.meta, " seed42");
        assert_eq!(body, "__kernel void k() {}\n");
    }

    #[test]
    fn round_trips_exactly() {
        let (geometry, _) = split_header(HEADER).unwrap();
        assert_eq!(geometry.header_line(), HEADER);
        let reparsed = parse_header(&geometry.header_line()).unwrap();
        assert_eq!(reparsed, geometry);
    }

    #[test]
    fn header_must_lead_the_file() {
        assert!(parse_header("int x;\n// seed -g 1,1,1 -l 1,1,1\n").is_none());
        assert!(parse_header("__kernel void k() {}\n").is_none());
    }

    #[test]
    fn alignment_requires_per_axis_divisibility() {
        let (mut geometry, _) = split_header(HEADER).unwrap();
        assert!(geometry.is_aligned());
        geometry.global[0] = 63;
        assert!(!geometry.is_aligned());
        geometry.global[0] = 64;
        geometry.local[1] = 0;
        assert!(!geometry.is_aligned());
    }

    #[test]
    fn work_items_is_the_global_product() {
        let (geometry, _) = split_header("//x -g 4,2,3 -l 1,1,1\n").unwrap();
        assert_eq!(geometry.work_items(), 24);
    }
}
