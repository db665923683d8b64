//! Deny-listed diagnostic substrings.
//!
//! Each table entry pairs an output needle with the defect class it
//! signals, so a criterion can be tightened by extending a table instead
//! of touching pipeline control flow. Needles are matched as plain
//! substrings of the merged tool output.

/// One deny-listed output substring and what it means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticRule {
    pub needle: &'static str,
    pub meaning: &'static str,
}

const fn rule(needle: &'static str, meaning: &'static str) -> DiagnosticRule {
    DiagnosticRule { needle, meaning }
}

/// Front-end warnings that make a kernel too ambiguous to judge: the
/// differential comparison would be blamed on the compiler when the
/// kernel itself invokes undefined or extension-dependent behavior.
pub const COMPILER_DENYLIST: &[DiagnosticRule] = &[
    rule(
        "warning: empty struct is a GNU extension",
        "GNU extension",
    ),
    rule(
        "warning: use of GNU empty initializer extension",
        "GNU extension",
    ),
    rule(
        "warning: incompatible pointer to integer conversion",
        "pointer/integer conversion",
    ),
    rule(
        "warning: incompatible integer to pointer conversion",
        "pointer/integer conversion",
    ),
    rule(
        "warning: incompatible pointer types initializing",
        "pointer conversion",
    ),
    rule(
        "may be uninitialized when used here [-Wconditional-uninitialized]",
        "uninitialized value",
    ),
    rule(
        "warning: use of GNU ?: conditional expression extension, omitting middle operand",
        "GNU extension",
    ),
    rule(
        "warning: control may reach end of non-void function [-Wreturn-type]",
        "return-type fallthrough",
    ),
    rule(
        "warning: control reaches end of non-void function [-Wreturn-type]",
        "return-type fallthrough",
    ),
    rule(
        "warning: zero size arrays are an extension [-Wzero-length-array]",
        "zero-size array",
    ),
    rule("excess elements in ", "aggregate initializer overflow"),
    rule(
        "warning: address of stack memory associated with local variable",
        "dangling stack address",
    ),
    rule(
        " declaration specifier [-Wduplicate-decl-specifier]",
        "duplicate specifier",
    ),
];

/// Analyzer findings that disqualify a kernel: value flow the front end
/// cannot see but the analyzer proves unsound.
pub const ANALYZER_DENYLIST: &[DiagnosticRule] = &[
    rule(
        "warning: Assigned value is garbage or undefined",
        "garbage or undefined value",
    ),
    rule("is a garbage value", "garbage or undefined value"),
    rule(
        "warning: Dereference of null pointer",
        "null dereference",
    ),
    rule(
        "results in a dereference of a null pointer",
        "null dereference",
    ),
];

/// Named compiler regression tracked by the `error-vector` criterion.
pub const VECTOR_SIZE_ERROR: DiagnosticRule = rule(
    "error: vector size not an integral multiple of component size",
    "vector size regression",
);

/// First rule whose needle occurs in `text`.
pub fn first_match<'a>(text: &str, rules: &'a [DiagnosticRule]) -> Option<&'a DiagnosticRule> {
    rules.iter().find(|rule| text.contains(rule.needle))
}
