//! Fallback rewriting of pre-formatted backtrace text.
//!
//! Some native facilities hand back whole display lines instead of
//! structured fields — glibc's `backtrace_symbols(3)` produces
//! `module(mangled+0xoffset) [0xaddress]`. This module splices a readable
//! name into such a line. Both delimiters must be present before anything is
//! extracted; a `(` with no `+` after it leaves the line untouched, which is
//! the graceful outcome for lines that only carry an address.

use retrace_types::UNKNOWN_FUNCTION;

use crate::demangle;

/// Rewrite one `backtrace_symbols`-style line with the symbol demangled.
///
/// `module(mangled+0x42) [0x1234]` becomes `module: name (+0x42) [0x1234]`;
/// a symbol that cannot be demangled is replaced by the unknown-function
/// marker rather than shown mangled. Lines missing either delimiter are
/// returned unchanged.
pub fn rewrite_line(line: &str) -> String {
    let Some(open) = line.find('(') else {
        return line.to_owned();
    };
    let Some(plus) = line[open + 1..].find('+').map(|i| open + 1 + i) else {
        return line.to_owned();
    };

    let name = demangle::readable(&line[open + 1..plus])
        .unwrap_or_else(|| UNKNOWN_FUNCTION.to_owned());
    format!("{}: {} ({}", &line[..open], name, &line[plus..])
}
