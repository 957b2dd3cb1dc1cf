//! Symbol-name demangling.

use rustc_demangle::try_demangle;

/// Convert a possibly-mangled symbol name into its readable form.
///
/// Plain names pass through unchanged (minus rustc's hash disambiguator, if
/// one is attached). A name that carries a mangling prefix but fails to
/// demangle yields `None`: callers substitute an explicit unknown marker, so
/// mangled text never reaches the rendered trace.
pub fn readable(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    match try_demangle(raw) {
        Ok(demangled) => Some(format!("{demangled:#}")),
        Err(_) if looks_mangled(raw) => None,
        Err(_) => Some(strip_rust_hash_suffix(raw).to_owned()),
    }
}

fn looks_mangled(raw: &str) -> bool {
    raw.starts_with("_Z") || raw.starts_with("__Z") || raw.starts_with("_R")
}

/// Drop a trailing `::h<16 hex digits>` disambiguator from an
/// already-demangled name.
pub fn strip_rust_hash_suffix(name: &str) -> &str {
    if let Some(idx) = name.rfind("::h") {
        let suffix = &name[idx + 3..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return &name[..idx];
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demangles_legacy_rust_symbols() {
        let name = readable("_ZN4core3fmt5write17h0123456789abcdefE").unwrap();
        assert_eq!(name, "core::fmt::write");
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(readable("main").as_deref(), Some("main"));
        assert_eq!(readable("pthread_create").as_deref(), Some("pthread_create"));
    }

    #[test]
    fn undemanglable_mangled_names_are_suppressed() {
        assert_eq!(readable("_Znotreallyvalid"), None);
        assert_eq!(readable("_R$$$"), None);
    }

    #[test]
    fn empty_names_are_suppressed() {
        assert_eq!(readable(""), None);
    }

    #[test]
    fn hash_suffix_is_stripped_only_when_it_is_one() {
        assert_eq!(
            strip_rust_hash_suffix("alpha::beta::h0123456789abcdef"),
            "alpha::beta"
        );
        assert_eq!(strip_rust_hash_suffix("alpha::height"), "alpha::height");
        assert_eq!(strip_rust_hash_suffix("plain"), "plain");
    }
}
