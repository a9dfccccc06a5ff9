//! Qualified-name normalization between source and JVM renderings
//!
//! The same type is spelled differently depending on who produced the name:
//! Kotlin caches and source-level tooling use the dotted form `a.b.C.D`,
//! while JVM-facing tooling uses the binary form `a.b.C$D` for nested
//! classes. Everything stored in the index is canonicalized to the dotted
//! form; the binary rendering is derived on demand when talking to
//! JVM-facing collaborators.

use std::fmt;

/// A fully qualified type name, canonically rendered in dotted form.
///
/// Ordering and equality follow the dotted rendering, so a `BTreeSet` of
/// qualified names is deterministic regardless of which rendering produced
/// each element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName(String);

impl QualifiedName {
    /// Build a name from the dotted rendering (`a.b.C.D`).
    pub fn from_dotted(name: impl Into<String>) -> Self {
        QualifiedName(name.into())
    }

    /// Build a name from the binary rendering (`a.b.C$D`),
    /// canonicalizing it to dotted form.
    pub fn from_binary(name: &str) -> Self {
        QualifiedName(binary_to_dotted(name))
    }

    /// The canonical dotted rendering.
    pub fn as_dotted(&self) -> &str {
        &self.0
    }

    /// The JVM binary rendering, reconstructed heuristically.
    ///
    /// # Examples
    /// ```
    /// use refindex::names::QualifiedName;
    ///
    /// let name = QualifiedName::from_dotted("com.acme.Outer.Inner");
    /// assert_eq!(name.binary(), "com.acme.Outer$Inner");
    /// ```
    pub fn binary(&self) -> String {
        dotted_to_binary(&self.0)
    }

    /// The last path segment, i.e. the simple class name.
    pub fn short_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Convert the binary rendering to the dotted one.
///
/// Total and lossless in this direction: every `$` is a nesting separator.
///
/// # Examples
/// ```
/// use refindex::names::binary_to_dotted;
///
/// assert_eq!(binary_to_dotted("a.b.C$D"), "a.b.C.D");
/// assert_eq!(binary_to_dotted("a.b.C"), "a.b.C");
/// ```
pub fn binary_to_dotted(binary: &str) -> String {
    binary.replace('$', ".")
}

/// Convert the dotted rendering to the binary one.
///
/// The package/class boundary is not recorded in the dotted form, so it is
/// guessed: the first segment starting with an uppercase letter begins the
/// class chain, and every separator after it becomes `$`. Lowercase class
/// names or uppercase package segments defeat the guess; callers must not
/// rely on this rendering for such names.
///
/// # Examples
/// ```
/// use refindex::names::dotted_to_binary;
///
/// assert_eq!(dotted_to_binary("a.b.C.D"), "a.b.C$D");
/// assert_eq!(dotted_to_binary("a.b.C"), "a.b.C");
/// assert_eq!(dotted_to_binary("lowercase.only"), "lowercase.only");
/// ```
pub fn dotted_to_binary(dotted: &str) -> String {
    let mut chain_start = None;
    let mut offset = 0;
    for segment in dotted.split('.') {
        if segment.chars().next().is_some_and(|c| c.is_uppercase()) {
            chain_start = Some(offset);
            break;
        }
        offset += segment.len() + 1;
    }
    match chain_start {
        // No uppercase segment anywhere: nothing to guess, return as-is.
        None => dotted.to_string(),
        Some(start) => {
            let (package, chain) = dotted.split_at(start);
            format!("{}{}", package, chain.replace('.', "$"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_to_dotted_nested() {
        assert_eq!(binary_to_dotted("a.b.C$D$E"), "a.b.C.D.E");
    }

    #[test]
    fn test_binary_to_dotted_top_level() {
        assert_eq!(binary_to_dotted("a.b.C"), "a.b.C");
    }

    #[test]
    fn test_dotted_to_binary_nested() {
        assert_eq!(dotted_to_binary("a.b.C.D"), "a.b.C$D");
        assert_eq!(dotted_to_binary("a.b.C.D.E"), "a.b.C$D$E");
    }

    #[test]
    fn test_dotted_to_binary_top_level_class() {
        // Exactly one uppercase segment: no nesting, no dollar signs.
        assert_eq!(dotted_to_binary("a.b.C"), "a.b.C");
    }

    #[test]
    fn test_dotted_to_binary_no_package() {
        assert_eq!(dotted_to_binary("Outer.Inner"), "Outer$Inner");
    }

    #[test]
    fn test_dotted_to_binary_no_uppercase() {
        // The heuristic refuses to guess: the name comes back unchanged.
        assert_eq!(dotted_to_binary("lowercase.class"), "lowercase.class");
        assert_eq!(dotted_to_binary(""), "");
    }

    #[test]
    fn test_round_trip_through_binary() {
        let name = QualifiedName::from_binary("com.acme.Outer$Inner");
        assert_eq!(name.as_dotted(), "com.acme.Outer.Inner");
        assert_eq!(name.binary(), "com.acme.Outer$Inner");
    }

    #[test]
    fn test_round_trip_for_conventional_binary_names() {
        for binary in ["a.b.C$D", "p.Outer$Mid$Inner", "Top$Nested", "x.y.z.Klass$A$B"] {
            assert_eq!(dotted_to_binary(&binary_to_dotted(binary)), binary);
        }
    }

    #[test]
    fn test_short_name() {
        assert_eq!(QualifiedName::from_dotted("a.b.C.D").short_name(), "D");
        assert_eq!(QualifiedName::from_dotted("C").short_name(), "C");
    }

    #[test]
    fn test_ordering_is_dotted() {
        let a = QualifiedName::from_binary("p.A$B");
        let b = QualifiedName::from_dotted("p.A.B");
        assert_eq!(a, b);
    }
}
