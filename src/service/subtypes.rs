//! Cross-language subtype resolution
//!
//! A class hierarchy can zigzag between languages: a Kotlin class gets
//! subclassed by a Java class whose own subtypes are Kotlin again. Neither
//! single-language index is transitively closed over the other, so the
//! closure keeps a frontier and asks every provider at each step,
//! canonicalizing discovered names before re-querying.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::error::Result;
use crate::index::IndexStorage;
use crate::names::QualifiedName;

/// Which language's index a provider answers from.
///
/// Closed set: providers are picked and interpreted by this tag, never by
/// downcasting a provider to a concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Java,
    Kotlin,
}

/// One language's direct-subtypes capability.
pub trait SubtypeProvider {
    fn language(&self) -> Language;

    /// Direct subtypes of a class, rendered however this provider's own
    /// index renders names. The caller normalizes results according to the
    /// provider's language tag.
    fn direct_subtypes_of(&self, name: &QualifiedName) -> Result<Vec<String>>;
}

/// Provider over the unified Kotlin-side subtypes store.
pub struct KotlinProvider<'a> {
    storage: &'a IndexStorage,
}

impl<'a> KotlinProvider<'a> {
    pub fn new(storage: &'a IndexStorage) -> Self {
        Self { storage }
    }
}

impl SubtypeProvider for KotlinProvider<'_> {
    fn language(&self) -> Language {
        Language::Kotlin
    }

    fn direct_subtypes_of(&self, name: &QualifiedName) -> Result<Vec<String>> {
        let values = self.storage.direct_subtypes(name.as_dotted())?;
        Ok(values.into_iter().collect())
    }
}

/// Normalize one provider-rendered name into canonical dotted form.
fn canonical(language: Language, raw: String) -> QualifiedName {
    match language {
        Language::Kotlin => QualifiedName::from_dotted(raw),
        Language::Java => QualifiedName::from_binary(&raw),
    }
}

/// Walk the cross-language subtype relation from `seed`.
///
/// `deep=false` stops after expanding the seed itself. The seed joins the
/// result up front when the search originates in a library (library-origin
/// declarations are reported together with their subtypes), or later if a
/// cycle leads back to it.
pub(crate) fn collect_subtypes(
    providers: &[&dyn SubtypeProvider],
    seed: &QualifiedName,
    deep: bool,
    in_library_scope: bool,
) -> Result<BTreeSet<QualifiedName>> {
    let mut result = BTreeSet::new();
    if in_library_scope {
        result.insert(seed.clone());
    }
    let mut frontier = VecDeque::from([seed.clone()]);
    let mut expanded: HashSet<QualifiedName> = HashSet::new();

    while let Some(current) = frontier.pop_front() {
        if !expanded.insert(current.clone()) {
            continue;
        }
        for provider in providers {
            for raw in provider.direct_subtypes_of(&current)? {
                let subtype = canonical(provider.language(), raw);
                if result.insert(subtype.clone()) && deep {
                    frontier.push_back(subtype);
                }
            }
        }
        if !deep {
            break;
        }
    }
    Ok(result)
}
