//! Dirty-scope bookkeeping
//!
//! Tracks which modules have sources newer than their compiled output, plus
//! which modules the current build is compiling right now. Queries about
//! symbols owned by either kind of module cannot be answered from the index.
//! A generation counter stamps every state change so the up-to-date fast
//! path can tell "nothing happened since the build started" apart from
//! "something got dirty in between".
//!
//! Plain data, no locking here: the service serializes access through its
//! own lock.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct DirtyScope {
    /// Modules whose sources changed since their last successful build.
    dirty: HashSet<String>,
    /// Modules the in-flight build session is compiling.
    compiling: HashSet<String>,
    /// Every module the index knows about.
    known: HashSet<String>,
    /// Bumped on every state transition.
    generation: u64,
    /// Generation recorded when the current build session started.
    build_start_generation: Option<u64>,
    /// Set once an authoritative build has populated the scope.
    initialized: bool,
}

impl DirtyScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source change arrived for a module.
    ///
    /// Bumps the generation even when the module is already dirty: a repeat
    /// change during a build window must still defeat the up-to-date fast
    /// path.
    pub fn mark_dirty(&mut self, module: &str) {
        self.dirty.insert(module.to_string());
        self.generation += 1;
    }

    /// A build session began; everything it will compile is suspect until
    /// the session ends.
    pub fn build_started<I, S>(&mut self, compiling: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for module in compiling {
            let module = module.into();
            self.dirty.insert(module.clone());
            self.compiling.insert(module);
        }
        self.generation += 1;
        self.build_start_generation = Some(self.generation);
    }

    /// A build session ended; modules it actually rebuilt are clean now.
    pub fn build_finished(&mut self, rebuilt: &HashSet<String>) {
        for module in rebuilt {
            self.dirty.remove(module);
            self.known.insert(module.clone());
        }
        self.generation += 1;
        self.build_start_generation = None;
    }

    /// The last compilation of an overlapping set finished: nothing is being
    /// compiled anymore.
    pub fn clear_compiling(&mut self) {
        self.compiling.clear();
    }

    /// The first completed build brings the whole project current: the
    /// scope comes live with every module clean. Must run inside the finish
    /// event, while the caller still holds its lock; marks landing after the
    /// event stick.
    pub fn initialize(&mut self) {
        self.dirty.clear();
        self.compiling.clear();
        self.generation += 1;
        self.initialized = true;
    }

    /// Later ingests may see modules that never appeared in a rebuilt set;
    /// record them without touching dirty bits.
    pub fn register_modules<I, S>(&mut self, modules: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known.extend(modules.into_iter().map(Into::into));
    }

    /// An up-to-date check confirmed all compiled output is current.
    pub fn all_clean(&mut self) {
        self.dirty.clear();
        self.compiling.clear();
        self.generation += 1;
        self.build_start_generation = None;
    }

    /// Whether a query about this module's symbols can trust the index.
    pub fn is_safe(&self, module: &str) -> bool {
        !self.dirty.contains(module) && !self.compiling.contains(module)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when nothing changed since the current build session started.
    /// Meaningless outside a build session.
    pub fn unchanged_since_build_start(&self) -> bool {
        self.build_start_generation == Some(self.generation)
    }
}
