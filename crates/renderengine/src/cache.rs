use std::collections::BTreeMap;
use std::ops::Deref;
use std::rc::Rc;
use std::time::Instant;

use glam::Mat4;

use crate::description::CompositionDescription;
use crate::gpu::Gpu;
use crate::key::{compute_key, StateKey};
use crate::program::Program;
use crate::synth::synthesize;

/// Shared reference to a cached [`Program`].
///
/// Clones point at the same program; [`ProgramHandle::ptr_eq`] checks that.
#[derive(Clone, Debug)]
pub struct ProgramHandle(Rc<Program>);

impl ProgramHandle {
    fn from_program(program: Program) -> Self {
        Self(Rc::new(program))
    }

    pub fn ptr_eq(&self, other: &ProgramHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for ProgramHandle {
    type Target = Program;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Programs keyed by [`StateKey`], generated at most once per key.
///
/// Entries are never evicted; invalid programs stay cached so a broken variant
/// is not recompiled on every draw. Not thread safe: the cache belongs to the
/// thread that owns the GPU context.
#[derive(Debug, Default)]
pub struct ProgramCache {
    entries: BTreeMap<StateKey, ProgramHandle>,
    generated: usize,
}

impl ProgramCache {
    /// Builds a cache and primes it with every common variant.
    pub fn new<G: Gpu + ?Sized>(gpu: &mut G) -> Self {
        let mut cache = Self::unprimed();
        cache.prime(gpu);
        cache
    }

    pub fn unprimed() -> Self {
        Self::default()
    }

    /// Generates every key in [`StateKey::primed`] that is not cached yet and
    /// returns how many programs were generated. Invalid variants do not stop
    /// priming.
    pub fn prime<G: Gpu + ?Sized>(&mut self, gpu: &mut G) -> usize {
        let started = Instant::now();
        let before = self.generated;
        for key in StateKey::primed() {
            self.get_by_key(gpu, key);
        }
        let count = self.generated - before;
        let invalid = self.entries.values().filter(|p| !p.is_valid()).count();
        tracing::info!(
            programs = count,
            invalid,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "shader cache primed"
        );
        count
    }

    pub fn get<G: Gpu + ?Sized>(
        &mut self,
        gpu: &mut G,
        description: &CompositionDescription,
    ) -> ProgramHandle {
        self.get_by_key(gpu, compute_key(description))
    }

    pub fn get_by_key<G: Gpu + ?Sized>(&mut self, gpu: &mut G, key: StateKey) -> ProgramHandle {
        if let Some(handle) = self.entries.get(&key) {
            return handle.clone();
        }
        let started = Instant::now();
        let program = Program::new(gpu, key, &synthesize(key));
        let handle = ProgramHandle::from_program(program);
        self.entries.insert(key, handle.clone());
        self.generated += 1;
        tracing::trace!(
            key = %key,
            valid = handle.is_valid(),
            elapsed_us = started.elapsed().as_micros() as u64,
            cached = self.entries.len(),
            "generated program"
        );
        handle
    }

    /// Resolves the program for `description`, binds it and uploads its
    /// uniforms. Returns `false` without touching the GPU when the program is
    /// invalid.
    pub fn use_program<G: Gpu + ?Sized>(
        &mut self,
        gpu: &mut G,
        description: &CompositionDescription,
        projection: &Mat4,
    ) -> bool {
        let program = self.get(gpu, description);
        if !program.is_valid() {
            return false;
        }
        program.use_program(gpu);
        program.set_uniforms(gpu, description, projection);
        true
    }

    pub fn contains(&self, key: StateKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of programs synthesized and compiled over the cache's lifetime.
    pub fn generated(&self) -> usize {
        self.generated
    }

    pub fn iter(&self) -> impl Iterator<Item = (StateKey, &ProgramHandle)> {
        self.entries.iter().map(|(key, handle)| (*key, handle))
    }

    /// Deletes every cached program. The cache is empty afterwards.
    pub fn release<G: Gpu + ?Sized>(&mut self, gpu: &mut G) {
        for (_, handle) in std::mem::take(&mut self.entries) {
            handle.release(gpu);
        }
    }
}
