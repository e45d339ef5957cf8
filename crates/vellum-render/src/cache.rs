//! Concurrent compilation cache.
//!
//! [`TemplateCache`] guarantees at-most-one build per cache identity: the
//! first caller to miss claims the slot and compiles; concurrent callers for
//! the same identity block on a waiter and receive the same shared unit (or
//! the same error) without compiling again. A failed build releases the slot
//! so a later caller can retry; errors are never cached.
//!
//! Identity is [`CacheKey`]: a content fingerprint plus the declared model
//! type, so the same source bound to different model types compiles twice.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::compile::{compile, CompiledTemplate};
use crate::error::{CompileError, TemplateError};
use crate::schema::ModelRegistry;

/// Model-type component used when a template declares no `@inherits`.
const DYNAMIC: &str = "dynamic";

/// Cache identity: content fingerprint plus declared model type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    fingerprint: String,
    model_type: String,
}

impl CacheKey {
    /// Derives the key from raw template source.
    ///
    /// The fingerprint is a SHA-256 over the full source; the model type
    /// comes from a cheap line scan for the `@inherits` directive, with no
    /// full parse.
    pub fn for_source(source: &str) -> CacheKey {
        let digest = Sha256::digest(source.as_bytes());
        CacheKey {
            fingerprint: hex::encode(digest),
            model_type: vellum_parser::scan_model_type(source)
                .unwrap_or_else(|| DYNAMIC.to_string()),
        }
    }

    /// Hex SHA-256 of the template source.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Declared model type, or `"dynamic"` without an `@inherits`.
    pub fn model_type(&self) -> &str {
        &self.model_type
    }
}

enum Slot {
    Ready(Arc<CompiledTemplate>),
    Building(Arc<BuildWaiter>),
}

/// Rendezvous for callers that lost the claim race.
struct BuildWaiter {
    outcome: Mutex<Option<Result<Arc<CompiledTemplate>, CompileError>>>,
    done: Condvar,
}

impl BuildWaiter {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn publish(&self, outcome: Result<Arc<CompiledTemplate>, CompileError>) {
        *lock(&self.outcome) = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<Arc<CompiledTemplate>, CompileError> {
        let mut guard = lock(&self.outcome);
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            guard = self
                .done
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

// A panicking builder publishes nothing, but it also cannot poison this
// mutex from outside a lock; recovery here keeps waiters deadlock-free if a
// publish itself panics mid-notify.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Thread-safe store of compiled units, shared via `Arc`.
///
/// Steady state is lock-free-ish: a hit clones one `Arc` under a sharded
/// read lock. The schema registry is fixed at construction so every cached
/// unit was validated against the same model definitions.
pub struct TemplateCache {
    units: DashMap<CacheKey, Slot>,
    models: ModelRegistry,
}

impl TemplateCache {
    pub fn new(models: ModelRegistry) -> Self {
        Self {
            units: DashMap::new(),
            models,
        }
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Number of resident slots, in-flight builds included.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Returns the cached unit for `source`, compiling it on first sight.
    ///
    /// # Errors
    ///
    /// The build's [`CompileError`], delivered to the builder and every
    /// waiter alike. The slot is released on error.
    pub fn get_or_compile(&self, source: &str) -> Result<Arc<CompiledTemplate>, CompileError> {
        let key = CacheKey::for_source(source);
        self.get_or_build(key, || compile(source, &self.models))
    }

    /// Compiles and renders in one call, reusing the cached unit on a hit.
    ///
    /// # Errors
    ///
    /// [`TemplateError`] wrapping either the compile failure or this
    /// render's evaluation failure.
    pub fn render<T: Serialize + ?Sized>(
        &self,
        source: &str,
        model: &T,
    ) -> Result<String, TemplateError> {
        let unit = self.get_or_compile(source)?;
        Ok(unit.render(model)?)
    }

    /// The claim-or-wait protocol behind [`get_or_compile`](Self::get_or_compile).
    ///
    /// `build` runs outside every map lock, so slow builds never block hits
    /// on other keys.
    pub fn get_or_build<F>(
        &self,
        key: CacheKey,
        build: F,
    ) -> Result<Arc<CompiledTemplate>, CompileError>
    where
        F: FnOnce() -> Result<CompiledTemplate, CompileError>,
    {
        if let Some(slot) = self.units.get(&key) {
            match slot.value() {
                Slot::Ready(unit) => {
                    debug!(fingerprint = %key.fingerprint, "cache hit");
                    return Ok(Arc::clone(unit));
                }
                Slot::Building(waiter) => {
                    let waiter = Arc::clone(waiter);
                    // Release the shard before blocking.
                    drop(slot);
                    debug!(fingerprint = %key.fingerprint, "joining in-flight build");
                    return waiter.wait();
                }
            }
        }

        let waiter = match self.units.entry(key.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Ready(unit) => return Ok(Arc::clone(unit)),
                Slot::Building(waiter) => {
                    let waiter = Arc::clone(waiter);
                    drop(entry);
                    return waiter.wait();
                }
            },
            Entry::Vacant(entry) => {
                let waiter = Arc::new(BuildWaiter::new());
                entry.insert(Slot::Building(Arc::clone(&waiter)));
                waiter
            }
        };

        debug!(
            fingerprint = %key.fingerprint,
            model_type = %key.model_type,
            "compiling template"
        );
        let outcome = build().map(Arc::new);
        match &outcome {
            Ok(unit) => {
                self.units.insert(key, Slot::Ready(Arc::clone(unit)));
            }
            Err(error) => {
                debug!(fingerprint = %key.fingerprint, %error, "build failed, slot released");
                self.units.remove(&key);
            }
        }
        waiter.publish(outcome.clone());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ModelSchema, Shape};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn cache() -> TemplateCache {
        TemplateCache::new(ModelRegistry::new().register(
            ModelSchema::record("Person")
                .field("Name", Shape::Scalar)
                .field("Ids", Shape::list(Shape::Scalar)),
        ))
    }

    mod keys {
        use super::*;

        #[test]
        fn same_source_same_key() {
            let source = "@inherits Base<Person>\nHello @Model.Name";
            assert_eq!(CacheKey::for_source(source), CacheKey::for_source(source));
        }

        #[test]
        fn any_content_change_changes_the_key() {
            let a = CacheKey::for_source("Hello @Model.Name");
            let b = CacheKey::for_source("Hello @Model.Name ");
            assert_ne!(a.fingerprint(), b.fingerprint());
        }

        #[test]
        fn model_type_is_part_of_the_key() {
            let typed = CacheKey::for_source("@inherits Base<Person>\nhi");
            assert_eq!(typed.model_type(), "Person");
            let dynamic = CacheKey::for_source("hi");
            assert_eq!(dynamic.model_type(), "dynamic");
        }
    }

    #[test]
    fn hit_returns_the_same_unit() {
        let cache = cache();
        let source = "@inherits Base<Person>\nHello @Model.Name";
        let first = cache.get_or_compile(source).unwrap();
        let second = cache.get_or_compile(source).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_sources_get_distinct_slots() {
        let cache = cache();
        cache.get_or_compile("one").unwrap();
        cache.get_or_compile("two").unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn cached_render_matches_direct_render() {
        let cache = cache();
        let source = "@inherits Base<Person>\n@foreach (i in Model.Ids) { @i }";
        let model = json!({ "Ids": [1, 2, 3, 4] });
        assert_eq!(cache.render(source, &model).unwrap(), "1234");
        assert_eq!(cache.render(source, &model).unwrap(), "1234");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_build_releases_the_slot() {
        let cache = cache();
        let bad = "@foreach (i in Model.Ids) { @i";
        assert!(cache.get_or_compile(bad).is_err());
        assert!(cache.is_empty());
        // The next caller gets a fresh build, not a cached error.
        assert!(cache.get_or_compile(bad).is_err());
    }

    #[test]
    fn hit_skips_the_builder() {
        let cache = cache();
        let key = CacheKey::for_source("x");
        let builds = AtomicUsize::new(0);
        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            compile("x", cache.models())
        };
        cache.get_or_build(key.clone(), build).unwrap();
        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            compile("x", cache.models())
        };
        cache.get_or_build(key, build).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_misses_build_exactly_once() {
        let cache = Arc::new(cache());
        let builds = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));
        let key = CacheKey::for_source("@inherits Base<Person>\n@Model.Name");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                let barrier = Arc::clone(&barrier);
                let key = key.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_build(key, || {
                        builds.fetch_add(1, Ordering::SeqCst);
                        compile("@inherits Base<Person>\n@Model.Name", cache.models())
                    })
                })
            })
            .collect();

        let units: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        for unit in &units[1..] {
            assert!(Arc::ptr_eq(&units[0], unit));
        }
    }

    #[test]
    fn concurrent_misses_share_the_failure() {
        let cache = Arc::new(cache());
        let barrier = Arc::new(Barrier::new(8));
        let bad = "@if (Model.Name) { never closed";

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_compile(bad)
                })
            })
            .collect();

        for handle in handles {
            assert!(matches!(
                handle.join().unwrap(),
                Err(CompileError::UnbalancedControl { .. })
            ));
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_renders_of_one_unit_are_independent() {
        let cache = Arc::new(cache());
        let source = "@inherits Base<Person>\nHello @Model.Name!";
        cache.get_or_compile(source).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let name = format!("t{n}");
                    for _ in 0..100 {
                        let out = cache.render(source, &json!({ "Name": &name })).unwrap();
                        assert_eq!(out, format!("Hello {name}!"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
