//! Specialization cache.
//!
//! Keyed on the full requested configuration (kernel identity, effective
//! debug mode, constexpr bindings). Two keys differing only in the debug
//! mode are always distinct entries, even when both specializations happen
//! to emit identical ops; cache identity is the requested configuration,
//! never the output.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use serde::Serialize;

use crate::compile::CompilerError;
use crate::emit::CompiledArtifact;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SpecKey {
    pub kernel: String,
    pub debug: bool,
    pub constexpr: BTreeMap<String, i64>,
}

impl SpecKey {
    pub fn fingerprint(&self) -> u128 {
        crate::fingerprint::spec_fingerprint(self)
    }

    pub fn fingerprint_hex(&self) -> String {
        format!("{:032x}", self.fingerprint())
    }
}

enum Slot {
    Ready(Arc<CompiledArtifact>),
    InFlight(Arc<InFlight>),
}

struct InFlight {
    done: Mutex<Option<Result<Arc<CompiledArtifact>, CompilerError>>>,
    cv: Condvar,
}

/// Per-key coalescing artifact cache.
///
/// At most one compile runs per distinct key; concurrent requests for the
/// same key wait on the winner's slot and receive the same artifact (or the
/// same error). Distinct keys never contend beyond the map lock itself.
pub struct SpecCache {
    slots: Mutex<BTreeMap<SpecKey, Slot>>,
    compiles_started: AtomicU64,
}

impl Default for SpecCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            compiles_started: AtomicU64::new(0),
        }
    }

    /// Number of compiles actually started (cache misses). Tests use this to
    /// observe that repeated requests are hits, not recompiles.
    pub fn compiles_started(&self) -> u64 {
        self.compiles_started.load(Ordering::SeqCst)
    }

    pub fn lookup(&self, key: &SpecKey) -> Option<Arc<CompiledArtifact>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get(key) {
            Some(Slot::Ready(artifact)) => Some(Arc::clone(artifact)),
            _ => None,
        }
    }

    /// Returns the artifact for `key`, invoking `compile` at most once per
    /// distinct key across all threads.
    ///
    /// A failed compile is delivered to every coalesced waiter and leaves no
    /// entry behind, so a later request with the same key may retry.
    ///
    /// `compile` runs with no cache locks held; it may re-enter the cache
    /// for other keys (the driver does, for callees). Re-entering for the
    /// same key would deadlock; the driver's cycle detection rules that out.
    pub fn get_or_compile<F>(
        &self,
        key: &SpecKey,
        compile: F,
    ) -> Result<Arc<CompiledArtifact>, CompilerError>
    where
        F: FnOnce() -> Result<CompiledArtifact, CompilerError>,
    {
        let inflight = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.get(key) {
                Some(Slot::Ready(artifact)) => return Ok(Arc::clone(artifact)),
                Some(Slot::InFlight(inflight)) => Some(Arc::clone(inflight)),
                None => {
                    slots.insert(
                        key.clone(),
                        Slot::InFlight(Arc::new(InFlight {
                            done: Mutex::new(None),
                            cv: Condvar::new(),
                        })),
                    );
                    self.compiles_started.fetch_add(1, Ordering::SeqCst);
                    None
                }
            }
        };

        if let Some(inflight) = inflight {
            let mut done = inflight.done.lock().unwrap_or_else(|e| e.into_inner());
            while done.is_none() {
                done = inflight
                    .cv
                    .wait(done)
                    .unwrap_or_else(|e| e.into_inner());
            }
            return done.as_ref().cloned().unwrap_or_else(|| {
                Err(CompilerError::new(
                    crate::compile::CompileErrorKind::Internal,
                    format!("in-flight slot for {:?} signaled without a result", key.kernel),
                ))
            });
        }

        let result = compile().map(Arc::new);

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.remove(key);
        if let Ok(artifact) = &result {
            slots.insert(key.clone(), Slot::Ready(Arc::clone(artifact)));
        }
        drop(slots);

        if let Some(Slot::InFlight(inflight)) = slot {
            let mut done = inflight.done.lock().unwrap_or_else(|e| e.into_inner());
            *done = Some(result.clone());
            inflight.cv.notify_all();
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::{SpecCache, SpecKey};
    use crate::compile::{CompileErrorKind, CompilerError};
    use crate::emit::CompiledArtifact;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Barrier};

    fn key(kernel: &str, debug: bool) -> SpecKey {
        SpecKey {
            kernel: kernel.to_string(),
            debug,
            constexpr: BTreeMap::new(),
        }
    }

    fn artifact(key: &SpecKey) -> CompiledArtifact {
        CompiledArtifact {
            key: key.clone(),
            fingerprint: key.fingerprint_hex(),
            params: Vec::new(),
            reg_count: 0,
            ops: Vec::new(),
            callees: Vec::new(),
            digest: String::new(),
        }
    }

    #[test]
    fn same_key_compiles_once_and_shares_the_artifact() {
        let cache = SpecCache::new();
        let k = key("main.k", true);
        let a = cache.get_or_compile(&k, || Ok(artifact(&k))).expect("compile ok");
        let b = cache.get_or_compile(&k, || panic!("must not recompile")).expect("hit");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.compiles_started(), 1);
    }

    #[test]
    fn keys_differing_only_in_debug_are_distinct_entries() {
        let cache = SpecCache::new();
        let on = key("main.k", true);
        let off = key("main.k", false);
        let a = cache.get_or_compile(&on, || Ok(artifact(&on))).expect("compile ok");
        let b = cache.get_or_compile(&off, || Ok(artifact(&off))).expect("compile ok");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.compiles_started(), 2);
    }

    #[test]
    fn concurrent_requests_for_one_key_coalesce() {
        let cache = Arc::new(SpecCache::new());
        let k = key("main.k", true);
        let started = Arc::new(AtomicU64::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let k = k.clone();
                let started = Arc::clone(&started);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compile(&k, || {
                            started.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(artifact(&k))
                        })
                        .expect("compile ok")
                })
            })
            .collect();

        let artifacts: Vec<_> = handles.into_iter().map(|h| h.join().expect("join")).collect();
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(cache.compiles_started(), 1);
        for a in &artifacts[1..] {
            assert!(Arc::ptr_eq(&artifacts[0], a));
        }
    }

    #[test]
    fn failure_reaches_waiters_and_does_not_poison_the_key() {
        let cache = Arc::new(SpecCache::new());
        let k = key("main.k", true);
        let barrier = Arc::new(Barrier::new(2));

        let winner = {
            let cache = Arc::clone(&cache);
            let k = k.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                cache.get_or_compile(&k, || {
                    barrier.wait();
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    Err(CompilerError::new(
                        CompileErrorKind::StaticAssertViolation,
                        "static assertion failed: BLOCK != 128".to_string(),
                    ))
                })
            })
        };

        barrier.wait();
        let waiter = cache.get_or_compile(&k, || panic!("waiter must coalesce, not compile"));

        let winner = winner.join().expect("join");
        for res in [winner, waiter] {
            let err = res.expect_err("both observe the failure");
            assert_eq!(err.kind, CompileErrorKind::StaticAssertViolation);
        }

        // The failed key holds no entry; a retry compiles cleanly.
        let ok = cache.get_or_compile(&k, || Ok(artifact(&k))).expect("retry ok");
        assert_eq!(ok.key, k);
    }
}
