//! The call-graph driver: walks from a compilation entry point and
//! specializes every kernel it reaches, threading each caller's resolved
//! effective mode down to its callees and memoizing on the specialization
//! cache.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use slate_contracts::SLATE_MODULE_SCHEMA_VERSION;

use crate::ast::Expr;
use crate::cache::{SpecCache, SpecKey};
use crate::compile::{CompileErrorKind, CompileOptions, CompilerError};
use crate::condeval::ConstEnv;
use crate::debug;
use crate::emit::{self, CompiledArtifact};
use crate::program::Program;

/// The result of one compilation request: the entry specialization plus
/// every transitively reachable callee artifact.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub entry: SpecKey,
    pub artifacts: BTreeMap<SpecKey, Arc<CompiledArtifact>>,
}

impl CompiledModule {
    pub fn entry_artifact(&self) -> &Arc<CompiledArtifact> {
        // The entry key is inserted by construction.
        &self.artifacts[&self.entry]
    }

    pub fn artifact(&self, key: &SpecKey) -> Option<&Arc<CompiledArtifact>> {
        self.artifacts.get(key)
    }

    pub fn to_json(&self) -> Result<Value, CompilerError> {
        let internal = |e: serde_json::Error| {
            CompilerError::new(CompileErrorKind::Internal, format!("serialize module: {e}"))
        };
        let mut artifacts = Vec::with_capacity(self.artifacts.len());
        for artifact in self.artifacts.values() {
            artifacts.push(serde_json::to_value(&**artifact).map_err(internal)?);
        }
        Ok(serde_json::json!({
            "schema_version": SLATE_MODULE_SCHEMA_VERSION,
            "entry": serde_json::to_value(&self.entry).map_err(internal)?,
            "artifacts": artifacts,
        }))
    }
}

/// One compilation session over a parsed program.
///
/// Holds the request-scoped options (global override included, read once at
/// session construction) and the shared specialization cache. Sessions are
/// `Sync`: independent requests may run on worker threads; the cache is the
/// only shared mutable state and coalesces per key.
pub struct CompileSession<'p> {
    program: &'p Program,
    options: CompileOptions,
    cache: SpecCache,
}

impl<'p> CompileSession<'p> {
    pub fn new(program: &'p Program, options: CompileOptions) -> Self {
        Self {
            program,
            options,
            cache: SpecCache::new(),
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn cache(&self) -> &SpecCache {
        &self.cache
    }

    /// Diagnostic query mirroring the resolver step of `specialize`.
    pub fn effective_mode(
        &self,
        kernel: &str,
        caller_mode: Option<bool>,
    ) -> Result<bool, CompilerError> {
        crate::compile::effective_mode(self.program, kernel, caller_mode, &self.options)
    }

    /// Specializes `kernel` under the given call context and constexpr
    /// bindings, recursively specializing every callee under the resolved
    /// mode. Idempotent: a second request with the same resulting key is a
    /// cache hit returning the same artifact handle.
    pub fn specialize(
        &self,
        kernel: &str,
        caller_mode: Option<bool>,
        constexpr: &ConstEnv,
    ) -> Result<Arc<CompiledArtifact>, CompilerError> {
        self.check_call_graph(kernel)?;
        self.specialize_inner(kernel, caller_mode, constexpr)
    }

    /// Compiles `entry` top-level and collects the reachable artifact set.
    pub fn compile_module(
        &self,
        entry: &str,
        constexpr: &ConstEnv,
    ) -> Result<CompiledModule, CompilerError> {
        let entry_artifact = self.specialize(entry, None, constexpr)?;
        let entry_key = entry_artifact.key.clone();

        let mut artifacts = BTreeMap::new();
        let mut stack = vec![entry_key.clone()];
        while let Some(key) = stack.pop() {
            if artifacts.contains_key(&key) {
                continue;
            }
            let artifact = self.cache.lookup(&key).ok_or_else(|| {
                CompilerError::new(
                    CompileErrorKind::Internal,
                    format!(
                        "internal error: reachable specialization of {:?} is not in the cache",
                        key.kernel
                    ),
                )
            })?;
            stack.extend(artifact.callees.iter().cloned());
            artifacts.insert(key, artifact);
        }

        Ok(CompiledModule {
            entry: entry_key,
            artifacts,
        })
    }

    /// Rejects call cycles reachable from `entry` before any cache slot is
    /// taken. The source domain is a DAG; catching cycles here, statically,
    /// means an invalid program fails the same way from every entry point,
    /// and no in-flight slot can ever wait on a slot that transitively waits
    /// back on it.
    fn check_call_graph(&self, entry: &str) -> Result<(), CompilerError> {
        let mut visiting = BTreeSet::new();
        let mut visited = BTreeSet::new();
        self.check_call_graph_from(entry, &mut visiting, &mut visited)
    }

    fn check_call_graph_from<'a>(
        &'a self,
        kernel: &'a str,
        visiting: &mut BTreeSet<&'a str>,
        visited: &mut BTreeSet<&'a str>,
    ) -> Result<(), CompilerError> {
        if visited.contains(kernel) {
            return Ok(());
        }
        if !visiting.insert(kernel) {
            return Err(CompilerError::new(
                CompileErrorKind::Unsupported,
                format!("recursive kernel call detected at {kernel:?}"),
            ));
        }
        // Unknown callees are skipped here; emission reports them with the
        // call site's location.
        if let Some(def) = self.program.kernel(kernel) {
            for callee in call_targets(&def.body) {
                self.check_call_graph_from(callee, visiting, visited)?;
            }
        }
        visiting.remove(kernel);
        visited.insert(kernel);
        Ok(())
    }

    fn specialize_inner(
        &self,
        kernel: &str,
        caller_mode: Option<bool>,
        constexpr: &ConstEnv,
    ) -> Result<Arc<CompiledArtifact>, CompilerError> {
        let def = self.program.kernel(kernel).ok_or_else(|| {
            CompilerError::new(CompileErrorKind::Parse, format!("unknown kernel: {kernel:?}"))
        })?;

        for p in def.constexpr_params() {
            if !constexpr.contains_key(&p.name) {
                return Err(CompilerError::new(
                    CompileErrorKind::Typing,
                    format!("missing constexpr binding {:?} for kernel {kernel:?}", p.name),
                ));
            }
        }
        for name in constexpr.keys() {
            match def.param(name) {
                Some(p) if p.constexpr => {}
                Some(_) => {
                    return Err(CompilerError::new(
                        CompileErrorKind::Typing,
                        format!("param {name:?} of kernel {kernel:?} is not constexpr"),
                    ));
                }
                None => {
                    return Err(CompilerError::new(
                        CompileErrorKind::Typing,
                        format!("unknown constexpr binding {name:?} for kernel {kernel:?}"),
                    ));
                }
            }
        }

        let mode = debug::resolve(
            def.debug,
            caller_mode,
            self.options.global_debug_override,
            self.options.default_debug,
        );
        let key = SpecKey {
            kernel: kernel.to_string(),
            debug: mode,
            constexpr: constexpr.clone(),
        };

        self.cache.get_or_compile(&key, || {
            let out = emit::emit_kernel(self.program, def, mode, constexpr)?;

            let mut callees = Vec::with_capacity(out.call_sites.len());
            for site in &out.call_sites {
                let callee = self.specialize_inner(&site.kernel, Some(mode), &site.constexpr)?;
                callees.push(callee.key.clone());
            }

            let digest = emit::ops_digest(&out.ops)?;
            Ok(CompiledArtifact {
                key: key.clone(),
                fingerprint: key.fingerprint_hex(),
                params: out.params,
                reg_count: out.reg_count,
                ops: out.ops,
                callees,
                digest,
            })
        })
    }
}

fn call_targets(expr: &Expr) -> Vec<&str> {
    let mut out = Vec::new();
    collect_call_targets(expr, &mut out);
    out
}

fn collect_call_targets<'e>(expr: &'e Expr, out: &mut Vec<&'e str>) {
    if let Expr::List(items) = expr {
        if items.first().and_then(Expr::as_ident) == Some("call") {
            if let Some(name) = items.get(1).and_then(Expr::as_ident) {
                out.push(name);
            }
        }
        for item in items {
            collect_call_targets(item, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CompileSession;
    use crate::compile::{CompileErrorKind, CompileOptions};
    use crate::condeval::ConstEnv;
    use crate::program::Program;
    use crate::slateast::parse_program_json;
    use serde_json::json;
    use std::sync::Arc;

    fn program(kernels: serde_json::Value) -> Program {
        let src = json!({ "schema_version": "slate.ast@0.1.0", "kernels": kernels });
        parse_program_json(src.to_string().as_bytes()).expect("parse program")
    }

    fn options(global: bool, default: bool) -> CompileOptions {
        CompileOptions {
            global_debug_override: global,
            default_debug: default,
        }
    }

    fn nested_program(outer_debug: serde_json::Value, inner_debug: serde_json::Value) -> Program {
        program(json!([
            {
                "kind": "kernel",
                "name": "main.outer",
                "debug": outer_debug,
                "params": [{"name": "X", "ty": "buf_i32"}],
                "body": ["call", "main.inner", "X", ["load", "X", ["lane"]]]
            },
            {
                "kind": "kernel",
                "name": "main.inner",
                "debug": inner_debug,
                "params": [{"name": "B", "ty": "buf_i32"}, {"name": "v", "ty": "i32"}],
                "body": ["device_assert", ["eq", "v", 0], {"lit": "v != 0"}]
            }
        ]))
    }

    #[test]
    fn recompiling_the_same_entry_is_a_cache_hit_with_identical_output() {
        let p = nested_program(json!(null), json!(null));
        let session = CompileSession::new(&p, options(false, true));
        let a = session
            .specialize("main.outer", None, &ConstEnv::new())
            .expect("compile ok");
        let started = session.cache().compiles_started();
        let b = session
            .specialize("main.outer", None, &ConstEnv::new())
            .expect("compile ok");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.digest, b.digest);
        assert_eq!(session.cache().compiles_started(), started);
    }

    #[test]
    fn unset_chain_inherits_the_top_level_mode() {
        for top in [true, false] {
            let p = nested_program(json!(null), json!(null));
            let session = CompileSession::new(&p, options(false, top));
            let outer = session
                .specialize("main.outer", None, &ConstEnv::new())
                .expect("compile ok");
            assert_eq!(outer.key.debug, top);
            assert_eq!(outer.callees.len(), 1);
            assert_eq!(outer.callees[0].debug, top, "inner inherits top={top}");
        }
    }

    #[test]
    fn nested_settings_table_two_levels() {
        let settings = [json!(null), json!(true), json!(false)];
        for (oi, outer_debug) in settings.iter().enumerate() {
            for (ii, inner_debug) in settings.iter().enumerate() {
                let p = nested_program(outer_debug.clone(), inner_debug.clone());
                let session = CompileSession::new(&p, options(false, true));
                let outer = session
                    .specialize("main.outer", None, &ConstEnv::new())
                    .expect("compile ok");
                let expected_outer = match oi {
                    0 => true, // Unset at top level, default on
                    1 => true,
                    _ => false,
                };
                let expected_inner = match ii {
                    0 => expected_outer,
                    1 => true,
                    _ => false,
                };
                assert_eq!(outer.key.debug, expected_outer, "outer={outer_debug} inner={inner_debug}");
                assert_eq!(outer.callees[0].debug, expected_inner, "outer={outer_debug} inner={inner_debug}");
            }
        }
    }

    #[test]
    fn global_override_forces_checks_on_through_forced_off() {
        let p = nested_program(json!(false), json!(false));
        let session = CompileSession::new(&p, options(true, false));
        let outer = session
            .specialize("main.outer", None, &ConstEnv::new())
            .expect("compile ok");
        assert!(outer.key.debug);
        assert!(outer.callees[0].debug);
    }

    #[test]
    fn one_kernel_called_under_two_modes_yields_two_artifacts() {
        // Two entry kernels with opposite forced modes call the same Unset
        // helper; the helper must specialize twice, once per inherited mode,
        // even though the mode-off variant erases its only assertion.
        let p = program(json!([
            {
                "kind": "kernel",
                "name": "main.on",
                "debug": true,
                "params": [{"name": "X", "ty": "buf_i32"}],
                "body": ["call", "util.check", "X", ["load", "X", ["lane"]]]
            },
            {
                "kind": "kernel",
                "name": "main.off",
                "debug": false,
                "params": [{"name": "X", "ty": "buf_i32"}],
                "body": ["call", "util.check", "X", ["load", "X", ["lane"]]]
            },
            {
                "kind": "kernel",
                "name": "util.check",
                "params": [{"name": "B", "ty": "buf_i32"}, {"name": "v", "ty": "i32"}],
                "body": ["device_assert", ["eq", "v", 0], {"lit": "v != 0"}]
            }
        ]));
        let session = CompileSession::new(&p, options(false, true));
        let on = session
            .specialize("main.on", None, &ConstEnv::new())
            .expect("compile ok");
        let off = session
            .specialize("main.off", None, &ConstEnv::new())
            .expect("compile ok");

        let checked = session.cache().lookup(&on.callees[0]).expect("checked helper");
        let unchecked = session.cache().lookup(&off.callees[0]).expect("unchecked helper");
        assert!(!Arc::ptr_eq(&checked, &unchecked));
        assert_ne!(checked.key, unchecked.key);
        assert_ne!(checked.digest, unchecked.digest);
    }

    #[test]
    fn recursive_call_graph_is_rejected() {
        let p = program(json!([
            {
                "kind": "kernel",
                "name": "main.a",
                "body": ["call", "main.b"]
            },
            {
                "kind": "kernel",
                "name": "main.b",
                "body": ["call", "main.a"]
            }
        ]));
        let session = CompileSession::new(&p, options(false, true));
        let err = session
            .specialize("main.a", None, &ConstEnv::new())
            .expect_err("cycle must fail");
        assert_eq!(err.kind, CompileErrorKind::Unsupported);
        assert!(err.message.contains("recursive"));
    }

    #[test]
    fn concurrent_entries_into_a_cycle_fail_instead_of_blocking() {
        // Two requests enter the same cycle from opposite ends at once.
        // Both must get the error; neither may end up waiting on a slot the
        // other holds.
        let p = program(json!([
            {"kind": "kernel", "name": "main.a", "body": ["call", "main.b"]},
            {"kind": "kernel", "name": "main.b", "body": ["call", "main.a"]}
        ]));
        let session = CompileSession::new(&p, options(false, true));

        for _ in 0..50 {
            let barrier = std::sync::Barrier::new(2);
            std::thread::scope(|scope| {
                let barrier = &barrier;
                let session = &session;
                let a = scope.spawn(move || {
                    barrier.wait();
                    session.specialize("main.a", None, &ConstEnv::new())
                });
                let b = scope.spawn(move || {
                    barrier.wait();
                    session.specialize("main.b", None, &ConstEnv::new())
                });
                for res in [a.join().expect("join"), b.join().expect("join")] {
                    let err = res.expect_err("cycle must fail from either entry");
                    assert_eq!(err.kind, CompileErrorKind::Unsupported);
                    assert!(err.message.contains("recursive"));
                }
            });
        }
    }

    #[test]
    fn effective_mode_query_matches_the_specialized_key() {
        let settings = [json!(null), json!(true), json!(false)];
        for outer_debug in &settings {
            for inner_debug in &settings {
                let p = nested_program(outer_debug.clone(), inner_debug.clone());
                let session = CompileSession::new(&p, options(false, true));
                let outer = session
                    .specialize("main.outer", None, &ConstEnv::new())
                    .expect("compile ok");
                let query = session
                    .effective_mode("main.outer", None)
                    .expect("resolve ok");
                assert_eq!(query, outer.key.debug, "outer={outer_debug}");
                let query = session
                    .effective_mode("main.inner", Some(outer.key.debug))
                    .expect("resolve ok");
                assert_eq!(query, outer.callees[0].debug, "inner={inner_debug}");
            }
        }
    }

    #[test]
    fn compile_module_collects_reachable_artifacts() {
        let p = nested_program(json!(null), json!(null));
        let session = CompileSession::new(&p, options(false, true));
        let module = session
            .compile_module("main.outer", &ConstEnv::new())
            .expect("compile ok");
        assert_eq!(module.artifacts.len(), 2);
        assert_eq!(module.entry_artifact().key.kernel, "main.outer");
        let dump = module.to_json().expect("module json");
        assert_eq!(dump["schema_version"], "slate.module@0.1.0");
        assert_eq!(dump["artifacts"].as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn static_assert_failure_aborts_only_the_requesting_compile() {
        let p = program(json!([
            {
                "kind": "kernel",
                "name": "main.bad",
                "params": [{"name": "BLOCK", "ty": "i32", "constexpr": true}],
                "body": ["static_assert", ["eq", "BLOCK", 128], {"lit": "BLOCK != 128"}]
            },
            {
                "kind": "kernel",
                "name": "main.good",
                "body": ["seq"]
            }
        ]));
        let session = CompileSession::new(&p, options(false, true));
        let err = session
            .specialize("main.bad", None, &[("BLOCK".to_string(), 64)].into_iter().collect())
            .expect_err("violation");
        assert_eq!(err.kind, CompileErrorKind::StaticAssertViolation);

        // The shared cache is unaffected: other compiles still succeed, and
        // retrying the failed kernel with good parameters compiles cleanly.
        session
            .specialize("main.good", None, &ConstEnv::new())
            .expect("unrelated compile ok");
        session
            .specialize("main.bad", None, &[("BLOCK".to_string(), 128)].into_iter().collect())
            .expect("retry with different specialization parameters ok");
    }
}
