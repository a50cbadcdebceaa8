use std::collections::BTreeMap;
use std::fmt::Display;

use crate::debug;
use crate::driver::{CompileSession, CompiledModule};
use crate::language;
use crate::program::Program;
use crate::slateast;

/// Request-scoped compilation options.
///
/// `global_debug_override` is read once at request start (`from_env`) and
/// treated as immutable for the request's duration; a mid-compilation change
/// to `SLATE_DEBUG` never affects already-resolved modes.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Escalation-only override: forces device assertions on everywhere.
    pub global_debug_override: bool,
    /// Effective mode for a top-level kernel with an unset debug setting.
    pub default_debug: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            global_debug_override: false,
            default_debug: language::DEFAULT_DEBUG,
        }
    }
}

impl CompileOptions {
    pub fn from_env() -> Self {
        Self {
            global_debug_override: language::global_debug_override(),
            default_debug: language::DEFAULT_DEBUG,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    Parse,
    Typing,
    /// A static assertion evaluated to false at specialization time.
    StaticAssertViolation,
    /// A static assertion condition was not compile-time evaluable.
    StaticAssertUnresolvable,
    Unsupported,
    Budget,
    Internal,
}

#[derive(Debug, Clone)]
pub struct CompilerError {
    pub kind: CompileErrorKind,
    pub message: String,
}

impl CompilerError {
    pub fn new(kind: CompileErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl Display for CompilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

pub fn parse_program(bytes: &[u8]) -> Result<Program, CompilerError> {
    if bytes.len() > language::limits::MAX_SOURCE_BYTES {
        return Err(CompilerError::new(
            CompileErrorKind::Budget,
            format!(
                "program too large: max_source_bytes={} got {}",
                language::limits::MAX_SOURCE_BYTES,
                bytes.len()
            ),
        ));
    }

    let program = slateast::parse_program_json(bytes)
        .map_err(|e| CompilerError::new(CompileErrorKind::Parse, e))?;

    let total_nodes = program.node_count();
    let max_ast_nodes = language::limits::max_ast_nodes();
    if total_nodes > max_ast_nodes {
        return Err(CompilerError::new(
            CompileErrorKind::Budget,
            format!(
                "AST too large: max_ast_nodes={max_ast_nodes} got {total_nodes} (set SLATE_MAX_AST_NODES=<n>)"
            ),
        ));
    }

    Ok(program)
}

/// Compiles `entry` and, transitively, every kernel it calls, each under its
/// resolved effective debug mode. One-shot wrapper over [`CompileSession`];
/// callers that issue several requests against the same program should hold
/// a session so specializations are shared.
pub fn compile_kernel(
    program: &Program,
    entry: &str,
    constexpr: &BTreeMap<String, i64>,
    options: &CompileOptions,
) -> Result<CompiledModule, CompilerError> {
    let session = CompileSession::new(program, options.clone());
    session.compile_module(entry, constexpr)
}

/// Diagnostic query: the effective debug mode `kernel` would resolve to when
/// compiled under `caller_mode` (`None` = top level).
pub fn effective_mode(
    program: &Program,
    kernel: &str,
    caller_mode: Option<bool>,
    options: &CompileOptions,
) -> Result<bool, CompilerError> {
    let def = program.kernel(kernel).ok_or_else(|| {
        CompilerError::new(CompileErrorKind::Parse, format!("unknown kernel: {kernel:?}"))
    })?;
    Ok(debug::resolve(
        def.debug,
        caller_mode,
        options.global_debug_override,
        options.default_debug,
    ))
}
