#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::{json, Value};
use slate_host_runner::LaunchConfig;
use slatec::compile::{self, CompileOptions, CompilerError};
use slatec::driver::CompiledModule;

pub fn config(lanes: u32) -> LaunchConfig {
    LaunchConfig {
        lanes,
        lane_fuel: 1_000_000,
        max_trap_reports: 16,
    }
}

pub fn options(global_debug_override: bool, default_debug: bool) -> CompileOptions {
    CompileOptions {
        global_debug_override,
        default_debug,
    }
}

pub fn constexpr(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

pub fn compile(
    kernels: Value,
    entry: &str,
    bindings: &BTreeMap<String, i64>,
    options: &CompileOptions,
) -> Result<CompiledModule, CompilerError> {
    let src = json!({ "schema_version": "slate.ast@0.1.0", "kernels": kernels });
    let program = compile::parse_program(src.to_string().as_bytes())?;
    compile::compile_kernel(&program, entry, bindings, options)
}

/// Copy kernel that asserts every loaded element is zero before storing it
/// to the output buffer.
pub fn copy_kernel(debug: Value) -> Value {
    json!([{
        "kind": "kernel",
        "name": "main.copy",
        "debug": debug,
        "params": [
            {"name": "X", "ty": "buf_i32"},
            {"name": "Y", "ty": "buf_i32"}
        ],
        "body": ["seq",
            ["device_assert", ["eq", ["load", "X", ["lane"]], 0], {"lit": "x != 0"}],
            ["store", "Y", ["lane"], ["load", "X", ["lane"]]]
        ]
    }])
}
