//! Parsing of `slate.ast` JSON program files into the in-memory model.

use std::collections::BTreeSet;

use serde_json::Value;
use slate_contracts::SLATE_AST_SCHEMA_VERSION;

use crate::ast::expr_from_json;
use crate::debug::DebugSetting;
use crate::program::{KernelDef, KernelParam, Program};
use crate::types::Ty;
use crate::validate;

pub fn parse_program_json(bytes: &[u8]) -> Result<Program, String> {
    let root: Value =
        serde_json::from_slice(bytes).map_err(|e| format!("program must be JSON: {e}"))?;
    let Value::Object(root) = root else {
        return Err("program root must be a JSON object".to_string());
    };

    match root.get("schema_version") {
        Some(Value::String(v)) if v == SLATE_AST_SCHEMA_VERSION => {}
        Some(Value::String(v)) => {
            return Err(format!(
                "unsupported schema_version {v:?} (expected {SLATE_AST_SCHEMA_VERSION:?})"
            ));
        }
        _ => return Err("missing schema_version".to_string()),
    }

    let Some(Value::Array(kernel_values)) = root.get("kernels") else {
        return Err("missing \"kernels\" array".to_string());
    };

    let mut kernels = Vec::with_capacity(kernel_values.len());
    let mut seen = BTreeSet::new();
    for (idx, kv) in kernel_values.iter().enumerate() {
        let kernel = parse_kernel(kv).map_err(|e| format!("/kernels/{idx}: {e}"))?;
        if !seen.insert(kernel.name.clone()) {
            return Err(format!("duplicate kernel name: {:?}", kernel.name));
        }
        kernels.push(kernel);
    }

    Ok(Program { kernels })
}

fn parse_kernel(v: &Value) -> Result<KernelDef, String> {
    let Value::Object(obj) = v else {
        return Err("kernel must be a JSON object".to_string());
    };

    match obj.get("kind") {
        Some(Value::String(k)) if k == "kernel" => {}
        other => return Err(format!("expected kind=\"kernel\", got {other:?}")),
    }

    let name = match obj.get("name") {
        Some(Value::String(s)) => s.clone(),
        other => return Err(format!("kernel name must be a string, got {other:?}")),
    };
    validate::validate_kernel_name(&name)?;

    let debug = DebugSetting::from_json_field(obj.get("debug"))
        .map_err(|e| format!("kernel {name:?}: {e}"))?;

    let mut params = Vec::new();
    let mut seen = BTreeSet::new();
    if let Some(pv) = obj.get("params") {
        let Value::Array(items) = pv else {
            return Err(format!("kernel {name:?}: params must be an array"));
        };
        for item in items {
            let p = parse_param(item).map_err(|e| format!("kernel {name:?}: {e}"))?;
            if !seen.insert(p.name.clone()) {
                return Err(format!("kernel {name:?}: duplicate param {:?}", p.name));
            }
            params.push(p);
        }
    }

    let body = match obj.get("body") {
        Some(bv) => expr_from_json(bv).map_err(|e| format!("kernel {name:?} body: {e}"))?,
        None => return Err(format!("kernel {name:?} is missing a body")),
    };

    Ok(KernelDef {
        name,
        debug,
        params,
        body,
    })
}

fn parse_param(v: &Value) -> Result<KernelParam, String> {
    let Value::Object(obj) = v else {
        return Err("param must be a JSON object".to_string());
    };
    let name = match obj.get("name") {
        Some(Value::String(s)) => s.clone(),
        other => return Err(format!("param name must be a string, got {other:?}")),
    };
    validate::validate_param_name(&name)?;

    let ty = match obj.get("ty") {
        Some(Value::String(s)) => Ty::parse_named(s)
            .ok_or_else(|| format!("param {name:?}: unknown type {s:?}"))?,
        other => return Err(format!("param {name:?}: ty must be a string, got {other:?}")),
    };

    let constexpr = match obj.get("constexpr") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        other => return Err(format!("param {name:?}: constexpr must be a bool, got {other:?}")),
    };
    if constexpr && ty != Ty::I32 {
        return Err(format!(
            "param {name:?}: constexpr is only supported for i32 params"
        ));
    }

    Ok(KernelParam { name, ty, constexpr })
}
