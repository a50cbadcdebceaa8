//! Compile-time evaluation of kernel expressions.
//!
//! Used by static-assertion lowering and by constexpr argument binding at
//! call sites. Evaluation sees only the specialization's constexpr bindings;
//! anything that touches runtime state (`lane`, `load`, runtime scalar
//! params, `call`) is reported as non-constant, distinct from a malformed
//! expression.

use std::collections::BTreeMap;
use std::fmt::Display;

use crate::ast::Expr;

pub type ConstEnv = BTreeMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstEvalError {
    /// The expression depends on runtime state (named form or identifier).
    NotConst { what: String },
    /// The expression is not a valid form at all.
    Malformed { message: String },
}

impl Display for ConstEvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstEvalError::NotConst { what } => {
                write!(f, "not compile-time evaluable: {what}")
            }
            ConstEvalError::Malformed { message } => write!(f, "malformed expression: {message}"),
        }
    }
}

const RUNTIME_HEADS: &[&str] = &["lane", "load", "store", "call", "device_assert", "seq"];

/// Evaluates `expr` over the constexpr bindings. Comparisons and logical
/// forms yield 0/1; arithmetic wraps, matching device arithmetic.
pub fn eval_const(expr: &Expr, env: &ConstEnv) -> Result<i64, ConstEvalError> {
    match expr {
        Expr::Int(v) => Ok(*v),
        Expr::Ident(name) => match env.get(name) {
            Some(v) => Ok(*v),
            None => Err(ConstEvalError::NotConst {
                what: format!("identifier {name:?} is not a constexpr binding"),
            }),
        },
        Expr::Str(s) => Err(ConstEvalError::Malformed {
            message: format!("string literal {s:?} is not a value"),
        }),
        Expr::List(items) => {
            let Some(head) = items.first().and_then(Expr::as_ident) else {
                return Err(ConstEvalError::Malformed {
                    message: "list form must start with an identifier head".to_string(),
                });
            };
            if RUNTIME_HEADS.contains(&head) {
                return Err(ConstEvalError::NotConst {
                    what: format!("{head:?} form"),
                });
            }
            let args = &items[1..];
            match head {
                "not" => {
                    let [a] = args else {
                        return Err(arity(head, 1, args.len()));
                    };
                    Ok((eval_const(a, env)? == 0) as i64)
                }
                "and" => {
                    let [a, b] = args else {
                        return Err(arity(head, 2, args.len()));
                    };
                    if eval_const(a, env)? == 0 {
                        return Ok(0);
                    }
                    Ok((eval_const(b, env)? != 0) as i64)
                }
                "or" => {
                    let [a, b] = args else {
                        return Err(arity(head, 2, args.len()));
                    };
                    if eval_const(a, env)? != 0 {
                        return Ok(1);
                    }
                    Ok((eval_const(b, env)? != 0) as i64)
                }
                "add" | "sub" | "mul" | "eq" | "ne" | "lt" | "le" | "gt" | "ge" => {
                    let [a, b] = args else {
                        return Err(arity(head, 2, args.len()));
                    };
                    let a = eval_const(a, env)?;
                    let b = eval_const(b, env)?;
                    Ok(match head {
                        "add" => a.wrapping_add(b),
                        "sub" => a.wrapping_sub(b),
                        "mul" => a.wrapping_mul(b),
                        "eq" => (a == b) as i64,
                        "ne" => (a != b) as i64,
                        "lt" => (a < b) as i64,
                        "le" => (a <= b) as i64,
                        "gt" => (a > b) as i64,
                        "ge" => (a >= b) as i64,
                        _ => unreachable!(),
                    })
                }
                "static_assert" => Err(ConstEvalError::Malformed {
                    message: "static_assert is a statement, not a value".to_string(),
                }),
                other => Err(ConstEvalError::Malformed {
                    message: format!("unknown form: {other:?}"),
                }),
            }
        }
    }
}

fn arity(head: &str, want: usize, got: usize) -> ConstEvalError {
    ConstEvalError::Malformed {
        message: format!("{head:?} expects {want} argument(s), got {got}"),
    }
}
