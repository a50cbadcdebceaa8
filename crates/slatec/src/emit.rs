//! Lowering of kernel bodies to the linear device-op IR.
//!
//! One invocation lowers one specialization: the body is walked once under
//! the already-resolved effective debug mode and the specialization's
//! constexpr bindings. Static assertions are discharged here, at lowering
//! time, in either mode; device assertions become `Assert` ops when the mode
//! is on and vanish entirely when it is off (no condition evaluation, no
//! branch, zero emitted ops).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::Expr;
use crate::cache::SpecKey;
use crate::compile::{CompileErrorKind, CompilerError};
use crate::condeval::{self, ConstEnv, ConstEvalError};
use crate::program::{KernelDef, Program};
use crate::types::Ty;

pub type Reg = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Per-lane register-machine ops.
///
/// `buf` operands index the artifact's buffer params in declaration order;
/// the runner rebinds them per call frame. `Call.callee` indexes
/// `CompiledArtifact::callees`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeviceOp {
    ConstI32 { dst: Reg, value: i64 },
    Lane { dst: Reg },
    Bin { dst: Reg, bin: BinOp, lhs: Reg, rhs: Reg },
    Not { dst: Reg, src: Reg },
    Load { dst: Reg, buf: u32, idx: Reg },
    Store { buf: u32, idx: Reg, val: Reg },
    Assert { cond: Reg, message: String, loc: String },
    Call { callee: u32, bufs: Vec<u32>, args: Vec<Reg> },
}

/// A runtime parameter of a compiled specialization, in declaration order.
/// Constexpr params do not appear here; their values live in the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactParam {
    pub name: String,
    pub ty: Ty,
}

/// The emitted code for one (kernel, effective mode, constexpr) tuple.
///
/// Artifacts for the same kernel differing only in the effective mode are
/// distinct cache entries and are never unified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledArtifact {
    pub key: SpecKey,
    pub fingerprint: String,
    pub params: Vec<ArtifactParam>,
    pub reg_count: u32,
    pub ops: Vec<DeviceOp>,
    /// Specialization keys of call sites, indexed by `DeviceOp::Call::callee`.
    pub callees: Vec<SpecKey>,
    /// blake3 of the canonically serialized ops; equal digests mean
    /// byte-identical emitted code.
    pub digest: String,
}

/// One call site discovered while emitting a body. The driver specializes
/// the callee under the caller's resolved mode and records the resulting key
/// at the same index in `CompiledArtifact::callees`.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub kernel: String,
    pub constexpr: BTreeMap<String, i64>,
    pub loc: String,
}

#[derive(Debug)]
pub struct EmitOutput {
    pub params: Vec<ArtifactParam>,
    pub reg_count: u32,
    pub ops: Vec<DeviceOp>,
    pub call_sites: Vec<CallSite>,
}

pub fn ops_digest(ops: &[DeviceOp]) -> Result<String, CompilerError> {
    let bytes = serde_json::to_vec(ops).map_err(|e| {
        CompilerError::new(
            CompileErrorKind::Internal,
            format!("serialize ops for digest: {e}"),
        )
    })?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Lowers `def`'s body under the resolved `mode` and constexpr bindings.
///
/// Pure with respect to the program: call sites are returned for the driver
/// to specialize, nothing is looked up in the cache here.
pub fn emit_kernel(
    program: &Program,
    def: &KernelDef,
    mode: bool,
    consts: &ConstEnv,
) -> Result<EmitOutput, CompilerError> {
    let mut emitter = Emitter {
        program,
        def,
        mode,
        consts,
        scalars: BTreeMap::new(),
        bufs: BTreeMap::new(),
        params: Vec::new(),
        next_reg: 0,
        ops: Vec::new(),
        call_sites: Vec::new(),
    };

    for p in &def.params {
        if p.constexpr {
            if !consts.contains_key(&p.name) {
                return Err(CompilerError::new(
                    CompileErrorKind::Internal,
                    format!(
                        "internal error: constexpr param {:?} of {:?} has no binding at emit time",
                        p.name, def.name
                    ),
                ));
            }
            continue;
        }
        match p.ty {
            Ty::BufI32 => {
                let slot = emitter.bufs.len() as u32;
                emitter.bufs.insert(p.name.as_str(), slot);
            }
            Ty::I32 => {
                let reg = emitter.alloc();
                emitter.scalars.insert(p.name.as_str(), reg);
            }
        }
        emitter.params.push(ArtifactParam {
            name: p.name.clone(),
            ty: p.ty,
        });
    }

    emitter.emit_expr(&def.body, "")?;

    Ok(EmitOutput {
        params: emitter.params,
        reg_count: emitter.next_reg,
        ops: emitter.ops,
        call_sites: emitter.call_sites,
    })
}

struct Emitter<'a> {
    program: &'a Program,
    def: &'a KernelDef,
    mode: bool,
    consts: &'a ConstEnv,
    scalars: BTreeMap<&'a str, Reg>,
    bufs: BTreeMap<&'a str, u32>,
    params: Vec<ArtifactParam>,
    next_reg: Reg,
    ops: Vec<DeviceOp>,
    call_sites: Vec<CallSite>,
}

impl<'a> Emitter<'a> {
    fn alloc(&mut self) -> Reg {
        let r = self.next_reg;
        self.next_reg += 1;
        r
    }

    fn loc(&self, ptr: &str) -> String {
        format!("{}:{}", self.def.name, if ptr.is_empty() { "/" } else { ptr })
    }

    fn typing(&self, ptr: &str, message: String) -> CompilerError {
        CompilerError::new(
            CompileErrorKind::Typing,
            format!("{}: {message}", self.loc(ptr)),
        )
    }

    fn emit_value(&mut self, expr: &Expr, ptr: &str) -> Result<Reg, CompilerError> {
        self.emit_expr(expr, ptr)?
            .ok_or_else(|| self.typing(ptr, "expression does not produce a value".to_string()))
    }

    fn emit_expr(&mut self, expr: &Expr, ptr: &str) -> Result<Option<Reg>, CompilerError> {
        match expr {
            Expr::Int(v) => {
                let dst = self.alloc();
                self.ops.push(DeviceOp::ConstI32 { dst, value: *v });
                Ok(Some(dst))
            }
            Expr::Ident(name) => {
                if let Some(v) = self.consts.get(name) {
                    let dst = self.alloc();
                    self.ops.push(DeviceOp::ConstI32 { dst, value: *v });
                    return Ok(Some(dst));
                }
                if let Some(reg) = self.scalars.get(name.as_str()) {
                    return Ok(Some(*reg));
                }
                if self.bufs.contains_key(name.as_str()) {
                    return Err(self.typing(
                        ptr,
                        format!("buffer param {name:?} cannot be used as a value"),
                    ));
                }
                Err(self.typing(ptr, format!("unknown identifier: {name:?}")))
            }
            Expr::Str(s) => Err(self.typing(
                ptr,
                format!("string literal {s:?} is only valid as an assertion message"),
            )),
            Expr::List(items) => {
                let Some(head) = items.first().and_then(Expr::as_ident) else {
                    return Err(self.typing(
                        ptr,
                        "list form must start with an identifier head".to_string(),
                    ));
                };
                let args = &items[1..];
                match head {
                    "seq" => {
                        for (i, item) in args.iter().enumerate() {
                            let child = format!("{ptr}/{}", i + 1);
                            self.emit_expr(item, &child)?;
                        }
                        Ok(None)
                    }
                    "lane" => {
                        self.expect_arity(head, args, 0, ptr)?;
                        let dst = self.alloc();
                        self.ops.push(DeviceOp::Lane { dst });
                        Ok(Some(dst))
                    }
                    "load" => {
                        self.expect_arity(head, args, 2, ptr)?;
                        let buf = self.buf_operand(&args[0], ptr)?;
                        let idx = self.emit_value(&args[1], &format!("{ptr}/2"))?;
                        let dst = self.alloc();
                        self.ops.push(DeviceOp::Load { dst, buf, idx });
                        Ok(Some(dst))
                    }
                    "store" => {
                        self.expect_arity(head, args, 3, ptr)?;
                        let buf = self.buf_operand(&args[0], ptr)?;
                        let idx = self.emit_value(&args[1], &format!("{ptr}/2"))?;
                        let val = self.emit_value(&args[2], &format!("{ptr}/3"))?;
                        self.ops.push(DeviceOp::Store { buf, idx, val });
                        Ok(None)
                    }
                    "not" => {
                        self.expect_arity(head, args, 1, ptr)?;
                        let src = self.emit_value(&args[0], &format!("{ptr}/1"))?;
                        let dst = self.alloc();
                        self.ops.push(DeviceOp::Not { dst, src });
                        Ok(Some(dst))
                    }
                    "add" | "sub" | "mul" | "eq" | "ne" | "lt" | "le" | "gt" | "ge" | "and"
                    | "or" => {
                        self.expect_arity(head, args, 2, ptr)?;
                        let lhs = self.emit_value(&args[0], &format!("{ptr}/1"))?;
                        let rhs = self.emit_value(&args[1], &format!("{ptr}/2"))?;
                        let bin = match head {
                            "add" => BinOp::Add,
                            "sub" => BinOp::Sub,
                            "mul" => BinOp::Mul,
                            "eq" => BinOp::Eq,
                            "ne" => BinOp::Ne,
                            "lt" => BinOp::Lt,
                            "le" => BinOp::Le,
                            "gt" => BinOp::Gt,
                            "ge" => BinOp::Ge,
                            "and" => BinOp::And,
                            "or" => BinOp::Or,
                            _ => unreachable!(),
                        };
                        let dst = self.alloc();
                        self.ops.push(DeviceOp::Bin { dst, bin, lhs, rhs });
                        Ok(Some(dst))
                    }
                    "device_assert" => {
                        self.expect_arity(head, args, 2, ptr)?;
                        let message = args[1]
                            .as_str_lit()
                            .ok_or_else(|| {
                                self.typing(
                                    ptr,
                                    "device_assert message must be a string literal".to_string(),
                                )
                            })?
                            .to_string();
                        if !self.mode {
                            // Erased specialization: no condition evaluation,
                            // no branch, nothing emitted.
                            return Ok(None);
                        }
                        let cond = self.emit_value(&args[0], &format!("{ptr}/1"))?;
                        let loc = self.loc(ptr);
                        self.ops.push(DeviceOp::Assert { cond, message, loc });
                        Ok(None)
                    }
                    "static_assert" => {
                        self.expect_arity(head, args, 2, ptr)?;
                        let message = args[1].as_str_lit().ok_or_else(|| {
                            self.typing(
                                ptr,
                                "static_assert message must be a string literal".to_string(),
                            )
                        })?;
                        // Discharged at lowering time in either mode; debug
                        // mode never suppresses a static assertion.
                        match condeval::eval_const(&args[0], self.consts) {
                            Ok(0) => Err(CompilerError::new(
                                CompileErrorKind::StaticAssertViolation,
                                format!("{}: static assertion failed: {message}", self.loc(ptr)),
                            )),
                            Ok(_) => Ok(None),
                            Err(e @ ConstEvalError::NotConst { .. }) => Err(CompilerError::new(
                                CompileErrorKind::StaticAssertUnresolvable,
                                format!("{}: static_assert condition {e}", self.loc(ptr)),
                            )),
                            Err(ConstEvalError::Malformed { message }) => {
                                Err(self.typing(ptr, message))
                            }
                        }
                    }
                    "call" => self.emit_call(args, ptr),
                    other => Err(self.typing(ptr, format!("unknown form: {other:?}"))),
                }
            }
        }
    }

    fn emit_call(&mut self, args: &[Expr], ptr: &str) -> Result<Option<Reg>, CompilerError> {
        let Some(callee_name) = args.first().and_then(Expr::as_ident) else {
            return Err(self.typing(ptr, "call target must be a kernel name".to_string()));
        };
        let callee = self.program.kernel(callee_name).ok_or_else(|| {
            self.typing(ptr, format!("call to unknown kernel: {callee_name:?}"))
        })?;
        let call_args = &args[1..];
        if call_args.len() != callee.params.len() {
            return Err(self.typing(
                ptr,
                format!(
                    "call to {callee_name:?} expects {} argument(s), got {}",
                    callee.params.len(),
                    call_args.len()
                ),
            ));
        }

        let mut constexpr = BTreeMap::new();
        let mut bufs = Vec::new();
        let mut regs = Vec::new();
        for (i, (param, arg)) in callee.params.iter().zip(call_args).enumerate() {
            let child = format!("{ptr}/{}", i + 2);
            if param.constexpr {
                let value = condeval::eval_const(arg, self.consts).map_err(|e| {
                    self.typing(
                        &child,
                        format!(
                            "argument for constexpr param {:?} of {callee_name:?} {e}",
                            param.name
                        ),
                    )
                })?;
                constexpr.insert(param.name.clone(), value);
                continue;
            }
            match param.ty {
                Ty::BufI32 => {
                    let buf = self.buf_operand(arg, &child)?;
                    bufs.push(buf);
                }
                Ty::I32 => {
                    let reg = self.emit_value(arg, &child)?;
                    regs.push(reg);
                }
            }
        }

        let callee_idx = self.call_sites.len() as u32;
        self.call_sites.push(CallSite {
            kernel: callee_name.to_string(),
            constexpr,
            loc: self.loc(ptr),
        });
        self.ops.push(DeviceOp::Call {
            callee: callee_idx,
            bufs,
            args: regs,
        });
        Ok(None)
    }

    fn buf_operand(&self, expr: &Expr, ptr: &str) -> Result<u32, CompilerError> {
        let name = expr.as_ident().ok_or_else(|| {
            self.typing(ptr, "buffer operand must be a buffer param name".to_string())
        })?;
        self.bufs.get(name).copied().ok_or_else(|| {
            self.typing(ptr, format!("{name:?} is not a buffer param of {:?}", self.def.name))
        })
    }

    fn expect_arity(
        &self,
        head: &str,
        args: &[Expr],
        want: usize,
        ptr: &str,
    ) -> Result<(), CompilerError> {
        if args.len() != want {
            return Err(self.typing(
                ptr,
                format!("{head:?} expects {want} argument(s), got {}", args.len()),
            ));
        }
        Ok(())
    }
}
