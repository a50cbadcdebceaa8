//! Host-side invocation of compiled slate modules.
//!
//! The runner is the execution substrate device assertions lower to: it
//! interprets a module's device ops over a logical grid of lanes. An
//! `assert` op whose condition is false halts that lane's entire call stack
//! and surfaces a structured trap report; other lanes proceed, and stores
//! the trapped lane issued before the assert are kept. A trap is a property
//! of one invocation only; the module stays valid for relaunch.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use slatec::driver::CompiledModule;
use slatec::emit::{BinOp, CompiledArtifact, DeviceOp};
use slatec::language;
use slatec::types::Ty;

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Logical grid size: device ops run once per lane.
    pub lanes: u32,
    /// Per-lane op budget; exhausting it is a host error, not a trap.
    pub lane_fuel: u64,
    /// Cap on collected trap reports (`ok` reflects all traps regardless).
    pub max_trap_reports: usize,
}

#[derive(Debug, Clone)]
pub enum LaunchArg {
    BufI32(Vec<i32>),
    I32(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrapReport {
    pub lane: u32,
    pub kernel: String,
    pub message: String,
    pub loc: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchOutcome {
    pub ok: bool,
    pub traps: Vec<TrapReport>,
    /// Final contents of the buffer arguments, in argument order.
    pub buffers: Vec<Vec<i32>>,
}

pub fn launch(
    module: &CompiledModule,
    args: Vec<LaunchArg>,
    config: &LaunchConfig,
) -> Result<LaunchOutcome> {
    let max_lanes = language::limits::max_lanes();
    if config.lanes == 0 || config.lanes > max_lanes {
        bail!(
            "lanes must be in 1..={max_lanes}, got {} (set SLATE_MAX_LANES=<n>)",
            config.lanes
        );
    }

    let entry = module.entry_artifact();
    if args.len() != entry.params.len() {
        bail!(
            "entry kernel {:?} expects {} argument(s), got {}",
            entry.key.kernel,
            entry.params.len(),
            args.len()
        );
    }

    let mut bufs: Vec<Vec<i32>> = Vec::new();
    let mut entry_bufs: Vec<usize> = Vec::new();
    let mut entry_scalars: Vec<i64> = Vec::new();
    for (param, arg) in entry.params.iter().zip(args) {
        match (param.ty, arg) {
            (Ty::BufI32, LaunchArg::BufI32(data)) => {
                entry_bufs.push(bufs.len());
                bufs.push(data);
            }
            (Ty::I32, LaunchArg::I32(v)) => entry_scalars.push(v),
            (ty, arg) => bail!(
                "argument for param {:?} of {:?} must be {}, got {arg:?}",
                param.name,
                entry.key.kernel,
                ty.name()
            ),
        }
    }

    let mut traps = Vec::new();
    let mut trapped: u64 = 0;
    for lane in 0..config.lanes {
        let mut ctx = LaneCtx {
            module,
            bufs: &mut bufs,
            lane,
            fuel: config.lane_fuel,
        };
        if let Some(trap) = ctx.run_frame(entry, &entry_bufs, &entry_scalars)? {
            trapped += 1;
            if traps.len() < config.max_trap_reports {
                traps.push(trap);
            }
        }
    }

    Ok(LaunchOutcome {
        ok: trapped == 0,
        traps,
        buffers: bufs,
    })
}

struct LaneCtx<'m> {
    module: &'m CompiledModule,
    bufs: &'m mut Vec<Vec<i32>>,
    lane: u32,
    fuel: u64,
}

impl LaneCtx<'_> {
    /// Runs one call frame for this lane. `Some(trap)` propagates to the
    /// caller frame untouched: a failing assert halts the whole stack.
    fn run_frame(
        &mut self,
        artifact: &CompiledArtifact,
        buf_bind: &[usize],
        scalar_args: &[i64],
    ) -> Result<Option<TrapReport>> {
        let mut regs = vec![0i64; artifact.reg_count as usize];
        // Scalar params occupy the first registers in declaration order.
        for (i, v) in scalar_args.iter().enumerate() {
            regs[i] = *v;
        }

        for op in &artifact.ops {
            if self.fuel == 0 {
                bail!(
                    "lane {}: fuel exhausted in {:?} (lane_fuel too small)",
                    self.lane,
                    artifact.key.kernel
                );
            }
            self.fuel -= 1;

            match op {
                DeviceOp::ConstI32 { dst, value } => regs[*dst as usize] = *value,
                DeviceOp::Lane { dst } => regs[*dst as usize] = self.lane as i64,
                DeviceOp::Bin { dst, bin, lhs, rhs } => {
                    let a = regs[*lhs as usize];
                    let b = regs[*rhs as usize];
                    regs[*dst as usize] = match bin {
                        BinOp::Add => a.wrapping_add(b),
                        BinOp::Sub => a.wrapping_sub(b),
                        BinOp::Mul => a.wrapping_mul(b),
                        BinOp::Eq => (a == b) as i64,
                        BinOp::Ne => (a != b) as i64,
                        BinOp::Lt => (a < b) as i64,
                        BinOp::Le => (a <= b) as i64,
                        BinOp::Gt => (a > b) as i64,
                        BinOp::Ge => (a >= b) as i64,
                        BinOp::And => (a != 0 && b != 0) as i64,
                        BinOp::Or => (a != 0 || b != 0) as i64,
                    };
                }
                DeviceOp::Not { dst, src } => {
                    regs[*dst as usize] = (regs[*src as usize] == 0) as i64
                }
                DeviceOp::Load { dst, buf, idx } => {
                    let data = self.buffer(artifact, buf_bind, *buf)?;
                    let i = self.index(artifact, regs[*idx as usize], data.len(), "load")?;
                    regs[*dst as usize] = data[i] as i64;
                }
                DeviceOp::Store { buf, idx, val } => {
                    let v = regs[*val as usize] as i32;
                    let i = {
                        let data = self.buffer(artifact, buf_bind, *buf)?;
                        self.index(artifact, regs[*idx as usize], data.len(), "store")?
                    };
                    let global = buf_bind[*buf as usize];
                    self.bufs[global][i] = v;
                }
                DeviceOp::Assert { cond, message, loc } => {
                    if regs[*cond as usize] == 0 {
                        return Ok(Some(TrapReport {
                            lane: self.lane,
                            kernel: artifact.key.kernel.clone(),
                            message: message.clone(),
                            loc: loc.clone(),
                        }));
                    }
                }
                DeviceOp::Call { callee, bufs, args } => {
                    let key = artifact.callees.get(*callee as usize).ok_or_else(|| {
                        anyhow::anyhow!(
                            "corrupt artifact {:?}: call site {} out of range",
                            artifact.key.kernel,
                            callee
                        )
                    })?;
                    let target = self.module.artifact(key).ok_or_else(|| {
                        anyhow::anyhow!(
                            "module is missing the specialization of {:?} called from {:?}",
                            key.kernel,
                            artifact.key.kernel
                        )
                    })?;
                    let target = std::sync::Arc::clone(target);
                    let callee_bufs: Vec<usize> =
                        bufs.iter().map(|b| buf_bind[*b as usize]).collect();
                    let callee_args: Vec<i64> =
                        args.iter().map(|r| regs[*r as usize]).collect();
                    if let Some(trap) = self.run_frame(&target, &callee_bufs, &callee_args)? {
                        return Ok(Some(trap));
                    }
                }
            }
        }

        Ok(None)
    }

    fn buffer(
        &self,
        artifact: &CompiledArtifact,
        buf_bind: &[usize],
        buf: u32,
    ) -> Result<&Vec<i32>> {
        let global = buf_bind.get(buf as usize).ok_or_else(|| {
            anyhow::anyhow!(
                "corrupt artifact {:?}: buffer operand {} out of range",
                artifact.key.kernel,
                buf
            )
        })?;
        Ok(&self.bufs[*global])
    }

    fn index(
        &self,
        artifact: &CompiledArtifact,
        idx: i64,
        len: usize,
        what: &str,
    ) -> Result<usize> {
        if idx < 0 || idx as usize >= len {
            bail!(
                "lane {}: {what} index {idx} out of bounds (len {len}) in {:?}",
                self.lane,
                artifact.key.kernel
            );
        }
        Ok(idx as usize)
    }
}

/// Parses the launch-argument JSON accepted by `slate-run`:
/// `{"args": [{"buf_i32": [..]}, {"i32": 5}, ...]}`.
pub fn parse_launch_args(bytes: &[u8]) -> Result<Vec<LaunchArg>> {
    let root: serde_json::Value =
        serde_json::from_slice(bytes).context("launch args must be JSON")?;
    let Some(items) = root.get("args").and_then(|v| v.as_array()) else {
        bail!("launch args must have an \"args\" array");
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if let Some(v) = item.get("i32") {
            let v = v
                .as_i64()
                .with_context(|| format!("args[{i}].i32 must be an i64"))?;
            out.push(LaunchArg::I32(v));
            continue;
        }
        if let Some(v) = item.get("buf_i32").and_then(|v| v.as_array()) {
            let mut data = Vec::with_capacity(v.len());
            for (j, x) in v.iter().enumerate() {
                let x = x
                    .as_i64()
                    .and_then(|x| i32::try_from(x).ok())
                    .with_context(|| format!("args[{i}].buf_i32[{j}] must be an i32"))?;
                data.push(x);
            }
            out.push(LaunchArg::BufI32(data));
            continue;
        }
        bail!("args[{i}] must be {{\"i32\": n}} or {{\"buf_i32\": [..]}}");
    }
    Ok(out)
}
