//! Per-kernel debug annotations and effective-mode resolution.
//!
//! Every kernel definition carries a tri-state [`DebugSetting`], fixed when
//! the definition is parsed. Whether device assertions in a given
//! specialization are active is decided by [`resolve`] at specialization
//! time, so the same kernel can exist as a checked and an unchecked artifact
//! side by side.

use serde_json::Value;

/// Tri-state debug annotation on a kernel definition.
///
/// `Unset` inherits the caller's effective mode, or the library default for
/// a top-level compile. Modeled as an explicit enum rather than an
/// `Option<bool>` so the escalation-only global-override rule stays
/// unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSetting {
    Unset,
    ForcedOn,
    ForcedOff,
}

impl DebugSetting {
    /// Parses the optional `"debug"` field of a kernel definition.
    pub fn from_json_field(v: Option<&Value>) -> Result<Self, String> {
        match v {
            None | Some(Value::Null) => Ok(DebugSetting::Unset),
            Some(Value::Bool(true)) => Ok(DebugSetting::ForcedOn),
            Some(Value::Bool(false)) => Ok(DebugSetting::ForcedOff),
            Some(other) => Err(format!("\"debug\" must be a bool, got {other:?}")),
        }
    }
}

/// Computes the effective debug mode for one specialization.
///
/// Precedence:
/// 1. the global override, when true, wins unconditionally (it can only
///    escalate, never disable);
/// 2. an explicit `ForcedOn`/`ForcedOff` on the kernel itself;
/// 3. `Unset` inherits `caller_mode`, falling back to `default_mode` for a
///    top-level compile (no caller).
///
/// Pure in all four inputs so specialization caching can key off the result
/// directly.
pub fn resolve(
    setting: DebugSetting,
    caller_mode: Option<bool>,
    global_override: bool,
    default_mode: bool,
) -> bool {
    if global_override {
        return true;
    }
    match setting {
        DebugSetting::ForcedOn => true,
        DebugSetting::ForcedOff => false,
        DebugSetting::Unset => caller_mode.unwrap_or(default_mode),
    }
}
