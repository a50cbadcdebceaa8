pub const LANG_ID: &str = "slate-core@0.1.0";

/// Default effective mode for a top-level kernel whose debug setting is
/// unset and no global override is active: device assertions are checked.
///
/// This is a deliberate policy constant, not an inferred fallback; callers
/// can override it per request via `CompileOptions::default_debug`.
pub const DEFAULT_DEBUG: bool = true;

/// Process-wide debug override (`SLATE_DEBUG`).
///
/// When truthy it forces device assertions on in every kernel, including
/// kernels defined with `"debug": false`. There is no symmetric global
/// "off": an explicit `"debug": true` can never be suppressed from the
/// environment. Read once at compilation-request start
/// (`CompileOptions::from_env`) and immutable for that request.
pub fn global_debug_override() -> bool {
    env_truthy("SLATE_DEBUG")
}

fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !(v.is_empty() || v == "0" || v == "false" || v == "no" || v == "off")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::{env_truthy, global_debug_override};
    use crate::compile::CompileOptions;

    // One test covers the whole grammar so the env mutation stays
    // serialized; other tests set CompileOptions fields directly and never
    // read SLATE_DEBUG.
    #[test]
    fn slate_debug_truthy_grammar() {
        for v in ["1", "true", "on", "yes", "TRUE", " 1 ", "anything"] {
            std::env::set_var("SLATE_DEBUG", v);
            assert!(global_debug_override(), "SLATE_DEBUG={v:?} must be truthy");
            assert!(CompileOptions::from_env().global_debug_override);
        }
        for v in ["", "0", "false", "no", "off", "OFF", " False ", "\tno\t"] {
            std::env::set_var("SLATE_DEBUG", v);
            assert!(!global_debug_override(), "SLATE_DEBUG={v:?} must be falsy");
            assert!(!CompileOptions::from_env().global_debug_override);
        }

        std::env::remove_var("SLATE_DEBUG");
        assert!(!global_debug_override());
        assert!(!env_truthy("SLATE_DEBUG"));
    }
}

pub mod limits {
    pub const MAX_SOURCE_BYTES: usize = 1024 * 1024;
    pub const MAX_AST_NODES: usize = 100_000;
    pub const MAX_LANES: u32 = 1 << 20;

    pub fn max_ast_nodes() -> usize {
        match std::env::var("SLATE_MAX_AST_NODES") {
            Ok(v) => v
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .unwrap_or(MAX_AST_NODES),
            Err(_) => MAX_AST_NODES,
        }
    }

    pub fn max_lanes() -> u32 {
        match std::env::var("SLATE_MAX_LANES") {
            Ok(v) => v
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .unwrap_or(MAX_LANES),
            Err(_) => MAX_LANES,
        }
    }
}
