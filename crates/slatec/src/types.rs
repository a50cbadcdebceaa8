use serde::{Deserialize, Serialize};

/// Kernel parameter types.
///
/// Buffers are shared i32 arrays bound at launch; scalars are per-launch
/// values unless the parameter is marked constexpr, in which case the value
/// is fixed at specialization time and participates in the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ty {
    I32,
    BufI32,
}

impl Ty {
    pub fn parse_named(name: &str) -> Option<Self> {
        match name {
            "i32" => Some(Ty::I32),
            "buf_i32" => Some(Ty::BufI32),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Ty::I32 => "i32",
            Ty::BufI32 => "buf_i32",
        }
    }
}
