use crate::ast::Expr;
use crate::debug::DebugSetting;
use crate::types::Ty;

#[derive(Debug, Clone)]
pub struct KernelParam {
    pub name: String,
    pub ty: Ty,
    pub constexpr: bool,
}

/// One kernel definition.
///
/// `debug` is fixed at definition time and never mutated afterwards; the
/// effective mode of a given specialization is recomputed per compile by the
/// driver, not stored here.
#[derive(Debug, Clone)]
pub struct KernelDef {
    pub name: String,
    pub debug: DebugSetting,
    pub params: Vec<KernelParam>,
    pub body: Expr,
}

impl KernelDef {
    pub fn param(&self, name: &str) -> Option<&KernelParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn constexpr_params(&self) -> impl Iterator<Item = &KernelParam> {
        self.params.iter().filter(|p| p.constexpr)
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub kernels: Vec<KernelDef>,
}

impl Program {
    pub fn kernel(&self, name: &str) -> Option<&KernelDef> {
        self.kernels.iter().find(|k| k.name == name)
    }

    pub fn node_count(&self) -> usize {
        self.kernels.iter().map(|k| k.body.node_count()).sum()
    }
}
