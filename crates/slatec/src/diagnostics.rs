use serde::Serialize;
use slate_contracts::SLATEC_REPORT_SCHEMA_VERSION;

use crate::compile::{CompileErrorKind, CompilerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Resolve,
    Lower,
    Launch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub schema_version: String,
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn ok() -> Self {
        Self {
            schema_version: SLATEC_REPORT_SCHEMA_VERSION.to_string(),
            ok: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, mut diagnostics: Vec<Diagnostic>) -> Self {
        diagnostics.sort_by(|a, b| {
            let al = a.loc.as_deref().unwrap_or("");
            let bl = b.loc.as_deref().unwrap_or("");
            al.cmp(bl)
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.message.cmp(&b.message))
        });
        self.ok = diagnostics.iter().all(|d| d.severity != Severity::Error);
        self.diagnostics = diagnostics;
        self
    }
}

pub fn error_code(kind: CompileErrorKind) -> &'static str {
    match kind {
        CompileErrorKind::Parse => "SLC0001",
        CompileErrorKind::Typing => "SLC0002",
        CompileErrorKind::StaticAssertViolation => "SLC0010",
        CompileErrorKind::StaticAssertUnresolvable => "SLC0011",
        CompileErrorKind::Unsupported => "SLC0003",
        CompileErrorKind::Budget => "SLC0004",
        CompileErrorKind::Internal => "SLC0099",
    }
}

pub fn diagnostic_from_error(err: &CompilerError) -> Diagnostic {
    let stage = match err.kind {
        CompileErrorKind::Parse => Stage::Parse,
        CompileErrorKind::StaticAssertViolation | CompileErrorKind::StaticAssertUnresolvable => {
            Stage::Lower
        }
        _ => Stage::Resolve,
    };
    Diagnostic {
        code: error_code(err.kind).to_string(),
        severity: Severity::Error,
        stage,
        message: err.message.clone(),
        loc: None,
        notes: Vec::new(),
    }
}
