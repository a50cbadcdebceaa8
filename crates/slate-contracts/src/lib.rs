//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings
//! that appear in machine-readable I/O (kernel AST files, compile reports,
//! module dumps, launch reports).

pub const SLATE_AST_SCHEMA_VERSION: &str = "slate.ast@0.1.0";
pub const SLATE_MODULE_SCHEMA_VERSION: &str = "slate.module@0.1.0";

pub const SLATEC_REPORT_SCHEMA_VERSION: &str = "slatec.report@0.1.0";
pub const SLATE_HOST_RUNNER_REPORT_SCHEMA_VERSION: &str = "slate-host-runner.report@0.1.0";
