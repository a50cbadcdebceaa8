pub mod ast;
pub mod cache;
pub mod compile;
pub mod condeval;
pub mod debug;
pub mod diagnostics;
pub mod driver;
pub mod emit;
pub mod language;
pub mod program;
pub mod slateast;
pub mod types;
pub mod validate;

mod fingerprint;
