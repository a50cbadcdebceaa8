use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use slatec::compile::{self, CompileOptions};
use slatec::diagnostics;
use slatec::language;

#[derive(Parser)]
#[command(name = "slatec")]
#[command(about = "Slate kernel compiler (slate.ast -> device module).", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    LangId,
    /// Compile an entry kernel and everything it calls into a module dump.
    Compile {
        #[arg(long)]
        program: PathBuf,
        #[arg(long)]
        kernel: String,
        /// Constexpr binding, repeatable: NAME=VALUE.
        #[arg(long = "constexpr", value_name = "NAME=VALUE")]
        constexpr: Vec<String>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        report_json: bool,
    },
    /// Print the effective debug mode a kernel would resolve to.
    Resolve {
        #[arg(long)]
        program: PathBuf,
        #[arg(long)]
        kernel: String,
        /// Caller context: "on", "off", or "top" (no caller).
        #[arg(long, default_value = "top")]
        caller_mode: String,
    },
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::LangId => {
            println!("{}", language::LANG_ID);
            Ok(std::process::ExitCode::SUCCESS)
        }
        Cmd::Compile {
            program,
            kernel,
            constexpr,
            out,
            report_json,
        } => {
            let bytes = std::fs::read(&program)
                .with_context(|| format!("read program: {}", program.display()))?;
            let constexpr = parse_constexpr_args(&constexpr)?;
            let options = CompileOptions::from_env();

            let result = compile::parse_program(&bytes)
                .and_then(|p| compile::compile_kernel(&p, &kernel, &constexpr, &options));

            match result {
                Ok(module) => {
                    if let Some(out) = &out {
                        let dump = module
                            .to_json()
                            .map_err(|e| anyhow::anyhow!("{e}"))?;
                        std::fs::write(out, serde_json::to_vec_pretty(&dump)?)
                            .with_context(|| format!("write module: {}", out.display()))?;
                    }
                    if report_json {
                        print_json(&diagnostics::Report::ok())?;
                    } else {
                        println!(
                            "compiled {} specialization(s), entry fingerprint {}",
                            module.artifacts.len(),
                            module.entry.fingerprint_hex()
                        );
                    }
                    Ok(std::process::ExitCode::SUCCESS)
                }
                Err(err) => {
                    if report_json {
                        let report = diagnostics::Report::ok()
                            .with_diagnostics(vec![diagnostics::diagnostic_from_error(&err)]);
                        print_json(&report)?;
                        return Ok(std::process::ExitCode::from(1));
                    }
                    anyhow::bail!("{err}");
                }
            }
        }
        Cmd::Resolve {
            program,
            kernel,
            caller_mode,
        } => {
            let bytes = std::fs::read(&program)
                .with_context(|| format!("read program: {}", program.display()))?;
            let caller_mode = match caller_mode.as_str() {
                "on" => Some(true),
                "off" => Some(false),
                "top" => None,
                other => anyhow::bail!("--caller-mode must be on|off|top, got {other:?}"),
            };
            let options = CompileOptions::from_env();
            let p = compile::parse_program(&bytes).map_err(|e| anyhow::anyhow!("{e}"))?;
            let mode = compile::effective_mode(&p, &kernel, caller_mode, &options)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", if mode { "on" } else { "off" });
            Ok(std::process::ExitCode::SUCCESS)
        }
    }
}

fn parse_constexpr_args(args: &[String]) -> Result<std::collections::BTreeMap<String, i64>> {
    let mut out = std::collections::BTreeMap::new();
    for a in args {
        let Some((name, value)) = a.split_once('=') else {
            anyhow::bail!("--constexpr expects NAME=VALUE, got {a:?}");
        };
        let value: i64 = value
            .parse()
            .with_context(|| format!("--constexpr {name}: value must be an i64, got {value:?}"))?;
        if out.insert(name.to_string(), value).is_some() {
            anyhow::bail!("duplicate --constexpr binding: {name:?}");
        }
    }
    Ok(out)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
