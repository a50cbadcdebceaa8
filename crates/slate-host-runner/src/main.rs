use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use slate_contracts::SLATE_HOST_RUNNER_REPORT_SCHEMA_VERSION;
use slate_host_runner::{launch, parse_launch_args, LaunchConfig};
use slatec::compile::{self, CompileOptions};

#[derive(Parser)]
#[command(name = "slate-run")]
#[command(about = "Compile a slate kernel and launch it on the host interpreter.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    Launch {
        #[arg(long)]
        program: PathBuf,
        #[arg(long)]
        kernel: String,
        /// Constexpr binding, repeatable: NAME=VALUE.
        #[arg(long = "constexpr", value_name = "NAME=VALUE")]
        constexpr: Vec<String>,
        /// Launch-argument JSON file: {"args": [{"buf_i32": [..]}, ...]}.
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 128)]
        lanes: u32,
        #[arg(long, default_value_t = 1_000_000)]
        lane_fuel: u64,
        #[arg(long)]
        report_json: bool,
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
        Cmd::Launch {
            program,
            kernel,
            constexpr,
            input,
            lanes,
            lane_fuel,
            report_json,
        } => {
            let program_bytes = std::fs::read(&program)
                .with_context(|| format!("read program: {}", program.display()))?;
            let input_bytes = std::fs::read(&input)
                .with_context(|| format!("read launch args: {}", input.display()))?;

            let mut bindings = std::collections::BTreeMap::new();
            for a in &constexpr {
                let Some((name, value)) = a.split_once('=') else {
                    anyhow::bail!("--constexpr expects NAME=VALUE, got {a:?}");
                };
                let value: i64 = value.parse().with_context(|| {
                    format!("--constexpr {name}: value must be an i64, got {value:?}")
                })?;
                bindings.insert(name.to_string(), value);
            }

            let options = CompileOptions::from_env();
            let parsed = compile::parse_program(&program_bytes)
                .map_err(|e| anyhow::anyhow!("compile failed: {e}"))?;
            let module = compile::compile_kernel(&parsed, &kernel, &bindings, &options)
                .map_err(|e| anyhow::anyhow!("compile failed: {e}"))?;

            let args = parse_launch_args(&input_bytes)?;
            let config = LaunchConfig {
                lanes,
                lane_fuel,
                max_trap_reports: 16,
            };
            let outcome = launch(&module, args, &config)?;

            if report_json {
                let report = serde_json::json!({
                    "schema_version": SLATE_HOST_RUNNER_REPORT_SCHEMA_VERSION,
                    "ok": outcome.ok,
                    "entry_fingerprint": module.entry.fingerprint_hex(),
                    "traps": outcome.traps,
                    "buffers": outcome.buffers,
                });
                println!("{}", serde_json::to_string(&report)?);
            } else if outcome.ok {
                println!("ok ({lanes} lane(s))");
            } else {
                for t in &outcome.traps {
                    eprintln!("trap: lane {} in {}: {} [{}]", t.lane, t.kernel, t.message, t.loc);
                }
            }

            Ok(if outcome.ok {
                std::process::ExitCode::SUCCESS
            } else {
                std::process::ExitCode::from(1)
            })
        }
    }
}
