// src/main.rs

use std::io::Write;

use anyhow::Context;
use prograde::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("prograde error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    let output = args.output.clone();

    let Some(report) = run(args).await? else {
        return Ok(0);
    };

    let json = report.to_json_pretty()?;
    match output {
        Some(path) => std::fs::write(&path, json + "\n")
            .with_context(|| format!("writing report to {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }

    // Conventional exit status for an interrupted run.
    Ok(if report.meta.cancelled { 130 } else { 0 })
}
