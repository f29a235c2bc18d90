use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod scanner;

use scanner::Scanner;

/// Writes a JSON index of the functions declared in a JavaScript/HTML file
#[derive(Parser)]
#[command(name = "fn-index")]
#[command(version, about, long_about = None)]
struct Cli {
    /// File to scan
    input: PathBuf,

    /// Output file (defaults to functions-index.json next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = cli
        .output
        .unwrap_or_else(|| cli.input.with_file_name("functions-index.json"));

    println!("Scanning {}...", cli.input.display());
    let index = Scanner::new()?.scan_file(&cli.input)?;
    debug!("Parsed {} declarations", index.functions.len());

    index.write_to(&output)?;
    println!("Found {} functions", index.total_functions);
    println!("Saved to {}", output.display());

    let summary = index.summary();
    println!();
    println!("Summary:");
    println!("  Total: {}", summary.total);
    println!("  Async: {}", summary.async_count);
    println!("  Arrow functions: {}", summary.arrow);
    println!("  Regular functions: {}", summary.regular);

    Ok(())
}
