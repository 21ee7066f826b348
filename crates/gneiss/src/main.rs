use anyhow::{Context, Result};
use clap::Parser;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

/// gneiss — WebAssembly-to-SSA lowering frontend.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input WebAssembly binary (.wasm)
    input: PathBuf,

    /// Only print the function at this (local) index
    #[arg(long)]
    func: Option<usize>,

    /// Output file for the SSA text
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    eprintln!("gneiss: lowering {}", cli.input.display());

    let wasm_bytes =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;

    let functions = gneiss::lower(&wasm_bytes).context("lowering failed")?;

    let mut text = String::new();
    for (index, function) in functions.iter().enumerate() {
        if cli.func.is_some_and(|only| only != index) {
            continue;
        }
        writeln!(text, "function {index}:")?;
        writeln!(text, "{function}")?;
    }

    if let Some(output_path) = cli.output {
        fs::write(&output_path, &text)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        eprintln!("gneiss: wrote {}", output_path.display());
    } else {
        print!("{text}");
    }

    eprintln!("gneiss: lowered {} function(s)", functions.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["gneiss", "input.wasm"]);
        assert!(cli.func.is_none());
        assert!(cli.output.is_none());
    }
}
