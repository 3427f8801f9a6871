use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::path::PathBuf;
use wasmobj::{dump, parse_object, DumpOptions};

/// wasmobj: inspect relocatable WebAssembly object files.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input WebAssembly object file (.o / .wasm)
    input: PathBuf,

    /// Print section headers (the default when nothing else is selected)
    #[arg(long)]
    headers: bool,

    /// Print the linking symbol table
    #[arg(long)]
    symbols: bool,

    /// Print relocation records
    #[arg(long)]
    relocs: bool,

    /// Print every listing
    #[arg(long)]
    all: bool,

    /// Output file (stdout when omitted)
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl Cli {
    fn dump_options(&self) -> DumpOptions {
        if self.all {
            return DumpOptions::all();
        }
        DumpOptions {
            headers: self.headers,
            symbols: self.symbols,
            relocs: self.relocs,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    info!("reading {}", cli.input.display());
    let bytes =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;

    let obj = parse_object(&bytes)
        .with_context(|| format!("failed to parse {}", cli.input.display()))?;
    info!(
        "parsed {} sections, {} symbols",
        obj.sections().len(),
        obj.num_symbols()
    );

    let listing = dump(&obj, &cli.dump_options());

    if let Some(output_path) = cli.output {
        fs::write(&output_path, &listing)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        info!("wrote {}", output_path.display());
    } else {
        print!("{listing}");
    }

    Ok(())
}
