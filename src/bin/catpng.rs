use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;

use strip_paster::config::DEFAULT_OUTPUT;
use strip_paster::{decode_strip, AssemblyBuffer, CompressionLevel};

/// Stack PNG strips vertically, in argument order, into one PNG.
#[derive(Debug, Parser)]
#[command(name = "catpng", version, about = "Concatenate PNG strips into one image")]
struct Args {
    /// Strip files to concatenate, top to bottom.
    #[arg(value_name = "PNG_FILE", required = true)]
    inputs: Vec<PathBuf>,

    /// Where to write the concatenated image.
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut buffer = AssemblyBuffer::default();
    for (index, path) in args.inputs.iter().enumerate() {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("cannot open {}: {err}", path.display());
                continue;
            }
        };
        match decode_strip(&bytes) {
            Ok(strip) => buffer.append(index, strip),
            Err(err) => warn!("skipping {}: {err}", path.display()),
        }
    }

    let Some(assembled) = buffer.finish(CompressionLevel::Default)? else {
        eprintln!("No valid PNG files found.");
        return Ok(());
    };

    for skipped in &assembled.skipped {
        warn!("skipping {}: {}", args.inputs[skipped.id].display(), skipped.reason);
    }

    let file = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let mut writer = BufWriter::new(file);
    assembled
        .container
        .write_to(&mut writer)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    writer.flush().context("failed to flush output")?;

    println!(
        "wrote {} from {} strips ({})",
        args.output.display(),
        assembled.strips.len(),
        assembled.header
    );
    Ok(())
}
