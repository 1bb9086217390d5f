use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use atty::Stream;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use strip_paster::config::{self, RetryPolicy, RunConfig};
use strip_paster::{HttpSource, Orchestrator, ProgressReporter, RunReport};

/// Fetch the strips of a remote image from a mirror pool and paste them into one PNG.
#[derive(Debug, Parser)]
#[command(name = "paster", version, about = "Concurrent strip fetcher and PNG assembler")]
struct Args {
    /// Slots in the hand-off queue between fetchers and assemblers (B).
    #[arg(value_name = "B")]
    queue_capacity: usize,

    /// Number of fetcher threads (P).
    #[arg(value_name = "P")]
    producers: usize,

    /// Number of assembler workers (C).
    #[arg(value_name = "C")]
    consumers: usize,

    /// Milliseconds each assembler sleeps after taking a strip (X).
    #[arg(value_name = "X")]
    delay_ms: u64,

    /// Which remote image to rebuild, 1 to 3 (N).
    #[arg(value_name = "N")]
    image: u8,

    /// Where to write the assembled image.
    #[arg(short = 'o', long, default_value = config::DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Number of strips the image is split into.
    #[arg(long, value_name = "COUNT", default_value_t = config::DEFAULT_STRIPS)]
    strips: usize,

    /// Largest strip body accepted from a mirror (bytes).
    #[arg(long, value_name = "BYTES", default_value_t = config::DEFAULT_STRIP_CAPACITY)]
    strip_capacity: usize,

    /// Mirror URL template with {image} and {strip} placeholders; repeat to build a pool.
    #[arg(long = "mirror", value_name = "URL")]
    mirrors: Vec<String>,

    /// Attempts per strip before a fetcher gives up on it.
    #[arg(long, value_name = "N", default_value_t = RetryPolicy::default().max_attempts)]
    max_attempts: u32,

    /// Linear backoff step between attempts (milliseconds).
    #[arg(long, value_name = "MS", default_value_t = 25)]
    retry_backoff_ms: u64,

    /// Per-request timeout (seconds).
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    timeout_secs: u64,

    /// Disable progress reporting.
    #[arg(long)]
    no_progress: bool,
}

impl Args {
    fn into_config(self) -> RunConfig {
        let defaults = RunConfig::default();
        RunConfig {
            queue_capacity: self.queue_capacity,
            producers: self.producers,
            consumers: self.consumers,
            consumer_delay: Duration::from_millis(self.delay_ms),
            image: self.image,
            strips: self.strips,
            strip_capacity: self.strip_capacity,
            mirrors: if self.mirrors.is_empty() {
                defaults.mirrors
            } else {
                self.mirrors
            },
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff_step: Duration::from_millis(self.retry_backoff_ms),
                ..defaults.retry
            },
            request_timeout: Duration::from_secs(self.timeout_secs),
            output: self.output,
            ..defaults
        }
    }
}

fn progress_allowed(no_progress: bool) -> bool {
    !no_progress && atty::is(Stream::Stderr)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let show_progress = progress_allowed(args.no_progress);
    let config = args.into_config();
    if let Err(err) = config.validate() {
        Args::command()
            .error(ErrorKind::ValueValidation, err.to_string())
            .exit();
    }

    run(config, show_progress)
}

fn run(config: RunConfig, show_progress: bool) -> Result<()> {
    let progress = ProgressReporter::new("pasting", config.strips, show_progress);
    let source = Arc::new(HttpSource::new(config.request_timeout)?);
    let report = Orchestrator::new(config, source)
        .with_progress(progress)
        .run()?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    if !report.is_complete() {
        println!(
            "assembled {} of {} strips; output is missing rows",
            report.assembled.len(),
            report.claimed
        );
        for id in &report.abandoned {
            println!("  strip {id}: never fetched");
        }
        for skipped in &report.skipped {
            println!("  {skipped}");
        }
    }
    println!(
        "wrote {} ({}x{})",
        report.output.display(),
        report.header.width,
        report.header.height
    );
    println!(
        "paster execution time: {:.3} seconds",
        report.elapsed.as_secs_f64()
    );
}
