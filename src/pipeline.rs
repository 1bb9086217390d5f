use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use rayon::ThreadPoolBuilder;

use crate::assemble::{AssemblerSummary, SkippedStrip, StripAssembler};
use crate::config::RunConfig;
use crate::container::Header;
use crate::error::PasteError;
use crate::fetch::{FetcherSummary, Mirror, StripFetcher, StripSource};
use crate::progress::ProgressReporter;
use crate::state::SharedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Fetching,
    Draining,
    Assembling,
    Finalizing,
    Done,
    Failed,
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    /// Strip ids handed out to fetchers.
    pub claimed: usize,
    /// Slots that ended up holding bytes.
    pub stored: usize,
    /// Ids whose rows are in the output, ascending.
    pub assembled: Vec<usize>,
    pub skipped: Vec<SkippedStrip>,
    /// Ids fetchers gave up on.
    pub abandoned: Vec<usize>,
    pub duplicates: usize,
    pub header: Header,
    pub raw_len: usize,
    pub output: PathBuf,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.assembled.len() == self.claimed
    }
}

type FetcherHandle = JoinHandle<crate::error::Result<FetcherSummary>>;

/// Spawns up to `count` workers, stopping at the first spawn failure. The
/// handles of workers already running are returned alongside the error.
fn start_workers<T, F>(count: usize, mut spawn: F) -> (Vec<JoinHandle<T>>, Option<PasteError>)
where
    F: FnMut(usize) -> io::Result<JoinHandle<T>>,
{
    let mut handles = Vec::with_capacity(count);
    for worker in 0..count {
        match spawn(worker) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                let err = PasteError::ResourceAllocation(format!("fetcher thread {worker}: {err}"));
                return (handles, Some(err));
            }
        }
    }
    (handles, None)
}

pub struct Orchestrator<S: ?Sized> {
    config: RunConfig,
    source: Arc<S>,
    progress: ProgressReporter,
    state: RunState,
}

impl<S: StripSource + ?Sized + 'static> Orchestrator<S> {
    pub fn new(config: RunConfig, source: Arc<S>) -> Self {
        Self {
            config,
            source,
            progress: ProgressReporter::disabled(),
            state: RunState::Init,
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs to `Done`, or to `Failed` on a fatal error.
    pub fn run(&mut self) -> Result<RunReport> {
        let result = self.execute();
        match &result {
            Ok(_) => self.progress.finish_success(),
            Err(err) => {
                self.transition(RunState::Failed);
                warn!("run failed: {err:#}");
                self.progress.finish_error();
            }
        }
        result
    }

    fn execute(&mut self) -> Result<RunReport> {
        let started = Instant::now();
        let config = self.config.clone();
        config.validate()?;

        let mirrors: Arc<[Mirror]> = config.mirrors.iter().map(Mirror::new).collect();
        let shared = Arc::new(SharedState::new(
            config.strips,
            config.strip_capacity,
            config.queue_capacity,
            config.consumers,
            self.progress.clone(),
        )?);

        // Assemblers start first so they drain the queue while fetching runs.
        let (summary_tx, summary_rx) =
            crossbeam_channel::bounded::<AssemblerSummary>(config.consumers);
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.consumers)
            .thread_name(|index| format!("paster-assemble-{index}"))
            .build()
            .map_err(|err| PasteError::ResourceAllocation(format!("assembler pool: {err}")))?;

        for worker in 0..config.consumers {
            let assembler = StripAssembler::new(worker, Arc::clone(&shared), config.consumer_delay);
            let summary_tx = summary_tx.clone();
            pool.spawn(move || {
                let _ = summary_tx.send(assembler.run());
            });
        }
        drop(summary_tx);

        self.transition(RunState::Fetching);
        // Fetchers that did start are joined even if a later spawn failed.
        let (fetchers, spawn_error) = self.spawn_fetchers(&shared, &mirrors);

        let mut fetch_errors = Vec::new();
        let mut fetched = FetcherSummary::default();
        for handle in fetchers {
            match handle.join() {
                Ok(Ok(summary)) => {
                    fetched.stored.extend(summary.stored);
                    fetched.duplicates += summary.duplicates;
                    fetched.abandoned.extend(summary.abandoned);
                    fetched.attempts += summary.attempts;
                }
                Ok(Err(err)) => fetch_errors.push(anyhow!(err)),
                Err(_) => fetch_errors.push(anyhow!("fetcher thread panicked")),
            }
        }

        debug!(
            "fetchers done: {} stored after {} attempts, {} duplicates",
            fetched.stored.len(),
            fetched.attempts,
            fetched.duplicates
        );

        self.transition(RunState::Draining);
        shared.queue.close();

        self.transition(RunState::Assembling);
        let mut assembled = Vec::new();
        let mut skipped = Vec::new();
        for summary in summary_rx.iter() {
            assembled.extend(summary.assembled);
            skipped.extend(summary.skipped);
        }
        drop(pool);
        debug!(
            "assemblers decoded {} strips and dropped {}",
            assembled.len(),
            skipped.len()
        );

        if let Some(err) = spawn_error {
            return Err(err.into());
        }
        if let Some(err) = fetch_errors.into_iter().next() {
            return Err(err.context("fetcher failed"));
        }

        self.transition(RunState::Finalizing);
        let buffer = shared.take_assembly();
        debug!(
            "{} strips accumulated, {} rows, {} raw bytes",
            buffer.len(),
            buffer.height(),
            buffer.raw_len()
        );
        let Some(output) = buffer.finish(config.level)? else {
            bail!("none of the {} strips could be assembled", config.strips);
        };

        let file = File::create(&config.output)
            .with_context(|| format!("failed to create {}", config.output.display()))?;
        let mut writer = BufWriter::new(file);
        output
            .container
            .write_to(&mut writer)
            .with_context(|| format!("failed to write {}", config.output.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", config.output.display()))?;

        skipped.extend(output.skipped);
        skipped.sort_by_key(|s| s.id);
        fetched.abandoned.sort_unstable();

        let report = RunReport {
            state: RunState::Done,
            claimed: shared.claimed(),
            stored: shared.store.received(),
            assembled: output.strips,
            skipped,
            abandoned: fetched.abandoned,
            duplicates: fetched.duplicates,
            header: output.header,
            raw_len: output.raw_len,
            output: config.output.clone(),
            elapsed: started.elapsed(),
        };
        self.transition(RunState::Done);
        info!(
            "wrote {} ({}) from {}/{} strips in {:.3}s",
            report.output.display(),
            report.header,
            report.assembled.len(),
            report.claimed,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    fn spawn_fetchers(
        &self,
        shared: &Arc<SharedState>,
        mirrors: &Arc<[Mirror]>,
    ) -> (Vec<FetcherHandle>, Option<PasteError>) {
        start_workers(self.config.producers, |worker| {
            let fetcher = StripFetcher::new(
                worker,
                Arc::clone(shared),
                Arc::clone(&self.source),
                Arc::clone(mirrors),
                self.config.image,
                self.config.retry,
            );
            thread::Builder::new()
                .name(format!("paster-fetch-{worker}"))
                .spawn(move || fetcher.run())
        })
    }

    fn transition(&mut self, next: RunState) {
        debug!("run state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_spawn_keeps_running_workers() {
        let (handles, err) = start_workers(4, |worker| {
            if worker == 2 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "no more threads"));
            }
            thread::Builder::new().spawn(move || worker * 10)
        });

        assert!(matches!(
            err,
            Some(PasteError::ResourceAllocation(ref msg)) if msg.contains("thread 2")
        ));
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![0, 10]);
    }

    #[test]
    fn all_workers_start_when_spawning_succeeds() {
        let (handles, err) = start_workers(3, |worker| thread::Builder::new().spawn(move || worker));
        assert!(err.is_none());
        assert_eq!(handles.len(), 3);
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
