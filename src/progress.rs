use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

/// Spinner with fetched/assembled counters. A disabled reporter is a no-op,
/// so workers can call it unconditionally.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Option<Arc<ProgressInner>>,
}

struct ProgressInner {
    bar: ProgressBar,
    strips: u64,
    fetched: AtomicU64,
    assembled: AtomicU64,
    bytes: AtomicU64,
    finished: AtomicBool,
}

impl ProgressReporter {
    pub fn new(label: impl Into<String>, strips: usize, enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{prefix:.bold} {spinner} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_prefix(label.into());
        let inner = Arc::new(ProgressInner {
            bar,
            strips: strips as u64,
            fetched: AtomicU64::new(0),
            assembled: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        });
        inner.update_message();
        Self { inner: Some(inner) }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn record_fetched(&self, bytes: usize) {
        if let Some(inner) = &self.inner {
            inner.fetched.fetch_add(1, Ordering::Relaxed);
            inner.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
            inner.update_message();
        }
    }

    pub fn record_assembled(&self) {
        if let Some(inner) = &self.inner {
            inner.assembled.fetch_add(1, Ordering::Relaxed);
            inner.update_message();
        }
    }

    pub fn finish_success(&self) {
        if let Some(inner) = &self.inner {
            inner.finish_with_message("done");
        }
    }

    pub fn finish_error(&self) {
        if let Some(inner) = &self.inner {
            inner.finish_with_message("failed");
        }
    }
}

impl ProgressInner {
    fn update_message(&self) {
        let fetched = self.fetched.load(Ordering::Relaxed);
        let assembled = self.assembled.load(Ordering::Relaxed);
        let bytes = self.bytes.load(Ordering::Relaxed);
        self.bar.set_message(format!(
            "fetched {fetched}/{} ({}) - assembled {assembled}",
            self.strips,
            HumanBytes(bytes)
        ));
    }

    fn finish_with_message(&self, status: &str) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.bar
                .finish_with_message(format!("{status} - {}", self.bar.message()));
        }
    }
}
