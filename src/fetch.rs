use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use reqwest::blocking::Client;

use crate::config::{RetryPolicy, FRAGMENT_HEADER};
use crate::error::{PasteError, Result};
use crate::state::SharedState;
use crate::store::Deposit;

/// A mirror endpoint, stored as a URL template with `{image}` and `{strip}`
/// placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    template: String,
}

impl Mirror {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn url(&self, image: u8, strip: usize) -> String {
        self.template
            .replace("{image}", &image.to_string())
            .replace("{strip}", &strip.to_string())
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// What a mirror sent back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedStrip {
    /// Strip id the response declared, if it carried one.
    pub fragment: Option<usize>,
    pub body: Vec<u8>,
}

/// Where strip bytes come from. Implementations must refuse bodies larger
/// than `capacity` with [`PasteError::CapacityExceeded`].
pub trait StripSource: Send + Sync {
    fn fetch(&self, mirror: &Mirror, image: u8, strip: usize, capacity: usize)
        -> Result<FetchedStrip>;
}

/// Blocking HTTP source for the mirror pool.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PasteError::ResourceAllocation(format!("HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

impl StripSource for HttpSource {
    fn fetch(
        &self,
        mirror: &Mirror,
        image: u8,
        strip: usize,
        capacity: usize,
    ) -> Result<FetchedStrip> {
        let url = mirror.url(image, strip);
        let response = self
            .client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| PasteError::Fetch(format!("{url}: {err}")))?;

        let fragment = response
            .headers()
            .get(FRAGMENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<usize>().ok());

        if let Some(size) = response.content_length() {
            let size = usize::try_from(size).unwrap_or(usize::MAX);
            if size > capacity {
                return Err(PasteError::CapacityExceeded { size, capacity });
            }
        }

        // One byte past capacity is enough to tell an oversize body apart.
        let mut body = Vec::with_capacity(capacity.min(64 * 1024));
        response
            .take(capacity as u64 + 1)
            .read_to_end(&mut body)
            .map_err(|err| PasteError::Fetch(format!("{url}: {err}")))?;
        if body.len() > capacity {
            return Err(PasteError::CapacityExceeded {
                size: body.len(),
                capacity,
            });
        }

        Ok(FetchedStrip { fragment, body })
    }
}

/// Per-fetcher tallies, returned when the worker exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetcherSummary {
    /// Strips this worker stored and enqueued.
    pub stored: Vec<usize>,
    /// Responses dropped because their slot was already filled.
    pub duplicates: usize,
    /// Claimed ids given up on after the retry bound.
    pub abandoned: Vec<usize>,
    pub attempts: u64,
}

enum Claim {
    Filled,
    Abandoned,
}

pub struct StripFetcher<S: ?Sized> {
    worker: usize,
    shared: Arc<SharedState>,
    source: Arc<S>,
    mirrors: Arc<[Mirror]>,
    image: u8,
    retry: RetryPolicy,
}

impl<S: StripSource + ?Sized> StripFetcher<S> {
    pub fn new(
        worker: usize,
        shared: Arc<SharedState>,
        source: Arc<S>,
        mirrors: Arc<[Mirror]>,
        image: u8,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            worker,
            shared,
            source,
            mirrors,
            image,
            retry,
        }
    }

    /// Claims ids until none are left. Returns an error only if the hand-off
    /// queue was closed underneath it.
    pub fn run(self) -> Result<FetcherSummary> {
        let mut summary = FetcherSummary::default();

        while let Some(id) = self.shared.claim_next() {
            debug!("fetcher {} claimed strip {id}", self.worker);
            match self.fill(id, &mut summary)? {
                Claim::Filled => {}
                Claim::Abandoned => {
                    warn!(
                        "fetcher {} giving up on strip {id} after {} attempts",
                        self.worker, self.retry.max_attempts
                    );
                    summary.abandoned.push(id);
                }
            }
        }

        debug!(
            "fetcher {} done: {} stored, {} duplicates, {} attempts",
            self.worker,
            summary.stored.len(),
            summary.duplicates,
            summary.attempts
        );
        Ok(summary)
    }

    /// Retries `id` until its slot holds bytes or the attempt bound runs out.
    fn fill(&self, id: usize, summary: &mut FetcherSummary) -> Result<Claim> {
        let store = &self.shared.store;

        for attempt in 1..=self.retry.max_attempts {
            // A misrouted response from another worker may have filled it.
            if store.is_received(id) {
                return Ok(Claim::Filled);
            }

            let mirror = self.pick_mirror();
            summary.attempts += 1;

            let failure = match self
                .source
                .fetch(mirror, self.image, id, store.slot_capacity())
            {
                Ok(fetched) => {
                    let declared = fetched.fragment.unwrap_or(id);
                    let size = fetched.body.len();
                    match store.deposit(declared, fetched.body) {
                        Ok(Deposit::Stored) => {
                            self.shared.queue.push(declared)?;
                            self.shared.progress.record_fetched(size);
                            summary.stored.push(declared);
                            if declared == id {
                                return Ok(Claim::Filled);
                            }
                            format!("{mirror} answered with strip {declared}")
                        }
                        Ok(Deposit::Duplicate) => {
                            summary.duplicates += 1;
                            if declared == id {
                                return Ok(Claim::Filled);
                            }
                            format!("{mirror} answered with already stored strip {declared}")
                        }
                        Err(err) => err.to_string(),
                    }
                }
                Err(err) => err.to_string(),
            };

            warn!(
                "fetcher {}: strip {id} attempt {attempt}/{} failed: {failure}",
                self.worker, self.retry.max_attempts
            );
            let delay = self.retry.delay_after(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }

        if store.is_received(id) {
            Ok(Claim::Filled)
        } else {
            Ok(Claim::Abandoned)
        }
    }

    fn pick_mirror(&self) -> &Mirror {
        let index = rand::rng().random_range(0..self.mirrors.len());
        &self.mirrors[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_template_substitution() {
        let mirror = Mirror::new("http://host:2530/image?img={image}&part={strip}");
        assert_eq!(mirror.url(2, 17), "http://host:2530/image?img=2&part=17");
    }

    #[test]
    fn template_without_strip_placeholder_is_left_alone() {
        let mirror = Mirror::new("http://host:2520/image?img={image}");
        assert_eq!(mirror.url(3, 9), "http://host:2520/image?img=3");
    }
}
