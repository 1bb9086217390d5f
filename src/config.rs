use std::path::PathBuf;
use std::time::Duration;

use crate::compression::CompressionLevel;
use crate::error::{PasteError, Result};

/// Strips per remote image.
pub const DEFAULT_STRIPS: usize = 50;

/// Largest strip body a fetcher will accept.
pub const DEFAULT_STRIP_CAPACITY: usize = 30 * 1024;

/// Number of remote images the mirrors serve (selected with `1..=IMAGE_COUNT`).
pub const IMAGE_COUNT: u8 = 3;

pub const DEFAULT_OUTPUT: &str = "all.png";

/// Response header naming the strip a mirror actually returned.
pub const FRAGMENT_HEADER: &str = "X-Ece252-Fragment";

/// `{image}` and `{strip}` are substituted per request.
pub const DEFAULT_MIRRORS: [&str; 3] = [
    "http://ece252-1.uwaterloo.ca:2530/image?img={image}&part={strip}",
    "http://ece252-2.uwaterloo.ca:2530/image?img={image}&part={strip}",
    "http://ece252-3.uwaterloo.ca:2530/image?img={image}&part={strip}",
];

/// How often a fetcher retries one claimed strip before giving up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_step: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Linear backoff after the `attempt`-th failure (1-based), capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step
            .saturating_mul(attempt)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 32,
            backoff_step: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// B: slots in the hand-off queue.
    pub queue_capacity: usize,
    /// P: fetcher threads.
    pub producers: usize,
    /// C: assembler workers.
    pub consumers: usize,
    /// X: pause an assembler takes after each pop.
    pub consumer_delay: Duration,
    /// N: which remote image to rebuild.
    pub image: u8,
    pub strips: usize,
    pub strip_capacity: usize,
    pub mirrors: Vec<String>,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub level: CompressionLevel,
    pub output: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            producers: 1,
            consumers: 1,
            consumer_delay: Duration::ZERO,
            image: 1,
            strips: DEFAULT_STRIPS,
            strip_capacity: DEFAULT_STRIP_CAPACITY,
            mirrors: DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            level: CompressionLevel::Default,
            output: PathBuf::from(DEFAULT_OUTPUT),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.strips == 0 {
            return invalid("strip count must be at least 1");
        }
        if self.queue_capacity == 0 || self.queue_capacity > self.strips {
            return invalid(format!(
                "queue capacity must be within 1..={}, got {}",
                self.strips, self.queue_capacity
            ));
        }
        if self.producers == 0 {
            return invalid("at least one producer is required");
        }
        if self.consumers == 0 {
            return invalid("at least one consumer is required");
        }
        if self.image == 0 || self.image > IMAGE_COUNT {
            return invalid(format!(
                "image must be within 1..={IMAGE_COUNT}, got {}",
                self.image
            ));
        }
        if self.strip_capacity == 0 {
            return invalid("strip capacity must be greater than zero");
        }
        if self.mirrors.is_empty() {
            return invalid("at least one mirror is required");
        }
        if self.retry.max_attempts == 0 {
            return invalid("max attempts must be at least 1");
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> Result<()> {
    Err(PasteError::InvalidConfig(reason.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn queue_capacity_is_bounded_by_strip_count() {
        let config = RunConfig {
            strips: 10,
            queue_capacity: 11,
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(PasteError::InvalidConfig(_))));

        let config = RunConfig { queue_capacity: 10, ..config };
        config.validate().unwrap();
    }

    #[test]
    fn image_selector_range() {
        for (image, ok) in [(0, false), (1, true), (3, true), (4, false)] {
            let config = RunConfig { image, ..RunConfig::default() };
            assert_eq!(config.validate().is_ok(), ok, "image {image}");
        }
    }

    #[test]
    fn worker_counts_must_be_positive() {
        let no_producers = RunConfig { producers: 0, ..RunConfig::default() };
        let no_consumers = RunConfig { consumers: 0, ..RunConfig::default() };
        assert!(no_producers.validate().is_err());
        assert!(no_consumers.validate().is_err());
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(25));
        assert_eq!(policy.delay_after(4), Duration::from_millis(100));
        assert_eq!(policy.delay_after(1000), Duration::from_secs(1));
        assert_eq!(RetryPolicy::immediate(3).delay_after(2), Duration::ZERO);
    }
}
