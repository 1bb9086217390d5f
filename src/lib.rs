//! Rebuilds one PNG from strips fetched concurrently off a pool of mirrors.
//!
//! Fetchers claim strip ids, download each strip (itself a tiny PNG) and hand
//! the id to assemblers through a bounded queue. Assemblers verify and
//! inflate the strip; once everyone is done, the scanlines are stacked in
//! strip order and written out as a single `IHDR`/`IDAT`/`IEND` document.

pub mod assemble;
pub mod checksum;
pub mod compression;
pub mod config;
pub mod container;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod state;
pub mod store;

pub use assemble::{decode_strip, AssemblyBuffer, DecodedStrip, SkippedStrip};
pub use compression::CompressionLevel;
pub use config::{RetryPolicy, RunConfig};
pub use container::{Chunk, Container, Header};
pub use error::{PasteError, Result};
pub use fetch::{FetchedStrip, HttpSource, Mirror, StripSource};
pub use pipeline::{Orchestrator, RunReport, RunState};
pub use progress::ProgressReporter;
