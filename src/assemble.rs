use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::checksum;
use crate::compression::{self, CompressionLevel};
use crate::container::{self, Chunk, Container, Header, SIGNATURE};
use crate::error::{PasteError, Result};
use crate::queue::Handoff;
use crate::state::SharedState;

/// A strip after decompression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStrip {
    pub header: Header,
    pub raw: Vec<u8>,
}

/// Validates and inflates one strip document.
pub fn decode_strip(bytes: &[u8]) -> Result<DecodedStrip> {
    if !container::parse_signature(bytes) {
        return Err(PasteError::InvalidSignature);
    }
    let header = container::read_header(&mut Cursor::new(bytes), SIGNATURE.len() as u64)?;

    let parsed = Container::from_bytes(bytes)?;
    verify(parsed.header_chunk())?;
    verify(parsed.data_chunk())?;

    let expected = header.raw_len_hint();
    let raw = compression::inflate_within(parsed.data_chunk().payload(), expected, expected)?;
    if raw.len() != expected {
        return Err(PasteError::Decompression(format!(
            "inflated {} bytes but a {}x{} strip needs {expected}",
            raw.len(),
            header.width,
            header.height
        )));
    }

    Ok(DecodedStrip { header, raw })
}

fn verify(chunk: &Chunk) -> Result<()> {
    if checksum::verify(chunk) {
        return Ok(());
    }
    Err(PasteError::ChecksumMismatch {
        tag: chunk.tag_name(),
        stored: chunk.crc(),
        computed: checksum::chunk_crc(chunk.tag(), chunk.payload()),
    })
}

/// A strip that did not make it into the output, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedStrip {
    pub id: usize,
    pub reason: String,
}

impl fmt::Display for SkippedStrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strip {}: {}", self.id, self.reason)
    }
}

/// Decoded strips keyed by id, plus running totals. Dequeue order is up to
/// the scheduler; `finish` walks strips in id order.
#[derive(Debug, Default)]
pub struct AssemblyBuffer {
    strips: BTreeMap<usize, DecodedStrip>,
    height: u64,
    raw_len: usize,
}

/// The re-encoded output and what went into it.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub container: Container,
    pub header: Header,
    pub strips: Vec<usize>,
    pub skipped: Vec<SkippedStrip>,
    pub raw_len: usize,
}

impl AssemblyBuffer {
    pub fn append(&mut self, id: usize, strip: DecodedStrip) {
        self.height += u64::from(strip.header.height);
        self.raw_len += strip.raw.len();
        if let Some(previous) = self.strips.insert(id, strip) {
            self.height -= u64::from(previous.header.height);
            self.raw_len -= previous.raw.len();
        }
    }

    pub fn len(&self) -> usize {
        self.strips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strips.is_empty()
    }

    /// Sum of the heights of every strip appended so far.
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.strips.keys().copied()
    }

    /// Concatenates scanlines in id order and re-encodes them as one
    /// container. The lowest-id strip supplies every header field except
    /// the height; strips that disagree with it are skipped. Returns `None`
    /// when there is nothing to encode.
    pub fn finish(self, level: CompressionLevel) -> Result<Option<Assembled>> {
        let mut strips = self.strips.into_iter();
        let Some((first_id, first)) = strips.next() else {
            return Ok(None);
        };

        let reference = first.header;
        let mut height = u64::from(reference.height);
        let mut raw = Vec::with_capacity(self.raw_len);
        raw.extend_from_slice(&first.raw);
        let mut included = vec![first_id];
        let mut skipped = Vec::new();

        for (id, strip) in strips {
            if let Err(err) = reference.ensure_compatible(&strip.header) {
                warn!("dropping strip {id}: {err}");
                skipped.push(SkippedStrip {
                    id,
                    reason: err.to_string(),
                });
                continue;
            }
            height += u64::from(strip.header.height);
            raw.extend_from_slice(&strip.raw);
            included.push(id);
        }

        let height = u32::try_from(height).map_err(|_| {
            PasteError::MalformedHeader(format!("combined height {height} overflows u32"))
        })?;
        let header = Header { height, ..reference };
        let compressed = compression::deflate(&raw, level)?;
        debug!(
            "re-encoded {} strips: {} raw bytes -> {} compressed",
            included.len(),
            raw.len(),
            compressed.len()
        );

        Ok(Some(Assembled {
            container: Container::new(&header, compressed),
            header,
            strips: included,
            skipped,
            raw_len: raw.len(),
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblerSummary {
    pub assembled: Vec<usize>,
    pub skipped: Vec<SkippedStrip>,
}

pub struct StripAssembler {
    worker: usize,
    shared: Arc<SharedState>,
    delay: Duration,
}

impl StripAssembler {
    pub fn new(worker: usize, shared: Arc<SharedState>, delay: Duration) -> Self {
        Self {
            worker,
            shared,
            delay,
        }
    }

    /// Pops until this worker's sentinel arrives.
    pub fn run(self) -> AssemblerSummary {
        let mut summary = AssemblerSummary::default();

        while let Handoff::Strip(id) = self.shared.queue.pop() {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }

            match self.assemble(id) {
                Ok(height) => {
                    debug!("assembler {} took strip {id} ({height} rows)", self.worker);
                    self.shared.progress.record_assembled();
                    summary.assembled.push(id);
                }
                Err(err) => {
                    warn!("assembler {} dropping strip {id}: {err}", self.worker);
                    summary.skipped.push(SkippedStrip {
                        id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        debug!(
            "assembler {} retired after {} strips",
            self.worker,
            summary.assembled.len()
        );
        summary
    }

    fn assemble(&self, id: usize) -> Result<u32> {
        let bytes = self.shared.store.get(id).ok_or(PasteError::StripOutOfRange {
            id,
            strips: self.shared.store.strips(),
        })?;
        let strip = decode_strip(bytes)?;
        let height = strip.header.height;
        self.shared.assembly().append(id, strip);
        Ok(height)
    }
}
