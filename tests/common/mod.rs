#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use strip_paster::compression::deflate;
use strip_paster::{
    CompressionLevel, Container, FetchedStrip, Header, Mirror, PasteError, Result, RetryPolicy,
    RunConfig, StripSource,
};

pub const WIDTH: u32 = 400;
pub const HEIGHT: u32 = 6;

pub fn strip_header(height: u32) -> Header {
    Header {
        width: WIDTH,
        height,
        bit_depth: 8,
        color_mode: 6,
        compression_method: 0,
        filter_method: 0,
        interlace_method: 0,
    }
}

/// A strip whose every raw byte is `fill`.
pub fn strip_bytes(header: &Header, fill: u8) -> Vec<u8> {
    let raw = vec![fill; header.raw_len_hint()];
    let compressed = deflate(&raw, CompressionLevel::Default).expect("deflate");
    Container::new(header, compressed).to_bytes()
}

/// Raw size of one 400x6 RGBA strip.
pub fn strip_raw_len() -> usize {
    strip_header(HEIGHT).raw_len_hint()
}

pub fn reduced_config(output: &Path, strips: usize) -> RunConfig {
    RunConfig {
        queue_capacity: 5,
        producers: 2,
        consumers: 2,
        strips,
        mirrors: vec![
            "mock://a/{image}/{strip}".to_string(),
            "mock://b/{image}/{strip}".to_string(),
            "mock://c/{image}/{strip}".to_string(),
        ],
        retry: RetryPolicy::immediate(8),
        request_timeout: Duration::from_secs(1),
        output: output.to_path_buf(),
        ..RunConfig::default()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Network,
    Oversize,
    /// Answer with a different strip than the one requested.
    Misroute(usize),
}

/// In-memory mirror pool with scripted misbehaviour.
pub struct ScriptedSource {
    strips: Vec<Vec<u8>>,
    faults: Mutex<HashMap<usize, VecDeque<Fault>>>,
    dead: HashSet<usize>,
    calls: Mutex<Vec<(String, usize)>>,
}

impl ScriptedSource {
    pub fn new(strips: Vec<Vec<u8>>) -> Self {
        Self {
            strips,
            faults: Mutex::new(HashMap::new()),
            dead: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Uniform strips, strip `i` filled with byte `i`.
    pub fn uniform(count: usize) -> Self {
        let header = strip_header(HEIGHT);
        Self::new((0..count).map(|i| strip_bytes(&header, i as u8)).collect())
    }

    pub fn with_faults(self, strip: usize, faults: impl IntoIterator<Item = Fault>) -> Self {
        self.faults
            .lock()
            .unwrap()
            .entry(strip)
            .or_default()
            .extend(faults);
        self
    }

    /// Every request for `strip` fails.
    pub fn with_dead_strip(mut self, strip: usize) -> Self {
        self.dead.insert(strip);
        self
    }

    pub fn calls_for(&self, strip: usize) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, requested)| *requested == strip)
            .count()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(url, _)| url.clone()).collect()
    }
}

impl StripSource for ScriptedSource {
    fn fetch(
        &self,
        mirror: &Mirror,
        image: u8,
        strip: usize,
        capacity: usize,
    ) -> Result<FetchedStrip> {
        self.calls.lock().unwrap().push((mirror.url(image, strip), strip));

        if self.dead.contains(&strip) {
            return Err(PasteError::Fetch(format!("strip {strip}: connection refused")));
        }

        let fault = self
            .faults
            .lock()
            .unwrap()
            .get_mut(&strip)
            .and_then(VecDeque::pop_front);

        match fault {
            Some(Fault::Network) => Err(PasteError::Fetch("connection reset by peer".into())),
            Some(Fault::Oversize) => Ok(FetchedStrip {
                fragment: Some(strip),
                body: vec![0; capacity + 1],
            }),
            Some(Fault::Misroute(other)) => Ok(FetchedStrip {
                fragment: Some(other),
                body: self.strips[other].clone(),
            }),
            None => Ok(FetchedStrip {
                fragment: Some(strip),
                body: self.strips[strip].clone(),
            }),
        }
    }
}
