use std::fmt;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::checksum;
use crate::error::{PasteError, Result};

pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
pub const IHDR: [u8; 4] = *b"IHDR";
pub const IDAT: [u8; 4] = *b"IDAT";
pub const IEND: [u8; 4] = *b"IEND";

/// Size of the `IHDR` payload. Never derive this from `size_of::<Header>()`.
pub const HEADER_LEN: usize = 13;

/// One length-prefixed, tagged, checksummed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    tag: [u8; 4],
    payload: Vec<u8>,
    crc: u32,
}

impl Chunk {
    /// Builds a chunk and computes its checksum.
    pub fn new(tag: [u8; 4], payload: Vec<u8>) -> Self {
        let crc = checksum::chunk_crc(&tag, &payload);
        Self { tag, payload, crc }
    }

    /// Builds a chunk with a caller-supplied checksum, as read off the wire.
    pub fn from_parts(tag: [u8; 4], payload: Vec<u8>, crc: u32) -> Self {
        Self { tag, payload, crc }
    }

    pub fn tag(&self) -> &[u8; 4] {
        &self.tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Payload length as stored in the length field.
    pub fn len(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn tag_name(&self) -> String {
        tag_name(&self.tag)
    }

    /// Bytes this chunk occupies once serialized.
    pub fn encoded_len(&self) -> usize {
        12 + self.payload.len()
    }

    /// Appends the wire form of this chunk to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.len().to_be_bytes());
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.crc.to_be_bytes());
    }
}

fn tag_name(tag: &[u8; 4]) -> String {
    String::from_utf8_lossy(tag).into_owned()
}

/// The 13-byte `IHDR` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_mode: u8,
    pub compression_method: u8,
    pub filter_method: u8,
    pub interlace_method: u8,
}

impl Header {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let bytes: &[u8; HEADER_LEN] = payload.try_into().map_err(|_| {
            PasteError::MalformedHeader(format!(
                "header payload is {} bytes, expected {HEADER_LEN}",
                payload.len()
            ))
        })?;

        Ok(Self {
            width: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            height: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            bit_depth: bytes[8],
            color_mode: bytes[9],
            compression_method: bytes[10],
            filter_method: bytes[11],
            interlace_method: bytes[12],
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.width.to_be_bytes());
        out[4..8].copy_from_slice(&self.height.to_be_bytes());
        out[8] = self.bit_depth;
        out[9] = self.color_mode;
        out[10] = self.compression_method;
        out[11] = self.filter_method;
        out[12] = self.interlace_method;
        out
    }

    pub fn to_chunk(&self) -> Chunk {
        Chunk::new(IHDR, self.to_bytes().to_vec())
    }

    /// Samples per pixel implied by the colour mode.
    fn samples_per_pixel(&self) -> u32 {
        match self.color_mode {
            2 => 3,
            4 => 2,
            6 => 4,
            // grayscale (0), indexed (3) and anything unknown
            _ => 1,
        }
    }

    /// Whole bytes per pixel, never less than one.
    pub fn bytes_per_pixel(&self) -> usize {
        let bits = self.samples_per_pixel() * u32::from(self.bit_depth.max(1));
        (bits.div_ceil(8) as usize).max(1)
    }

    /// Bytes in one filtered scanline, including its leading filter byte.
    pub fn scanline_len(&self) -> usize {
        let bits = u64::from(self.width)
            * u64::from(self.samples_per_pixel())
            * u64::from(self.bit_depth.max(1));
        bits.div_ceil(8) as usize + 1
    }

    /// Expected size of the inflated `IDAT` stream for this strip.
    pub fn raw_len_hint(&self) -> usize {
        (self.height as usize).saturating_mul(self.scanline_len())
    }

    /// Checks that `other` can be stacked under `self`: everything except the
    /// height has to match.
    pub fn ensure_compatible(&self, other: &Header) -> Result<()> {
        let mismatch = if self.width != other.width {
            Some(format!("width {} != {}", other.width, self.width))
        } else if self.bit_depth != other.bit_depth {
            Some(format!("bit depth {} != {}", other.bit_depth, self.bit_depth))
        } else if self.color_mode != other.color_mode {
            Some(format!("colour mode {} != {}", other.color_mode, self.color_mode))
        } else if self.compression_method != other.compression_method
            || self.filter_method != other.filter_method
            || self.interlace_method != other.interlace_method
        {
            Some("compression, filter or interlace method differs".to_string())
        } else {
            None
        };

        match mismatch {
            Some(reason) => Err(PasteError::IncompatibleHeader(reason)),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} depth={} colour={} interlace={}",
            self.width, self.height, self.bit_depth, self.color_mode, self.interlace_method
        )
    }
}

/// A complete strip document: header, one data chunk, end marker.
///
/// ```text
/// [signature: 8B] [IHDR chunk] [IDAT chunk] [IEND chunk]
/// chunk = [length: u32 BE] [tag: 4B] [payload: length B] [crc: u32 BE]
/// ```
///
/// A second `IDAT` chunk is rejected with [`PasteError::UnexpectedChunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    header: Chunk,
    data: Chunk,
    end: Chunk,
}

impl Container {
    /// Wraps an already compressed `IDAT` payload.
    pub fn new(header: &Header, compressed: Vec<u8>) -> Self {
        Self {
            header: header.to_chunk(),
            data: Chunk::new(IDAT, compressed),
            end: Chunk::new(IEND, Vec::new()),
        }
    }

    pub fn header_chunk(&self) -> &Chunk {
        &self.header
    }

    pub fn data_chunk(&self) -> &Chunk {
        &self.data
    }

    pub fn end_chunk(&self) -> &Chunk {
        &self.end
    }

    pub fn header(&self) -> Result<Header> {
        Header::parse(self.header.payload())
    }

    pub fn into_data(self) -> Chunk {
        self.data
    }

    /// Parses signature and the three chunks, in order.
    pub fn parse<R: Read>(mut source: R) -> Result<Self> {
        let mut signature = [0u8; SIGNATURE.len()];
        read_exact(&mut source, &mut signature, "signature")?;
        if !parse_signature(&signature) {
            return Err(PasteError::InvalidSignature);
        }

        let header = read_chunk(&mut source)?;
        if header.tag != IHDR || header.payload.len() != HEADER_LEN {
            return Err(PasteError::MalformedHeader(format!(
                "first chunk is {} with {} bytes",
                header.tag_name(),
                header.payload.len()
            )));
        }

        let data = expect_chunk(&mut source, IDAT)?;
        let end = expect_chunk(&mut source, IEND)?;

        Ok(Self { header, data, end })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(bytes)
    }

    pub fn write_to<W: Write>(&self, mut sink: W) -> Result<()> {
        sink.write_all(&SIGNATURE)?;
        write_chunk(&mut sink, &self.header)?;
        write_chunk(&mut sink, &self.data)?;
        write_chunk(&mut sink, &self.end)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            SIGNATURE.len()
                + self.header.encoded_len()
                + self.data.encoded_len()
                + self.end.encoded_len(),
        );
        out.extend_from_slice(&SIGNATURE);
        self.header.encode_into(&mut out);
        self.data.encode_into(&mut out);
        self.end.encode_into(&mut out);
        out
    }
}

fn expect_chunk<R: Read>(source: &mut R, expected: [u8; 4]) -> Result<Chunk> {
    let chunk = read_chunk(source)?;
    if chunk.tag != expected {
        return Err(PasteError::UnexpectedChunk {
            expected: tag_name(&expected),
            found: chunk.tag_name(),
        });
    }
    Ok(chunk)
}

/// True iff `bytes` starts with the 8-byte PNG signature.
pub fn parse_signature(bytes: &[u8]) -> bool {
    bytes.len() >= SIGNATURE.len() && bytes[..SIGNATURE.len()] == SIGNATURE
}

/// Reads length, tag, payload and checksum, in that order.
pub fn read_chunk<R: Read>(source: &mut R) -> Result<Chunk> {
    let mut word = [0u8; 4];
    read_exact(source, &mut word, "chunk length")?;
    let length = u32::from_be_bytes(word) as u64;

    let mut tag = [0u8; 4];
    read_exact(source, &mut tag, "chunk type")?;

    // Grow with the data actually present instead of trusting the length field.
    let mut payload = Vec::new();
    source.by_ref().take(length).read_to_end(&mut payload)?;
    if payload.len() as u64 != length {
        return Err(PasteError::TruncatedInput("chunk payload"));
    }

    read_exact(source, &mut word, "chunk checksum")?;
    Ok(Chunk::from_parts(tag, payload, u32::from_be_bytes(word)))
}

/// Seeks to `offset` and reads the `IHDR` chunk found there.
pub fn read_header<R: Read + Seek>(source: &mut R, offset: u64) -> Result<Header> {
    source.seek(SeekFrom::Start(offset))?;

    let mut word = [0u8; 4];
    read_exact(source, &mut word, "header length")?;
    let length = u32::from_be_bytes(word) as usize;

    let mut tag = [0u8; 4];
    read_exact(source, &mut tag, "header type")?;
    if tag != IHDR || length != HEADER_LEN {
        return Err(PasteError::MalformedHeader(format!(
            "found {} chunk of {length} bytes at offset {offset}",
            tag_name(&tag)
        )));
    }

    let mut payload = [0u8; HEADER_LEN];
    read_exact(source, &mut payload, "header payload")?;
    read_exact(source, &mut word, "header checksum")?;
    Header::parse(&payload)
}

/// Writes one chunk in network byte order.
pub fn write_chunk<W: Write>(sink: &mut W, chunk: &Chunk) -> Result<()> {
    sink.write_all(&chunk.len().to_be_bytes())?;
    sink.write_all(&chunk.tag)?;
    sink.write_all(&chunk.payload)?;
    sink.write_all(&chunk.crc.to_be_bytes())?;
    Ok(())
}

fn read_exact<R: Read>(source: &mut R, buf: &mut [u8], what: &'static str) -> Result<()> {
    match source.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(PasteError::TruncatedInput(what)),
        Err(err) => Err(err.into()),
    }
}
