//! Compressed Stream Proxy.
//!
//! Presents a block-compressed buffer through the [`Source`] contract by
//! decompressing one chunk at a time.  The format is chunk-sequential, so
//! the proxy only moves forward: a forward seek reads and discards the
//! delta, a backward seek is refused with an unsupported-operation error.
//!
//! # Layout
//! ```text
//! u32 tag (0x9E2A83C1) | u32 block_size | u8 method | 3 pad
//! u64 compressed_total | u64 uncompressed_total
//! { u32 compressed, u32 uncompressed } x ceil(uncompressed_total / block_size)
//! block payloads, in order
//! ```
//! All blocks inflate to `block_size` bytes except a shorter final one.
//!
//! # Ownership
//! The chunk buffer belongs to one proxy.  [`Source::fork`] builds a fresh
//! proxy over the same compressed bytes and replays it up to the same
//! position instead of sharing the buffer.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::archive::{Archive, ArchiveWriter, Source};
use crate::codec::{get_codec, get_codec_by_id, Codec, CodecError, CompressionMethod};
use crate::error::{Error, ErrorKind, Result};

pub const CHUNK_TAG: u32 = 0x9E2A_83C1;
pub const CHUNK_HEADER_SIZE: usize = 28;
/// Default uncompressed block size: 128 KiB.
pub const DEFAULT_BLOCK_SIZE: u32 = 128 * 1024;
/// Largest block a header may declare.  Bounds the buffer one chunk needs.
pub const MAX_BLOCK_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Absolute offset of the payload in the compressed buffer.
    pub offset:       usize,
    pub compressed:   u32,
    pub uncompressed: u32,
}

/// Parsed header and block table.  Immutable; shared between forks.
#[derive(Debug, Clone)]
pub struct ChunkTable {
    pub block_size:         u32,
    pub method:             CompressionMethod,
    pub compressed_total:   u64,
    pub uncompressed_total: u64,
    pub blocks:             Vec<BlockEntry>,
}

impl ChunkTable {
    pub fn parse(data: &[u8]) -> Result<Self, ErrorKind> {
        if data.len() < CHUNK_HEADER_SIZE {
            return Err(ErrorKind::Truncated {
                needed:    CHUNK_HEADER_SIZE as u64,
                available: data.len() as u64,
            });
        }
        let tag = LittleEndian::read_u32(&data[0..4]);
        if tag != CHUNK_TAG {
            return Err(ErrorKind::BadMagic { expected: CHUNK_TAG, found: tag });
        }
        let block_size = LittleEndian::read_u32(&data[4..8]);
        let method = CompressionMethod::from_id(data[8]).ok_or(CodecError::UnavailableMethod(data[8]))?;
        let compressed_total = LittleEndian::read_u64(&data[12..20]);
        let uncompressed_total = LittleEndian::read_u64(&data[20..28]);
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(ErrorKind::BadChunkTable(format!("block size {block_size} is out of range")));
        }

        let count = uncompressed_total.div_ceil(block_size as u64);
        let table_end = count
            .checked_mul(8)
            .and_then(|n| n.checked_add(CHUNK_HEADER_SIZE as u64))
            .filter(|&end| end <= data.len() as u64)
            .ok_or(ErrorKind::BadCount {
                count:     count as i64,
                elem_size: 8,
                remaining: (data.len() - CHUNK_HEADER_SIZE) as u64,
            })? as usize;

        let mut blocks = Vec::with_capacity(count as usize);
        let mut offset = table_end;
        let mut inflated = 0u64;
        for (index, pair) in data[CHUNK_HEADER_SIZE..table_end].chunks_exact(8).enumerate() {
            let compressed = LittleEndian::read_u32(&pair[0..4]);
            let uncompressed = LittleEndian::read_u32(&pair[4..8]);
            let last = index as u64 + 1 == count;
            let sized = if last { (1..=block_size).contains(&uncompressed) } else { uncompressed == block_size };
            if !sized || compressed == 0 {
                return Err(ErrorKind::BadChunkTable(format!(
                    "block {index} of {count} declares {compressed} -> {uncompressed} bytes with block size {block_size}"
                )));
            }
            blocks.push(BlockEntry { offset, compressed, uncompressed });
            offset = offset.saturating_add(compressed as usize);
            inflated += uncompressed as u64;
        }
        if inflated != uncompressed_total {
            return Err(ErrorKind::BadChunkTable(format!(
                "blocks inflate to {inflated} bytes, header declares {uncompressed_total}"
            )));
        }
        if offset > data.len() || (offset - table_end) as u64 != compressed_total {
            return Err(ErrorKind::BadChunkTable(format!(
                "payloads span {} bytes, header declares {compressed_total} and {} are present",
                offset.saturating_sub(table_end),
                data.len() - table_end
            )));
        }
        Ok(Self { block_size, method, compressed_total, uncompressed_total, blocks })
    }
}

// ── Proxy ────────────────────────────────────────────────────────────────────

pub struct CompressedSource {
    data:        Arc<[u8]>,
    table:       Arc<ChunkTable>,
    codec:       Box<dyn Codec>,
    chunk:       Vec<u8>,
    /// Read pointer inside `chunk`.
    chunk_pos:   usize,
    /// Uncompressed offset of `chunk[0]`.
    chunk_start: u64,
    /// The chunk before `chunk`, kept so a failed read can rewind across
    /// one chunk boundary.
    prev:        Vec<u8>,
    next_block:  usize,
    /// Raw bytes delivered so far; this is the stream position.
    delivered:   u64,
}

impl CompressedSource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Result<Self, ErrorKind> {
        let data = data.into();
        let table = Arc::new(ChunkTable::parse(&data)?);
        let codec = get_codec_by_id(table.method.id())?;
        Ok(Self::with_table(data, table, codec))
    }

    fn with_table(data: Arc<[u8]>, table: Arc<ChunkTable>, codec: Box<dyn Codec>) -> Self {
        Self {
            data,
            table,
            codec,
            chunk:       Vec::new(),
            chunk_pos:   0,
            chunk_start: 0,
            prev:        Vec::new(),
            next_block:  0,
            delivered:   0,
        }
    }

    pub fn table(&self) -> &ChunkTable {
        &self.table
    }

    fn load_next_chunk(&mut self) -> Result<(), ErrorKind> {
        let index = self.next_block;
        let block = *self.table.blocks.get(index).ok_or(ErrorKind::NoMoreData { block: index })?;
        let payload = &self.data[block.offset..block.offset + block.compressed as usize];
        let chunk = self.codec.decompress(payload, block.uncompressed as usize)?;
        if chunk.is_empty() {
            return Err(ErrorKind::NoMoreData { block: index });
        }
        tracing::debug!(block = index, bytes = chunk.len(), "decompressed chunk");
        self.chunk_start += self.chunk.len() as u64;
        self.prev = std::mem::replace(&mut self.chunk, chunk);
        self.chunk_pos = 0;
        self.next_block += 1;
        Ok(())
    }

    /// Advance by `n` bytes, copying them into `out` when given.
    fn advance(&mut self, mut n: usize, mut out: Option<&mut [u8]>) -> Result<(), ErrorKind> {
        let mut written = 0;
        while n > 0 {
            let avail = self.chunk.len() - self.chunk_pos;
            if avail == 0 {
                self.load_next_chunk()?;
                continue;
            }
            let take = avail.min(n);
            if let Some(buf) = out.as_deref_mut() {
                buf[written..written + take]
                    .copy_from_slice(&self.chunk[self.chunk_pos..self.chunk_pos + take]);
            }
            self.chunk_pos += take;
            self.delivered += take as u64;
            written += take;
            n -= take;
        }
        Ok(())
    }
}

impl Source for CompressedSource {
    fn position(&self) -> u64 {
        self.delivered
    }

    fn len(&self) -> u64 {
        self.table.uncompressed_total
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), ErrorKind> {
        if buf.len() as u64 > self.remaining() {
            return Err(ErrorKind::Truncated { needed: buf.len() as u64, available: self.remaining() });
        }
        self.advance(buf.len(), Some(buf))
    }

    fn seek(&mut self, pos: u64) -> Result<(), ErrorKind> {
        if pos < self.delivered {
            return Err(ErrorKind::BackwardSeek { from: self.delivered, to: pos });
        }
        if pos > self.len() {
            return Err(ErrorKind::SeekOutOfRange { target: pos, len: self.len() });
        }
        self.advance((pos - self.delivered) as usize, None)
    }

    fn fork(&self) -> Result<Self, ErrorKind> {
        let mut fresh =
            Self::with_table(Arc::clone(&self.data), Arc::clone(&self.table), get_codec(self.table.method));
        fresh.seek(self.delivered)?;
        Ok(fresh)
    }

    /// Rewinds inside the current chunk or the one before it.  Stepping back
    /// into the previous chunk drops the current one; it is decompressed
    /// again when the cursor reaches it.
    fn restore(&mut self, pos: u64) -> Result<(), ErrorKind> {
        if pos > self.delivered {
            return self.seek(pos);
        }
        if pos < self.chunk_start {
            let prev_start = self.chunk_start - self.prev.len() as u64;
            if self.prev.is_empty() || pos < prev_start {
                return self.seek(pos);
            }
            self.chunk = std::mem::take(&mut self.prev);
            self.chunk_start = prev_start;
            self.next_block -= 1;
        }
        self.chunk_pos = (pos - self.chunk_start) as usize;
        self.delivered = pos;
        Ok(())
    }
}

/// Archive over a chunk-compressed buffer.
pub fn open_compressed(id: &str, data: impl Into<Arc<[u8]>>) -> Result<Archive<CompressedSource>> {
    let source = CompressedSource::new(data).map_err(|kind| Error::new(id, 0, kind))?;
    Ok(Archive::new(id, source))
}

/// Inflate a whole chunked stream.  The output grows one block at a time,
/// so a header cannot make it reserve more than a block ahead of real data.
pub fn inflate(data: impl Into<Arc<[u8]>>) -> Result<Vec<u8>, ErrorKind> {
    let mut src = CompressedSource::new(data)?;
    let step = src.table().block_size as u64;
    let mut out = Vec::new();
    while src.remaining() > 0 {
        let start = out.len();
        out.resize(start + src.remaining().min(step) as usize, 0);
        src.read_into(&mut out[start..])?;
    }
    Ok(out)
}

/// Write `data` as a chunked stream.
pub fn encode_chunked(
    data:       &[u8],
    block_size: u32,
    method:     CompressionMethod,
    level:      i32,
) -> Result<Vec<u8>, CodecError> {
    let codec = get_codec(method);
    let block_size = block_size.max(1);
    let payloads = data
        .chunks(block_size as usize)
        .map(|chunk| codec.compress(chunk, level).map(|p| (p, chunk.len())))
        .collect::<Result<Vec<_>, _>>()?;

    let mut w = ArchiveWriter::new();
    w.write_u32(CHUNK_TAG);
    w.write_u32(block_size);
    w.write_u8(method.id());
    w.write_bytes(&[0; 3]);
    w.write_u64(payloads.iter().map(|(p, _)| p.len() as u64).sum());
    w.write_u64(data.len() as u64);
    for (payload, raw_len) in &payloads {
        w.write_u32(payload.len() as u32);
        w.write_u32(*raw_len as u32);
    }
    for (payload, _) in &payloads {
        w.write_bytes(payload);
    }
    Ok(w.into_bytes())
}
