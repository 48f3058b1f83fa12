//! Turns a chunk of media bytes into its write-ready on-disk form.

use byteorder::{WriteBytesExt, LE};
use flate2::{Compress, Compression, FlushCompress, Status};

use crate::io_utils::checksum;
use crate::{CompressionLevel, EwfError, EwfFormat, EwfResult};

/// Headroom past the input size given to the deflate cache up front; the
/// zlib bound for incompressible input is a few bytes over the input length.
const DEFLATE_HEADROOM: usize = 1024;

/// The two staging buffers a write context owns and reuses for every chunk.
///
/// `compressed` is the engine's managed deflate cache: it is grown (once per
/// chunk) when the compressor reports it too small. `raw` stages an
/// uncompressed chunk with its checksum appended.
pub(crate) struct ChunkBuffers {
    pub raw: Vec<u8>,
    pub compressed: Vec<u8>,
}

impl ChunkBuffers {
    pub fn with_chunk_size(chunk_size: u32) -> Self {
        Self {
            raw: Vec::with_capacity(chunk_size as usize + 4),
            compressed: vec![0; chunk_size as usize + DEFLATE_HEADROOM],
        }
    }
}

/// The write-ready form of one chunk.
///
/// The payload lives in the staging buffers: `compressed[..data_size]` when
/// `is_compressed`, `raw[..data_size]` (checksum already appended) otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PackedChunk {
    pub data_size: usize,
    pub is_compressed: bool,
    pub checksum: u32,
}

/// Produces the on-disk form of `chunk`.
///
/// A chunk is stored deflated when the SMART family demands it or when the
/// deflate stream ends up strictly smaller than the media chunk size;
/// otherwise it is stored raw with its Adler-32 appended. A compressed
/// chunk's checksum is the trailing word of the zlib stream itself.
pub(crate) fn pack_chunk(
    chunk: &[u8],
    chunk_size: u32,
    level: CompressionLevel,
    compress_empty_block: bool,
    ewf_format: EwfFormat,
    bufs: &mut ChunkBuffers,
) -> EwfResult<PackedChunk> {
    if chunk.is_empty() {
        return Err(EwfError::InvalidArgument("empty chunk"));
    }
    if chunk.len() > chunk_size as usize {
        return Err(EwfError::InvalidArgument(
            "chunk larger than the media chunk size",
        ));
    }

    let mut level = level;
    if level == CompressionLevel::None && compress_empty_block && is_uniform(chunk) {
        level = CompressionLevel::Default;
    }

    if ewf_format == EwfFormat::S01 || level != CompressionLevel::None {
        let compressed_size = deflate_into(chunk, level, &mut bufs.compressed)?;
        if ewf_format == EwfFormat::S01 || compressed_size < chunk_size as usize {
            // The zlib stream ends with the Adler-32 of the uncompressed
            // bytes; the format stores no separate chunk checksum.
            let tail: [u8; 4] = bufs.compressed[compressed_size - 4..compressed_size]
                .try_into()
                .unwrap();
            return Ok(PackedChunk {
                data_size: compressed_size,
                is_compressed: true,
                checksum: u32::from_le_bytes(tail),
            });
        }
    }

    let sum = checksum(chunk);
    bufs.raw.clear();
    bufs.raw.extend_from_slice(chunk);
    bufs.raw.write_u32::<LE>(sum).unwrap();
    Ok(PackedChunk {
        data_size: bufs.raw.len(),
        is_compressed: false,
        checksum: sum,
    })
}

fn is_uniform(chunk: &[u8]) -> bool {
    chunk.iter().all(|&b| b == chunk[0])
}

/// One-shot zlib deflate of `chunk` into `out`, growing `out` and retrying
/// once when the compressor runs out of room.
fn deflate_into(chunk: &[u8], level: CompressionLevel, out: &mut Vec<u8>) -> EwfResult<usize> {
    let flate_level = match level {
        CompressionLevel::Fast => Compression::fast(),
        CompressionLevel::Best => Compression::best(),
        _ => Compression::default(),
    };
    if out.len() < chunk.len() + DEFLATE_HEADROOM {
        out.resize(chunk.len() + DEFLATE_HEADROOM, 0);
    }

    let mut compressor = Compress::new(flate_level, true);
    match deflate_once(&mut compressor, chunk, out)? {
        Some(written) => Ok(written),
        None => {
            let grown = out.len() * 2;
            out.resize(grown, 0);
            compressor.reset();
            deflate_once(&mut compressor, chunk, out)?.ok_or(EwfError::CompressionFailed)
        }
    }
}

fn deflate_once(
    compressor: &mut Compress,
    chunk: &[u8],
    out: &mut [u8],
) -> EwfResult<Option<usize>> {
    match compressor.compress(chunk, out, FlushCompress::Finish) {
        Ok(Status::StreamEnd) => Ok(Some(compressor.total_out() as usize)),
        // Output buffer too small for the finished stream.
        Ok(Status::Ok | Status::BufError) => Ok(None),
        Err(_) => Err(EwfError::CompressionFailed),
    }
}
