#![doc = include_str!("../README.md")]

pub mod header;
pub mod offset_table;
pub mod pool;
pub mod records;
pub mod write;

mod chunk;
mod io_utils;
mod planner;
mod segment;

use std::io;

pub use header::{AcquiryError, HashValues, HeaderValues, Session};
pub use offset_table::{ChunkOffset, OffsetTable, SegmentId};
pub use pool::{FilePool, FsFilePool, MemoryFilePool};
pub use write::{WriteOptions, Writer};

/// Magic bytes starting every primary (`EWF`) segment file.
pub const EVF_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];

/// Magic bytes starting every delta (`DWF`) segment file.
pub const DVF_SIGNATURE: [u8; 8] = [0x44, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];

/// Default target size of one segment file (the CD-friendly legacy split).
pub const DEFAULT_SEGMENT_FILE_SIZE: u64 = 1440 * 1024 * 1024;

/// Hard cap on a primary segment file; chunk offsets are 32-bit.
pub const MAXIMUM_SEGMENT_FILE_SIZE: u64 = i32::MAX as u64;

/// Default cap on a delta segment file.
pub const MAXIMUM_DELTA_SEGMENT_FILE_SIZE: u64 = i64::MAX as u64;

/// Default number of chunks one offset table may describe.
pub const MAXIMUM_TABLE_ENTRIES: u32 = 16375;

#[derive(Debug, thiserror::Error)]
pub enum EwfError {
    #[error("chunk {0} was already written; only a delta write may replace it")]
    AlreadyWritten(u64),
    #[error("compression failed even after growing the chunk cache")]
    CompressionFailed,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("{what} exceeds the format maximum of {maximum}")]
    ExceedsMaximum { what: &'static str, maximum: u64 },
    #[error("{op} at offset {offset}: {source}")]
    Io {
        op: &'static str,
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

impl EwfError {
    pub(crate) fn io(op: &'static str, offset: u64, source: io::Error) -> Self {
        Self::Io { op, offset, source }
    }
}

pub type EwfResult<T> = Result<T, EwfError>;

/// Compression applied to chunk payloads.
///
/// `None` stores chunks raw with a trailing checksum; the other levels map
/// onto the zlib effort levels. The SMART family compresses regardless of the
/// configured level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    #[default]
    None,
    Default,
    Fast,
    Best,
}

/// The two on-disk families of the version 1 format.
///
/// `S01` is the SMART layout (chunks live inside the `table` section, always
/// deflated); `E01` is the EnCase layout (`sectors` + `table` + `table2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EwfFormat {
    S01,
    E01,
}

/// The tool dialect being produced.
///
/// The dialect decides the segment-1 header sequence, per-section overhead,
/// which trailing sections exist, and the segment filename extensions. The
/// divergence is data, not behavior; see the dispatch tables in the planner
/// and the segment writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// The original ASR Data Expert Witness format.
    Ewf,
    /// EWF-S01 as written by SMART.
    Smart,
    Encase1,
    Encase2,
    Encase3,
    Encase4,
    Encase5,
    #[default]
    Encase6,
    /// The Linux EnCase variant.
    Linen,
    FtkImager,
    /// The libewf extended dialect (adds `xheader`, delta chains).
    Ewfx,
}

impl Format {
    /// The on-disk family this dialect belongs to.
    pub fn ewf_format(self) -> EwfFormat {
        match self {
            Format::Ewf | Format::Smart => EwfFormat::S01,
            _ => EwfFormat::E01,
        }
    }

    /// True for the dialects whose chunks section is a single `table`
    /// section written in front of the chunk payloads.
    pub(crate) fn uses_single_table_section(self) -> bool {
        self.ewf_format() == EwfFormat::S01 || self == Format::Encase1
    }

    pub(crate) fn supports_data_section(self) -> bool {
        !matches!(self, Format::Ewf | Format::Smart | Format::Encase1)
    }

    pub(crate) fn supports_error2_section(self) -> bool {
        matches!(
            self,
            Format::Encase3
                | Format::Encase4
                | Format::Encase5
                | Format::Encase6
                | Format::Linen
                | Format::FtkImager
                | Format::Ewfx
        )
    }

    pub(crate) fn supports_session_section(self) -> bool {
        matches!(self, Format::Encase5 | Format::Encase6 | Format::Ewfx)
    }

    pub(crate) fn supports_digest_section(self) -> bool {
        matches!(self, Format::Encase6 | Format::Ewfx)
    }
}

/// Which chain a segment file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Primary image segment (`.E01`, `.s01`, ...).
    Ewf,
    /// Delta segment carrying chunk overwrites (`.D01`, ...).
    Dwf,
}

/// Geometry of the media being acquired. Read-only during writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaValues {
    /// Bytes per chunk; `sectors_per_chunk * bytes_per_sector`.
    pub chunk_size: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    /// Total media bytes; 0 when unknown up front.
    pub media_size: u64,
    /// Media type byte carried into the volume section (0x01 = fixed disk).
    pub media_type: u8,
    /// Media flags byte carried into the volume section (0x01 = physical).
    pub media_flags: u8,
}

impl MediaValues {
    /// Media of `media_size` bytes, chunked as
    /// `sectors_per_chunk * bytes_per_sector`. A `media_size` of 0 means the
    /// total is not known in advance.
    pub fn new(sectors_per_chunk: u32, bytes_per_sector: u32, media_size: u64) -> Self {
        Self {
            chunk_size: sectors_per_chunk * bytes_per_sector,
            sectors_per_chunk,
            bytes_per_sector,
            media_size,
            media_type: 0x01,
            media_flags: 0x01,
        }
    }

    /// Number of chunks the media needs, or 0 when the size is unknown.
    pub fn amount_of_chunks(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.media_size.div_ceil(self.chunk_size as u64)
    }

    /// Number of sectors on the media, or 0 when the size is unknown.
    pub fn sector_count(&self) -> u64 {
        if self.bytes_per_sector == 0 {
            return 0;
        }
        self.media_size / self.bytes_per_sector as u64
    }
}
