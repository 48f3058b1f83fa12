//! Write EWF images.

use std::path::{Path, PathBuf};

use log::debug;

use crate::chunk::{pack_chunk, ChunkBuffers};
use crate::header::{build_header_sections, HeaderSections};
use crate::io_utils::checksum;
use crate::offset_table::OffsetTable;
use crate::planner::{self, FullCheck};
use crate::pool::{segment_filename, FilePool};
use crate::records::{
    CHECKSUM_SIZE, DELTA_CHUNK_HEADER_SIZE, SECTION_DESCRIPTOR_SIZE, TABLE_OFFSET_SIZE,
};
use crate::segment::SegmentFile;
use crate::{
    AcquiryError, CompressionLevel, EwfError, EwfResult, FileKind, Format, HashValues,
    HeaderValues, MediaValues, Session, DEFAULT_SEGMENT_FILE_SIZE, MAXIMUM_DELTA_SEGMENT_FILE_SIZE,
    MAXIMUM_SEGMENT_FILE_SIZE, MAXIMUM_TABLE_ENTRIES,
};

/// Smallest accepted segment file size.
pub const MINIMUM_SEGMENT_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct WriteOptions {
    format: Format,
    compression_level: CompressionLevel,
    compress_empty_block: bool,
    segment_file_size: u64,
    delta_segment_file_size: u64,
    maximum_section_chunks: u32,
    unrestrict_offset_table: bool,
    header_values: HeaderValues,
    hash_values: HashValues,
    sessions: Vec<Session>,
    acquiry_errors: Vec<AcquiryError>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            format: Format::default(),
            compression_level: CompressionLevel::None,
            compress_empty_block: false,
            segment_file_size: DEFAULT_SEGMENT_FILE_SIZE,
            delta_segment_file_size: MAXIMUM_DELTA_SEGMENT_FILE_SIZE,
            maximum_section_chunks: MAXIMUM_TABLE_ENTRIES,
            unrestrict_offset_table: false,
            header_values: HeaderValues::default(),
            hash_values: HashValues::default(),
            sessions: Vec::new(),
            acquiry_errors: Vec::new(),
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Specifies the dialect being produced.
    pub fn format(self, format: Format) -> Self {
        Self { format, ..self }
    }

    /// Specifies the compression applied to chunk payloads.
    pub fn compression_level(self, compression_level: CompressionLevel) -> Self {
        Self {
            compression_level,
            ..self
        }
    }

    /// Deflates single-value chunks even when compression is off.
    pub fn compress_empty_block(self, compress_empty_block: bool) -> Self {
        Self {
            compress_empty_block,
            ..self
        }
    }

    /// Specifies the target size of one segment file. A chunk that would push
    /// a segment past this closes the segment and opens the next one.
    pub fn segment_file_size(self, segment_file_size: u64) -> Self {
        Self {
            segment_file_size,
            ..self
        }
    }

    /// Specifies the target size of one delta segment file.
    pub fn delta_segment_file_size(self, delta_segment_file_size: u64) -> Self {
        Self {
            delta_segment_file_size,
            ..self
        }
    }

    /// Caps how many chunks one chunks section may hold.
    pub fn maximum_section_chunks(self, maximum_section_chunks: u32) -> Self {
        Self {
            maximum_section_chunks,
            ..self
        }
    }

    /// Lifts the per-section chunk cap; sections then run until the segment
    /// is out of space.
    pub fn unrestrict_offset_table(self, unrestrict_offset_table: bool) -> Self {
        Self {
            unrestrict_offset_table,
            ..self
        }
    }

    /// Case metadata for the header sections.
    pub fn header_values(self, header_values: HeaderValues) -> Self {
        Self {
            header_values,
            ..self
        }
    }

    /// Media hashes for the trailing `hash`/`digest` sections.
    pub fn hash_values(self, hash_values: HashValues) -> Self {
        Self {
            hash_values,
            ..self
        }
    }

    /// Optical-media sessions for the trailing `session` section.
    pub fn sessions(self, sessions: Vec<Session>) -> Self {
        Self { sessions, ..self }
    }

    /// Unreadable-sector runs for the trailing `error2` section.
    pub fn acquiry_errors(self, acquiry_errors: Vec<AcquiryError>) -> Self {
        Self {
            acquiry_errors,
            ..self
        }
    }

    /// Creates a [`Writer`] producing segment files named after `base_path`
    /// (`<base_path>.E01`, `.E02`, ...) through the given pool.
    pub fn create<P: FilePool>(
        self,
        pool: P,
        base_path: impl AsRef<Path>,
        media: MediaValues,
    ) -> EwfResult<Writer<P>> {
        Writer::with_options(pool, base_path.as_ref(), media, self)
    }
}

/// Writes an EWF image through a [`FilePool`].
///
/// Chunks are appended in order with [`write_chunk`](Self::write_chunk);
/// [`finish`](Self::finish) closes the last segment with its trailing
/// sections. Users should call `finish()` and check for errors when done;
/// otherwise the result will be unwrapped on drop.
pub struct Writer<P: FilePool> {
    pool: P,
    base_path: PathBuf,
    options: WriteOptions,
    media: MediaValues,
    offset_table: OffsetTable,
    segments: Vec<SegmentFile>,
    delta_segments: Vec<SegmentFile>,
    header_sections: Option<HeaderSections>,
    data_section_cache: Option<Vec<u8>>,
    buffers: ChunkBuffers,
    /// Scratch for the encoded offsets of the section being corrected.
    table_offsets: Vec<u32>,

    remaining_segment_file_size: u64,
    chunks_per_segment: u64,
    chunks_per_chunks_section: u64,
    /// File offset of the open chunks section; 0 when none is open.
    chunks_section_offset: u64,
    /// 1-based index of the chunks section within the current segment.
    chunks_section_number: u32,
    /// First chunk index of the open chunks section.
    section_base_chunk: u64,
    create_chunks_section: bool,
    segment_chunks: u64,
    section_chunks: u64,
    total_chunks: u64,
    input_write_count: u64,
    write_finalized: bool,
}

impl<P: FilePool> Writer<P> {
    /// Creates a writer with default [`WriteOptions`].
    pub fn new(pool: P, base_path: impl AsRef<Path>, media: MediaValues) -> EwfResult<Self> {
        Self::with_options(pool, base_path.as_ref(), media, WriteOptions::default())
    }

    fn with_options(
        pool: P,
        base_path: &Path,
        media: MediaValues,
        options: WriteOptions,
    ) -> EwfResult<Self> {
        if media.chunk_size == 0
            || media.chunk_size != media.sectors_per_chunk * media.bytes_per_sector
        {
            return Err(EwfError::InvalidArgument(
                "chunk size must be sectors per chunk times bytes per sector",
            ));
        }
        if options.segment_file_size < MINIMUM_SEGMENT_FILE_SIZE
            || options.segment_file_size > MAXIMUM_SEGMENT_FILE_SIZE
        {
            return Err(EwfError::InvalidArgument("segment file size out of range"));
        }
        if options.delta_segment_file_size < MINIMUM_SEGMENT_FILE_SIZE
            || options.delta_segment_file_size > MAXIMUM_DELTA_SEGMENT_FILE_SIZE
        {
            return Err(EwfError::InvalidArgument(
                "delta segment file size out of range",
            ));
        }
        if options.maximum_section_chunks == 0
            || options.maximum_section_chunks > i32::MAX as u32
        {
            return Err(EwfError::InvalidArgument(
                "maximum section chunks out of range",
            ));
        }

        let mut offset_table = OffsetTable::new();
        let amount = media.amount_of_chunks();
        if amount > 0 {
            offset_table.resize(amount);
        }

        Ok(Self {
            pool,
            base_path: base_path.to_path_buf(),
            buffers: ChunkBuffers::with_chunk_size(media.chunk_size),
            options,
            media,
            offset_table,
            segments: Vec::new(),
            delta_segments: Vec::new(),
            header_sections: None,
            data_section_cache: None,
            table_offsets: Vec::new(),
            remaining_segment_file_size: 0,
            chunks_per_segment: 0,
            chunks_per_chunks_section: 0,
            chunks_section_offset: 0,
            chunks_section_number: 0,
            section_base_chunk: 0,
            create_chunks_section: true,
            segment_chunks: 0,
            section_chunks: 0,
            total_chunks: 0,
            input_write_count: 0,
            write_finalized: false,
        })
    }

    pub fn offset_table(&self) -> &OffsetTable {
        &self.offset_table
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Bytes of input consumed so far.
    pub fn input_write_count(&self) -> u64 {
        self.input_write_count
    }

    pub fn segment_file_count(&self) -> usize {
        self.segments.len()
    }

    pub fn delta_segment_file_count(&self) -> usize {
        self.delta_segments.len()
    }

    fn all_work_done(&self) -> bool {
        let amount = self.media.amount_of_chunks();
        (amount > 0 && self.total_chunks >= amount)
            || (self.media.media_size > 0 && self.input_write_count >= self.media.media_size)
    }

    fn full_check(&self) -> FullCheck {
        FullCheck {
            media: &self.media,
            format: self.options.format,
            total_chunks: self.total_chunks,
            input_write_count: self.input_write_count,
            remaining_segment_file_size: self.remaining_segment_file_size,
        }
    }

    /// Appends the next chunk of media. Returns the number of input bytes
    /// consumed; 0 once the image is finalized or the media size is reached.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> EwfResult<usize> {
        if self.write_finalized {
            return Ok(0);
        }
        if self.media.media_size > 0 && self.input_write_count >= self.media.media_size {
            return Ok(0);
        }
        let chunk_index = self.total_chunks;
        if self.offset_table.get(chunk_index).is_some() {
            return Err(EwfError::AlreadyWritten(chunk_index));
        }

        let packed = pack_chunk(
            chunk,
            self.media.chunk_size,
            self.options.compression_level,
            self.options.compress_empty_block,
            self.options.format.ewf_format(),
            &mut self.buffers,
        )?;

        if self.segments.last().map_or(true, |s| !s.write_open) {
            self.open_segment()?;
        }
        if self.create_chunks_section {
            self.open_chunks_section()?;
        }

        let segment = self.segments.last_mut().expect("a segment file is open");
        let data = if packed.is_compressed {
            &self.buffers.compressed[..packed.data_size]
        } else {
            &self.buffers.raw[..packed.data_size]
        };
        let written = segment.write_chunk_data(
            &mut self.pool,
            &mut self.offset_table,
            chunk_index,
            data,
            packed.is_compressed,
            packed.checksum,
            false,
        )?;
        let segment_offset = segment.offset(&mut self.pool)?;

        self.segment_chunks += 1;
        self.section_chunks += 1;
        self.total_chunks += 1;
        self.input_write_count += chunk.len() as u64;
        // The two table entries this chunk will cost at section close are
        // reserved here, for every dialect, table2 or not.
        self.remaining_segment_file_size = self
            .remaining_segment_file_size
            .saturating_sub(written + 2 * TABLE_OFFSET_SIZE);

        if planner::chunks_section_full(
            &self.full_check(),
            self.chunks_section_offset,
            segment_offset,
            self.section_chunks,
            self.chunks_per_chunks_section,
            self.options.maximum_section_chunks,
            self.options.unrestrict_offset_table,
        ) {
            self.close_chunks_section()?;
            let segment_full = planner::segment_file_full(
                &self.full_check(),
                self.segment_chunks,
                self.chunks_per_segment,
            );
            if segment_full && !self.all_work_done() {
                self.close_segment(false)?;
            }
        }
        Ok(chunk.len())
    }

    /// Replaces an already-written chunk through the delta segment chain.
    /// The primary image is left untouched. Returns the number of input bytes
    /// consumed; 0 once the image is finalized.
    pub fn write_delta_chunk(&mut self, chunk_index: u64, chunk: &[u8]) -> EwfResult<usize> {
        if self.write_finalized {
            return Ok(0);
        }
        if chunk.is_empty() || chunk.len() > self.media.chunk_size as usize {
            return Err(EwfError::InvalidArgument(
                "delta chunk larger than the media chunk size",
            ));
        }
        let entry = self.offset_table.get(chunk_index).ok_or(EwfError::InvalidArgument(
            "delta write targets a chunk that was never written",
        ))?;
        if entry.is_compressed {
            return Err(EwfError::Unsupported("compressed delta chunks"));
        }
        let sum = checksum(chunk);

        match entry.segment.kind {
            // Already overlaid, owning delta segment still open: rewrite the
            // delta chunk in place. When the chain has moved past that
            // segment, the overwrite appends like a first delta instead; the
            // table then only reaches the new copy.
            FileKind::Dwf
                if self.delta_segments[entry.segment.index].write_open =>
            {
                let segment = &mut self.delta_segments[entry.segment.index];
                segment.write_delta_chunk(
                    &mut self.pool,
                    &mut self.offset_table,
                    chunk_index,
                    chunk,
                    sum,
                    true,
                    true,
                )?;
            }
            _ => self.append_delta_chunk(chunk_index, chunk, sum)?,
        }
        Ok(chunk.len())
    }

    /// Closes the open chunks section, writes the trailing sections and the
    /// `done` terminator, and releases every open file. Idempotent: a second
    /// call returns 0 and writes nothing.
    pub fn finish(&mut self) -> EwfResult<u64> {
        if self.write_finalized {
            return Ok(0);
        }
        let mut count = 0;
        if self.chunks_section_offset != 0 {
            count += self.close_chunks_section()?;
        }
        let last_is_open = self.segments.last().is_some_and(|s| s.write_open);
        if !last_is_open {
            // Nothing was ever written, or the last segment filled exactly
            // and was chained with `next`; the trailing sections need a final
            // segment so the chain ends with `done`.
            self.open_segment()?;
        }
        count += self.close_segment(true)?;

        if let Some(delta) = self.delta_segments.last_mut() {
            if delta.write_open {
                delta.release(&mut self.pool)?;
            }
        }
        self.write_finalized = true;
        debug!(
            "finalized image: {} chunks over {} segment file(s)",
            self.total_chunks,
            self.segments.len()
        );
        Ok(count)
    }

    fn open_segment(&mut self) -> EwfResult<()> {
        if self.segments.len() >= u16::MAX as usize {
            return Err(EwfError::ExceedsMaximum {
                what: "segment file count",
                maximum: u16::MAX as u64,
            });
        }
        if self.header_sections.is_none() {
            self.header_sections = Some(build_header_sections(
                &self.options.header_values,
                self.options.format,
                self.options.compression_level,
            )?);
        }
        let number = self.segments.len() as u16 + 1;
        let path = segment_filename(&self.base_path, self.options.format, FileKind::Ewf, number)?;
        let mut segment = SegmentFile::create(&mut self.pool, &path, FileKind::Ewf, number)?;
        let headers = self
            .header_sections
            .as_ref()
            .expect("header sections were just built");
        let written = segment.write_start(
            &mut self.pool,
            self.options.format,
            self.options.compression_level,
            &self.media,
            headers,
            &mut self.data_section_cache,
        )?;
        self.segments.push(segment);

        // Budget the segment, terminator reserved up front.
        self.remaining_segment_file_size = self
            .options
            .segment_file_size
            .saturating_sub(SECTION_DESCRIPTOR_SIZE)
            .saturating_sub(written);
        self.segment_chunks = 0;
        self.section_chunks = 0;
        self.chunks_section_number = 0;
        self.chunks_section_offset = 0;
        self.create_chunks_section = true;
        self.chunks_per_segment = planner::chunks_per_segment(
            self.remaining_segment_file_size,
            self.options.maximum_section_chunks,
            0,
            self.total_chunks,
            &self.media,
            self.options.format,
            self.options.unrestrict_offset_table,
        );
        debug!(
            "opened segment {} (estimated {} chunks)",
            number, self.chunks_per_segment
        );
        Ok(())
    }

    fn open_chunks_section(&mut self) -> EwfResult<()> {
        // Reserve this section's close-time framing up front.
        self.remaining_segment_file_size = self
            .remaining_segment_file_size
            .saturating_sub(chunks_section_reserve(self.options.format));

        let segment = self.segments.last_mut().expect("a segment file is open");
        let offset = segment.offset(&mut self.pool)?;
        self.chunks_section_offset = offset;
        self.section_base_chunk = self.total_chunks;
        self.chunks_section_number += 1;

        self.chunks_per_segment = planner::chunks_per_segment(
            self.remaining_segment_file_size,
            self.options.maximum_section_chunks,
            self.segment_chunks,
            self.total_chunks,
            &self.media,
            self.options.format,
            self.options.unrestrict_offset_table,
        );
        self.chunks_per_chunks_section = planner::chunks_per_chunks_section(
            self.options.maximum_section_chunks,
            self.chunks_per_segment,
            self.chunks_section_number,
            self.options.unrestrict_offset_table,
        )?;
        let capacity = self.chunks_per_chunks_section.min(u32::MAX as u64) as u32;
        if self.table_offsets.capacity() < capacity as usize {
            self.table_offsets
                .reserve(capacity as usize - self.table_offsets.capacity());
        }

        let segment = self.segments.last_mut().expect("a segment file is open");
        let written = segment.write_chunks_section_start(
            &mut self.pool,
            self.options.format,
            capacity,
            self.media.chunk_size,
        )?;
        self.remaining_segment_file_size =
            self.remaining_segment_file_size.saturating_sub(written);
        self.create_chunks_section = false;
        debug!(
            "opened chunks section {} at {} (capacity {} chunks)",
            self.chunks_section_number, offset, capacity
        );
        Ok(())
    }

    fn close_chunks_section(&mut self) -> EwfResult<u64> {
        let segment = self.segments.last_mut().expect("a segment file is open");
        let written = segment.write_chunks_correction(
            &mut self.pool,
            self.options.format,
            &self.offset_table,
            self.chunks_section_offset,
            self.section_base_chunk,
            self.section_chunks,
            &mut self.table_offsets,
        )?;
        self.chunks_section_offset = 0;
        self.section_chunks = 0;
        self.create_chunks_section = true;
        Ok(written)
    }

    fn close_segment(&mut self, is_last: bool) -> EwfResult<u64> {
        let segment = self.segments.last_mut().expect("a segment file is open");
        segment.write_close(
            &mut self.pool,
            self.options.format,
            is_last,
            &self.options.hash_values,
            &self.options.sessions,
            &self.options.acquiry_errors,
        )
    }

    fn append_delta_chunk(&mut self, chunk_index: u64, chunk: &[u8], sum: u32) -> EwfResult<()> {
        let section_size =
            SECTION_DESCRIPTOR_SIZE + DELTA_CHUNK_HEADER_SIZE + chunk.len() as u64 + CHECKSUM_SIZE;

        // Whether the open delta segment can take the chunk plus a rewritten
        // terminator in place of the one being rolled back.
        let fits = match self.delta_segments.last() {
            Some(last) if last.write_open => {
                let terminator = last
                    .sections
                    .last()
                    .expect("an open delta segment ends with a terminator");
                Some(
                    terminator.start + section_size + SECTION_DESCRIPTOR_SIZE
                        <= self.options.delta_segment_file_size,
                )
            }
            _ => None,
        };
        match fits {
            Some(true) => {
                let last = self.delta_segments.last_mut().expect("checked above");
                last.rollback_last_section(&mut self.pool)?;
            }
            Some(false) => {
                let last = self.delta_segments.last_mut().expect("checked above");
                last.rollback_last_section(&mut self.pool)?;
                last.write_last_section(&mut self.pool, false)?;
                last.release(&mut self.pool)?;
                self.open_delta_segment()?;
            }
            None => self.open_delta_segment()?,
        }

        let segment = self
            .delta_segments
            .last_mut()
            .expect("a delta segment file is open");
        segment.write_delta_chunk(
            &mut self.pool,
            &mut self.offset_table,
            chunk_index,
            chunk,
            sum,
            true,
            false,
        )?;
        segment.write_last_section(&mut self.pool, true)?;
        Ok(())
    }

    fn open_delta_segment(&mut self) -> EwfResult<()> {
        if self.delta_segments.len() >= u16::MAX as usize {
            return Err(EwfError::ExceedsMaximum {
                what: "delta segment file count",
                maximum: u16::MAX as u64,
            });
        }
        let number = self.delta_segments.len() as u16 + 1;
        let path = segment_filename(&self.base_path, self.options.format, FileKind::Dwf, number)?;
        let mut segment = SegmentFile::create(&mut self.pool, &path, FileKind::Dwf, number)?;
        let headers = self
            .header_sections
            .as_ref()
            .expect("a delta write follows a primary write");
        segment.write_start(
            &mut self.pool,
            self.options.format,
            self.options.compression_level,
            &self.media,
            headers,
            &mut self.data_section_cache,
        )?;
        self.delta_segments.push(segment);
        debug!("opened delta segment {}", number);
        Ok(())
    }
}

/// Close-time framing cost of one chunks section: the rewritten table header
/// for the single-table dialects, the appended `table`/`table2` descriptors
/// and offset-array checksums for the rest.
fn chunks_section_reserve(format: Format) -> u64 {
    if format.ewf_format() == crate::EwfFormat::S01 {
        SECTION_DESCRIPTOR_SIZE
    } else if format == Format::Encase1 {
        SECTION_DESCRIPTOR_SIZE + CHECKSUM_SIZE
    } else {
        2 * (SECTION_DESCRIPTOR_SIZE + CHECKSUM_SIZE)
    }
}

impl<P: FilePool> Drop for Writer<P> {
    fn drop(&mut self) {
        self.finish().unwrap();
    }
}
