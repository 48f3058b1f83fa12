//! Section-level writing of one segment file.
//!
//! A segment file is the 13-byte file header followed by a chain of sections,
//! each opened by a 76-byte checksummed descriptor. This module owns the
//! section sequences: which header sections a dialect emits, how a chunks
//! section is opened with a placeholder and rewritten by the correction pass,
//! and which trailing sections close the last segment of an image.

use std::io::{Cursor, SeekFrom};
use std::path::Path;

use binrw::prelude::*;
use byteorder::{WriteBytesExt, LE};
use log::{debug, warn};

use crate::header::{AcquiryError, HashValues, HeaderSections, Session};
use crate::io_utils::{checksum, CountingChecksumWriter};
use crate::offset_table::{ChunkOffset, OffsetTable, SegmentId};
use crate::pool::FilePool;
use crate::records::{
    section_type, DeltaChunkHeader, Error2Header, FileHeader, HashPayload, SectionDescriptor,
    SessionHeader, SmartVolume, TableHeader, Volume, COMPRESSED_OFFSET_FLAG,
    DELTA_CHUNK_HEADER_SIZE, SECTION_DESCRIPTOR_SIZE,
};
use crate::records::{DigestPayload, Error2Entry, SessionEntry};
use crate::{
    CompressionLevel, EwfError, EwfResult, FileKind, Format, MediaValues, DVF_SIGNATURE,
    EVF_SIGNATURE,
};

/// Serializes a record and appends the checksum of its bytes.
macro_rules! checksummed {
    ($record:expr) => {{
        let mut buf = Vec::new();
        Cursor::new(&mut buf).write_le($record).unwrap();
        let sum = checksum(&buf);
        buf.write_u32::<LE>(sum).unwrap();
        buf
    }};
}

/// One section already written into this segment file.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SectionEntry {
    pub kind: &'static str,
    pub start: u64,
    pub size: u64,
}

/// State of one open (or closed) segment file.
pub(crate) struct SegmentFile {
    pub kind: FileKind,
    /// 1-based position in its chain.
    pub number: u16,
    pub pool_entry: usize,
    /// Chunks this segment holds.
    pub segment_chunks: u64,
    pub sections: Vec<SectionEntry>,
    pub write_open: bool,
}

impl SegmentFile {
    pub fn create<P: FilePool>(
        pool: &mut P,
        path: &Path,
        kind: FileKind,
        number: u16,
    ) -> EwfResult<Self> {
        let pool_entry = pool
            .open(path)
            .map_err(|e| EwfError::io("open segment file", 0, e))?;
        Ok(Self {
            kind,
            number,
            pool_entry,
            segment_chunks: 0,
            sections: Vec::new(),
            write_open: true,
        })
    }

    pub fn id(&self) -> SegmentId {
        SegmentId {
            kind: self.kind,
            index: self.number as usize - 1,
        }
    }

    pub fn offset<P: FilePool>(&self, pool: &mut P) -> EwfResult<u64> {
        pool.offset(self.pool_entry)
            .map_err(|e| EwfError::io("segment file offset", 0, e))
    }

    fn seek<P: FilePool>(&self, pool: &mut P, pos: SeekFrom) -> EwfResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            _ => 0,
        };
        pool.seek(self.pool_entry, pos)
            .map_err(|e| EwfError::io("seek segment file", target, e))
    }

    fn write_all<P: FilePool>(
        &self,
        pool: &mut P,
        op: &'static str,
        offset: u64,
        buf: &[u8],
    ) -> EwfResult<u64> {
        let mut written = 0usize;
        while written < buf.len() {
            let n = pool
                .write(self.pool_entry, &buf[written..])
                .map_err(|e| EwfError::io(op, offset + written as u64, e))?;
            if n == 0 {
                return Err(EwfError::io(
                    op,
                    offset + written as u64,
                    std::io::ErrorKind::WriteZero.into(),
                ));
            }
            written += n;
        }
        Ok(buf.len() as u64)
    }

    /// Writes a complete section (descriptor plus payload) at the current
    /// offset and records it in the section list.
    fn write_section<P: FilePool>(
        &mut self,
        pool: &mut P,
        kind: &'static str,
        payload: &[u8],
    ) -> EwfResult<u64> {
        let start = self.offset(pool)?;
        let size = SECTION_DESCRIPTOR_SIZE + payload.len() as u64;
        let descriptor = SectionDescriptor::new(kind, start + size, size);
        let mut bytes = checksummed!(&descriptor);
        bytes.extend_from_slice(payload);
        self.write_all(pool, "write section", start, &bytes)?;
        self.sections.push(SectionEntry { kind, start, size });
        debug!(
            "segment {}: wrote {} section at {} ({} bytes)",
            self.number, kind, start, size
        );
        Ok(size)
    }

    /// Writes the file header and, for primary segment files, the header and
    /// media geometry sections the dialect asks for. Segments past the first
    /// re-emit the cached `data` section instead (EnCase 2 and later).
    pub fn write_start<P: FilePool>(
        &mut self,
        pool: &mut P,
        format: Format,
        level: CompressionLevel,
        media: &MediaValues,
        headers: &HeaderSections,
        data_section_cache: &mut Option<Vec<u8>>,
    ) -> EwfResult<u64> {
        let signature = match self.kind {
            FileKind::Ewf => EVF_SIGNATURE,
            FileKind::Dwf => DVF_SIGNATURE,
        };
        let mut buf = Vec::new();
        Cursor::new(&mut buf)
            .write_le(&FileHeader::new(signature, self.number))
            .unwrap();
        let mut count = self.write_all(pool, "write file header", 0, &buf)?;

        // Delta chains carry only chunk overwrites.
        if self.kind == FileKind::Dwf {
            return Ok(count);
        }

        if self.number == 1 {
            let header2 = || {
                headers
                    .header2
                    .as_deref()
                    .expect("header2 is built for the dialects that emit it")
            };
            match format {
                Format::Ewf | Format::Smart | Format::Encase1 => {
                    count += self.write_section(pool, section_type::HEADER, &headers.header)?;
                }
                Format::Encase2 | Format::Encase3 | Format::Linen | Format::FtkImager => {
                    count += self.write_section(pool, section_type::HEADER, &headers.header)?;
                    count += self.write_section(pool, section_type::HEADER, &headers.header)?;
                }
                Format::Encase4 | Format::Encase5 | Format::Encase6 => {
                    count += self.write_section(pool, section_type::HEADER2, header2())?;
                    count += self.write_section(pool, section_type::HEADER2, header2())?;
                    count += self.write_section(pool, section_type::HEADER, &headers.header)?;
                }
                Format::Ewfx => {
                    let xheader = headers
                        .xheader
                        .as_deref()
                        .expect("xheader is built for the EWFX dialect");
                    count += self.write_section(pool, section_type::XHEADER, xheader)?;
                    count += self.write_section(pool, section_type::HEADER2, header2())?;
                    count += self.write_section(pool, section_type::HEADER2, header2())?;
                    count += self.write_section(pool, section_type::HEADER, &headers.header)?;
                }
            }

            count += match format {
                Format::Ewf => {
                    let payload = checksummed!(&smart_volume(media));
                    self.write_section(pool, section_type::DISK, &payload)?
                }
                Format::Smart => {
                    let payload = checksummed!(&smart_volume(media));
                    self.write_section(pool, section_type::VOLUME, &payload)?
                }
                _ => {
                    let payload = checksummed!(&encase_volume(media, level));
                    self.write_section(pool, section_type::VOLUME, &payload)?
                }
            };
        } else if format.supports_data_section() {
            if data_section_cache.is_none() {
                *data_section_cache = Some(checksummed!(&encase_volume(media, level)));
            }
            let payload = data_section_cache
                .as_ref()
                .expect("data section cache was just filled")
                .clone();
            count += self.write_section(pool, section_type::DATA, &payload)?;
        }
        Ok(count)
    }

    /// Opens a chunks section at the current offset.
    ///
    /// Single-table dialects (SMART, EnCase 1) get a `table` section whose
    /// header and offsets array are placeholders sized for `capacity`; the
    /// chunk payloads follow inside the same section. Everything newer gets a
    /// `sectors` descriptor whose size is provisional. Both are rewritten by
    /// the correction pass.
    pub fn write_chunks_section_start<P: FilePool>(
        &mut self,
        pool: &mut P,
        format: Format,
        capacity: u32,
        chunk_size: u32,
    ) -> EwfResult<u64> {
        if format.uses_single_table_section() {
            let mut payload = checksummed!(&TableHeader::new(capacity, 0));
            let offsets = vec![0u8; capacity as usize * 4];
            payload.extend_from_slice(&offsets);
            if format == Format::Encase1 {
                payload.write_u32::<LE>(checksum(&offsets)).unwrap();
            }
            self.write_section(pool, section_type::TABLE, &payload)
        } else {
            let start = self.offset(pool)?;
            let estimated =
                SECTION_DESCRIPTOR_SIZE + capacity as u64 * (chunk_size as u64 + 4);
            let descriptor = SectionDescriptor::new(section_type::SECTORS, start + estimated, estimated);
            let bytes = checksummed!(&descriptor);
            self.write_all(pool, "write sectors section", start, &bytes)?;
            self.sections.push(SectionEntry {
                kind: section_type::SECTORS,
                start,
                size: estimated,
            });
            Ok(SECTION_DESCRIPTOR_SIZE)
        }
    }

    /// Appends one packed chunk payload and records where it landed.
    #[allow(clippy::too_many_arguments)]
    pub fn write_chunk_data<P: FilePool>(
        &mut self,
        pool: &mut P,
        offset_table: &mut OffsetTable,
        chunk_index: u64,
        data: &[u8],
        is_compressed: bool,
        checksum_value: u32,
        write_checksum: bool,
    ) -> EwfResult<u64> {
        let offset = self.offset(pool)?;
        let mut total = self.write_all(pool, "write chunk data", offset, data)?;
        if write_checksum {
            total += self.write_all(
                pool,
                "write chunk checksum",
                offset + total,
                &checksum_value.to_le_bytes(),
            )?;
        }
        offset_table.set(
            chunk_index,
            ChunkOffset {
                segment: self.id(),
                file_offset: offset,
                size: total as u32,
                is_compressed,
            },
            false,
        )?;
        self.segment_chunks += 1;
        Ok(total)
    }

    /// Closes the chunks section opened at `section_offset`, `count` chunks
    /// after `base_chunk`: rewrites the placeholder with the final size and,
    /// for the dialects that use them, appends the `table` and `table2`
    /// sections. Leaves the file positioned at its end.
    #[allow(clippy::too_many_arguments)]
    pub fn write_chunks_correction<P: FilePool>(
        &mut self,
        pool: &mut P,
        format: Format,
        offset_table: &OffsetTable,
        section_offset: u64,
        base_chunk: u64,
        count: u64,
        table_offsets: &mut Vec<u32>,
    ) -> EwfResult<u64> {
        let end = self.offset(pool)?;

        table_offsets.clear();
        for i in 0..count {
            let entry = offset_table
                .get(base_chunk + i)
                .expect("offset table covers every written chunk");
            if entry.file_offset > i32::MAX as u64 {
                return Err(EwfError::ExceedsMaximum {
                    what: "table offset",
                    maximum: i32::MAX as u64,
                });
            }
            let mut value = entry.file_offset as u32;
            if entry.is_compressed {
                value |= COMPRESSED_OFFSET_FLAG;
            }
            table_offsets.push(value);
        }
        let mut counting = CountingChecksumWriter::new(Vec::with_capacity(table_offsets.len() * 4));
        for value in table_offsets.iter() {
            counting.write_u32::<LE>(*value).unwrap();
        }
        let (offsets_bytes, offsets_sum) = counting.finalize();

        let section_size = end - section_offset;
        let section = self
            .sections
            .iter_mut()
            .rev()
            .find(|s| s.start == section_offset)
            .expect("the chunks section being corrected was recorded at open");
        if count < section_chunk_capacity(section.size, format) {
            warn!(
                "segment {}: chunks section at {} closes short ({} chunks)",
                self.number, section_offset, count
            );
        }
        section.size = section_size;

        if format.uses_single_table_section() {
            self.seek(pool, SeekFrom::Start(section_offset))?;
            let descriptor =
                SectionDescriptor::new(section_type::TABLE, section_offset + section_size, section_size);
            let mut bytes = checksummed!(&descriptor);
            bytes.extend_from_slice(&checksummed!(&TableHeader::new(count as u32, 0)));
            bytes.extend_from_slice(&offsets_bytes);
            if format == Format::Encase1 {
                bytes.write_u32::<LE>(offsets_sum).unwrap();
            }
            self.write_all(pool, "rewrite table section", section_offset, &bytes)?;
            self.seek(pool, SeekFrom::Start(end))?;
            Ok(0)
        } else {
            self.seek(pool, SeekFrom::Start(section_offset))?;
            let descriptor = SectionDescriptor::new(section_type::SECTORS, end, section_size);
            let bytes = checksummed!(&descriptor);
            self.write_all(pool, "rewrite sectors section", section_offset, &bytes)?;
            self.seek(pool, SeekFrom::Start(end))?;

            let mut appended = 0;
            for kind in [section_type::TABLE, section_type::TABLE2] {
                let mut payload = checksummed!(&TableHeader::new(count as u32, 0));
                payload.extend_from_slice(&offsets_bytes);
                payload.write_u32::<LE>(offsets_sum).unwrap();
                appended += self.write_section(pool, kind, &payload)?;
            }
            Ok(appended)
        }
    }

    /// Writes one `delta_chunk` section. With `no_section_append` the section
    /// replaces an existing delta chunk in place and the section list is left
    /// alone; otherwise it is appended at the current offset.
    #[allow(clippy::too_many_arguments)]
    pub fn write_delta_chunk<P: FilePool>(
        &mut self,
        pool: &mut P,
        offset_table: &mut OffsetTable,
        chunk_index: u64,
        data: &[u8],
        checksum_value: u32,
        write_checksum: bool,
        no_section_append: bool,
    ) -> EwfResult<u64> {
        let payload_size = data.len() as u64 + if write_checksum { 4 } else { 0 };
        let start = if no_section_append {
            let entry = offset_table
                .get(chunk_index)
                .expect("delta overwrite targets a chunk the table knows");
            if entry.size as u64 != payload_size {
                return Err(EwfError::InvalidArgument(
                    "delta overwrite must keep the stored chunk size",
                ));
            }
            let start = entry.file_offset - DELTA_CHUNK_HEADER_SIZE - SECTION_DESCRIPTOR_SIZE;
            self.seek(pool, SeekFrom::Start(start))?;
            start
        } else {
            self.offset(pool)?
        };

        let size = SECTION_DESCRIPTOR_SIZE + DELTA_CHUNK_HEADER_SIZE + payload_size;
        let descriptor = SectionDescriptor::new(section_type::DELTA_CHUNK, start + size, size);
        let mut bytes = checksummed!(&descriptor);
        bytes.extend_from_slice(&checksummed!(&DeltaChunkHeader::new(
            chunk_index,
            payload_size as u32
        )));
        bytes.extend_from_slice(data);
        if write_checksum {
            bytes.write_u32::<LE>(checksum_value).unwrap();
        }
        self.write_all(pool, "write delta chunk", start, &bytes)?;

        if !no_section_append {
            self.sections.push(SectionEntry {
                kind: section_type::DELTA_CHUNK,
                start,
                size,
            });
            self.segment_chunks += 1;
        }
        offset_table.set(
            chunk_index,
            ChunkOffset {
                segment: self.id(),
                file_offset: start + SECTION_DESCRIPTOR_SIZE + DELTA_CHUNK_HEADER_SIZE,
                size: payload_size as u32,
                is_compressed: false,
            },
            true,
        )?;
        Ok(bytes.len() as u64)
    }

    /// Writes the terminator: `done` on the last segment of a chain, `next`
    /// otherwise. The terminator's next-section offset points at itself.
    pub fn write_last_section<P: FilePool>(
        &mut self,
        pool: &mut P,
        is_last_segment: bool,
    ) -> EwfResult<u64> {
        let kind = if is_last_segment {
            section_type::DONE
        } else {
            section_type::NEXT
        };
        let start = self.offset(pool)?;
        let descriptor = SectionDescriptor::new(kind, start, SECTION_DESCRIPTOR_SIZE);
        let bytes = checksummed!(&descriptor);
        self.write_all(pool, "write terminator section", start, &bytes)?;
        self.sections.push(SectionEntry {
            kind,
            start,
            size: SECTION_DESCRIPTOR_SIZE,
        });
        Ok(SECTION_DESCRIPTOR_SIZE)
    }

    /// Drops the last written section so the next write overwrites it.
    /// The delta path uses this to reclaim the terminator.
    pub fn rollback_last_section<P: FilePool>(&mut self, pool: &mut P) -> EwfResult<SectionEntry> {
        let last = self
            .sections
            .pop()
            .ok_or(EwfError::InvalidArgument("no section to roll back"))?;
        self.seek(pool, SeekFrom::Start(last.start))?;
        Ok(last)
    }

    /// Emits the trailing sections and the terminator, then closes the file.
    #[allow(clippy::too_many_arguments)]
    pub fn write_close<P: FilePool>(
        &mut self,
        pool: &mut P,
        format: Format,
        is_last_segment: bool,
        hashes: &HashValues,
        sessions: &[Session],
        acquiry_errors: &[AcquiryError],
    ) -> EwfResult<u64> {
        let mut count = 0;
        if is_last_segment {
            if format.supports_error2_section() && !acquiry_errors.is_empty() {
                let header = Error2Header {
                    entry_count: acquiry_errors.len() as u32,
                    unknown: [0u8; 512],
                };
                let mut cursor = Cursor::new(Vec::with_capacity(acquiry_errors.len() * 8));
                for error in acquiry_errors {
                    cursor
                        .write_le(&Error2Entry {
                            first_sector: error.first_sector,
                            sector_count: error.sector_count,
                        })
                        .unwrap();
                }
                let entries = cursor.into_inner();
                let mut payload = checksummed!(&header);
                payload.extend_from_slice(&entries);
                payload.write_u32::<LE>(checksum(&entries)).unwrap();
                count += self.write_section(pool, section_type::ERROR2, &payload)?;
            }
            if format.supports_session_section() && !sessions.is_empty() {
                let header = SessionHeader {
                    entry_count: sessions.len() as u32,
                    unknown: [0u8; 28],
                };
                let mut cursor = Cursor::new(Vec::with_capacity(sessions.len() * 32));
                for session in sessions {
                    cursor
                        .write_le(&SessionEntry {
                            session_type: session.session_type,
                            first_sector: session.first_sector,
                            unknown: [0u8; 24],
                        })
                        .unwrap();
                }
                let entries = cursor.into_inner();
                let mut payload = checksummed!(&header);
                payload.extend_from_slice(&entries);
                payload.write_u32::<LE>(checksum(&entries)).unwrap();
                count += self.write_section(pool, section_type::SESSION, &payload)?;
            }
            if let Some(md5) = hashes.md5 {
                let payload = checksummed!(&HashPayload {
                    md5,
                    unknown: [0u8; 16],
                });
                count += self.write_section(pool, section_type::HASH, &payload)?;
            }
            if format.supports_digest_section() {
                if let Some(sha1) = hashes.sha1 {
                    let payload = checksummed!(&DigestPayload {
                        md5: hashes.md5.unwrap_or_default(),
                        sha1,
                        padding: [0u8; 40],
                    });
                    count += self.write_section(pool, section_type::DIGEST, &payload)?;
                }
            }
        }
        count += self.write_last_section(pool, is_last_segment)?;
        self.release(pool)?;
        Ok(count)
    }

    /// Closes the pool entry without writing anything further.
    pub fn release<P: FilePool>(&mut self, pool: &mut P) -> EwfResult<()> {
        pool.close(self.pool_entry)
            .map_err(|e| EwfError::io("close segment file", 0, e))?;
        self.write_open = false;
        debug!(
            "closed segment file {} ({} chunks)",
            self.number, self.segment_chunks
        );
        Ok(())
    }
}

fn smart_volume(media: &MediaValues) -> SmartVolume {
    SmartVolume {
        reserved: 1,
        chunk_count: media.amount_of_chunks().min(u32::MAX as u64) as u32,
        sectors_per_chunk: media.sectors_per_chunk,
        bytes_per_sector: media.bytes_per_sector,
        sector_count: media.sector_count().min(u32::MAX as u64) as u32,
        padding: [0u8; 70],
    }
}

fn encase_volume(media: &MediaValues, level: CompressionLevel) -> Volume {
    Volume {
        media_type: media.media_type,
        unknown1: [0u8; 3],
        chunk_count: media.amount_of_chunks().min(u32::MAX as u64) as u32,
        sectors_per_chunk: media.sectors_per_chunk,
        bytes_per_sector: media.bytes_per_sector,
        sector_count: media.sector_count(),
        chs_cylinders: 0,
        chs_heads: 0,
        chs_sectors: 0,
        media_flags: media.media_flags,
        unknown2: [0u8; 3],
        palm_volume_start_sector: 0,
        unknown3: [0u8; 4],
        smart_logs_start_sector: 0,
        compression_level: match level {
            CompressionLevel::None => 0,
            CompressionLevel::Fast | CompressionLevel::Default => 1,
            CompressionLevel::Best => 2,
        },
        unknown4: [0u8; 3],
        sector_error_granularity: media.sectors_per_chunk,
        unknown5: [0u8; 4],
        set_identifier: [0u8; 16],
        padding: [0u8; 968],
    }
}

/// How many chunks the placeholder written at section open was sized for;
/// only used to notice sections that close short of their estimate.
fn section_chunk_capacity(placeholder_size: u64, format: Format) -> u64 {
    if format.uses_single_table_section() {
        let fixed = SECTION_DESCRIPTOR_SIZE
            + crate::records::TABLE_HEADER_SIZE
            + if format == Format::Encase1 { 4 } else { 0 };
        placeholder_size.saturating_sub(fixed) / 4
    } else {
        // The sectors estimate is in payload bytes, not entries; only the
        // single-table dialects can notice a short close.
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::build_header_sections;
    use crate::pool::MemoryFilePool;
    use crate::records::FILE_HEADER_SIZE;

    fn start_segment(format: Format) -> (MemoryFilePool, SegmentFile) {
        let mut pool = MemoryFilePool::new();
        let mut segment =
            SegmentFile::create(&mut pool, Path::new("t.E01"), FileKind::Ewf, 1).unwrap();
        let media = MediaValues::new(64, 512, 0);
        let headers = build_header_sections(
            &crate::HeaderValues::default(),
            format,
            CompressionLevel::None,
        )
        .unwrap();
        let mut cache = None;
        segment
            .write_start(
                &mut pool,
                format,
                CompressionLevel::None,
                &media,
                &headers,
                &mut cache,
            )
            .unwrap();
        (pool, segment)
    }

    fn descriptor_at(bytes: &[u8], offset: u64) -> SectionDescriptor {
        let mut cursor = Cursor::new(&bytes[offset as usize..offset as usize + 72]);
        cursor.read_le().unwrap()
    }

    #[test]
    fn encase6_segment_one_sections() {
        let (_, segment) = start_segment(Format::Encase6);
        let kinds: Vec<&str> = segment.sections.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, ["header2", "header2", "header", "volume"]);
        assert_eq!(segment.sections[0].start, FILE_HEADER_SIZE);
    }

    #[test]
    fn smart_segment_one_sections() {
        let (_, segment) = start_segment(Format::Smart);
        let kinds: Vec<&str> = segment.sections.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, ["header", "volume"]);
    }

    #[test]
    fn descriptors_carry_valid_checksums() {
        let (pool, segment) = start_segment(Format::Encase6);
        let bytes = pool.contents("t.E01").unwrap();
        for section in &segment.sections {
            let body = &bytes[section.start as usize..section.start as usize + 72];
            let stored = u32::from_le_bytes(
                bytes[section.start as usize + 72..section.start as usize + 76]
                    .try_into()
                    .unwrap(),
            );
            assert_eq!(stored, checksum(body), "section {}", section.kind);
            let descriptor = descriptor_at(bytes, section.start);
            assert_eq!(descriptor.kind(), section.kind);
            assert_eq!(descriptor.next_offset, section.start + section.size);
        }
    }

    #[test]
    fn terminator_points_at_itself() {
        let (mut pool, mut segment) = start_segment(Format::Encase6);
        let start = segment.offset(&mut pool).unwrap();
        segment.write_last_section(&mut pool, true).unwrap();
        let bytes = pool.contents("t.E01").unwrap();
        let descriptor = descriptor_at(bytes, start);
        assert_eq!(descriptor.kind(), "done");
        assert_eq!(descriptor.next_offset, start);
        assert_eq!(descriptor.size, SECTION_DESCRIPTOR_SIZE);
    }

    #[test]
    fn delta_chunk_round_trips_through_the_table() {
        let mut pool = MemoryFilePool::new();
        let mut segment =
            SegmentFile::create(&mut pool, Path::new("t.D01"), FileKind::Dwf, 1).unwrap();
        let media = MediaValues::new(1, 64, 0);
        let headers = build_header_sections(
            &crate::HeaderValues::default(),
            Format::Ewfx,
            CompressionLevel::None,
        )
        .unwrap();
        let mut cache = None;
        segment
            .write_start(
                &mut pool,
                Format::Ewfx,
                CompressionLevel::None,
                &media,
                &headers,
                &mut cache,
            )
            .unwrap();

        let mut table = OffsetTable::new();
        // Seed the table as if the chunk came from a primary segment.
        table
            .set(
                2,
                ChunkOffset {
                    segment: SegmentId {
                        kind: FileKind::Ewf,
                        index: 0,
                    },
                    file_offset: 1000,
                    size: 68,
                    is_compressed: false,
                },
                false,
            )
            .unwrap();

        let data = [7u8; 64];
        let sum = checksum(&data);
        segment
            .write_delta_chunk(&mut pool, &mut table, 2, &data, sum, true, false)
            .unwrap();

        let entry = table.get(2).unwrap();
        assert_eq!(entry.segment.kind, FileKind::Dwf);
        assert_eq!(entry.size, 68);

        let bytes = pool.contents("t.D01").unwrap();
        let section_start = entry.file_offset - SECTION_DESCRIPTOR_SIZE - DELTA_CHUNK_HEADER_SIZE;
        let descriptor = descriptor_at(bytes, section_start);
        assert_eq!(descriptor.kind(), "delta_chunk");
        let header_at = (section_start + SECTION_DESCRIPTOR_SIZE) as usize;
        let header: DeltaChunkHeader = Cursor::new(&bytes[header_at..header_at + 14])
            .read_le()
            .unwrap();
        assert_eq!(header.chunk, 3);
        assert_eq!(header.chunk_size, 68);
        assert_eq!(
            &bytes[entry.file_offset as usize..entry.file_offset as usize + 64],
            &data
        );
    }
}
