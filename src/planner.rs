//! Capacity planning: how many chunks still fit.
//!
//! Everything here is integer arithmetic over the write context's counters.
//! The estimates deliberately reproduce libewf's accounting, rough edges
//! included (see the notes on `chunks_per_segment`), because segment layout
//! decisions should match what the established tooling produces.

use crate::records::{CHECKSUM_SIZE, SECTION_DESCRIPTOR_SIZE, TABLE_OFFSET_SIZE};
use crate::{EwfError, EwfFormat, EwfResult, Format, MediaValues};

/// Average on-disk cost of one chunk beyond its data: the deflate tax for the
/// always-compressed SMART family, the trailing checksum otherwise.
fn chunk_overhead(ewf_format: EwfFormat) -> u64 {
    match ewf_format {
        EwfFormat::S01 => 16,
        EwfFormat::E01 => CHECKSUM_SIZE,
    }
}

/// Estimates the total number of chunks the current segment file will hold,
/// `segment_chunks` already written included.
///
/// `required_chunk_sections` is computed with a modulo where a ceiling
/// division looks intended; libewf does the same, and identical layouts
/// matter more than the nicer formula.
pub(crate) fn chunks_per_segment(
    remaining_segment_file_size: u64,
    maximum_section_chunks: u32,
    segment_chunks: u64,
    total_chunks: u64,
    media: &MediaValues,
    format: Format,
    unrestrict_offset_table: bool,
) -> u64 {
    let chunk_cost = media.chunk_size as u64 + chunk_overhead(format.ewf_format());
    let maximum_chunks = remaining_segment_file_size / chunk_cost;

    let required_chunk_sections = if unrestrict_offset_table {
        1
    } else {
        maximum_chunks % maximum_section_chunks as u64
    };

    let section_overhead = match format {
        _ if format.ewf_format() == EwfFormat::S01 => {
            SECTION_DESCRIPTOR_SIZE * required_chunk_sections + TABLE_OFFSET_SIZE * maximum_chunks
        }
        Format::Encase1 => {
            (SECTION_DESCRIPTOR_SIZE + CHECKSUM_SIZE) * required_chunk_sections
                + TABLE_OFFSET_SIZE * maximum_chunks
        }
        _ => {
            (3 * SECTION_DESCRIPTOR_SIZE + 2 * CHECKSUM_SIZE) * required_chunk_sections
                + 2 * TABLE_OFFSET_SIZE * maximum_chunks
        }
    };
    let remaining = remaining_segment_file_size.saturating_sub(section_overhead);

    let mut estimate = remaining / chunk_cost;
    if media.media_size > 0 {
        let chunks_left = media.amount_of_chunks().saturating_sub(total_chunks);
        estimate = estimate.min(chunks_left);
    }
    estimate += segment_chunks;
    estimate.min(u32::MAX as u64)
}

/// How many chunks the chunks section now being opened may hold.
pub(crate) fn chunks_per_chunks_section(
    maximum_section_chunks: u32,
    chunks_per_segment: u64,
    section_number: u32,
    unrestrict_offset_table: bool,
) -> EwfResult<u64> {
    if section_number == 0 {
        return Err(EwfError::InvalidArgument("section numbers start at 1"));
    }
    let preceding = (section_number as u64 - 1) * maximum_section_chunks as u64;
    if chunks_per_segment <= preceding {
        return Err(EwfError::InvalidArgument(
            "no chunk capacity left in this segment",
        ));
    }
    let mut remaining = chunks_per_segment - preceding;
    if !unrestrict_offset_table && remaining > maximum_section_chunks as u64 {
        remaining = maximum_section_chunks as u64;
    }
    Ok(remaining.min(i32::MAX as u64))
}

pub(crate) struct FullCheck<'a> {
    pub media: &'a MediaValues,
    pub format: Format,
    pub total_chunks: u64,
    pub input_write_count: u64,
    pub remaining_segment_file_size: u64,
}

impl FullCheck<'_> {
    fn all_chunks_written(&self) -> bool {
        let amount = self.media.amount_of_chunks();
        amount > 0 && self.total_chunks >= amount
    }

    fn all_input_consumed(&self) -> bool {
        self.media.media_size > 0 && self.input_write_count >= self.media.media_size
    }

    fn no_room_for_another_chunk(&self) -> bool {
        self.remaining_segment_file_size < self.media.chunk_size as u64 + CHECKSUM_SIZE
    }
}

/// Whether the current segment file cannot take another chunk.
pub(crate) fn segment_file_full(
    check: &FullCheck,
    segment_chunks: u64,
    chunks_per_segment: u64,
) -> bool {
    if check.all_chunks_written() || check.all_input_consumed() {
        return true;
    }
    if check.format.uses_single_table_section() && segment_chunks >= chunks_per_segment {
        return true;
    }
    check.no_room_for_another_chunk()
}

/// Whether the open chunks section cannot take another chunk. Never true when
/// no section is open.
#[allow(clippy::too_many_arguments)]
pub(crate) fn chunks_section_full(
    check: &FullCheck,
    chunks_section_offset: u64,
    segment_file_offset: u64,
    section_chunks: u64,
    chunks_per_chunks_section: u64,
    maximum_section_chunks: u32,
    unrestrict_offset_table: bool,
) -> bool {
    if chunks_section_offset == 0 {
        return false;
    }
    if check.all_chunks_written() || check.all_input_consumed() {
        return true;
    }
    if !unrestrict_offset_table && section_chunks >= maximum_section_chunks as u64 {
        return true;
    }
    // 32-bit limits on the table entry count and on relative offsets.
    if section_chunks > i32::MAX as u64 {
        return true;
    }
    if segment_file_offset - chunks_section_offset > i32::MAX as u64 {
        return true;
    }
    if check.format.uses_single_table_section() && section_chunks >= chunks_per_chunks_section {
        return true;
    }
    check.no_room_for_another_chunk()
}
