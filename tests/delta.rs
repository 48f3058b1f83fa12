mod common;

use common::*;

use anyhow::Result;
use ewf::records::{DELTA_CHUNK_HEADER_SIZE, SECTION_DESCRIPTOR_SIZE};
use ewf::{CompressionLevel, FileKind, Format, MediaValues, MemoryFilePool, WriteOptions};

fn read_delta_payload(bytes: &[u8], offset: u64, len: usize) -> (&[u8], u32) {
    let data = &bytes[offset as usize..offset as usize + len];
    let stored = u32::from_le_bytes(
        bytes[offset as usize + len..offset as usize + len + 4]
            .try_into()
            .unwrap(),
    );
    (data, stored)
}

/// First overwrite of a primary chunk appends to the delta chain; a repeat
/// overwrite rewrites that delta chunk in place.
#[test]
fn delta_overwrite_appends_then_rewrites_in_place() -> Result<()> {
    let media = MediaValues::new(1, 64, 3 * 64);
    let mut pool = MemoryFilePool::new();
    let mut writer = WriteOptions::new()
        .format(Format::Ewfx)
        .compression_level(CompressionLevel::None)
        .create(&mut pool, "evidence", media)?;

    for value in [0x10u8, 0x20, 0x30] {
        writer.write_chunk(&[value; 64])?;
    }

    // First overwrite: goes to a fresh delta segment.
    writer.write_delta_chunk(1, &[0xAA; 64])?;
    assert_eq!(writer.delta_segment_file_count(), 1);
    let entry = writer.offset_table().get(1).unwrap();
    assert_eq!(entry.segment.kind, FileKind::Dwf);
    let first_offset = entry.file_offset;

    // Second overwrite of the same chunk: in place, same location.
    writer.write_delta_chunk(1, &[0xBB; 64])?;
    assert_eq!(writer.delta_segment_file_count(), 1);
    let entry = writer.offset_table().get(1).unwrap();
    assert_eq!(entry.file_offset, first_offset);

    // A different chunk appends a second delta_chunk section.
    writer.write_delta_chunk(2, &[0xCC; 64])?;
    writer.finish()?;
    drop(writer);

    // The primary image is untouched.
    let primary = pool.contents("evidence.E01").unwrap();
    assert_eq!(
        read_segment_chunks(primary, 64),
        vec![vec![0x10u8; 64], vec![0x20u8; 64], vec![0x30u8; 64]]
    );

    let delta = pool.contents("evidence.D01").unwrap();
    let segment = parse_segment(delta);
    assert_eq!(segment.header.signature, ewf::DVF_SIGNATURE);
    let delta_chunks = segment.sections_of("delta_chunk");
    assert_eq!(delta_chunks.len(), 2);
    assert_eq!(segment.sections.last().unwrap().kind, "done");

    // Only the latest overwrite of chunk 1 is reachable.
    let (data, stored) = read_delta_payload(delta, first_offset, 64);
    assert_eq!(data, &[0xBB; 64]);
    assert_eq!(stored, checksum(data));
    Ok(())
}

/// The delta header in front of the payload names the chunk (1-based) and the
/// stored size.
#[test]
fn delta_chunk_header_fields() -> Result<()> {
    let media = MediaValues::new(1, 64, 2 * 64);
    let mut pool = MemoryFilePool::new();
    let mut writer = WriteOptions::new()
        .format(Format::Ewfx)
        .create(&mut pool, "evidence", media)?;
    writer.write_chunk(&[1u8; 64])?;
    writer.write_chunk(&[2u8; 64])?;
    writer.write_delta_chunk(0, &[9u8; 64])?;
    let entry = writer.offset_table().get(0).unwrap();
    writer.finish()?;
    drop(writer);

    let delta = pool.contents("evidence.D01").unwrap();
    let header_at = (entry.file_offset - DELTA_CHUNK_HEADER_SIZE) as usize;
    assert_eq!(
        u32::from_le_bytes(delta[header_at..header_at + 4].try_into()?),
        1,
        "chunk numbers in delta headers are 1-based"
    );
    assert_eq!(
        u32::from_le_bytes(delta[header_at + 4..header_at + 8].try_into()?),
        68
    );
    assert_eq!(&delta[header_at + 8..header_at + 14], b"DELTA\0");

    // The section descriptor sits right in front of the delta header.
    let section_at = entry.file_offset - DELTA_CHUNK_HEADER_SIZE - SECTION_DESCRIPTOR_SIZE;
    let segment = parse_segment(delta);
    assert!(segment
        .sections_of("delta_chunk")
        .iter()
        .any(|s| s.start == section_at));
    Ok(())
}

/// Overflowing the delta segment cap chains a second delta file with `next`.
#[test]
fn delta_chain_rolls_over() -> Result<()> {
    let chunk_size = 4096usize;
    let chunk_count = 300u64;
    let media = MediaValues::new(8, 512, chunk_count * chunk_size as u64);
    let mut pool = MemoryFilePool::new();
    let mut writer = WriteOptions::new()
        .format(Format::Ewfx)
        .compression_level(CompressionLevel::None)
        .delta_segment_file_size(1024 * 1024)
        .create(&mut pool, "evidence", media)?;

    for i in 0..chunk_count {
        writer.write_chunk(&vec![i as u8; chunk_size])?;
    }
    // Each overwrite costs 76 + 18 + 4096 + 4 bytes; 260 of them pass 1 MiB.
    for i in 0..260u64 {
        writer.write_delta_chunk(i, &vec![0xEE; chunk_size])?;
    }
    assert_eq!(writer.delta_segment_file_count(), 2);

    // Every overwritten chunk resolves to a delta segment, and the entries in
    // the second file live in the second file's range.
    let overlaid = writer.offset_table().get(259).unwrap();
    assert_eq!(overlaid.segment.kind, FileKind::Dwf);
    assert_eq!(overlaid.segment.index, 1);
    writer.finish()?;
    drop(writer);

    let first = pool.contents("evidence.D01").unwrap();
    assert!(first.len() as u64 <= 1024 * 1024);
    let segment = parse_segment(first);
    assert_eq!(segment.sections.last().unwrap().kind, "next");

    let second = pool.contents("evidence.D02").unwrap();
    let segment = parse_segment(second);
    assert_eq!(segment.header.segment_number, 2);
    assert_eq!(segment.sections.last().unwrap().kind, "done");
    Ok(())
}
