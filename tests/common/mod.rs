//! A minimal, independent reader for the segment files the writer produces.
//!
//! Deliberately separate from the crate under test: it walks the section
//! chain descriptor by descriptor, validates every checksum it passes, and
//! recovers chunks through the offset tables alone.
#![allow(dead_code)]

use std::io::{Cursor, Read};

use adler32::RollingAdler32;
use binrw::BinReaderExt;
use ewf::records::{
    FileHeader, SectionDescriptor, TableHeader, COMPRESSED_OFFSET_FLAG, FILE_HEADER_SIZE,
    SECTION_DESCRIPTOR_SIZE, TABLE_HEADER_SIZE,
};
use flate2::read::ZlibDecoder;

pub fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = RollingAdler32::new();
    hasher.update_buffer(bytes);
    hasher.hash()
}

#[derive(Debug, Clone)]
pub struct Section {
    pub kind: String,
    pub start: u64,
    pub size: u64,
    pub next: u64,
}

impl Section {
    pub fn payload_start(&self) -> u64 {
        self.start + SECTION_DESCRIPTOR_SIZE
    }

    pub fn end(&self) -> u64 {
        self.start + self.size
    }
}

#[derive(Debug)]
pub struct ParsedSegment {
    pub header: FileHeader,
    pub sections: Vec<Section>,
}

impl ParsedSegment {
    pub fn kinds(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.kind.as_str()).collect()
    }

    pub fn sections_of(&self, kind: &str) -> Vec<&Section> {
        self.sections.iter().filter(|s| s.kind == kind).collect()
    }
}

/// Walks the section chain of one segment file, checking every descriptor
/// checksum on the way.
pub fn parse_segment(bytes: &[u8]) -> ParsedSegment {
    let header: FileHeader = Cursor::new(bytes).read_le().expect("file header parses");
    assert_eq!(header.fields_start, 0x01);
    assert_eq!(header.fields_end, 0);

    let mut sections = Vec::new();
    let mut offset = FILE_HEADER_SIZE;
    loop {
        let body = &bytes[offset as usize..offset as usize + 72];
        let stored = u32::from_le_bytes(
            bytes[offset as usize + 72..offset as usize + 76]
                .try_into()
                .unwrap(),
        );
        assert_eq!(stored, checksum(body), "descriptor checksum at {offset}");

        let descriptor: SectionDescriptor = Cursor::new(body).read_le().unwrap();
        let section = Section {
            kind: descriptor.kind().to_string(),
            start: offset,
            size: descriptor.size,
            next: descriptor.next_offset,
        };
        let next = descriptor.next_offset;
        let last = next == offset || section.kind == "done" || section.kind == "next";
        sections.push(section);
        if last {
            break;
        }
        offset = next;
    }
    ParsedSegment { header, sections }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    pub offset: u64,
    pub compressed: bool,
}

/// Parses a `table` section's payload: header, entries, and (when `checked`)
/// the trailing checksum over the entry array.
pub fn parse_table(bytes: &[u8], table: &Section, checked: bool) -> (TableHeader, Vec<TableEntry>) {
    let payload = table.payload_start() as usize;
    let head_body = &bytes[payload..payload + 20];
    let stored = u32::from_le_bytes(bytes[payload + 20..payload + 24].try_into().unwrap());
    assert_eq!(stored, checksum(head_body), "table header checksum");

    let header: TableHeader = Cursor::new(head_body).read_le().unwrap();
    let entries_at = payload + TABLE_HEADER_SIZE as usize;
    let entries_len = header.entry_count as usize * 4;
    let raw = &bytes[entries_at..entries_at + entries_len];
    if checked {
        let stored =
            u32::from_le_bytes(bytes[entries_at + entries_len..entries_at + entries_len + 4]
                .try_into()
                .unwrap());
        assert_eq!(stored, checksum(raw), "table entries checksum");
    }

    let entries = raw
        .chunks_exact(4)
        .map(|word| {
            let value = u32::from_le_bytes(word.try_into().unwrap());
            TableEntry {
                offset: header.base_offset + (value & !COMPRESSED_OFFSET_FLAG) as u64,
                compressed: value & COMPRESSED_OFFSET_FLAG != 0,
            }
        })
        .collect();
    (header, entries)
}

fn inflate(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut out)
        .expect("chunk payload inflates");
    out
}

/// End of the section whose payload contains `offset`; bounds the last chunk
/// of an offset group.
fn containing_section_end(segment: &ParsedSegment, offset: u64) -> u64 {
    segment
        .sections
        .iter()
        .find(|s| s.start <= offset && offset < s.end())
        .map(Section::end)
        .expect("chunk offset lands inside a section")
}

/// Recovers every chunk a segment file stores, in table order, verifying the
/// checksum of each raw chunk.
pub fn read_segment_chunks(bytes: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let segment = parse_segment(bytes);
    let mut chunks = Vec::new();
    for table in segment.sections_of("table") {
        let (_, entries) = parse_table(bytes, table, false);
        for (i, entry) in entries.iter().enumerate() {
            let end = entries
                .get(i + 1)
                .map(|next| next.offset)
                .unwrap_or_else(|| containing_section_end(&segment, entry.offset));
            let data = &bytes[entry.offset as usize..end as usize];
            if entry.compressed {
                let chunk = inflate(data);
                assert!(chunk.len() <= chunk_size);
                chunks.push(chunk);
            } else {
                let (chunk, stored) = data.split_at(data.len() - 4);
                assert!(chunk.len() <= chunk_size);
                assert_eq!(
                    u32::from_le_bytes(stored.try_into().unwrap()),
                    checksum(chunk),
                    "raw chunk checksum"
                );
                chunks.push(chunk.to_vec());
            }
        }
    }
    chunks
}

/// Recovers the whole image from its segment files in order.
pub fn read_image_chunks(files: &[&[u8]], chunk_size: usize) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    for file in files {
        chunks.extend(read_segment_chunks(file, chunk_size));
    }
    chunks
}
