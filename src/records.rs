//! On-disk structures of the version 1 EWF format.
//!
//! Every integer field is little-endian. Structures that are followed by a
//! 32-bit checksum on disk (the section descriptor, the table header, the
//! volume payloads, ...) are declared here *without* the checksum word; the
//! writer serializes them, checksums the bytes, and appends the word, since
//! the checksum always covers all bytes preceding it.

use binrw::binrw;

/// Section type strings, null-padded to 16 bytes on disk.
pub mod section_type {
    pub const HEADER: &str = "header";
    pub const HEADER2: &str = "header2";
    pub const XHEADER: &str = "xheader";
    pub const VOLUME: &str = "volume";
    pub const DISK: &str = "disk";
    pub const DATA: &str = "data";
    pub const SECTORS: &str = "sectors";
    pub const TABLE: &str = "table";
    pub const TABLE2: &str = "table2";
    pub const NEXT: &str = "next";
    pub const DONE: &str = "done";
    pub const ERROR2: &str = "error2";
    pub const SESSION: &str = "session";
    pub const HASH: &str = "hash";
    pub const DIGEST: &str = "digest";
    /// Logical evidence (L01) tree; never produced by this engine.
    pub const LTREE: &str = "ltree";
    pub const DELTA_CHUNK: &str = "delta_chunk";
}

/// Size of [`FileHeader`] on disk.
pub const FILE_HEADER_SIZE: u64 = 13;
/// Size of [`SectionDescriptor`] on disk, trailing checksum included.
pub const SECTION_DESCRIPTOR_SIZE: u64 = 76;
/// Size of [`TableHeader`] on disk, trailing checksum included.
pub const TABLE_HEADER_SIZE: u64 = 24;
/// Size of [`DeltaChunkHeader`] on disk, trailing checksum included.
pub const DELTA_CHUNK_HEADER_SIZE: u64 = 18;
/// Size of one offset table entry on disk.
pub const TABLE_OFFSET_SIZE: u64 = 4;
/// Size of the 32-bit checksum word.
pub const CHECKSUM_SIZE: u64 = 4;

/// Flag set on a table offset when the chunk payload is deflated.
pub const COMPRESSED_OFFSET_FLAG: u32 = 0x8000_0000;

/// The 13 bytes opening every segment file: signature, a one-byte
/// fields-start marker, the 1-based segment number, and a zero fields-end.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub signature: [u8; 8],
    pub fields_start: u8,
    pub segment_number: u16,
    pub fields_end: u16,
}

impl FileHeader {
    pub fn new(signature: [u8; 8], segment_number: u16) -> Self {
        Self {
            signature,
            fields_start: 0x01,
            segment_number,
            fields_end: 0,
        }
    }
}

/// The descriptor opening every section: a padded type string, the absolute
/// file offset of the next section, and this section's total size (descriptor
/// included). 40 reserved bytes and the checksum complete the 76 bytes.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDescriptor {
    pub section_type: [u8; 16],
    pub next_offset: u64,
    pub size: u64,
    pub padding: [u8; 40],
}

impl SectionDescriptor {
    pub fn new(kind: &str, next_offset: u64, size: u64) -> Self {
        let mut section_type = [0u8; 16];
        section_type[..kind.len()].copy_from_slice(kind.as_bytes());
        Self {
            section_type,
            next_offset,
            size,
            padding: [0u8; 40],
        }
    }

    /// The type string with its null padding stripped.
    pub fn kind(&self) -> &str {
        let end = self
            .section_type
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.section_type.len());
        std::str::from_utf8(&self.section_type[..end]).unwrap_or("")
    }
}

/// Head of a `table` section: entry count and the base offset added to every
/// 32-bit entry that follows.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableHeader {
    pub entry_count: u32,
    pub padding1: [u8; 4],
    pub base_offset: u64,
    pub padding2: [u8; 4],
}

impl TableHeader {
    pub fn new(entry_count: u32, base_offset: u64) -> Self {
        Self {
            entry_count,
            base_offset,
            ..Default::default()
        }
    }
}

/// The 94-byte `volume`/`disk` payload of the SMART family.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartVolume {
    pub reserved: u32,
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub sector_count: u32,
    pub padding: [u8; 70],
}

/// The 1052-byte `volume` payload of the EnCase family; the `data` section
/// re-emitted in segments 2..n carries an identical payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub media_type: u8,
    pub unknown1: [u8; 3],
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub sector_count: u64,
    pub chs_cylinders: u32,
    pub chs_heads: u32,
    pub chs_sectors: u32,
    pub media_flags: u8,
    pub unknown2: [u8; 3],
    pub palm_volume_start_sector: u32,
    pub unknown3: [u8; 4],
    pub smart_logs_start_sector: u32,
    pub compression_level: u8,
    pub unknown4: [u8; 3],
    pub sector_error_granularity: u32,
    pub unknown5: [u8; 4],
    pub set_identifier: [u8; 16],
    pub padding: [u8; 968],
}

/// `hash` section payload: the MD5 of the uncompressed media.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPayload {
    pub md5: [u8; 16],
    pub unknown: [u8; 16],
}

/// `digest` section payload: MD5 and SHA1 side by side (EnCase 6 and later).
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestPayload {
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    pub padding: [u8; 40],
}

/// Head of an `error2` section; followed by [`Error2Entry`] records and a
/// checksum over them.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error2Header {
    pub entry_count: u32,
    pub unknown: [u8; 512],
}

/// One acquiry error: a run of sectors that could not be read.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error2Entry {
    pub first_sector: u32,
    pub sector_count: u32,
}

/// Head of a `session` section; followed by [`SessionEntry`] records and a
/// checksum over them.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub entry_count: u32,
    pub unknown: [u8; 28],
}

/// One optical-media session.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEntry {
    pub session_type: u32,
    pub first_sector: u32,
    pub unknown: [u8; 24],
}

/// Head of a `delta_chunk` section: the 1-based chunk number being replaced
/// and the size of the chunk payload (checksum included) that follows.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaChunkHeader {
    pub chunk: u32,
    pub chunk_size: u32,
    pub padding: [u8; 6],
}

impl DeltaChunkHeader {
    pub fn new(chunk_index: u64, chunk_size: u32) -> Self {
        Self {
            chunk: (chunk_index + 1) as u32,
            chunk_size,
            padding: *b"DELTA\0",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::prelude::*;
    use std::io::Cursor;

    macro_rules! serialized_len {
        ($record:expr) => {{
            let mut buf = Vec::new();
            Cursor::new(&mut buf).write_le($record).unwrap();
            buf.len() as u64
        }};
    }

    #[test]
    fn on_disk_sizes() {
        assert_eq!(
            serialized_len!(&FileHeader::new(crate::EVF_SIGNATURE, 1)),
            FILE_HEADER_SIZE
        );
        assert_eq!(
            serialized_len!(&SectionDescriptor::new(section_type::DONE, 13, 76)),
            SECTION_DESCRIPTOR_SIZE - CHECKSUM_SIZE
        );
        assert_eq!(
            serialized_len!(&TableHeader::new(4, 0)),
            TABLE_HEADER_SIZE - CHECKSUM_SIZE
        );
        assert_eq!(
            serialized_len!(&DeltaChunkHeader::new(0, 68)),
            DELTA_CHUNK_HEADER_SIZE - CHECKSUM_SIZE
        );
        let smart = SmartVolume {
            reserved: 1,
            chunk_count: 0,
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            sector_count: 0,
            padding: [0u8; 70],
        };
        assert_eq!(serialized_len!(&smart), 94 - CHECKSUM_SIZE);
    }

    #[test]
    fn encase_volume_is_1052_bytes() {
        let volume = Volume {
            media_type: 0x01,
            unknown1: [0; 3],
            chunk_count: 16,
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            sector_count: 1024,
            chs_cylinders: 0,
            chs_heads: 0,
            chs_sectors: 0,
            media_flags: 0x01,
            unknown2: [0; 3],
            palm_volume_start_sector: 0,
            unknown3: [0; 4],
            smart_logs_start_sector: 0,
            compression_level: 0x01,
            unknown4: [0; 3],
            sector_error_granularity: 64,
            unknown5: [0; 4],
            set_identifier: [0; 16],
            padding: [0; 968],
        };
        assert_eq!(serialized_len!(&volume), 1052 - CHECKSUM_SIZE);
    }

    #[test]
    fn descriptor_kind_strips_padding() {
        let descriptor = SectionDescriptor::new(section_type::TABLE2, 0, 0);
        assert_eq!(descriptor.kind(), "table2");
    }

    #[test]
    fn delta_chunk_number_is_one_based() {
        let header = DeltaChunkHeader::new(2, 68);
        assert_eq!(header.chunk, 3);
        assert_eq!(&header.padding, b"DELTA\0");
    }
}
