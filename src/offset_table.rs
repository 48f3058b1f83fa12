//! The in-memory map from chunk number to where its payload was written.

use crate::{EwfError, EwfResult, FileKind};

/// Non-owning reference to a segment file: which chain it belongs to and its
/// position in the write context's table for that chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentId {
    pub kind: FileKind,
    pub index: usize,
}

/// Where one chunk's payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOffset {
    pub segment: SegmentId,
    /// Absolute file offset of the payload inside the owning segment file.
    pub file_offset: u64,
    /// Stored payload size, trailing checksum included.
    pub size: u32,
    pub is_compressed: bool,
}

/// Dense, growable chunk-number → [`ChunkOffset`] table.
///
/// A primary write may set each index exactly once; only the delta path may
/// replace an entry.
#[derive(Debug, Default)]
pub struct OffsetTable {
    entries: Vec<Option<ChunkOffset>>,
}

impl OffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grows the table to at least `len` entries.
    pub fn resize(&mut self, len: u64) {
        if len as usize > self.entries.len() {
            self.entries.resize(len as usize, None);
        }
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<ChunkOffset> {
        self.entries.get(index as usize).copied().flatten()
    }

    pub(crate) fn set(
        &mut self,
        index: u64,
        entry: ChunkOffset,
        allow_rewrite: bool,
    ) -> EwfResult<()> {
        if index as usize >= self.entries.len() {
            let grown = (index + 1).max(self.entries.len() as u64 * 2);
            self.resize(grown);
        }
        let slot = &mut self.entries[index as usize];
        if slot.is_some() && !allow_rewrite {
            return Err(EwfError::AlreadyWritten(index));
        }
        *slot = Some(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(offset: u64) -> ChunkOffset {
        ChunkOffset {
            segment: SegmentId {
                kind: FileKind::Ewf,
                index: 0,
            },
            file_offset: offset,
            size: 68,
            is_compressed: false,
        }
    }

    #[test]
    fn primary_rewrite_is_rejected() {
        let mut table = OffsetTable::new();
        table.set(0, entry(89), false).unwrap();
        assert!(matches!(
            table.set(0, entry(157), false),
            Err(EwfError::AlreadyWritten(0))
        ));
        // The delta path may replace it.
        table.set(0, entry(157), true).unwrap();
        assert_eq!(table.get(0).unwrap().file_offset, 157);
    }

    #[test]
    fn grows_on_demand() {
        let mut table = OffsetTable::new();
        table.resize(2);
        table.set(5, entry(89), false).unwrap();
        assert_eq!(table.len(), 6);
        assert!(table.get(3).is_none());
        assert!(table.get(6).is_none());
        assert_eq!(table.get(5).unwrap().file_offset, 89);
    }
}
