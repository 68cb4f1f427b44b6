//! Old-to-new document id tables built around deletions.
//!
//! Every downstream merger (stored fields, vectors, norms, postings) must
//! agree on the same remapping, so the tables are computed once up front
//! and shared.

use crate::error::Result;
use crate::segment::reader::SegmentReader;

/// Sentinel marking a deleted document in a [`DocIdMaps`] table.
pub const DELETED_DOC: u32 = u32::MAX;

/// Per-segment document id remapping for one merge.
///
/// Segments without deletions get no table; their mapping is the identity
/// plus the segment's base offset. That absence is also what enables the
/// bulk-copy fast paths.
#[derive(Debug)]
pub struct DocIdMaps {
    /// Index `i` holds the remap table of segment `i`, or None when the
    /// segment has no deletions. Table entries are segment-local new ids
    /// (before adding the base) or [`DELETED_DOC`].
    maps: Vec<Option<Vec<u32>>>,

    /// New-id base of each segment: the sum of live counts of all
    /// preceding segments.
    bases: Vec<u32>,

    /// Deleted-document count of each segment.
    deleted_counts: Vec<u32>,

    /// Total live documents across all segments.
    total_docs: u32,
}

impl DocIdMaps {
    /// Build remap tables for `readers` in merge order.
    pub fn build(readers: &[&dyn SegmentReader]) -> Result<Self> {
        let mut maps = Vec::with_capacity(readers.len());
        let mut bases = Vec::with_capacity(readers.len());
        let mut deleted_counts = Vec::with_capacity(readers.len());
        let mut base = 0u32;

        for reader in readers {
            bases.push(base);
            let max_doc = reader.max_doc();

            if reader.has_deletions() {
                let mut map = vec![0u32; max_doc as usize];
                let mut next = 0u32;
                for doc in 0..max_doc {
                    if reader.is_deleted(doc) {
                        map[doc as usize] = DELETED_DOC;
                    } else {
                        map[doc as usize] = next;
                        next += 1;
                    }
                }
                deleted_counts.push(max_doc - next);
                base += next;
                maps.push(Some(map));
            } else {
                deleted_counts.push(0);
                base += max_doc;
                maps.push(None);
            }

            debug_assert_eq!(
                reader.num_docs(),
                reader.max_doc() - deleted_counts.last().unwrap()
            );
        }

        Ok(DocIdMaps {
            maps,
            bases,
            deleted_counts,
            total_docs: base,
        })
    }

    /// Number of segments covered.
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Whether no segments are covered.
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Total live documents across all segments.
    pub fn total_docs(&self) -> u32 {
        self.total_docs
    }

    /// New-id base of segment `index`.
    pub fn base(&self, index: usize) -> u32 {
        self.bases[index]
    }

    /// Remap table of segment `index`, or None for identity mapping.
    pub fn map(&self, index: usize) -> Option<&[u32]> {
        self.maps[index].as_deref()
    }

    /// Deleted-document count of segment `index`.
    pub fn deleted_count(&self, index: usize) -> u32 {
        self.deleted_counts[index]
    }

    /// Deleted-document counts for all segments.
    pub fn deleted_counts(&self) -> &[u32] {
        &self.deleted_counts
    }

    /// Remap a segment-local doc id into the merged id space.
    ///
    /// Must not be called with a deleted document; that is a caller bug.
    pub fn remap(&self, index: usize, doc: u32) -> u32 {
        let local = match &self.maps[index] {
            Some(map) => {
                let mapped = map[doc as usize];
                assert_ne!(mapped, DELETED_DOC, "remapping deleted doc {doc}");
                mapped
            }
            None => doc,
        };
        let merged = self.bases[index] + local;
        assert!(
            merged < self.total_docs,
            "remapped doc {merged} out of range (total {})",
            self.total_docs
        );
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::memory::MemorySegment;

    fn segment_with_docs(n: u32) -> MemorySegment {
        let mut segment = MemorySegment::new();
        for _ in 0..n {
            segment.add_empty_document();
        }
        segment
    }

    #[test]
    fn test_no_deletions_gets_no_table() {
        let a = segment_with_docs(3);
        let b = segment_with_docs(2);
        let readers: Vec<&dyn SegmentReader> = vec![&a, &b];

        let maps = DocIdMaps::build(&readers).unwrap();
        assert_eq!(maps.total_docs(), 5);
        assert!(maps.map(0).is_none());
        assert!(maps.map(1).is_none());
        assert_eq!(maps.base(1), 3);
        assert_eq!(maps.remap(1, 1), 4);
    }

    #[test]
    fn test_deletions_are_skipped() {
        let mut a = segment_with_docs(3);
        a.delete_document(1);
        let b = segment_with_docs(2);
        let readers: Vec<&dyn SegmentReader> = vec![&a, &b];

        let maps = DocIdMaps::build(&readers).unwrap();
        assert_eq!(maps.total_docs(), 4);
        assert_eq!(maps.deleted_count(0), 1);
        assert_eq!(maps.deleted_count(1), 0);

        let table = maps.map(0).unwrap();
        assert_eq!(table, &[0, DELETED_DOC, 1]);

        // Layout: [A0, A2, B0, B1]
        assert_eq!(maps.remap(0, 0), 0);
        assert_eq!(maps.remap(0, 2), 1);
        assert_eq!(maps.remap(1, 0), 2);
        assert_eq!(maps.remap(1, 1), 3);
    }

    #[test]
    #[should_panic(expected = "remapping deleted doc")]
    fn test_remap_deleted_panics() {
        let mut a = segment_with_docs(2);
        a.delete_document(0);
        let readers: Vec<&dyn SegmentReader> = vec![&a];
        let maps = DocIdMaps::build(&readers).unwrap();
        maps.remap(0, 0);
    }
}
