use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::ops::RangeInclusive;
use std::path::Path;

use scoreplay_protocol::MAX_PART_NUMBER;

use crate::TransferError;
use crate::digest::checksum_part;

// ---------------------------------------------------------------------------
// PartLayout
// ---------------------------------------------------------------------------

/// How an object of known size splits into fixed-size parts.
///
/// Every part is `part_size` bytes except the last, which holds the
/// remainder (or a full part when the size divides evenly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLayout {
    object_size: u64,
    part_size: u64,
    part_count: u32,
}

impl PartLayout {
    pub fn new(object_size: u64, part_size: u64) -> Result<Self, TransferError> {
        if part_size == 0 {
            return Err(TransferError::InvalidPartSize);
        }
        let parts = object_size.div_ceil(part_size);
        if parts > u64::from(MAX_PART_NUMBER) {
            return Err(TransferError::TooManyParts {
                parts,
                max: MAX_PART_NUMBER,
            });
        }
        Ok(Self {
            object_size,
            part_size,
            // Bounded by MAX_PART_NUMBER above.
            part_count: parts as u32,
        })
    }

    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    /// Byte offset and length of part `n`, or `None` outside `1..=part_count`.
    pub fn part_range(&self, n: u32) -> Option<(u64, u64)> {
        if n == 0 || n > self.part_count {
            return None;
        }
        let offset = u64::from(n - 1) * self.part_size;
        let len = self.part_size.min(self.object_size - offset);
        Some((offset, len))
    }

    /// Part numbers in ascending order. Empty for a zero-length object.
    pub fn part_numbers(&self) -> RangeInclusive<u32> {
        1..=self.part_count
    }
}

// ---------------------------------------------------------------------------
// PartData
// ---------------------------------------------------------------------------

/// The bytes of one part, read from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartData {
    pub part_number: u32,
    /// Byte offset within the object.
    pub offset: u64,
    pub data: Vec<u8>,
}

impl PartData {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Base64 SHA-256 of the part bytes.
    pub fn checksum(&self) -> String {
        checksum_part(&self.data)
    }
}

// ---------------------------------------------------------------------------
// PartReader
// ---------------------------------------------------------------------------

/// Reads parts from a seekable source, one part in memory at a time.
///
/// Iteration yields parts in ascending order; any part can also be re-read
/// directly with [`read_part`](Self::read_part).
pub struct PartReader<R = File> {
    source: R,
    layout: PartLayout,
    next: u32,
}

impl PartReader<File> {
    /// Opens `path` and lays it out using its current size.
    pub fn open(path: &Path, part_size: u64) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Self::new(file, size, part_size)
    }
}

impl<R: Read + Seek> PartReader<R> {
    pub fn new(source: R, object_size: u64, part_size: u64) -> Result<Self, TransferError> {
        Ok(Self {
            source,
            layout: PartLayout::new(object_size, part_size)?,
            next: 1,
        })
    }

    pub fn layout(&self) -> &PartLayout {
        &self.layout
    }

    /// Reads the next part in sequence. Returns `None` after the last part.
    pub fn next_part(&mut self) -> Result<Option<PartData>, TransferError> {
        if self.next > self.layout.part_count() {
            return Ok(None);
        }
        let part = self.read_part(self.next)?;
        self.next += 1;
        Ok(Some(part))
    }

    /// Seeks to part `n` and reads exactly its bytes.
    pub fn read_part(&mut self, n: u32) -> Result<PartData, TransferError> {
        let (offset, len) = self
            .layout
            .part_range(n)
            .ok_or(TransferError::PartOutOfRange {
                part: n,
                count: self.layout.part_count(),
            })?;

        self.source.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; len as usize];
        let filled = fill_buffer(&mut self.source, &mut data)?;
        if filled < data.len() {
            return Err(TransferError::ShortRead {
                part: n,
                expected: len,
                actual: filled as u64,
            });
        }

        Ok(PartData {
            part_number: n,
            offset,
            data,
        })
    }

    /// Restarts sequential iteration from part 1.
    pub fn rewind(&mut self) {
        self.next = 1;
    }
}

impl<R: Read + Seek> Iterator for PartReader<R> {
    type Item = Result<PartData, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_part() {
            Ok(part) => part.map(Ok),
            Err(e) => {
                // Stop after the first error.
                self.next = self.layout.part_count().saturating_add(1);
                Some(Err(e))
            }
        }
    }
}

/// Reads until `buf` is full or the source hits EOF. Returns bytes read.
fn fill_buffer<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn layout_uneven_split() {
        let layout = PartLayout::new(10, 4).unwrap();
        assert_eq!(layout.part_count(), 3);
        assert_eq!(layout.part_range(1), Some((0, 4)));
        assert_eq!(layout.part_range(2), Some((4, 4)));
        assert_eq!(layout.part_range(3), Some((8, 2)));
        assert_eq!(layout.part_range(4), None);
        assert_eq!(layout.part_range(0), None);
    }

    #[test]
    fn layout_exact_multiple_has_full_last_part() {
        let layout = PartLayout::new(12, 4).unwrap();
        assert_eq!(layout.part_count(), 3);
        assert_eq!(layout.part_range(3), Some((8, 4)));
    }

    #[test]
    fn layout_zero_length_object() {
        let layout = PartLayout::new(0, 4).unwrap();
        assert_eq!(layout.part_count(), 0);
        assert_eq!(layout.part_numbers().count(), 0);
    }

    #[test]
    fn layout_rejects_zero_part_size() {
        assert!(matches!(
            PartLayout::new(10, 0),
            Err(TransferError::InvalidPartSize)
        ));
    }

    #[test]
    fn layout_rejects_too_many_parts() {
        let result = PartLayout::new(u64::from(MAX_PART_NUMBER) + 1, 1);
        assert!(matches!(
            result,
            Err(TransferError::TooManyParts { parts: 10_001, .. })
        ));
        assert!(PartLayout::new(u64::from(MAX_PART_NUMBER), 1).is_ok());
    }

    #[test]
    fn layout_ten_mib_by_four_mib() {
        const MIB: u64 = 1024 * 1024;
        let layout = PartLayout::new(10 * MIB, 4 * MIB).unwrap();
        let sizes: Vec<u64> = layout
            .part_numbers()
            .map(|n| layout.part_range(n).unwrap().1)
            .collect();
        assert_eq!(sizes, vec![4 * MIB, 4 * MIB, 2 * MIB]);
    }

    #[test]
    fn layout_lengths_sum_to_object_size() {
        for (size, part) in [(1u64, 1u64), (7, 3), (100, 7), (4096, 4096), (4097, 4096)] {
            let layout = PartLayout::new(size, part).unwrap();
            let total: u64 = layout
                .part_numbers()
                .map(|n| layout.part_range(n).unwrap().1)
                .sum();
            assert_eq!(total, size, "size={size} part={part}");
            assert_eq!(u64::from(layout.part_count()), size.div_ceil(part));
        }
    }

    #[test]
    fn reader_yields_parts_in_order() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "clip.bin", b"AABBCCDDEE");

        let reader = PartReader::open(&path, 4).unwrap();
        let parts: Vec<PartData> = reader.map(|p| p.unwrap()).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].data, b"AABB");
        assert_eq!(parts[1].data, b"CCDD");
        assert_eq!(parts[2].data, b"EE");
        assert_eq!(parts[2].offset, 8);

        let joined: Vec<u8> = parts.into_iter().flat_map(|p| p.data).collect();
        assert_eq!(joined, b"AABBCCDDEE");
    }

    #[test]
    fn reader_read_part_by_number() {
        let mut reader = PartReader::new(Cursor::new(b"0123456789".to_vec()), 10, 4).unwrap();
        let p = reader.read_part(2).unwrap();
        assert_eq!(p.part_number, 2);
        assert_eq!(p.data, b"4567");
        assert_eq!(p.checksum(), checksum_part(b"4567"));

        assert!(matches!(
            reader.read_part(4),
            Err(TransferError::PartOutOfRange { part: 4, count: 3 })
        ));
    }

    #[test]
    fn reader_rewind_restarts() {
        let mut reader = PartReader::new(Cursor::new(b"abcdef".to_vec()), 6, 4).unwrap();
        assert_eq!(reader.next_part().unwrap().unwrap().data, b"abcd");
        assert_eq!(reader.next_part().unwrap().unwrap().data, b"ef");
        assert!(reader.next_part().unwrap().is_none());

        reader.rewind();
        assert_eq!(reader.next_part().unwrap().unwrap().data, b"abcd");
    }

    #[test]
    fn reader_empty_source() {
        let mut reader = PartReader::new(Cursor::new(Vec::new()), 0, 4).unwrap();
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn reader_short_read_is_error() {
        // Declared size is larger than the actual source.
        let mut reader = PartReader::new(Cursor::new(b"abcdef".to_vec()), 8, 4).unwrap();
        assert!(reader.read_part(1).is_ok());
        assert!(matches!(
            reader.read_part(2),
            Err(TransferError::ShortRead {
                part: 2,
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn iterator_stops_after_error() {
        let mut reader = PartReader::new(Cursor::new(b"abcd".to_vec()), 12, 4).unwrap();
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }
}
