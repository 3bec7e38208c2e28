use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracklift_protocol::CHUNK_SIZE;

use crate::TransferError;

// ---------------------------------------------------------------------------
// Chunk plan
// ---------------------------------------------------------------------------

/// A contiguous byte range of a file, sent as one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Position of the chunk, starting at 0.
    pub index: u32,
    /// First byte offset (inclusive).
    pub start: u64,
    /// Last byte offset (exclusive).
    pub end: u64,
}

impl ChunkRange {
    /// Number of bytes in the range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` for the zero-length chunk of an empty file.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Number of chunks needed for `file_size` bytes.
///
/// Always at least 1 so empty files still run through the protocol.
/// If `chunk_size` is 0, [`CHUNK_SIZE`] is used.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u32 {
    let chunk_size = effective_chunk_size(chunk_size);
    let n = file_size.div_ceil(chunk_size).max(1);
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Splits `file_size` bytes into ordered ranges of at most `chunk_size`.
///
/// If `chunk_size` is 0, [`CHUNK_SIZE`] is used.
pub fn plan(file_size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let chunk_size = effective_chunk_size(chunk_size);
    let count = chunk_count(file_size, chunk_size);

    (0..count)
        .map(|index| {
            let start = u64::from(index) * chunk_size;
            let end = (start + chunk_size).min(file_size);
            ChunkRange { index, start, end }
        })
        .collect()
}

fn effective_chunk_size(chunk_size: u64) -> u64 {
    if chunk_size == 0 { CHUNK_SIZE } else { chunk_size }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads planned ranges out of a source file.
pub struct ChunkReader {
    file: tokio::fs::File,
    path: PathBuf,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for ranged reading.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let file_size = file.metadata().await?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            file_size,
        })
    }

    /// Reads exactly the bytes of `range`.
    ///
    /// Fails with `UnexpectedEof` if the file shrank since it was planned.
    pub async fn read(&mut self, range: ChunkRange) -> Result<Vec<u8>, TransferError> {
        let mut buf = vec![0u8; range.len() as usize];
        if buf.is_empty() {
            return Ok(buf);
        }
        self.file.seek(SeekFrom::Start(range.start)).await?;
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Size of the file when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn plan_sixty_mib_into_three_chunks() {
        let ranges = plan(60 * MIB, 25 * MIB);
        assert_eq!(ranges.len(), 3);
        let lens: Vec<u64> = ranges.iter().map(ChunkRange::len).collect();
        assert_eq!(lens, vec![25 * MIB, 25 * MIB, 10 * MIB]);
        assert_eq!(ranges[2].end, 60 * MIB);
    }

    #[test]
    fn plan_empty_file_has_one_empty_chunk() {
        let ranges = plan(0, CHUNK_SIZE);
        assert_eq!(ranges, vec![ChunkRange { index: 0, start: 0, end: 0 }]);
        assert!(ranges[0].is_empty());
    }

    #[test]
    fn plan_exact_multiple_ends_with_full_chunk() {
        let ranges = plan(50, 25);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].len(), 25);
    }

    #[test]
    fn plan_covers_file_contiguously() {
        for chunk_size in [1u64, 3, 7, 25, 1024] {
            for file_size in [0u64, 1, 2, 24, 25, 26, 99, 100, 1000, 4097] {
                let ranges = plan(file_size, chunk_size);
                let expected = file_size.div_ceil(chunk_size).max(1);
                assert_eq!(ranges.len() as u64, expected, "size={file_size} chunk={chunk_size}");

                let total: u64 = ranges.iter().map(ChunkRange::len).sum();
                assert_eq!(total, file_size);

                let mut next_start = 0;
                for (i, r) in ranges.iter().enumerate() {
                    assert_eq!(r.index as usize, i);
                    assert_eq!(r.start, next_start);
                    assert!(r.len() <= chunk_size);
                    next_start = r.end;
                }
            }
        }
    }

    #[test]
    fn zero_chunk_size_falls_back_to_default() {
        assert_eq!(chunk_count(CHUNK_SIZE + 1, 0), 2);
        assert_eq!(plan(10, 0).len(), 1);
    }

    #[tokio::test]
    async fn reader_reads_planned_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        std::fs::write(&path, b"AABBCCDDEE").unwrap();

        let mut reader = ChunkReader::open(&path).await.unwrap();
        assert_eq!(reader.file_size(), 10);

        let mut out = Vec::new();
        for range in plan(reader.file_size(), 4) {
            out.push(reader.read(range).await.unwrap());
        }
        assert_eq!(out, vec![b"AABB".to_vec(), b"CCDD".to_vec(), b"EE".to_vec()]);
    }

    #[tokio::test]
    async fn reader_out_of_order_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut reader = ChunkReader::open(&path).await.unwrap();
        let ranges = plan(10, 4);
        assert_eq!(reader.read(ranges[2]).await.unwrap(), b"89");
        assert_eq!(reader.read(ranges[0]).await.unwrap(), b"0123");
    }

    #[tokio::test]
    async fn reader_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        std::fs::write(&path, b"").unwrap();

        let mut reader = ChunkReader::open(&path).await.unwrap();
        let ranges = plan(reader.file_size(), CHUNK_SIZE);
        assert!(reader.read(ranges[0]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reader_short_read_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        std::fs::write(&path, b"0123").unwrap();

        let mut reader = ChunkReader::open(&path).await.unwrap();
        let range = ChunkRange { index: 0, start: 0, end: 8 };
        assert!(matches!(reader.read(range).await, Err(TransferError::Io(_))));
    }
}
