//! C4 — opens a block file and exposes zero-copy row access: a
//! `memmap2`-backed fast path, and a buffered-paged fallback that reads
//! whole pages into owned `Vec`s, selected by `low_mem`.

use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::block::{read_header, BlockHeader};
use crate::error::{KmcpError, Result};

enum RowSource {
    Mapped(Mmap),
    Paged(Vec<u8>),
}

/// An opened, immutable block.
pub struct BlockReader {
    path: PathBuf,
    pub header: BlockHeader,
    body_offset: usize,
    source: RowSource,
}

impl BlockReader {
    /// Opens `path`. When `low_mem` is false the body is memory-mapped
    /// (`memmap2::Mmap`); when true the whole body is read into a buffered
    /// `Vec<u8>`, trading address space for a guaranteed resident-memory
    /// ceiling.
    pub fn open<P: AsRef<Path>>(path: P, low_mem: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| KmcpError::io(&path, e))?;

        let mut header_reader = BufReader::new(&file);
        let header = read_header(&mut header_reader, &path)?;
        let body_offset = header_offset_len(&header);

        let expected_len = body_offset as u64 + header.body_len_bytes() as u64;
        let actual_len = file
            .metadata()
            .map_err(|e| KmcpError::io(&path, e))?
            .len();
        if actual_len != expected_len {
            return Err(KmcpError::corrupt(
                &path,
                format!("expected file length {expected_len}, found {actual_len}"),
            ));
        }

        let source = if low_mem {
            let mut body = vec![0u8; header.body_len_bytes()];
            let mut reader = BufReader::new(&file);
            std::io::Seek::seek(&mut reader, std::io::SeekFrom::Start(body_offset as u64))
                .map_err(|e| KmcpError::io(&path, e))?;
            reader
                .read_exact(&mut body)
                .map_err(|e| KmcpError::io(&path, e))?;
            RowSource::Paged(body)
        } else {
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| KmcpError::io(&path, e))?;
            RowSource::Mapped(mmap)
        };

        Ok(BlockReader {
            path,
            header,
            body_offset,
            source,
        })
    }

    pub fn cols(&self) -> u8 {
        self.header.cols()
    }

    pub fn row_size_bytes(&self) -> usize {
        self.header.row_size_bytes()
    }

    pub fn rows(&self) -> u64 {
        self.header.m
    }

    /// Returns row `i` as a zero-copy byte slice, `row_size_bytes()` long.
    pub fn row_at(&self, i: u64) -> Result<&[u8]> {
        if i >= self.header.m {
            return Err(KmcpError::corrupt(
                &self.path,
                format!("row {i} out of range (m={})", self.header.m),
            ));
        }
        let row_size = self.row_size_bytes();
        let start = i as usize * row_size;
        let end = start + row_size;
        let body: &[u8] = match &self.source {
            RowSource::Mapped(mmap) => &mmap[self.body_offset..],
            RowSource::Paged(buf) => buf,
        };
        Ok(&body[start..end])
    }
}

fn header_offset_len(header: &BlockHeader) -> usize {
    // magic(4) + version(1) + m(8) + cols(1) + k(1) + canonical(1) + hashed(1) + h(1)
    let mut len = 4 + 1 + 8 + 1 + 1 + 1 + 1 + 1;
    for col in &header.columns {
        len += 2 + col.seq_id.len() + 4 + 4 + 8 + 8;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::builder::build_block;
    use crate::artifact::{write_artifact, ArtifactFlags, ArtifactHeader, ArtifactMeta};
    use crate::config::BuildConfig;

    fn write_sample_artifact(dir: &Path, seq_id: &str, hashes: Vec<u64>) -> PathBuf {
        let path = dir.join(format!("{seq_id}.kmca"));
        let header = ArtifactHeader {
            k: 21,
            flags: ArtifactFlags {
                canonical: true,
                hashed: true,
                scaled: false,
                sorted: true,
            },
            scale: 1,
            meta: ArtifactMeta {
                seq_id: seq_id.into(),
                fragment_index: 0,
                fragment_count: 1,
                genome_size: 1000,
                minimizer_w: None,
                syncmer_s: None,
                split_size: None,
                split_overlap: None,
            },
        };
        write_artifact(&path, &header, hashes).unwrap();
        path
    }

    #[test]
    fn mapped_and_paged_readers_agree_on_rows() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_sample_artifact(dir.path(), "r1", vec![10, 20, 30]);
        let p2 = write_sample_artifact(dir.path(), "r2", vec![15, 25]);
        let cfg = BuildConfig::default();
        let out = dir.path().join("block_0.kmcb");
        let header = build_block(&out, &[p1, p2], &cfg).unwrap();

        let mapped = BlockReader::open(&out, false).unwrap();
        let paged = BlockReader::open(&out, true).unwrap();

        assert_eq!(mapped.header, header);
        assert_eq!(paged.header, header);
        for r in 0..mapped.rows() {
            assert_eq!(mapped.row_at(r).unwrap(), paged.row_at(r).unwrap());
        }
    }

    #[test]
    fn row_out_of_range_errors() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_sample_artifact(dir.path(), "r1", vec![1, 2]);
        let cfg = BuildConfig::default();
        let out = dir.path().join("block_0.kmcb");
        build_block(&out, &[p1], &cfg).unwrap();
        let reader = BlockReader::open(&out, false).unwrap();
        assert!(reader.row_at(reader.rows()).is_err());
    }
}
