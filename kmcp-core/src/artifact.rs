//! C2 — the per-reference k-mer artifact: a strictly increasing stream of
//! 64-bit hashes plus the metadata the builder and profiler need to label
//! the column it becomes. Extraction of these hashes from FASTA/FASTQ is out
//! of scope — this module only reads and writes the artifact file that some
//! external sketching tool already produced.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{KmcpError, Result};

pub const ARTIFACT_MAGIC: &[u8; 4] = b"KMCA";
pub const ARTIFACT_VERSION: u8 = 1;

const FLAG_CANONICAL: u8 = 0b0001;
const FLAG_HASHED: u8 = 0b0010;
const FLAG_SCALED: u8 = 0b0100;
const FLAG_SORTED: u8 = 0b1000;

/// Per-reference metadata carried alongside the hash stream. Serialized as a
/// length-prefixed JSON blob via `serde_json`, since it is read once at
/// artifact-open time and never memory-mapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub seq_id: String,
    pub fragment_index: u32,
    pub fragment_count: u32,
    pub genome_size: u64,
    #[serde(default)]
    pub minimizer_w: Option<u32>,
    #[serde(default)]
    pub syncmer_s: Option<u32>,
    #[serde(default)]
    pub split_size: Option<u64>,
    #[serde(default)]
    pub split_overlap: Option<u64>,
}

/// The fixed-size part of the artifact header (everything before the
/// variable-length metadata blob and the hash stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactFlags {
    pub canonical: bool,
    pub hashed: bool,
    pub scaled: bool,
    pub sorted: bool,
}

impl ArtifactFlags {
    fn to_byte(self) -> u8 {
        let mut b = 0u8;
        if self.canonical {
            b |= FLAG_CANONICAL;
        }
        if self.hashed {
            b |= FLAG_HASHED;
        }
        if self.scaled {
            b |= FLAG_SCALED;
        }
        if self.sorted {
            b |= FLAG_SORTED;
        }
        b
    }

    fn from_byte(b: u8) -> Self {
        ArtifactFlags {
            canonical: b & FLAG_CANONICAL != 0,
            hashed: b & FLAG_HASHED != 0,
            scaled: b & FLAG_SCALED != 0,
            sorted: b & FLAG_SORTED != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactHeader {
    pub k: u8,
    pub flags: ArtifactFlags,
    pub scale: u32,
    pub meta: ArtifactMeta,
}

/// Writes one reference artifact. `hashes` MUST already be sorted ascending;
/// this is enforced while streaming so a caller's bug shows up as
/// `CorruptInput` rather than a silently wrong database.
pub fn write_artifact<P: AsRef<Path>>(
    path: P,
    header: &ArtifactHeader,
    hashes: impl IntoIterator<Item = u64>,
) -> Result<u64> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| KmcpError::io(path, e))?;
    let mut w = BufWriter::new(file);

    w.write_all(ARTIFACT_MAGIC)
        .and_then(|_| w.write_u8(ARTIFACT_VERSION))
        .and_then(|_| w.write_u8(header.flags.to_byte()))
        .and_then(|_| w.write_u8(header.k))
        .and_then(|_| w.write_u32::<LittleEndian>(header.scale))
        .map_err(|e| KmcpError::io(path, e))?;

    let meta_json = serde_json::to_vec(&header.meta)
        .map_err(|e| KmcpError::corrupt(path, format!("metadata serialize: {e}")))?;
    w.write_u32::<LittleEndian>(meta_json.len() as u32)
        .and_then(|_| w.write_all(&meta_json))
        .map_err(|e| KmcpError::io(path, e))?;

    // Reserve the count prefix, stream hashes, then seek back and patch it.
    // BufWriter over a File doesn't support seek cleanly mid-stream, so we
    // buffer the body length-prefix by counting first into a side buffer.
    let mut body = Vec::new();
    let mut count = 0u64;
    let mut prev: Option<u64> = None;
    for h in hashes {
        if let Some(p) = prev {
            if h <= p {
                return Err(KmcpError::corrupt(
                    path,
                    format!("hash stream not strictly increasing at position {count}"),
                ));
            }
        }
        prev = Some(h);
        body.write_u64::<LittleEndian>(h)
            .map_err(|e| KmcpError::io(path, e))?;
        count += 1;
    }

    w.write_u64::<LittleEndian>(count)
        .and_then(|_| w.write_all(&body))
        .and_then(|_| w.flush())
        .map_err(|e| KmcpError::io(path, e))?;

    Ok(count)
}

/// A streaming reader over one reference artifact.
pub struct ArtifactReader {
    path: PathBuf,
    pub header: ArtifactHeader,
    reader: BufReader<File>,
    remaining: u64,
    prev: Option<u64>,
}

impl ArtifactReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| KmcpError::io(&path, e))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| KmcpError::io(&path, e))?;
        if &magic != ARTIFACT_MAGIC {
            return Err(KmcpError::corrupt(&path, "bad artifact magic"));
        }
        let version = reader.read_u8().map_err(|e| KmcpError::io(&path, e))?;
        if version != ARTIFACT_VERSION {
            return Err(KmcpError::corrupt(
                &path,
                format!("unsupported artifact version {version}"),
            ));
        }
        let flags = ArtifactFlags::from_byte(reader.read_u8().map_err(|e| KmcpError::io(&path, e))?);
        let k = reader.read_u8().map_err(|e| KmcpError::io(&path, e))?;
        let scale = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| KmcpError::io(&path, e))?;

        let meta_len = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| KmcpError::io(&path, e))? as usize;
        let mut meta_buf = vec![0u8; meta_len];
        reader
            .read_exact(&mut meta_buf)
            .map_err(|e| KmcpError::io(&path, e))?;
        let meta: ArtifactMeta = serde_json::from_slice(&meta_buf)
            .map_err(|e| KmcpError::corrupt(&path, format!("metadata parse: {e}")))?;

        let count = reader
            .read_u64::<LittleEndian>()
            .map_err(|e| KmcpError::io(&path, e))?;

        Ok(ArtifactReader {
            path,
            header: ArtifactHeader {
                k,
                flags,
                scale,
                meta,
            },
            reader,
            remaining: count,
            prev: None,
        })
    }

    pub fn kmer_count(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for ArtifactReader {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Result<u64>> {
        if self.remaining == 0 {
            return None;
        }
        match self.reader.read_u64::<LittleEndian>() {
            Ok(h) => {
                self.remaining -= 1;
                if let Some(p) = self.prev {
                    if h <= p {
                        return Some(Err(KmcpError::corrupt(
                            &self.path,
                            "hash stream not strictly increasing",
                        )));
                    }
                }
                self.prev = Some(h);
                Some(Ok(h))
            }
            Err(e) => Some(Err(KmcpError::io(&self.path, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ArtifactHeader {
        ArtifactHeader {
            k: 21,
            flags: ArtifactFlags {
                canonical: true,
                hashed: true,
                scaled: false,
                sorted: true,
            },
            scale: 1,
            meta: ArtifactMeta {
                seq_id: "chr1".into(),
                fragment_index: 0,
                fragment_count: 1,
                genome_size: 1000,
                minimizer_w: None,
                syncmer_s: None,
                split_size: None,
                split_overlap: None,
            },
        }
    }

    #[test]
    fn round_trips_header_and_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r1.kmca");
        let hashes = vec![1u64, 5, 9, 100];
        let written = write_artifact(&path, &sample_header(), hashes.clone()).unwrap();
        assert_eq!(written, hashes.len() as u64);

        let reader = ArtifactReader::open(&path).unwrap();
        assert_eq!(reader.header.k, 21);
        assert_eq!(reader.header.meta.seq_id, "chr1");
        let read_back: Vec<u64> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(read_back, hashes);
    }

    #[test]
    fn rejects_non_ascending_stream_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.kmca");
        let err = write_artifact(&path, &sample_header(), vec![5u64, 3]).unwrap_err();
        assert!(matches!(err, KmcpError::CorruptInput { .. }));
    }

    #[test]
    fn rejects_bad_magic_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.kmca");
        std::fs::write(&path, b"not-an-artifact").unwrap();
        let err = ArtifactReader::open(&path).unwrap_err();
        assert!(matches!(err, KmcpError::CorruptInput { .. }));
    }
}
