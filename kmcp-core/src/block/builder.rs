//! C3 — bucketing, sizing, filling and serializing one block.
//! Plane-fill parallelism is one `rayon` pass per plane, each plane owned
//! exclusively by its worker so no atomics are needed within a plane.

use rayon::prelude::*;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::artifact::ArtifactReader;
use crate::block::{write_header, BlockHeader, ColumnDescriptor};
use crate::config::BuildConfig;
use crate::error::{KmcpError, Result};
use crate::hashing::{bloom_positions, bloom_row_count};

/// A reference artifact awaiting assignment to a block, as produced by a
/// directory scan.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub artifact_path: PathBuf,
    pub kmer_count: u64,
}

/// The maximum row count the builder will accept before the block is
/// rejected outright.
const MAX_ROWS: u64 = 1u64 << 42;

/// Splits `buckets` (sorted internally by k-mer count descending) into
/// block-sized groups, returned as index lists into `buckets`.
///
/// Three stopping conditions apply: batch reaches `block_size` entries; next
/// entry exceeds `T_X` and becomes its own block; next entry exceeds `T_8`
/// and the *current* block is capped at 8. This implementation flushes the
/// current batch before starting a `T_X`-sized singleton or a `T_8`-capped
/// batch, so a batch never mixes k-mer-count tiers.
pub fn partition_buckets(buckets: &[Bucket], cfg: &BuildConfig) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..buckets.len()).collect();
    order.sort_by(|&a, &b| buckets[b].kmer_count.cmp(&buckets[a].kmer_count));

    let mut blocks = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut cap = cfg.block_size;

    for idx in order {
        let kmer_count = buckets[idx].kmer_count;

        if kmer_count > cfg.tx {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
                cap = cfg.block_size;
            }
            blocks.push(vec![idx]);
            continue;
        }

        if kmer_count > cfg.t8 && current.is_empty() {
            cap = 8;
        } else if kmer_count > cfg.t8 {
            blocks.push(std::mem::take(&mut current));
            cap = 8;
        }

        current.push(idx);
        if current.len() >= cap {
            blocks.push(std::mem::take(&mut current));
            cap = cfg.block_size;
        }
    }

    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

/// Builds one block file from `artifact_paths` (already grouped by
/// [`partition_buckets`]) and returns the header that was written.
pub fn build_block<P: AsRef<Path>>(
    out_path: P,
    artifact_paths: &[PathBuf],
    cfg: &BuildConfig,
) -> Result<BlockHeader> {
    cfg.validate()?;
    let out_path = out_path.as_ref();

    if artifact_paths.is_empty() {
        return Err(KmcpError::ConfigRejected(
            "a block needs at least one column".into(),
        ));
    }
    if artifact_paths.len() > 64 {
        return Err(KmcpError::ConfigRejected(format!(
            "block has {} columns, max is 64",
            artifact_paths.len()
        )));
    }

    let mut readers = Vec::with_capacity(artifact_paths.len());
    let mut k: Option<u8> = None;
    let mut canonical: Option<bool> = None;
    let mut hashed: Option<bool> = None;
    let mut columns = Vec::with_capacity(artifact_paths.len());
    let mut k_max = 1u64;

    for path in artifact_paths {
        let reader = ArtifactReader::open(path)?;
        let header = &reader.header;

        match k {
            Some(existing) if existing != header.k => {
                return Err(KmcpError::HeaderMismatch(format!(
                    "k mismatch in {}: expected {existing}, got {}",
                    path.display(),
                    header.k
                )))
            }
            _ => k = Some(header.k),
        }
        match canonical {
            Some(existing) if existing != header.flags.canonical => {
                return Err(KmcpError::HeaderMismatch(format!(
                    "canonical flag mismatch in {}",
                    path.display()
                )))
            }
            _ => canonical = Some(header.flags.canonical),
        }
        match hashed {
            Some(existing) if existing != header.flags.hashed => {
                return Err(KmcpError::HeaderMismatch(format!(
                    "hashed flag mismatch in {}",
                    path.display()
                )))
            }
            _ => hashed = Some(header.flags.hashed),
        }

        k_max = k_max.max(reader.kmer_count().max(1));
        columns.push(ColumnDescriptor {
            seq_id: header.meta.seq_id.clone(),
            fragment_index: header.meta.fragment_index,
            fragment_count: header.meta.fragment_count,
            genome_size: header.meta.genome_size,
            kmer_count: reader.kmer_count(),
        });
        readers.push(reader);
    }

    let k = k.unwrap();
    let canonical = canonical.unwrap();
    let hashed = hashed.unwrap();
    let h = cfg.h;

    // `K` is the maximum single-column k-mer count in the bucket. A
    // sum-bound alternative (sizing from Σ kmers_i, an upper bound on the
    // union rather than the per-column max) would read:
    //   let k_sum: u64 = columns.iter().map(|c| c.kmer_count).sum();
    //   let m = bloom_row_count(k_sum.max(1), cfg.fpr);
    // left undone here to match the max-based contract.
    let m = bloom_row_count(k_max, cfg.fpr);
    if m > MAX_ROWS {
        return Err(KmcpError::ConfigRejected(format!(
            "m={m} exceeds the 2^42 row limit"
        )));
    }

    let header = BlockHeader {
        m,
        k,
        canonical,
        hashed,
        h,
        columns,
    };

    let cols = header.cols() as usize;
    let planes = header.row_size_bytes();

    let mut reader_slots: Vec<Option<ArtifactReader>> = readers.into_iter().map(Some).collect();
    let mut groups: Vec<Vec<(usize, ArtifactReader)>> = Vec::with_capacity(planes);
    for plane_idx in 0..planes {
        let start = plane_idx * 8;
        let end = (start + 8).min(cols);
        let group = (start..end)
            .map(|c| (c, reader_slots[c].take().expect("reader taken once")))
            .collect();
        groups.push(group);
    }

    let plane_bufs: Vec<Vec<u8>> = groups
        .into_par_iter()
        .map(|group| fill_plane(group, h, m, hashed, cfg.seed))
        .collect::<Result<Vec<Vec<u8>>>>()?;

    let file = std::fs::File::create(out_path).map_err(|e| KmcpError::io(out_path, e))?;
    let mut w = BufWriter::new(file);
    write_header(&mut w, out_path, &header)?;

    let row_size = header.row_size_bytes();
    let mut row_buf = vec![0u8; row_size];
    for r in 0..m as usize {
        for (p, plane) in plane_bufs.iter().enumerate() {
            row_buf[p] = plane[r];
        }
        w.write_all(&row_buf).map_err(|e| KmcpError::io(out_path, e))?;
    }
    w.flush().map_err(|e| KmcpError::io(out_path, e))?;

    Ok(header)
}

fn fill_plane(group: Vec<(usize, ArtifactReader)>, h: u8, m: u64, hashed: bool, seed: u64) -> Result<Vec<u8>> {
    let mut plane = vec![0u8; m as usize];
    for (col, reader) in group {
        let bit = 1u8 << (7 - (col % 8));
        for hash in reader {
            let raw = hash?;
            let x = if hashed { raw } else { crate::hashing::mix64(raw, seed) };
            for pos in bloom_positions(x, h, m) {
                plane[pos as usize] |= bit;
            }
        }
    }
    Ok(plane)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{write_artifact, ArtifactFlags, ArtifactHeader, ArtifactMeta};

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
    fn builds_block_with_matching_row_count_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_sample_artifact(dir.path(), "r1", vec![10, 20, 30]);
        let p2 = write_sample_artifact(dir.path(), "r2", vec![15, 25]);

        let cfg = BuildConfig::default();
        let out = dir.path().join("block_0.kmcb");
        let header = build_block(&out, &[p1, p2], &cfg).unwrap();

        assert_eq!(header.cols(), 2);
        assert!(header.m.is_power_of_two());
        assert_eq!(std::fs::metadata(&out).unwrap().len() as usize > 0, true);
    }

    #[test]
    fn rejects_mismatched_k() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_sample_artifact(dir.path(), "r1", vec![10, 20]);
        // second artifact with a different k
        let path2 = dir.path().join("r2.kmca");
        let header2 = ArtifactHeader {
            k: 15,
            flags: ArtifactFlags {
                canonical: true,
                hashed: true,
                scaled: false,
                sorted: true,
            },
            scale: 1,
            meta: ArtifactMeta {
                seq_id: "r2".into(),
                fragment_index: 0,
                fragment_count: 1,
                genome_size: 1000,
                minimizer_w: None,
                syncmer_s: None,
                split_size: None,
                split_overlap: None,
            },
        };
        write_artifact(&path2, &header2, vec![5, 6]).unwrap();

        let cfg = BuildConfig::default();
        let out = dir.path().join("block_0.kmcb");
        let err = build_block(&out, &[p1, path2], &cfg).unwrap_err();
        assert!(matches!(err, KmcpError::HeaderMismatch(_)));
    }

    #[test]
    fn partitions_respect_block_size_cap() {
        let cfg = BuildConfig {
            block_size: 2,
            ..BuildConfig::default()
        };
        let buckets: Vec<Bucket> = (0..5)
            .map(|i| Bucket {
                artifact_path: PathBuf::from(format!("r{i}.kmca")),
                kmer_count: 100 + i as u64,
            })
            .collect();
        let groups = partition_buckets(&buckets, &cfg);
        assert!(groups.iter().all(|g| g.len() <= 2));
        let total: usize = groups.iter().map(|g| g.len()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn oversized_bucket_becomes_its_own_block() {
        let cfg = BuildConfig::default();
        let buckets = vec![
            Bucket {
                artifact_path: PathBuf::from("huge.kmca"),
                kmer_count: cfg.tx + 1,
            },
            Bucket {
                artifact_path: PathBuf::from("small.kmca"),
                kmer_count: 10,
            },
        ];
        let groups = partition_buckets(&buckets, &cfg);
        assert!(groups.iter().any(|g| g.len() == 1));
    }
}
