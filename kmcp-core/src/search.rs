//! C5 — the search engine: AND-accumulate Bloom rows per query k-mer,
//! popcount per column, threshold by coverage. The row-AND loop is the hot
//! path; block rows are at most 8 bytes (`cols <= 64`), so the byte-wise
//! AND below already executes as a single machine word on every common
//! target.

use crate::block::reader::BlockReader;
use crate::config::{SearchConfig, SortBy};
use crate::error::Result;
use crate::hashing::{bloom_positions, mix64, query_fpr};
use crate::hit::Hit;

/// One query's extracted k-mer hashes, ready to probe against blocks.
#[derive(Debug, Clone)]
pub struct Query {
    pub id: String,
    pub idx: u64,
    pub len: usize,
    pub k: u8,
    pub hashes: Vec<u64>,
}

/// Reduces a raw k-mer hash stream to the multiset `Q` the engine probes
/// with, deduping once the count reaches `dedup_threshold`. Below the
/// threshold, duplicate hashes are kept (so a repeated k-mer still
/// contributes weight to a small query); at or above it, the query is
/// large enough that duplicates would just inflate `qKmers` without adding
/// information, so it collapses to a set.
pub fn prepare_query(mut hashes: Vec<u64>, dedup_threshold: u32) -> Vec<u64> {
    if hashes.len() as u64 >= dedup_threshold as u64 {
        hashes.sort_unstable();
        hashes.dedup();
    }
    hashes
}

/// AND-accumulates the `h` rows for each hash in `query_hashes` and returns,
/// per column, the number of hashes whose AND-result had that column's bit
/// set.
pub fn probe_block(block: &BlockReader, query_hashes: &[u64], seed: u64) -> Result<Vec<u64>> {
    let cols = block.cols() as usize;
    let row_size = block.row_size_bytes();
    let h = block.header.h;
    let m = block.header.m;
    let hashed = block.header.hashed;

    let mut counters = vec![0u64; cols];
    let mut acc = vec![0u8; row_size];

    for &raw in query_hashes {
        let x = if hashed { raw } else { mix64(raw, seed) };
        let mut positions = bloom_positions(x, h, m);
        let first = positions.next().expect("bloom_positions yields at least one position");
        acc.copy_from_slice(block.row_at(first)?);
        for pos in positions {
            let row = block.row_at(pos)?;
            for (a, b) in acc.iter_mut().zip(row.iter()) {
                *a &= b;
            }
        }

        for col in 0..cols {
            let byte = acc[col / 8];
            let bit = 1u8 << (7 - (col % 8));
            if byte & bit != 0 {
                counters[col] += 1;
            }
        }
    }

    Ok(counters)
}

/// Probes one block for `query` and returns the hits clearing `cfg`'s
/// thresholds (query coverage, target coverage, min matched k-mers).
/// Returns an empty vec, not an error, when the block's `(k, canonical,
/// hashed)` don't match the query's database — the caller skips such
/// blocks entirely.
pub fn search_block(
    block: &BlockReader,
    query: &Query,
    q_kmers: usize,
    block_fpr: f64,
    seed: u64,
    cfg: &SearchConfig,
) -> Result<Vec<Hit>> {
    let matched = probe_block(block, &query.hashes, seed)?;
    let fpr = query_fpr(block_fpr, q_kmers);

    let mut hits = Vec::new();
    for (col, descriptor) in block.header.columns.iter().enumerate() {
        let matched_kmers = matched[col];
        if matched_kmers < cfg.min_k as u64 {
            continue;
        }
        let q_cov = matched_kmers as f64 / q_kmers.max(1) as f64;
        let t_cov = matched_kmers as f64 / descriptor.kmer_count.max(1) as f64;
        let union = q_kmers as u64 + descriptor.kmer_count - matched_kmers;
        let jaccard = if union == 0 {
            0.0
        } else {
            matched_kmers as f64 / union as f64
        };

        if q_cov < cfg.min_query_cov || t_cov < cfg.min_target_cov {
            continue;
        }

        hits.push(Hit::Matched {
            query: query.id.clone(),
            q_len: query.len,
            q_kmers,
            fpr,
            hits: 0, // patched to the true per-query hit count by the caller
            target: descriptor.seq_id.clone(),
            frag_idx: descriptor.fragment_index,
            frags: descriptor.fragment_count,
            t_len: descriptor.genome_size,
            k_size: block.header.k,
            matched_kmers,
            q_cov,
            t_cov,
            jaccard,
            query_idx: query.idx,
        });
    }
    Ok(hits)
}

/// Orders and truncates a query's hits per `cfg`'s sort key and top-N cap.
/// A query shorter than `min_query_len` with no matches at all is reported
/// as [`Hit::Unmatched`] by the caller, not here.
pub fn finalize_hits(mut hits: Vec<Hit>, cfg: &SearchConfig) -> Vec<Hit> {
    let total = hits.len();
    for h in &mut hits {
        if let Hit::Matched { hits: n, .. } = h {
            *n = total;
        }
    }

    if cfg.do_not_sort {
        return hits;
    }

    hits.sort_by(|a, b| {
        b.score(cfg.sort_by)
            .partial_cmp(&a.score(cfg.sort_by))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(n) = cfg.top_scores {
        // Ties survive together: keep every hit whose score is among the
        // top-n *distinct* score values, not just the first n hits.
        let mut distinct_scores: Vec<f64> = hits.iter().map(|h| h.score(cfg.sort_by)).collect();
        distinct_scores.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
        if distinct_scores.len() > n {
            let cutoff = distinct_scores[n - 1];
            hits.retain(|h| h.score(cfg.sort_by) >= cutoff - f64::EPSILON);
        }
    }

    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{write_artifact, ArtifactFlags, ArtifactHeader, ArtifactMeta};
    use crate::block::builder::build_block;
    use crate::config::BuildConfig;
    use std::path::{Path, PathBuf};

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
    fn query_covering_reference_scores_high_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let hashes = vec![10u64, 20, 30, 40, 50];
        let p1 = write_sample_artifact(dir.path(), "ref1", hashes.clone());
        let cfg = BuildConfig {
            h: 3,
            ..BuildConfig::default()
        };
        let out = dir.path().join("block_0.kmcb");
        build_block(&out, &[p1], &cfg).unwrap();
        let block = BlockReader::open(&out, false).unwrap();

        let query = Query {
            id: "q1".into(),
            idx: 0,
            len: 150,
            k: 21,
            hashes: hashes.clone(),
        };
        let search_cfg = SearchConfig {
            min_k: 1,
            ..SearchConfig::default()
        };
        let hits = search_block(&block, &query, query.hashes.len(), 0.3, 0, &search_cfg).unwrap();
        assert_eq!(hits.len(), 1);
        if let Hit::Matched { q_cov, t_cov, .. } = &hits[0] {
            assert!((*q_cov - 1.0).abs() < 1e-9);
            assert!((*t_cov - 1.0).abs() < 1e-9);
        } else {
            panic!("expected a matched hit");
        }
    }

    #[test]
    fn unhashed_codes_round_trip_through_matching_seed() {
        let dir = tempfile::tempdir().unwrap();
        let hashes = vec![111u64, 222, 333, 444];
        let path = dir.path().join("r1.kmca");
        let header = ArtifactHeader {
            k: 21,
            flags: ArtifactFlags {
                canonical: true,
                hashed: false,
                scaled: false,
                sorted: true,
            },
            scale: 1,
            meta: ArtifactMeta {
                seq_id: "r1".into(),
                fragment_index: 0,
                fragment_count: 1,
                genome_size: 1000,
                minimizer_w: None,
                syncmer_s: None,
                split_size: None,
                split_overlap: None,
            },
        };
        write_artifact(&path, &header, hashes.clone()).unwrap();

        let cfg = BuildConfig {
            h: 3,
            seed: 99,
            ..BuildConfig::default()
        };
        let out = dir.path().join("block_0.kmcb");
        build_block(&out, &[path], &cfg).unwrap();
        let block = BlockReader::open(&out, false).unwrap();

        let query = Query {
            id: "q1".into(),
            idx: 0,
            len: 150,
            k: 21,
            hashes,
        };
        let search_cfg = SearchConfig {
            min_k: 1,
            ..SearchConfig::default()
        };
        let hits = search_block(&block, &query, query.hashes.len(), 0.3, 99, &search_cfg).unwrap();
        assert_eq!(hits.len(), 1);

        let mismatched = search_block(&block, &query, query.hashes.len(), 0.3, 7, &search_cfg).unwrap();
        assert!(mismatched.is_empty() || mismatched[0].score(search_cfg.sort_by) < hits[0].score(search_cfg.sort_by));
    }

    #[test]
    fn dedup_collapses_large_duplicate_heavy_queries() {
        let hashes: Vec<u64> = (0..300).map(|_| 7u64).collect();
        let deduped = prepare_query(hashes, 256);
        assert_eq!(deduped, vec![7u64]);
    }

    #[test]
    fn small_duplicate_queries_are_left_alone() {
        let hashes = vec![1u64, 1, 2];
        let kept = prepare_query(hashes.clone(), 256);
        assert_eq!(kept, hashes);
    }

    #[test]
    fn top_scores_keeps_tied_hits_together() {
        use crate::hit::Hit;
        let mk = |q_cov: f64, target: &str| Hit::Matched {
            query: "q".into(),
            q_len: 100,
            q_kmers: 100,
            fpr: 0.01,
            hits: 0,
            target: target.into(),
            frag_idx: 0,
            frags: 1,
            t_len: 1000,
            k_size: 21,
            matched_kmers: 90,
            q_cov,
            t_cov: 0.5,
            jaccard: 0.4,
            query_idx: 0,
        };
        let hits = vec![mk(0.9, "a"), mk(0.9, "b"), mk(0.8, "c"), mk(0.7, "d")];
        let cfg = SearchConfig {
            top_scores: Some(1),
            ..SearchConfig::default()
        };
        let finalized = finalize_hits(hits, &cfg);
        let targets: Vec<&str> = finalized
            .iter()
            .map(|h| match h {
                Hit::Matched { target, .. } => target.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&"a") && targets.contains(&"b"));
    }
}
