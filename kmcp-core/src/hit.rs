//! Hit records and their tab-separated encoding. Modeled as a tagged enum
//! (`Matched{...}`, `Unmatched{...}`) rather than one struct with optional
//! fields, so a missing target can't be confused with a zero-coverage match.

use std::fmt;
use std::str::FromStr;

use crate::error::KmcpError;

/// One search result line, in search output (TSV) form.
#[derive(Debug, Clone, PartialEq)]
pub enum Hit {
    Matched {
        query: String,
        q_len: usize,
        q_kmers: usize,
        fpr: f64,
        hits: usize,
        target: String,
        frag_idx: u32,
        frags: u32,
        t_len: u64,
        k_size: u8,
        matched_kmers: u64,
        q_cov: f64,
        t_cov: f64,
        jaccard: f64,
        query_idx: u64,
    },
    Unmatched {
        query: String,
        q_len: usize,
        q_kmers: usize,
        query_idx: u64,
    },
}

impl Hit {
    pub fn query(&self) -> &str {
        match self {
            Hit::Matched { query, .. } => query,
            Hit::Unmatched { query, .. } => query,
        }
    }

    pub fn query_idx(&self) -> u64 {
        match self {
            Hit::Matched { query_idx, .. } => *query_idx,
            Hit::Unmatched { query_idx, .. } => *query_idx,
        }
    }

    /// The score used for `sort_by`/`top_scores` ranking.
    pub fn score(&self, sort_by: crate::config::SortBy) -> f64 {
        use crate::config::SortBy;
        match self {
            Hit::Matched {
                q_cov,
                t_cov,
                jaccard,
                ..
            } => match sort_by {
                SortBy::QueryCov => *q_cov,
                SortBy::TargetCov => *t_cov,
                SortBy::Jaccard => *jaccard,
            },
            Hit::Unmatched { .. } => 0.0,
        }
    }

    pub fn to_tsv_line(&self) -> String {
        match self {
            Hit::Matched {
                query,
                q_len,
                q_kmers,
                fpr,
                hits,
                target,
                frag_idx,
                frags,
                t_len,
                k_size,
                matched_kmers,
                q_cov,
                t_cov,
                jaccard,
                query_idx,
            } => format!(
                "{query}\t{q_len}\t{q_kmers}\t{fpr:.6}\t{hits}\t{target}\t{frag_idx}\t{frags}\t{t_len}\t{k_size}\t{matched_kmers}\t{q_cov:.6}\t{t_cov:.6}\t{jaccard:.6}\t{query_idx}"
            ),
            Hit::Unmatched {
                query,
                q_len,
                q_kmers,
                query_idx,
            } => format!(
                "{query}\t{q_len}\t{q_kmers}\t0.000000\t0\t\t-1\t0\t0\t0\t0\t0.000000\t0.000000\t0.000000\t{query_idx}"
            ),
        }
    }
}

impl fmt::Display for Hit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_tsv_line())
    }
}

/// Column header for the search TSV output (optional).
pub const HIT_TSV_HEADER: &str =
    "query\tqLen\tqKmers\tFPR\thits\ttarget\tfragIdx\tfrags\ttLen\tkSize\tmKmers\tqCov\ttCov\tjacc\tqueryIdx";

/// Parses one TSV line produced by `Hit::to_tsv_line`. Used by the profiler's
/// streaming reader.
pub fn parse_hit_line(line: &str) -> Result<Hit, KmcpError> {
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() != 15 {
        return Err(KmcpError::CorruptInput {
            path: "<hit-stream>".into(),
            reason: format!("expected 15 columns, got {}", cols.len()),
        });
    }
    let field = |i: usize| -> Result<&str, KmcpError> {
        Ok(cols[i])
    };
    let parse_f64 = |s: &str| -> Result<f64, KmcpError> {
        f64::from_str(s).map_err(|_| bad_field(s))
    };
    let parse_u64 = |s: &str| -> Result<u64, KmcpError> {
        u64::from_str(s).map_err(|_| bad_field(s))
    };

    let query = field(0)?.to_string();
    let q_len: usize = field(1)?.parse().map_err(|_| bad_field(cols[1]))?;
    let q_kmers: usize = field(2)?.parse().map_err(|_| bad_field(cols[2]))?;
    let query_idx = parse_u64(field(14)?)?;

    let target = field(5)?;
    let frag_idx: i64 = field(6)?.parse().map_err(|_| bad_field(cols[6]))?;

    if target.is_empty() || frag_idx < 0 {
        return Ok(Hit::Unmatched {
            query,
            q_len,
            q_kmers,
            query_idx,
        });
    }

    Ok(Hit::Matched {
        query,
        q_len,
        q_kmers,
        fpr: parse_f64(field(3)?)?,
        hits: field(4)?.parse().map_err(|_| bad_field(cols[4]))?,
        target: target.to_string(),
        frag_idx: frag_idx as u32,
        frags: field(7)?.parse().map_err(|_| bad_field(cols[7]))?,
        t_len: parse_u64(field(8)?)?,
        k_size: field(9)?.parse().map_err(|_| bad_field(cols[9]))?,
        matched_kmers: parse_u64(field(10)?)?,
        q_cov: parse_f64(field(11)?)?,
        t_cov: parse_f64(field(12)?)?,
        jaccard: parse_f64(field(13)?)?,
        query_idx,
    })
}

fn bad_field(s: &str) -> KmcpError {
    KmcpError::CorruptInput {
        path: "<hit-stream>".into(),
        reason: format!("unparseable field: {s:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matched() -> Hit {
        Hit::Matched {
            query: "q1".into(),
            q_len: 150,
            q_kmers: 120,
            fpr: 0.01,
            hits: 1,
            target: "ref1".into(),
            frag_idx: 0,
            frags: 1,
            t_len: 5_000_000,
            k_size: 21,
            matched_kmers: 100,
            q_cov: 0.833333,
            t_cov: 0.00002,
            jaccard: 0.02,
            query_idx: 7,
        }
    }

    #[test]
    fn round_trips_matched_hit_through_tsv() {
        let hit = sample_matched();
        let line = hit.to_tsv_line();
        let parsed = parse_hit_line(&line).unwrap();
        assert_eq!(parsed, hit);
    }

    #[test]
    fn round_trips_unmatched_hit_through_tsv() {
        let hit = Hit::Unmatched {
            query: "q2".into(),
            q_len: 10,
            q_kmers: 0,
            query_idx: 8,
        };
        let line = hit.to_tsv_line();
        let parsed = parse_hit_line(&line).unwrap();
        assert_eq!(parsed, hit);
    }

    #[test]
    fn rejects_malformed_line() {
        let err = parse_hit_line("too\tfew\tcolumns").unwrap_err();
        assert!(matches!(err, KmcpError::CorruptInput { .. }));
    }
}
