//! C6 — the streaming profiler. Consumes search-output hits grouped by
//! query, credits multi-hit reads proportionally, then ranks surviving
//! targets by fragment coverage and abundance. The line-by-line recovery
//! ("skip and count" on a malformed row) mirrors a small two-column
//! parser that silently skips any line not splitting into the expected
//! fields.

use std::collections::{HashMap, HashSet};

use crate::config::{NormAbund, ProfileConfig};
use crate::error::{KmcpError, Result};
use crate::hit::{parse_hit_line, Hit};

/// One ranked row of the profile output TSV.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRow {
    pub name: String,
    pub frags_prop: f64,
    pub mean_reads: f64,
    pub sum_unique_reads: u64,
}

impl ProfileRow {
    pub fn to_tsv_line(&self) -> String {
        format!(
            "{}\t{:.6}\t{:.6}\t{}",
            self.name, self.frags_prop, self.mean_reads, self.sum_unique_reads
        )
    }
}

pub const PROFILE_TSV_HEADER: &str = "name\tfragsProp\tmeanReads\tsumUReads";

type TargetFrag = (String, u32);

/// Streaming accumulator. Feed TSV lines (or already-parsed [`Hit`]s) in
/// query order, then call [`Profiler::finish`] and [`Profiler::rank`].
pub struct Profiler {
    cfg: ProfileConfig,
    match_credit: HashMap<TargetFrag, f64>,
    unique_match: HashMap<TargetFrag, u64>,
    frag_lens: HashMap<TargetFrag, u64>,
    fragment_count: HashMap<String, u32>,
    unique_total: HashMap<String, u64>,
    unique_hic: HashMap<String, u64>,
    seen_queries: HashSet<String>,
    current_query: Option<String>,
    current_group: Vec<Hit>,
    pub skipped_lines: u64,
}

impl Profiler {
    pub fn new(cfg: ProfileConfig) -> Self {
        Profiler {
            cfg,
            match_credit: HashMap::new(),
            unique_match: HashMap::new(),
            frag_lens: HashMap::new(),
            fragment_count: HashMap::new(),
            unique_total: HashMap::new(),
            unique_hic: HashMap::new(),
            seen_queries: HashSet::new(),
            current_query: None,
            current_group: Vec::new(),
            skipped_lines: 0,
        }
    }

    /// Feeds one raw TSV line. Malformed lines are skipped and counted
    /// rather than treated as fatal.
    pub fn feed_line(&mut self, line: &str) -> Result<()> {
        if line.is_empty() || line.starts_with("query\t") {
            return Ok(());
        }
        match parse_hit_line(line) {
            Ok(hit) => self.feed_hit(hit),
            Err(_) => {
                self.skipped_lines += 1;
                Ok(())
            }
        }
    }

    /// Feeds one already-parsed hit. Returns `ProtocolViolation` if a query
    /// id reappears after its group has already been closed, i.e. the input
    /// was not grouped by query.
    pub fn feed_hit(&mut self, hit: Hit) -> Result<()> {
        let query = hit.query().to_string();
        if self.current_query.as_deref() != Some(query.as_str()) {
            if let Some(prev) = self.current_query.take() {
                self.flush_group(&prev)?;
            }
            if self.seen_queries.contains(&query) {
                return Err(KmcpError::ProtocolViolation(format!(
                    "query {query} reappeared after its group was already closed"
                )));
            }
            self.seen_queries.insert(query.clone());
            self.current_query = Some(query);
        }
        self.current_group.push(hit);
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        if let Some(prev) = self.current_query.take() {
            self.flush_group(&prev)?;
        }
        Ok(())
    }

    fn flush_group(&mut self, _query_id: &str) -> Result<()> {
        let group = std::mem::take(&mut self.current_group);
        let mut matched: Vec<Hit> = group
            .into_iter()
            .filter(|h| matches!(h, Hit::Matched { .. }) && passes_profile_gate(h, &self.cfg))
            .collect();
        if matched.is_empty() {
            return Ok(());
        }

        matched.sort_by(|a, b| {
            let qa = hit_qcov(a);
            let qb = hit_qcov(b);
            qb.partial_cmp(&qa).unwrap_or(std::cmp::Ordering::Equal)
        });

        for hit in &matched {
            if let Hit::Matched { frags, .. } = hit {
                if *frags == 0 {
                    return Err(KmcpError::CorruptInput {
                        path: "<hit-stream>".into(),
                        reason: format!("target {} has zero fragments", hit_target(hit)),
                    });
                }
            }
        }

        let resolved = resolve_ambiguity(&matched, &self.cfg);
        let n = resolved.len().max(1) as f64;
        let is_unique = resolved.len() == 1;

        for hit in &resolved {
            if let Hit::Matched {
                target,
                frag_idx,
                frags,
                q_cov,
                q_len,
                ..
            } = hit
            {
                self.fragment_count.entry(target.clone()).or_insert(*frags);
                let key = (target.clone(), *frag_idx);
                *self.match_credit.entry(key.clone()).or_insert(0.0) += 1.0 / n;
                *self.frag_lens.entry(key.clone()).or_insert(0) += *q_len as u64;

                if is_unique {
                    *self.unique_match.entry(key).or_insert(0) += 1;
                    *self.unique_total.entry(target.clone()).or_insert(0) += 1;
                    if *q_cov >= self.cfg.min_hic_qcov {
                        *self.unique_hic.entry(target.clone()).or_insert(0) += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Average per-fragment query length credited to `target` — a
    /// supplementary diagnostic (spec's `frag_lens[t][f]`), not part of the
    /// default `(fragsProp, meanAbundance)` ranking key.
    pub fn mean_fragment_length(&self, target: &str, frags: u32) -> f64 {
        let total: u64 = (0..frags)
            .filter_map(|f| self.frag_lens.get(&(target.to_string(), f)))
            .sum();
        let count = (0..frags)
            .filter(|f| self.frag_lens.contains_key(&(target.to_string(), *f)))
            .count();
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Ranks surviving targets: post-streaming aggregation, drop rules, and
    /// the high-confidence gate.
    pub fn rank(&self) -> Vec<ProfileRow> {
        let mut rows = Vec::new();

        for (target, &frag_count) in &self.fragment_count {
            let qualifying_frags = (0..frag_count)
                .filter(|f| {
                    let credit = self
                        .match_credit
                        .get(&(target.clone(), *f))
                        .copied()
                        .unwrap_or(0.0);
                    credit > self.cfg.min_reads as f64
                })
                .count();
            let frags_prop = qualifying_frags as f64 / frag_count as f64;
            let sum_unique = self.unique_total.get(target).copied().unwrap_or(0);

            if frags_prop < self.cfg.min_frags_prop || sum_unique < self.cfg.min_uniq_reads {
                continue;
            }

            let hic = self.unique_hic.get(target).copied().unwrap_or(0);
            let hic_prop = if sum_unique > 0 {
                hic as f64 / sum_unique as f64
            } else {
                0.0
            };
            if hic < self.cfg.min_hic_ureads || hic_prop < self.cfg.min_hic_prop {
                continue;
            }

            let per_frag_credits: Vec<f64> = (0..frag_count)
                .filter_map(|f| self.match_credit.get(&(target.clone(), f)).copied())
                .collect();
            let mean_reads = aggregate(&per_frag_credits, self.cfg.norm_abund);

            rows.push(ProfileRow {
                name: target.clone(),
                frags_prop,
                mean_reads,
                sum_unique_reads: sum_unique,
            });
        }

        rows.sort_by(|a, b| {
            b.frags_prop
                .partial_cmp(&a.frags_prop)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.mean_reads
                        .partial_cmp(&a.mean_reads)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        rows
    }
}

/// Re-applies the looser of the search-time and profile-time hit gates
/// (`max_fpr`, `min_query_cov`, `max_mismatch_err`) so a hit stream can be
/// re-profiled under stricter settings without re-running `search`.
/// Mismatch rate is estimated Mash-style from per-k-mer coverage:
/// `1 - qCov^(1/k)`, the per-base identity loss implied by the fraction of
/// shared k-mers.
fn passes_profile_gate(hit: &Hit, cfg: &ProfileConfig) -> bool {
    match hit {
        Hit::Matched {
            fpr, q_cov, k_size, ..
        } => {
            if *fpr > cfg.max_fpr || *q_cov < cfg.min_query_cov {
                return false;
            }
            let identity = q_cov.max(1e-12).powf(1.0 / (*k_size).max(1) as f64);
            let mismatch_err = 1.0 - identity;
            mismatch_err <= cfg.max_mismatch_err
        }
        Hit::Unmatched { .. } => false,
    }
}

fn hit_qcov(hit: &Hit) -> f64 {
    match hit {
        Hit::Matched { q_cov, .. } => *q_cov,
        Hit::Unmatched { .. } => 0.0,
    }
}

fn hit_target(hit: &Hit) -> &str {
    match hit {
        Hit::Matched { target, .. } => target,
        Hit::Unmatched { .. } => "",
    }
}

/// Ambiguity resolution: when the top two q_cov scores are close
/// (`gap < max_qcov_gap`), credit is shared proportionally across all
/// qualifying hits; otherwise only the best hit is kept (`keep_main_match`).
fn resolve_ambiguity(sorted_matched: &[Hit], cfg: &ProfileConfig) -> Vec<Hit> {
    if sorted_matched.len() <= 1 {
        return sorted_matched.to_vec();
    }
    let gap = hit_qcov(&sorted_matched[0]) - hit_qcov(&sorted_matched[1]);
    if gap < cfg.max_qcov_gap {
        sorted_matched.to_vec()
    } else if cfg.keep_main_match {
        vec![sorted_matched[0].clone()]
    } else {
        sorted_matched.to_vec()
    }
}

fn aggregate(values: &[f64], how: NormAbund) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    match how {
        NormAbund::Mean => values.iter().sum::<f64>() / values.len() as f64,
        NormAbund::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        NormAbund::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(target: &str, frag_idx: u32, frags: u32, q_cov: f64, query: &str) -> Hit {
        Hit::Matched {
            query: query.into(),
            q_len: 150,
            q_kmers: 120,
            fpr: 0.001,
            hits: 1,
            target: target.into(),
            frag_idx,
            frags,
            t_len: 1_000_000,
            k_size: 21,
            matched_kmers: 100,
            q_cov,
            t_cov: 0.01,
            jaccard: 0.1,
            query_idx: 0,
        }
    }

    #[test]
    fn unique_read_credits_single_target_fully() {
        let mut cfg = ProfileConfig::default();
        cfg.min_uniq_reads = 1;
        cfg.min_frags_prop = 0.0;
        cfg.min_hic_ureads = 1;
        cfg.min_hic_qcov = 0.5;
        cfg.min_hic_prop = 0.1;
        let mut profiler = Profiler::new(cfg);

        profiler.feed_hit(matched("ref1", 0, 1, 0.9, "q1")).unwrap();
        profiler.finish().unwrap();

        let rows = profiler.rank();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "ref1");
        assert_eq!(rows[0].sum_unique_reads, 1);
    }

    #[test]
    fn ambiguous_read_splits_credit_when_gap_small() {
        let mut cfg = ProfileConfig::default();
        cfg.min_uniq_reads = 0;
        cfg.min_frags_prop = 0.0;
        cfg.min_hic_ureads = 0;
        cfg.min_hic_prop = 0.0;
        cfg.max_qcov_gap = 0.2;
        let mut profiler = Profiler::new(cfg);

        profiler.feed_hit(matched("ref1", 0, 1, 0.9, "q1")).unwrap();
        profiler.feed_hit(matched("ref2", 0, 1, 0.85, "q1")).unwrap();
        profiler.finish().unwrap();

        let rows = profiler.rank();
        let ref1 = rows.iter().find(|r| r.name == "ref1").unwrap();
        let ref2 = rows.iter().find(|r| r.name == "ref2").unwrap();
        assert!((ref1.mean_reads - 0.5).abs() < 1e-9);
        assert!((ref2.mean_reads - 0.5).abs() < 1e-9);
    }

    #[test]
    fn reappearing_query_after_group_close_is_protocol_violation() {
        let mut profiler = Profiler::new(ProfileConfig::default());
        profiler.feed_hit(matched("ref1", 0, 1, 0.9, "q1")).unwrap();
        profiler.feed_hit(matched("ref1", 0, 1, 0.9, "q2")).unwrap();
        let err = profiler.feed_hit(matched("ref1", 0, 1, 0.9, "q1")).unwrap_err();
        assert!(matches!(err, KmcpError::ProtocolViolation(_)));
    }

    #[test]
    fn zero_fragment_target_is_corrupt_input() {
        let mut profiler = Profiler::new(ProfileConfig::default());
        let err = profiler
            .feed_hit(matched("ref1", 0, 0, 0.9, "q1"))
            .and_then(|_| profiler.finish())
            .unwrap_err();
        assert!(matches!(err, KmcpError::CorruptInput { .. }));
    }
}
