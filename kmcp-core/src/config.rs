//! Configuration surface for the three engines. Each `*Config` struct is
//! built from CLI flags (see `args.rs`) optionally layered over a
//! `kmcp.toml` file, via layered `#[clap(flatten)]` `Args` structs — flags
//! always win over file values.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{KmcpError, Result};

/// Build-time configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub block_size: usize,
    pub t8: u64,
    pub tx: u64,
    pub fpr: f64,
    pub h: u8,
    pub max_open_files: usize,
    pub repetitions: u32,
    pub buckets: usize,
    pub seed: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            block_size: 64,
            t8: 20_000_000,
            tx: 200_000_000,
            fpr: 0.3,
            h: 1,
            max_open_files: 256,
            repetitions: 1,
            buckets: 0,
            seed: 42,
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > 64 {
            return Err(KmcpError::ConfigRejected(format!(
                "block_size must be in 1..=64, got {}",
                self.block_size
            )));
        }
        if !(self.fpr > 0.0 && self.fpr < 1.0) {
            return Err(KmcpError::ConfigRejected(format!(
                "fpr must be in (0,1), got {}",
                self.fpr
            )));
        }
        if self.h == 0 {
            return Err(KmcpError::ConfigRejected("h must be at least 1".into()));
        }
        if self.t8 >= self.tx {
            return Err(KmcpError::ConfigRejected(format!(
                "T_8 ({}) must be less than T_X ({})",
                self.t8, self.tx
            )));
        }
        if self.buckets > 0 && self.block_size > self.buckets {
            return Err(KmcpError::ConfigRejected(format!(
                "block_size ({}) must not exceed the bucket cap ({})",
                self.block_size, self.buckets
            )));
        }
        if self.repetitions == 0 {
            return Err(KmcpError::ConfigRejected(
                "repetitions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Sort key for search hit ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    QueryCov,
    TargetCov,
    Jaccard,
}

impl Default for SortBy {
    fn default() -> Self {
        SortBy::QueryCov
    }
}

/// Search-time configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub min_k: u32,
    pub min_query_len: usize,
    pub min_query_cov: f64,
    pub min_target_cov: f64,
    pub top_scores: Option<usize>,
    pub sort_by: SortBy,
    pub do_not_sort: bool,
    pub keep_unmatched: bool,
    pub keep_order: bool,
    pub kmer_dedup_threshold: u32,
    pub low_mem: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            min_k: 30,
            min_query_len: 70,
            min_query_cov: 0.55,
            min_target_cov: 0.0,
            top_scores: None,
            sort_by: SortBy::QueryCov,
            do_not_sort: false,
            keep_unmatched: false,
            keep_order: true,
            kmer_dedup_threshold: 256,
            low_mem: false,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_query_cov) {
            return Err(KmcpError::ConfigRejected(format!(
                "min_query_cov must be in [0,1], got {}",
                self.min_query_cov
            )));
        }
        if !(0.0..=1.0).contains(&self.min_target_cov) {
            return Err(KmcpError::ConfigRejected(format!(
                "min_target_cov must be in [0,1], got {}",
                self.min_target_cov
            )));
        }
        if let Some(n) = self.top_scores {
            if n == 0 {
                return Err(KmcpError::ConfigRejected(
                    "top_scores must be at least 1 when set".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Abundance aggregation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormAbund {
    Mean,
    Min,
    Max,
}

impl Default for NormAbund {
    fn default() -> Self {
        NormAbund::Mean
    }
}

/// Profile-time configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub max_fpr: f64,
    pub min_query_cov: f64,
    pub min_reads: u64,
    pub min_uniq_reads: u64,
    pub min_frags_prop: f64,
    pub min_hic_ureads: u64,
    pub min_hic_qcov: f64,
    pub min_hic_prop: f64,
    pub norm_abund: NormAbund,
    pub max_qcov_gap: f64,
    pub max_mismatch_err: f64,
    pub keep_main_match: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            max_fpr: 0.01,
            min_query_cov: 0.55,
            min_reads: 1,
            min_uniq_reads: 1,
            min_frags_prop: 0.8,
            min_hic_ureads: 1,
            min_hic_qcov: 0.8,
            min_hic_prop: 0.1,
            norm_abund: NormAbund::Mean,
            max_qcov_gap: 0.2,
            max_mismatch_err: 0.05,
            keep_main_match: true,
        }
    }
}

impl ProfileConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_fpr > 0.0 && self.max_fpr < 1.0) {
            return Err(KmcpError::ConfigRejected(format!(
                "max_fpr must be in (0,1), got {}",
                self.max_fpr
            )));
        }
        if !(0.0..=1.0).contains(&self.min_frags_prop) {
            return Err(KmcpError::ConfigRejected(
                "min_frags_prop must be in [0,1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_hic_prop) {
            return Err(KmcpError::ConfigRejected(
                "min_hic_prop must be in [0,1]".into(),
            ));
        }
        Ok(())
    }
}

/// Reads a `kmcp.toml` file holding any subset of `{build, search, profile}`
/// tables. Missing tables fall back to `Default`; present fields there are
/// the base that CLI flags then override (see `args.rs` merge helpers).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
}

pub fn load_file_config<P: AsRef<Path>>(path: P) -> Result<FileConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| KmcpError::io(path, e))?;
    toml::from_str(&text).map_err(|e| KmcpError::ConfigRejected(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_build_config_validates() {
        assert!(BuildConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_t8_above_tx() {
        let cfg = BuildConfig {
            t8: 300_000_000,
            tx: 200_000_000,
            ..BuildConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(KmcpError::ConfigRejected(_))));
    }

    #[test]
    fn rejects_block_size_above_bucket_cap() {
        let cfg = BuildConfig {
            block_size: 64,
            buckets: 8,
            ..BuildConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(KmcpError::ConfigRejected(_))));
    }

    #[test]
    fn rejects_out_of_range_query_cov() {
        let cfg = SearchConfig {
            min_query_cov: 1.5,
            ..SearchConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(KmcpError::ConfigRejected(_))));
    }

    #[test]
    fn default_profile_config_validates() {
        assert!(ProfileConfig::default().validate().is_ok());
    }
}
