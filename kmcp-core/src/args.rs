//! CLI argument surfaces for each subcommand, one `clap`-derived struct
//! per stage. Flags always override a `--config kmcp.toml` file's values.

use clap::Parser;
use std::path::PathBuf;

use crate::config::{BuildConfig, NormAbund, ProfileConfig, SearchConfig, SortBy};

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Build a Bloom-filter-matrix containment index from reference k-mer artifacts")]
pub struct BuildArgs {
    /// Directory of per-reference k-mer artifact files (`*.kmca`)
    #[arg(long, required = true)]
    pub source: PathBuf,

    /// Output database directory
    #[arg(short, long, required = true)]
    pub db: PathBuf,

    /// Alias recorded in the database descriptor
    #[arg(long, default_value = "kmcp-db")]
    pub alias: String,

    /// Optional `seq_id -> display_name` tab-separated file
    #[arg(long)]
    pub name_mapping: Option<PathBuf>,

    /// Optional TOML file providing defaults this run's flags override
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum reference columns per block
    #[arg(long)]
    pub block_size: Option<usize>,

    /// k-mer count threshold below which a block is capped at 8 columns
    #[arg(long)]
    pub t8: Option<u64>,

    /// k-mer count threshold above which a reference becomes its own block
    #[arg(long)]
    pub tx: Option<u64>,

    /// Target false-positive rate per Bloom filter
    #[arg(long)]
    pub fpr: Option<f64>,

    /// Number of hash functions (double-hashing positions) per k-mer
    #[arg(long)]
    pub h: Option<u8>,

    /// Maximum concurrently open artifact files
    #[arg(long)]
    pub max_open_files: Option<usize>,

    /// RAMBO repetitions
    #[arg(long)]
    pub repetitions: Option<u32>,

    /// Upper bound on reference buckets; `block_size` may not exceed it. 0 (default) is unbounded
    #[arg(long)]
    pub buckets: Option<usize>,

    /// Hash seed mixed into non-pre-hashed k-mer codes before Bloom positions are derived
    #[arg(long)]
    pub seed: Option<u64>,

    /// Worker thread count
    #[clap(short = 'p', long, default_value_t = 4)]
    pub threads: usize,
}

impl BuildArgs {
    pub fn resolve(&self) -> crate::error::Result<BuildConfig> {
        let mut cfg = match &self.config {
            Some(path) => crate::config::load_file_config(path)?.build,
            None => BuildConfig::default(),
        };
        if let Some(v) = self.block_size {
            cfg.block_size = v;
        }
        if let Some(v) = self.t8 {
            cfg.t8 = v;
        }
        if let Some(v) = self.tx {
            cfg.tx = v;
        }
        if let Some(v) = self.fpr {
            cfg.fpr = v;
        }
        if let Some(v) = self.h {
            cfg.h = v;
        }
        if let Some(v) = self.max_open_files {
            cfg.max_open_files = v;
        }
        if let Some(v) = self.repetitions {
            cfg.repetitions = v;
        }
        if let Some(v) = self.buckets {
            cfg.buckets = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Query a KMCP database for containment hits")]
pub struct SearchArgs {
    /// Database directory (as written by `build`)
    #[arg(long, required = true)]
    pub db: PathBuf,

    /// Query k-mer artifact(s) (one per query sequence)
    #[arg(long, required = true)]
    pub query: Vec<PathBuf>,

    /// Output TSV path; defaults to stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub min_k: Option<u32>,

    #[arg(long)]
    pub min_query_len: Option<usize>,

    #[arg(long)]
    pub min_query_cov: Option<f64>,

    #[arg(long)]
    pub min_target_cov: Option<f64>,

    #[arg(long)]
    pub top_scores: Option<usize>,

    #[arg(long, value_enum)]
    pub sort_by: Option<SortByArg>,

    #[arg(long)]
    pub do_not_sort: bool,

    #[arg(long)]
    pub keep_unmatched: bool,

    #[arg(long)]
    pub low_mem: bool,

    /// Emit hits as workers complete rather than restoring input query order
    #[arg(long)]
    pub unordered: bool,

    #[arg(long)]
    pub kmer_dedup_threshold: Option<u32>,

    #[clap(short = 'p', long, default_value_t = 4)]
    pub threads: usize,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SortByArg {
    QueryCov,
    TargetCov,
    Jaccard,
}

impl From<SortByArg> for SortBy {
    fn from(v: SortByArg) -> Self {
        match v {
            SortByArg::QueryCov => SortBy::QueryCov,
            SortByArg::TargetCov => SortBy::TargetCov,
            SortByArg::Jaccard => SortBy::Jaccard,
        }
    }
}

impl SearchArgs {
    pub fn resolve(&self) -> crate::error::Result<SearchConfig> {
        let mut cfg = match &self.config {
            Some(path) => crate::config::load_file_config(path)?.search,
            None => SearchConfig::default(),
        };
        if let Some(v) = self.min_k {
            cfg.min_k = v;
        }
        if let Some(v) = self.min_query_len {
            cfg.min_query_len = v;
        }
        if let Some(v) = self.min_query_cov {
            cfg.min_query_cov = v;
        }
        if let Some(v) = self.min_target_cov {
            cfg.min_target_cov = v;
        }
        if self.top_scores.is_some() {
            cfg.top_scores = self.top_scores;
        }
        if let Some(v) = self.sort_by {
            cfg.sort_by = v.into();
        }
        if let Some(v) = self.kmer_dedup_threshold {
            cfg.kmer_dedup_threshold = v;
        }
        cfg.do_not_sort |= self.do_not_sort;
        cfg.keep_unmatched |= self.keep_unmatched;
        cfg.low_mem |= self.low_mem;
        if self.unordered {
            cfg.keep_order = false;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Aggregate search hits into a per-reference abundance profile")]
pub struct ProfileArgs {
    /// Search-output TSV (grouped by query); defaults to stdin
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Output TSV path; defaults to stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Optional `seq_id -> display_name` mapping to annotate output rows
    #[arg(long)]
    pub name_mapping: Option<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub max_fpr: Option<f64>,

    #[arg(long)]
    pub min_query_cov: Option<f64>,

    #[arg(long)]
    pub min_reads: Option<u64>,

    #[arg(long)]
    pub min_uniq_reads: Option<u64>,

    #[arg(long)]
    pub min_frags_prop: Option<f64>,

    #[arg(long)]
    pub min_hic_ureads: Option<u64>,

    #[arg(long)]
    pub min_hic_qcov: Option<f64>,

    #[arg(long)]
    pub min_hic_prop: Option<f64>,

    #[arg(long, value_enum)]
    pub norm_abund: Option<NormAbundArg>,

    #[arg(long)]
    pub max_qcov_gap: Option<f64>,

    #[arg(long)]
    pub max_mismatch_err: Option<f64>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum NormAbundArg {
    Mean,
    Min,
    Max,
}

impl From<NormAbundArg> for NormAbund {
    fn from(v: NormAbundArg) -> Self {
        match v {
            NormAbundArg::Mean => NormAbund::Mean,
            NormAbundArg::Min => NormAbund::Min,
            NormAbundArg::Max => NormAbund::Max,
        }
    }
}

impl ProfileArgs {
    pub fn resolve(&self) -> crate::error::Result<ProfileConfig> {
        let mut cfg = match &self.config {
            Some(path) => crate::config::load_file_config(path)?.profile,
            None => ProfileConfig::default(),
        };
        if let Some(v) = self.max_fpr {
            cfg.max_fpr = v;
        }
        if let Some(v) = self.min_query_cov {
            cfg.min_query_cov = v;
        }
        if let Some(v) = self.min_reads {
            cfg.min_reads = v;
        }
        if let Some(v) = self.min_uniq_reads {
            cfg.min_uniq_reads = v;
        }
        if let Some(v) = self.min_frags_prop {
            cfg.min_frags_prop = v;
        }
        if let Some(v) = self.min_hic_ureads {
            cfg.min_hic_ureads = v;
        }
        if let Some(v) = self.min_hic_qcov {
            cfg.min_hic_qcov = v;
        }
        if let Some(v) = self.min_hic_prop {
            cfg.min_hic_prop = v;
        }
        if let Some(v) = self.norm_abund {
            cfg.norm_abund = v.into();
        }
        if let Some(v) = self.max_qcov_gap {
            cfg.max_qcov_gap = v;
        }
        if let Some(v) = self.max_mismatch_err {
            cfg.max_mismatch_err = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Print database and block header facts without running a query")]
pub struct InspectArgs {
    /// Database directory
    #[arg(long, required = true)]
    pub db: PathBuf,
}
