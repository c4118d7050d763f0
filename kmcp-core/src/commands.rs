//! Shared implementations behind every subcommand. Each granular per-stage
//! binary under `src/bin/` and the root `kmcp` CLI's subcommand dispatch both
//! call straight into these functions.

use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use crate::args::{BuildArgs, InspectArgs, ProfileArgs, SearchArgs};
use crate::artifact::ArtifactReader;
use crate::block::builder::{build_block, partition_buckets, Bucket};
use crate::block::reader::BlockReader;
use crate::config::SearchConfig;
use crate::database::{DatabaseDescriptor, NameMap, NAME_MAPPING_FILE};
use crate::error::{KmcpError, Result};
use crate::hit::{Hit, HIT_TSV_HEADER};
use crate::pipeline::{run_ordered, run_unordered, CancelToken};
use crate::profiler::{Profiler, PROFILE_TSV_HEADER};
use crate::search::{finalize_hits, prepare_query, search_block, Query};
use crate::utils::{find_files, format_bytes, get_file_limit, set_fd_limit};

pub fn run_build(args: BuildArgs) -> Result<()> {
    let cfg = args.resolve()?;
    std::fs::create_dir_all(&args.db).map_err(|e| KmcpError::io(&args.db, e))?;

    if cfg.max_open_files > get_file_limit() {
        set_fd_limit(cfg.max_open_files as u64).map_err(|e| KmcpError::io(&args.db, e))?;
    }

    let artifact_paths = find_files(&args.source, "", ".kmca");
    if artifact_paths.is_empty() {
        return Err(KmcpError::ConfigRejected(format!(
            "no .kmca artifacts found under {}",
            args.source.display()
        )));
    }
    log::info!(
        "scanning {} artifacts under {}",
        artifact_paths.len(),
        args.source.display()
    );

    let mut buckets = Vec::with_capacity(artifact_paths.len());
    let mut k: Option<u8> = None;
    let mut canonical: Option<bool> = None;
    let mut hashed: Option<bool> = None;
    let mut scaled: Option<bool> = None;
    let mut scale: Option<u32> = None;

    for path in &artifact_paths {
        let reader = ArtifactReader::open(path)?;
        let header = &reader.header;
        match k {
            Some(existing) if existing != header.k => {
                return Err(KmcpError::HeaderMismatch(format!("k mismatch in {}", path.display())))
            }
            _ => k = Some(header.k),
        }
        canonical.get_or_insert(header.flags.canonical);
        hashed.get_or_insert(header.flags.hashed);
        scaled.get_or_insert(header.flags.scaled);
        scale.get_or_insert(header.scale);
        buckets.push(Bucket {
            artifact_path: path.clone(),
            kmer_count: reader.kmer_count(),
        });
    }

    let groups = partition_buckets(&buckets, &cfg);
    log::info!("partitioned {} references into {} blocks", buckets.len(), groups.len());

    let block_names: Vec<String> = (0..groups.len()).map(|i| format!("block_{i}.kmcb")).collect();

    groups
        .par_iter()
        .enumerate()
        .map(|(i, group)| {
            let paths: Vec<PathBuf> = group.iter().map(|&idx| buckets[idx].artifact_path.clone()).collect();
            let out_path = args.db.join(&block_names[i]);
            build_block(&out_path, &paths, &cfg)
        })
        .collect::<Result<Vec<_>>>()?;

    let total_kmers: u64 = buckets.iter().map(|b| b.kmer_count).sum();
    let total_columns = buckets.len() as u64;

    let name_mapping = args
        .name_mapping
        .as_ref()
        .map(|source| {
            let dest = args.db.join(NAME_MAPPING_FILE);
            std::fs::copy(source, &dest).map_err(|e| KmcpError::io(&dest, e))?;
            Ok::<_, KmcpError>(NAME_MAPPING_FILE.to_string())
        })
        .transpose()?;

    let descriptor = DatabaseDescriptor {
        alias: args.alias.clone(),
        k: k.expect("at least one artifact scanned"),
        hashed: hashed.unwrap_or(true),
        canonical: canonical.unwrap_or(true),
        scaled: scaled.unwrap_or(false),
        scale: scale.unwrap_or(1),
        minimizer_w: None,
        syncmer_s: None,
        split_size: None,
        split_overlap: None,
        h: cfg.h,
        fpr_target: cfg.fpr,
        block_size: cfg.block_size,
        total_kmers,
        total_columns,
        repetitions: cfg.repetitions,
        seed: cfg.seed,
        blocks: block_names,
        name_mapping,
    };
    descriptor.write(&args.db)?;

    log::info!(
        "built database at {} ({} k-mers across {} columns, {} blocks)",
        args.db.display(),
        format_bytes(total_kmers as f64),
        total_columns,
        descriptor.blocks.len()
    );
    Ok(())
}

fn load_queries(paths: &[PathBuf]) -> Result<Vec<Query>> {
    paths
        .iter()
        .enumerate()
        .map(|(idx, path)| {
            let reader = ArtifactReader::open(path)?;
            let id = reader.header.meta.seq_id.clone();
            let len = reader.header.meta.genome_size as usize;
            let k = reader.header.k;
            let hashes = reader.collect::<Result<Vec<u64>>>()?;
            Ok(Query {
                id,
                idx: idx as u64,
                len,
                k,
                hashes,
            })
        })
        .collect()
}

fn unmatched_if_kept(query: &Query, cfg: &SearchConfig) -> Vec<Hit> {
    if cfg.keep_unmatched {
        vec![Hit::Unmatched {
            query: query.id.clone(),
            q_len: query.len,
            q_kmers: query.hashes.len(),
            query_idx: query.idx,
        }]
    } else {
        Vec::new()
    }
}

fn probe_query(
    query: Query,
    blocks: &[BlockReader],
    descriptor: &DatabaseDescriptor,
    cfg: &SearchConfig,
) -> Result<Vec<Hit>> {
    if query.len < cfg.min_query_len {
        return Ok(unmatched_if_kept(&query, cfg));
    }

    let prepared = prepare_query(query.hashes.clone(), cfg.kmer_dedup_threshold);
    let q_kmers = prepared.len();

    let mut hits = Vec::new();
    for block in blocks {
        if block.header.k != query.k
            || block.header.canonical != descriptor.canonical
            || block.header.hashed != descriptor.hashed
        {
            continue;
        }
        let probe = Query {
            id: query.id.clone(),
            idx: query.idx,
            len: query.len,
            k: query.k,
            hashes: prepared.clone(),
        };
        hits.extend(search_block(block, &probe, q_kmers, descriptor.fpr_target, descriptor.seed, cfg)?);
    }

    let finalized = finalize_hits(hits, cfg);
    if finalized.is_empty() {
        return Ok(unmatched_if_kept(&query, cfg));
    }
    Ok(finalized)
}

pub fn run_search(args: SearchArgs) -> Result<()> {
    let cfg = args.resolve()?;
    let descriptor = DatabaseDescriptor::open(&args.db)?;
    let blocks = descriptor
        .block_paths(&args.db)
        .iter()
        .map(|p| BlockReader::open(p, cfg.low_mem))
        .collect::<Result<Vec<_>>>()?;
    log::info!("opened {} blocks from {}", blocks.len(), args.db.display());

    let queries = load_queries(&args.query)?;
    log::info!("loaded {} queries", queries.len());

    let n_workers = args.threads.max(1);
    let cancel = CancelToken::new();
    let descriptor_ref = &descriptor;
    let blocks_ref = &blocks;
    let cfg_ref = &cfg;

    let work = move |_i: usize, query: Query| probe_query(query, blocks_ref, descriptor_ref, cfg_ref);
    let grouped = if cfg.keep_order {
        run_ordered(queries, n_workers, n_workers * 4, &cancel, work)?
    } else {
        run_unordered(queries, n_workers, n_workers * 4, &cancel, work)?
    };

    let mut out: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(BufWriter::new(File::create(path).map_err(|e| KmcpError::io(path, e))?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    writeln!(out, "{HIT_TSV_HEADER}").map_err(|e| KmcpError::io("<stdout>", e))?;
    for group in grouped {
        for hit in group {
            writeln!(out, "{}", hit.to_tsv_line()).map_err(|e| KmcpError::io("<stdout>", e))?;
        }
    }
    Ok(())
}

pub fn run_profile(args: ProfileArgs) -> Result<()> {
    let cfg = args.resolve()?;

    let input: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path).map_err(|e| KmcpError::io(path, e))?)),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    let names = args.name_mapping.as_ref().map(NameMap::load).transpose()?;

    let mut profiler = Profiler::new(cfg);
    for line in input.lines() {
        let line = line.map_err(|e| KmcpError::io("<stdin>", e))?;
        profiler.feed_line(&line)?;
    }
    profiler.finish()?;
    if profiler.skipped_lines > 0 {
        log::warn!("skipped {} malformed input line(s)", profiler.skipped_lines);
    }

    let rows = profiler.rank();
    log::info!("ranked {} targets", rows.len());

    let mut out: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(BufWriter::new(File::create(path).map_err(|e| KmcpError::io(path, e))?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    writeln!(out, "{PROFILE_TSV_HEADER}").map_err(|e| KmcpError::io("<stdout>", e))?;
    for row in &rows {
        let line = match &names {
            Some(map) => format!(
                "{}\t{:.6}\t{:.6}\t{}",
                map.display_name(&row.name),
                row.frags_prop,
                row.mean_reads,
                row.sum_unique_reads
            ),
            None => row.to_tsv_line(),
        };
        writeln!(out, "{line}").map_err(|e| KmcpError::io("<stdout>", e))?;
    }
    Ok(())
}

pub fn run_inspect(args: InspectArgs) -> Result<()> {
    let descriptor = DatabaseDescriptor::open(&args.db)?;

    println!("database: {}", args.db.display());
    println!("  alias           {}", descriptor.alias);
    println!(
        "  k={} canonical={} hashed={} scaled={} scale={}",
        descriptor.k, descriptor.canonical, descriptor.hashed, descriptor.scaled, descriptor.scale
    );
    println!(
        "  h={} fpr_target={:.4} block_size={} repetitions={}",
        descriptor.h, descriptor.fpr_target, descriptor.block_size, descriptor.repetitions
    );
    println!(
        "  total_kmers={} total_columns={} blocks={}",
        descriptor.total_kmers,
        descriptor.total_columns,
        descriptor.blocks.len()
    );

    for path in descriptor.block_paths(&args.db) {
        let block = BlockReader::open(&path, true)?;
        let summed_kmers: u64 = block.header.columns.iter().map(|c| c.kmer_count).sum();
        println!(
            "block {}: m={} cols={} row_size_bytes={} k={} canonical={} hashed={} h={} summed_kmers={}",
            path.display(),
            block.rows(),
            block.cols(),
            block.row_size_bytes(),
            block.header.k,
            block.header.canonical,
            block.header.hashed,
            block.header.h,
            summed_kmers,
        );
    }
    Ok(())
}
