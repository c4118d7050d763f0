//! Database descriptor: the ordered list of block files plus the
//! database-wide parameters every block must agree on, and the optional
//! `seq_id -> display_name` mapping file. The descriptor is small, read once
//! at database-open time and never memory-mapped, so it is plain JSON via
//! `serde_json`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::error::{KmcpError, Result};

pub const DATABASE_DESCRIPTOR_FILE: &str = "database.json";
pub const NAME_MAPPING_FILE: &str = "names.tsv";

/// Database-wide parameters shared by every block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    pub alias: String,
    pub k: u8,
    pub hashed: bool,
    pub canonical: bool,
    pub scaled: bool,
    pub scale: u32,
    #[serde(default)]
    pub minimizer_w: Option<u32>,
    #[serde(default)]
    pub syncmer_s: Option<u32>,
    #[serde(default)]
    pub split_size: Option<u64>,
    #[serde(default)]
    pub split_overlap: Option<u64>,
    pub h: u8,
    pub fpr_target: f64,
    pub block_size: usize,
    pub total_kmers: u64,
    pub total_columns: u64,
    /// RAMBO repetitions, default 1.
    #[serde(default = "one")]
    pub repetitions: u32,
    /// Hash seed applied to raw (non-pre-hashed) k-mer codes before Bloom
    /// positions are derived; meaningless when `hashed` is set.
    #[serde(default)]
    pub seed: u64,
    /// Block filenames in load order, relative to the database directory.
    pub blocks: Vec<String>,
    #[serde(default)]
    pub name_mapping: Option<String>,
}

fn one() -> u32 {
    1
}

impl DatabaseDescriptor {
    pub fn write<P: AsRef<Path>>(&self, db_dir: P) -> Result<()> {
        let path = db_dir.as_ref().join(DATABASE_DESCRIPTOR_FILE);
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| KmcpError::corrupt(&path, format!("descriptor serialize: {e}")))?;
        std::fs::write(&path, json).map_err(|e| KmcpError::io(&path, e))
    }

    pub fn open<P: AsRef<Path>>(db_dir: P) -> Result<Self> {
        let path = db_dir.as_ref().join(DATABASE_DESCRIPTOR_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| KmcpError::io(&path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| KmcpError::corrupt(&path, format!("descriptor parse: {e}")))
    }

    pub fn block_paths<P: AsRef<Path>>(&self, db_dir: P) -> Vec<PathBuf> {
        self.blocks
            .iter()
            .map(|name| db_dir.as_ref().join(name))
            .collect()
    }
}

/// `seq_id -> display_name` lookup, loaded the same way a two-column
/// whitespace-or-tab-separated taxon map would be.
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    names: HashMap<String, String>,
}

impl NameMap {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| KmcpError::io(path, e))?;
        let reader = std::io::BufReader::new(file);
        let mut names = HashMap::new();
        for line in reader.lines() {
            let line = line.map_err(|e| KmcpError::io(path, e))?;
            let mut parts = line.splitn(2, '\t');
            if let (Some(seq_id), Some(name)) = (parts.next(), parts.next()) {
                names.insert(seq_id.to_string(), name.to_string());
            }
        }
        Ok(NameMap { names })
    }

    pub fn display_name<'a>(&'a self, seq_id: &'a str) -> &'a str {
        self.names.get(seq_id).map(|s| s.as_str()).unwrap_or(seq_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DatabaseDescriptor {
        DatabaseDescriptor {
            alias: "testdb".into(),
            k: 21,
            hashed: true,
            canonical: true,
            scaled: false,
            scale: 1,
            minimizer_w: None,
            syncmer_s: None,
            split_size: None,
            split_overlap: None,
            h: 3,
            fpr_target: 0.3,
            block_size: 64,
            total_kmers: 1000,
            total_columns: 10,
            repetitions: 1,
            seed: 42,
            blocks: vec!["block_0.kmcb".into()],
            name_mapping: None,
        }
    }

    #[test]
    fn round_trips_descriptor_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let desc = sample();
        desc.write(dir.path()).unwrap();
        let read_back = DatabaseDescriptor::open(dir.path()).unwrap();
        assert_eq!(read_back, desc);
    }

    #[test]
    fn name_map_falls_back_to_seq_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.tsv");
        std::fs::write(&path, "seq1\tEscherichia coli\n").unwrap();
        let map = NameMap::load(&path).unwrap();
        assert_eq!(map.display_name("seq1"), "Escherichia coli");
        assert_eq!(map.display_name("seq2"), "seq2");
    }
}
