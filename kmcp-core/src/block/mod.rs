//! Block file format: up to 64 reference columns sharing one bit-sliced
//! Bloom-filter matrix. `builder` implements C3 (bucketing, sizing, filling,
//! serialization); `reader` implements C4 (header parse, row access, mmap vs
//! paged backends).

pub mod builder;
pub mod reader;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{KmcpError, Result};

pub const BLOCK_MAGIC: &[u8; 4] = b"KMCB";
pub const BLOCK_VERSION: u8 = 1;

/// Per-column metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub seq_id: String,
    pub fragment_index: u32,
    pub fragment_count: u32,
    pub genome_size: u64,
    pub kmer_count: u64,
}

/// Fixed block header: `{m:u64, cols:u8, k:u8, canonical:u8, h:u8}`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
    pub m: u64,
    pub k: u8,
    pub canonical: bool,
    pub hashed: bool,
    pub h: u8,
    pub columns: Vec<ColumnDescriptor>,
}

impl BlockHeader {
    pub fn cols(&self) -> u8 {
        self.columns.len() as u8
    }

    pub fn row_size_bytes(&self) -> usize {
        ((self.cols() as usize) + 7) / 8
    }

    pub fn body_len_bytes(&self) -> usize {
        self.row_size_bytes() * self.m as usize
    }
}

pub(crate) fn write_header<W: Write>(w: &mut W, path: &Path, header: &BlockHeader) -> Result<()> {
    w.write_all(BLOCK_MAGIC)
        .and_then(|_| w.write_u8(BLOCK_VERSION))
        .and_then(|_| w.write_u64::<LittleEndian>(header.m))
        .and_then(|_| w.write_u8(header.cols()))
        .and_then(|_| w.write_u8(header.k))
        .and_then(|_| w.write_u8(header.canonical as u8))
        .and_then(|_| w.write_u8(header.hashed as u8))
        .and_then(|_| w.write_u8(header.h))
        .map_err(|e| KmcpError::io(path, e))?;

    for col in &header.columns {
        let seq_id_bytes = col.seq_id.as_bytes();
        w.write_u16::<LittleEndian>(seq_id_bytes.len() as u16)
            .and_then(|_| w.write_all(seq_id_bytes))
            .and_then(|_| w.write_u32::<LittleEndian>(col.fragment_index))
            .and_then(|_| w.write_u32::<LittleEndian>(col.fragment_count))
            .and_then(|_| w.write_u64::<LittleEndian>(col.genome_size))
            .and_then(|_| w.write_u64::<LittleEndian>(col.kmer_count))
            .map_err(|e| KmcpError::io(path, e))?;
    }
    Ok(())
}

pub(crate) fn read_header<R: Read>(r: &mut R, path: &Path) -> Result<BlockHeader> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic).map_err(|e| KmcpError::io(path, e))?;
    if &magic != BLOCK_MAGIC {
        return Err(KmcpError::corrupt(path, "bad block magic"));
    }
    let version = r.read_u8().map_err(|e| KmcpError::io(path, e))?;
    if version != BLOCK_VERSION {
        return Err(KmcpError::corrupt(
            path,
            format!("unsupported block version {version}"),
        ));
    }
    let m = r.read_u64::<LittleEndian>().map_err(|e| KmcpError::io(path, e))?;
    if !m.is_power_of_two() {
        return Err(KmcpError::corrupt(path, format!("m={m} is not a power of two")));
    }
    let cols = r.read_u8().map_err(|e| KmcpError::io(path, e))?;
    let k = r.read_u8().map_err(|e| KmcpError::io(path, e))?;
    let canonical = r.read_u8().map_err(|e| KmcpError::io(path, e))? != 0;
    let hashed = r.read_u8().map_err(|e| KmcpError::io(path, e))? != 0;
    let h = r.read_u8().map_err(|e| KmcpError::io(path, e))?;

    let mut columns = Vec::with_capacity(cols as usize);
    for _ in 0..cols {
        let seq_id_len = r.read_u16::<LittleEndian>().map_err(|e| KmcpError::io(path, e))? as usize;
        let mut seq_id_buf = vec![0u8; seq_id_len];
        r.read_exact(&mut seq_id_buf).map_err(|e| KmcpError::io(path, e))?;
        let seq_id = String::from_utf8(seq_id_buf)
            .map_err(|e| KmcpError::corrupt(path, format!("seq_id not utf8: {e}")))?;
        let fragment_index = r.read_u32::<LittleEndian>().map_err(|e| KmcpError::io(path, e))?;
        let fragment_count = r.read_u32::<LittleEndian>().map_err(|e| KmcpError::io(path, e))?;
        let genome_size = r.read_u64::<LittleEndian>().map_err(|e| KmcpError::io(path, e))?;
        let kmer_count = r.read_u64::<LittleEndian>().map_err(|e| KmcpError::io(path, e))?;
        columns.push(ColumnDescriptor {
            seq_id,
            fragment_index,
            fragment_count,
            genome_size,
            kmer_count,
        });
    }

    Ok(BlockHeader {
        m,
        k,
        canonical,
        hashed,
        h,
        columns,
    })
}
