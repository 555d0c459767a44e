//! Reference genome sequence, loaded from FASTA.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::{QuantError, Result};
use crate::types::RefBlock;

/// Whole-genome sequence held in memory, uppercased.
#[derive(Debug, Default, Clone)]
pub struct RefGenome {
    sequences: HashMap<String, Vec<u8>>,
}

impl RefGenome {
    /// Load a FASTA file, gzipped when it ends in `.gz`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let is_gz = path.extension().map(|e| e == "gz").unwrap_or(false);

        if is_gz {
            Self::from_gz(file)
        } else {
            Self::from_reader(BufReader::new(file))
        }
    }

    pub fn from_gz<R: Read>(reader: R) -> Result<Self> {
        Self::from_reader(BufReader::new(GzDecoder::new(reader)))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut sequences = HashMap::new();
        let mut current: Option<(String, Vec<u8>)> = None;

        for line in reader.lines() {
            let line = line?;
            if let Some(header) = line.strip_prefix('>') {
                if let Some((name, seq)) = current.take() {
                    sequences.insert(name, seq);
                }
                let name = header.split_whitespace().next().unwrap_or("");
                if name.is_empty() {
                    return Err(QuantError::Reference(format!("empty FASTA header: >{header}")));
                }
                current = Some((name.to_string(), Vec::new()));
            } else if let Some((_, seq)) = current.as_mut() {
                let start = seq.len();
                seq.extend_from_slice(line.trim().as_bytes());
                seq[start..].make_ascii_uppercase();
            } else if !line.trim().is_empty() {
                return Err(QuantError::Reference("sequence data before the first header".into()));
            }
        }

        if let Some((name, seq)) = current {
            sequences.insert(name, seq);
        }

        Ok(Self { sequences })
    }

    pub fn contains(&self, chr: &str) -> bool {
        self.sequences.contains_key(chr)
    }

    pub fn chromosome_len(&self, chr: &str) -> Option<u32> {
        self.sequences.get(chr).map(|s| s.len() as u32)
    }

    /// Bases of `[start, end)`, or `None` when the block runs off the chromosome.
    pub fn bases(&self, chr: &str, block: RefBlock) -> Option<&str> {
        let seq = self.sequences.get(chr)?;
        let bytes = seq.get(block.start as usize..block.end as usize)?;
        std::str::from_utf8(bytes).ok()
    }
}
