use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;
use log::{debug, warn};

use crate::alignment::{AlignmentRecord, AlignmentSource, Cigar};
use crate::error::{QuantError, Result};

const MANDATORY_COLUMNS: usize = 11;

/// In-memory SAM alignment source.
///
/// Mapped primary and secondary records are kept per chromosome, sorted by
/// position. Malformed lines are logged and skipped.
#[derive(Debug, Default)]
pub struct SamSource {
    records: HashMap<String, Vec<AlignmentRecord>>,
    // longest reference span per chromosome, bounds the query lookback
    max_span: HashMap<String, u32>,
    skipped_lines: usize,
}

impl SamSource {
    /// Read a SAM file, gzipped when it ends in `.gz`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        let is_gz = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        if is_gz {
            Self::from_reader(BufReader::new(GzDecoder::new(file)))
        } else {
            Self::from_reader(BufReader::new(file))
        }
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut source = SamSource::default();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = idx + 1;
            if line.is_empty() || line.starts_with('@') {
                continue;
            }

            match parse_sam_line(&line, line_no) {
                Ok(Some(rec)) => source.push(rec),
                Ok(None) => {}
                Err(e) => {
                    warn!("skipping alignment: {e}");
                    source.skipped_lines += 1;
                }
            }
        }

        for recs in source.records.values_mut() {
            recs.sort_by_key(|r| (r.pos, r.end()));
        }
        debug!(
            "loaded {} alignments on {} chromosomes",
            source.len(),
            source.records.len()
        );

        Ok(source)
    }

    fn push(&mut self, rec: AlignmentRecord) {
        let span = rec.cigar.reference_len();
        let max = self.max_span.entry(rec.chr.clone()).or_insert(0);
        *max = (*max).max(span);
        self.records.entry(rec.chr.clone()).or_default().push(rec);
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }
}

impl AlignmentSource for SamSource {
    fn query(&self, chr: &str, start: u32, end: u32) -> Result<Vec<AlignmentRecord>> {
        let Some(recs) = self.records.get(chr) else {
            return Ok(Vec::new());
        };
        let lookback = self.max_span.get(chr).copied().unwrap_or(0);
        let first = recs.partition_point(|r| r.pos < start.saturating_sub(lookback));

        Ok(recs[first..]
            .iter()
            .take_while(|r| r.pos < end)
            .filter(|r| r.end() > start)
            .cloned()
            .collect())
    }
}

/// Parse one SAM body line. Unmapped records give `Ok(None)`.
pub fn parse_sam_line(line: &str, line_no: usize) -> Result<Option<AlignmentRecord>> {
    let bad = |reason: String| QuantError::Alignment { line_no, reason };

    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() < MANDATORY_COLUMNS {
        return Err(bad(format!(
            "expected at least {} columns, found {}",
            MANDATORY_COLUMNS,
            cols.len()
        )));
    }

    let flags: u16 = cols[1]
        .parse()
        .map_err(|_| bad(format!("bad flag '{}'", cols[1])))?;
    let pos_1: u32 = cols[3]
        .parse()
        .map_err(|_| bad(format!("bad position '{}'", cols[3])))?;

    if flags & super::FLAG_UNMAPPED != 0 || cols[2] == "*" || pos_1 == 0 || cols[5] == "*" {
        return Ok(None);
    }

    let mapq: u8 = cols[4].parse().unwrap_or(255);
    let cigar = Cigar::parse(cols[5]).map_err(|e| bad(e.to_string()))?;

    let mate_chr = match cols[6] {
        "*" => None,
        "=" => Some(cols[2].to_string()),
        other => Some(other.to_string()),
    };
    let mate_pos: u32 = cols[7]
        .parse()
        .map_err(|_| bad(format!("bad mate position '{}'", cols[7])))?;
    let insert_size: i64 = cols[8]
        .parse()
        .map_err(|_| bad(format!("bad template length '{}'", cols[8])))?;

    Ok(Some(AlignmentRecord {
        read_id: cols[0].to_string(),
        flags,
        chr: cols[2].to_string(),
        pos: pos_1 - 1,
        mapq,
        cigar,
        mate_chr,
        mate_pos: mate_pos.saturating_sub(1),
        insert_size,
        seq: cols[9].to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAM: &str = "\
@HD\tVN:1.6\tSO:coordinate
@SQ\tSN:chr1\tLN:10000
r2\t163\tchr1\t301\t60\t50M\t=\t401\t150\tACGT\t*
r1\t99\tchr1\t101\t60\t50M100N50M\t=\t351\t300\t*\t*
r3\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\t*
r4\t99\tchr1\t501\t60\t10Q\t=\t601\t150\t*\t*
r5\t65\tchr2\t11\t60\t20M\tchr1\t500\t0\t*\t*
";

    fn source() -> SamSource {
        SamSource::from_reader(Cursor::new(SAM.as_bytes())).unwrap()
    }

    #[test]
    fn loads_mapped_records_and_skips_bad_ones() {
        let src = source();
        assert_eq!(src.len(), 3);
        assert_eq!(src.skipped_lines(), 1);
    }

    #[test]
    fn positions_are_zero_based() {
        let src = source();
        let recs = src.query("chr1", 0, 10_000).unwrap();
        assert_eq!(recs[0].read_id, "r1");
        assert_eq!(recs[0].pos, 100);
        assert_eq!(recs[0].mate_pos, 350);
        assert_eq!(recs[0].mate_chr.as_deref(), Some("chr1"));
        assert_eq!(recs[0].end(), 300);

        let other = src.query("chr2", 0, 100).unwrap();
        assert!(other[0].mate_on_other_chromosome());
    }

    #[test]
    fn query_uses_aligned_span() {
        let src = source();
        // r1 spans 100..300 with a gap, r2 spans 300..350
        let ids: Vec<String> = src
            .query("chr1", 250, 260)
            .unwrap()
            .into_iter()
            .map(|r| r.read_id)
            .collect();
        assert_eq!(ids, vec!["r1".to_string()]);

        assert_eq!(src.query("chr1", 300, 301).unwrap()[0].read_id, "r2");
        assert!(src.query("chr1", 350, 400).unwrap().is_empty());
        assert!(src.query("chrX", 0, 100).unwrap().is_empty());
    }
}
