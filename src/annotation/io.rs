use std::collections::HashMap;
use std::io::BufRead;

use thiserror::Error;

use crate::types::{RefBlock, Strand};

/// File dialect detected from attribute syntax.
///
/// - GFF3 typically uses: key=value;key2=value2
/// - GTF typically uses: key "value"; key2 "value2";
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Gff3,
    Gtf,
    Unknown,
}

/// A single parsed feature line from GTF/GFF3.
///
/// `block` is 0-based, half-open.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub line_no: usize,
    pub seqname: String,
    pub feature_type: String,
    pub block: RefBlock,
    pub strand: Strand,
    pub attrs: HashMap<String, String>,
    pub dialect: Dialect,
}

impl AnnotationRecord {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(|s| s.as_str())
    }

    pub fn is_feature(&self, types: &[String]) -> bool {
        types.iter().any(|t| t == &self.feature_type)
    }

    /// First non-empty attribute among `keys`.
    pub fn pick_first_attr(&self, keys: &[String]) -> Option<String> {
        keys.iter()
            .filter_map(|k| self.attr(k))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Parsing errors for GTF/GFF3.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("I/O error while reading '{path}': {source}")]
    IoPath {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line_no}: malformed GTF/GFF line ({problem}): {line}")]
    MalformedLine {
        line_no: usize,
        problem: String,
        line: String,
    },

    #[error("line {line_no}: bad coordinates: {line}")]
    BadCoordinates { line_no: usize, line: String },

    #[error("line {line_no}: missing {expected} (tried keys: {tried:?})")]
    MissingAttribute {
        line_no: usize,
        expected: &'static str,
        tried: Vec<String>,
    },
}

/// Streaming parser for GTF/GFF3 files.
///
/// Most callers should use [`crate::annotation::AnnotationBuilder`], which turns the
/// records into a [`crate::cache::GeneModelCache`].
///
/// ```no_run
/// use std::fs::File;
/// use std::io::BufReader;
/// use splice_quant::annotation::io::AnnotationReader;
///
/// let file = File::open("genes.gtf").unwrap();
/// for rec in AnnotationReader::new(BufReader::new(file)).records() {
///     let rec = rec.unwrap();
///     println!("{} {}", rec.seqname, rec.block);
/// }
/// ```
pub struct AnnotationReader<R: BufRead> {
    reader: R,
    buf: String,
    line_no: usize,
}

impl<R: BufRead> AnnotationReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line_no: 0,
        }
    }

    /// Returns an iterator over parsed records, skipping blank and `#` lines.
    pub fn records(mut self) -> impl Iterator<Item = Result<AnnotationRecord, ParseError>> {
        std::iter::from_fn(move || loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => self.line_no += 1,
                Err(e) => {
                    return Some(Err(ParseError::IoPath {
                        path: "<reader>".to_string(),
                        source: e,
                    }))
                }
            }

            let line = self.buf.trim_end_matches(&['\n', '\r'][..]);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            return Some(parse_record_line(line, self.line_no));
        })
    }
}

/// Parse a single non-comment line into an `AnnotationRecord`.
pub fn parse_record_line(line: &str, line_no: usize) -> Result<AnnotationRecord, ParseError> {
    let malformed = |problem: &str| ParseError::MalformedLine {
        line_no,
        problem: problem.to_string(),
        line: line.to_string(),
    };

    // seqname source feature start end score strand phase attributes
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() != 9 {
        return Err(malformed("expected 9 tab-separated columns"));
    }

    let bad_coords = || ParseError::BadCoordinates {
        line_no,
        line: line.to_string(),
    };

    // 1-based inclusive -> 0-based half-open [start-1, end)
    let start_1: u32 = cols[3].parse().map_err(|_| bad_coords())?;
    let end_1: u32 = cols[4].parse().map_err(|_| bad_coords())?;
    if start_1 == 0 || end_1 < start_1 {
        return Err(bad_coords());
    }

    let strand = match cols[6] {
        "+" => Strand::Plus,
        "-" => Strand::Minus,
        "." | "?" => Strand::Unknown,
        _ => return Err(malformed("unknown strand")),
    };

    let (dialect, attrs) = parse_attributes(cols[8]);

    Ok(AnnotationRecord {
        line_no,
        seqname: cols[0].to_string(),
        feature_type: cols[2].to_string(),
        block: RefBlock { start: start_1 - 1, end: end_1 },
        strand,
        attrs,
        dialect,
    })
}

/// Parse the attributes field for either GFF3 or GTF.
///
/// Heuristics:
/// - If it contains '=' => treat as GFF3
/// - Else if it contains quotes => treat as GTF
/// - Else Unknown, parsed best-effort as either form per field
pub fn parse_attributes(s: &str) -> (Dialect, HashMap<String, String>) {
    let s = s.trim();

    let dialect = if s.contains('=') {
        Dialect::Gff3
    } else if s.contains('"') {
        Dialect::Gtf
    } else {
        Dialect::Unknown
    };

    let mut map = HashMap::new();

    for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let use_equals = match dialect {
            Dialect::Gff3 => true,
            Dialect::Gtf => false,
            Dialect::Unknown => part.contains('='),
        };

        let (key, value) = if use_equals {
            match part.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (part, ""),
            }
        } else {
            match part.split_once(char::is_whitespace) {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (part, ""),
            }
        };

        let value = unquote(value);
        if !key.is_empty() && (use_equals || !value.is_empty()) {
            map.insert(key.to_string(), value);
        }
    }

    (dialect, map)
}

fn unquote(v: &str) -> String {
    let v = v.trim();
    let v = v.strip_prefix('"').unwrap_or(v);
    let v = v.strip_suffix('"').unwrap_or(v);
    v.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_gtf_line() {
        let line = "chr1\tsrc\texon\t101\t150\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; exon_number \"1\";";
        let rec = parse_record_line(line, 1).unwrap();

        assert_eq!(rec.dialect, Dialect::Gtf);
        assert_eq!(rec.seqname, "chr1");
        assert_eq!(rec.feature_type, "exon");
        // 101..150 inclusive -> [100,150)
        assert_eq!(rec.block, RefBlock::new(100, 150));
        assert_eq!(rec.strand, Strand::Plus);

        assert_eq!(rec.attr("gene_id"), Some("G1"));
        assert_eq!(rec.attr("transcript_id"), Some("T1"));
        assert_eq!(rec.attr("exon_number"), Some("1"));
    }

    #[test]
    fn parse_gff3_line() {
        let line = "chr2\tsrc\texon\t5\t20\t.\t-\t.\tID=ex1;Parent=tx1;gene_id=G9";
        let rec = parse_record_line(line, 7).unwrap();

        assert_eq!(rec.dialect, Dialect::Gff3);
        assert_eq!(rec.block, RefBlock::new(4, 20));
        assert_eq!(rec.strand, Strand::Minus);
        assert_eq!(rec.attr("Parent"), Some("tx1"));
        assert_eq!(rec.line_no, 7);
    }

    #[test]
    fn bad_lines_report_line_numbers() {
        let err = parse_record_line("chr1\tsrc\texon\t0\t10\t.\t+\t.\tgene_id \"G\";", 3).unwrap_err();
        assert!(matches!(err, ParseError::BadCoordinates { line_no: 3, .. }));

        let err = parse_record_line("chr1\tsrc\texon", 4).unwrap_err();
        assert!(matches!(err, ParseError::MalformedLine { line_no: 4, .. }));
    }

    #[test]
    fn streaming_reader_skips_comments_and_blank_lines() {
        let data = "\
#comment
chr1\tsrc\texon\t1\t2\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";

chr1\tsrc\texon\t3\t4\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";
";
        let reader = AnnotationReader::new(Cursor::new(data.as_bytes()));

        let recs: Vec<_> = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].block, RefBlock::new(0, 2));
        assert_eq!(recs[1].block, RefBlock::new(2, 4));
        assert_eq!(recs[1].line_no, 4);
    }
}
