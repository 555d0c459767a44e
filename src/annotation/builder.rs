use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::annotation::io::ParseError;
use crate::cache::{GeneModelCache, IdNameKeys};

/// High-level builder for creating a `GeneModelCache` from a GTF/GFF3 file.
///
/// - parses the whole file (optionally gzipped)
/// - configurable mapping of ID/NAME keys for gene + transcript
/// - configurable exon and coding feature types
#[derive(Debug, Clone)]
pub struct AnnotationBuilder {
    pub bin_width: u32,
    pub keys: IdNameKeys,
}

impl AnnotationBuilder {
    pub fn new(bin_width: u32) -> Self {
        Self {
            bin_width,
            keys: IdNameKeys::default(),
        }
    }

    pub fn with_keys(mut self, keys: IdNameKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Set a single key (or first-preference key) for gene id.
    pub fn gene_id_key(mut self, key: &str) -> Self {
        self.keys.gene_id_keys = vec![key.to_string()];
        self
    }

    pub fn gene_name_keys(mut self, keys: &[&str]) -> Self {
        self.keys.gene_name_keys = to_owned(keys);
        self
    }

    pub fn transcript_id_keys(mut self, keys: &[&str]) -> Self {
        self.keys.transcript_id_keys = to_owned(keys);
        self
    }

    pub fn transcript_name_keys(mut self, keys: &[&str]) -> Self {
        self.keys.transcript_name_keys = to_owned(keys);
        self
    }

    /// Parent keys for GFF3 exon->transcript linking (usually ["Parent"]).
    pub fn parent_keys(mut self, keys: &[&str]) -> Self {
        self.keys.parent_keys = to_owned(keys);
        self
    }

    pub fn exon_feature_types(mut self, types: &[&str]) -> Self {
        self.keys.exon_feature_types = to_owned(types);
        self
    }

    /// Feature types whose extent becomes the transcript's coding bounds.
    pub fn coding_feature_types(mut self, types: &[&str]) -> Self {
        self.keys.coding_feature_types = to_owned(types);
        self
    }

    pub fn build_from_reader<R: BufRead>(&self, reader: R) -> Result<GeneModelCache, ParseError> {
        GeneModelCache::new(self.bin_width).from_reader(reader, self.keys.clone())
    }

    /// Build from a file path; `.gz` files are decompressed on the fly.
    pub fn build_from_path<P: AsRef<Path>>(&self, path: P) -> Result<GeneModelCache, ParseError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| ParseError::IoPath {
            path: path.display().to_string(),
            source: e,
        })?;

        let is_gz = path.extension().map(|e| e == "gz").unwrap_or(false);

        if is_gz {
            let decoder = flate2::read::GzDecoder::new(file);
            self.build_from_reader(BufReader::new(decoder))
        } else {
            self.build_from_reader(BufReader::new(file))
        }
    }
}

fn to_owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AnnotationProvider;
    use crate::types::{RefBlock, Strand};
    use std::io::{Cursor, Write};

    #[test]
    fn gff3_parent_linking_builds_cache() {
        let gff = "\
chr2\tsrc\texon\t5\t20\t.\t-\t.\tParent=tx1;gene_id=G9;Name=GeneNice
chr2\tsrc\texon\t30\t40\t.\t-\t.\tParent=tx1;gene_id=G9;Name=GeneNice
";

        let cache = AnnotationBuilder::new(50)
            .transcript_id_keys(&[])
            .parent_keys(&["Parent"])
            .gene_id_key("gene_id")
            .gene_name_keys(&["Name"])
            .build_from_reader(Cursor::new(gff.as_bytes()))
            .unwrap();

        assert_eq!(cache.transcripts.len(), 1);
        assert_eq!(cache.transcripts[0].strand, Strand::Minus);
        assert_eq!(cache.transcripts[0].exons()[0], RefBlock::new(4, 20));
        // rank 1 is the 5' exon, the higher one on the minus strand
        let ranks: Vec<u32> = cache.transcripts[0].ranked_exons().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![2, 1]);
        assert_eq!(cache.genes[0].primary_name(), Some("GeneNice"));
    }

    #[test]
    fn coding_features_do_not_become_exons() {
        let gtf = "\
chr1\tsrc\texon\t101\t150\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";
chr1\tsrc\tCDS\t121\t150\t.\t+\t0\tgene_id \"G1\"; transcript_id \"T1\";
";

        let cache = AnnotationBuilder::new(100)
            .build_from_reader(Cursor::new(gtf.as_bytes()))
            .unwrap();

        assert_eq!(cache.transcripts[0].exons(), &[RefBlock::new(100, 150)]);
        assert_eq!(cache.transcripts[0].coding, Some(RefBlock::new(120, 150)));

        let without_coding = AnnotationBuilder::new(100)
            .coding_feature_types(&[])
            .build_from_reader(Cursor::new(gtf.as_bytes()))
            .unwrap();
        assert_eq!(without_coding.transcripts[0].coding, None);
    }

    #[test]
    fn gzipped_annotation_is_read() {
        let gtf = "chr3\tsrc\texon\t11\t60\t.\t+\t.\tgene_id \"G7\"; transcript_id \"T7\";\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genes.gtf.gz");

        let file = std::fs::File::create(&path).unwrap();
        let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        enc.write_all(gtf.as_bytes()).unwrap();
        enc.finish().unwrap();

        let cache = AnnotationBuilder::new(100).build_from_path(&path).unwrap();
        assert_eq!(cache.genes_on_chromosome("chr3").len(), 1);
        assert_eq!(cache.genes[0].span(), Some(RefBlock::new(10, 60)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = AnnotationBuilder::new(100)
            .build_from_path("/definitely/not/here.gtf")
            .unwrap_err();
        assert!(matches!(err, ParseError::IoPath { .. }));
    }
}
