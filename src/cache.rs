use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::annotation::io::{AnnotationReader, AnnotationRecord, ParseError};
use crate::model::gene::Gene;
use crate::model::transcript::Transcript;
use crate::model::types::{GeneId, TranscriptId};
use crate::types::RefBlock;

const MAGIC: &[u8; 4] = b"SQC1";
const VERSION_STR: &str = env!("CARGO_PKG_VERSION");

/// Gene/transcript annotation as seen by the engine.
///
/// Implementations must be shareable across worker threads; the engine only reads.
pub trait AnnotationProvider: Sync {
    /// Chromosome names in annotation order.
    fn chromosomes(&self) -> Vec<String>;

    /// Genes on a chromosome, ordered by start.
    fn genes_on_chromosome(&self, chr: &str) -> Vec<&Gene>;

    /// Finalized transcripts of a gene, ordered by id.
    fn transcripts_for_gene(&self, gene_id: GeneId) -> Vec<&Transcript>;

    /// True when `block` overlaps an exon of any gene not listed in `genes`.
    fn exon_overlaps_other_gene(&self, chr: &str, block: RefBlock, genes: &[GeneId]) -> bool;
}

/// Configure which attribute keys are used to extract:
/// - gene stable identifier (used to intern -> GeneId)
/// - gene display names/aliases (stored in Gene.names)
/// - transcript stable identifier (used to intern -> TranscriptId)
/// - transcript display names/aliases (stored in Transcript.names)
/// - (GFF3) exon -> transcript linking keys (usually Parent)
///
/// Multiple keys per category are allowed; first present wins.
#[derive(Debug, Clone)]
pub struct IdNameKeys {
    pub gene_id_keys: Vec<String>,
    pub gene_name_keys: Vec<String>,

    pub transcript_id_keys: Vec<String>,
    pub transcript_name_keys: Vec<String>,

    /// GFF3 exon->transcript linkage (most commonly: Parent)
    pub parent_keys: Vec<String>,

    /// Feature types that count as exon blocks (default: ["exon"])
    pub exon_feature_types: Vec<String>,

    /// Feature types that define coding bounds (default: ["CDS"])
    pub coding_feature_types: Vec<String>,
}

impl Default for IdNameKeys {
    fn default() -> Self {
        Self {
            gene_id_keys: vec!["gene_id".into(), "gene".into(), "GeneID".into()],
            gene_name_keys: vec!["gene_name".into(), "Name".into(), "gene".into()],

            transcript_id_keys: vec!["transcript_id".into(), "transcript".into(), "ID".into()],
            transcript_name_keys: vec!["transcript_name".into(), "Name".into()],

            parent_keys: vec!["Parent".into()],
            exon_feature_types: vec!["exon".into()],
            coding_feature_types: vec!["CDS".into()],
        }
    }
}

/// Per-chromosome bucket index: bin -> gene ids.
///
/// This is a pre-filter only: it returns candidate genes whose span touches the bins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChrBuckets {
    pub bin_width: u32,
    pub bins: Vec<Vec<GeneId>>,
    pub max_end: u32,
}

impl ChrBuckets {
    pub fn new(bin_width: u32) -> Self {
        Self {
            bin_width,
            bins: Vec::new(),
            max_end: 0,
        }
    }

    fn ensure_len_for_end(&mut self, end0: u32) {
        self.max_end = self.max_end.max(end0);

        let need_bins =
            ((self.max_end as u64 + self.bin_width as u64 - 1) / self.bin_width as u64) as usize;
        if self.bins.len() < need_bins {
            self.bins.resize_with(need_bins, Vec::new);
        }
    }

    fn add_span(&mut self, gene_id: GeneId, start0: u32, end0: u32) {
        if end0 <= start0 {
            return;
        }

        self.ensure_len_for_end(end0);

        let b0 = (start0 / self.bin_width) as usize;
        let b1 = ((end0.saturating_sub(1)) / self.bin_width) as usize;

        for b in b0..=b1 {
            self.bins[b].push(gene_id);
        }
    }

    fn candidates(&self, start0: u32, end0: u32) -> Vec<GeneId> {
        if self.bins.is_empty() || end0 <= start0 {
            return Vec::new();
        }

        let b0 = (start0 / self.bin_width) as usize;
        if b0 >= self.bins.len() {
            return Vec::new();
        }
        let b1 = (((end0.saturating_sub(1)) / self.bin_width) as usize).min(self.bins.len() - 1);

        let mut out: Vec<GeneId> = self.bins[b0..=b1].iter().flatten().copied().collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    fn finalize(&mut self) {
        for bin in &mut self.bins {
            bin.sort_unstable();
            bin.dedup();
        }
    }
}

/// The gene-model cache:
/// - chromosome dictionary (chr name -> chr_id)
/// - genes + transcripts
/// - per-chromosome buckets for overlap lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneModelCache {
    pub bin_width: u32,

    pub chr_names: Vec<String>,
    chr_to_id: HashMap<String, usize>,

    pub genes: Vec<Gene>,
    pub transcripts: Vec<Transcript>,

    pub chr_buckets: Vec<ChrBuckets>,

    // gene ids per chromosome, ordered by gene start
    chr_genes: Vec<Vec<GeneId>>,
}

/// Human-readable summary, one line overall and one per chromosome.
impl fmt::Display for GeneModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "GeneModelCache: {} genes, {} transcripts, {} chromosomes, bin_width={} bp",
            self.genes.len(),
            self.transcripts.len(),
            self.chr_names.len(),
            self.bin_width
        )?;

        for (i, chr_name) in self.chr_names.iter().enumerate() {
            let Some(gene_ids) = self.chr_genes.get(i) else {
                writeln!(f, "  - {}: <not finalized>", chr_name)?;
                continue;
            };

            let n_tx: usize = gene_ids
                .iter()
                .map(|&g| self.genes[g].transcript_ids().len())
                .sum();
            let n_exons: usize = gene_ids
                .iter()
                .flat_map(|&g| self.genes[g].transcript_ids())
                .map(|&t| self.transcripts[t].exons().len())
                .sum();

            let nbins = self.chr_buckets.get(i).map(|c| c.bins.len()).unwrap_or(0);
            writeln!(
                f,
                "  - {}: genes={}, transcripts={}, exons={}, bins={}",
                chr_name,
                gene_ids.len(),
                n_tx,
                n_exons,
                nbins
            )?;
        }

        Ok(())
    }
}

impl GeneModelCache {
    pub fn new(bin_width: u32) -> Self {
        Self {
            bin_width,
            chr_names: Vec::new(),
            chr_to_id: HashMap::new(),
            genes: Vec::new(),
            transcripts: Vec::new(),
            chr_buckets: Vec::new(),
            chr_genes: Vec::new(),
        }
    }

    /// Build a cache from a GTF/GFF path, gzipped when it ends in `.gz`.
    ///
    /// Chromosome order is the first-seen order in the file.
    pub fn from_path<P: AsRef<Path>>(path: P, bin_width: u32, keys: IdNameKeys) -> Result<Self> {
        let path = path.as_ref();

        let f = File::open(path)
            .with_context(|| format!("open annotation file {}", path.display()))?;

        let is_gz = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        let reader: Box<dyn BufRead> = if is_gz {
            Box::new(BufReader::new(GzDecoder::new(f)))
        } else {
            Box::new(BufReader::new(f))
        };

        GeneModelCache::new(bin_width)
            .from_reader(reader, keys)
            .with_context(|| format!("build gene model cache from {}", path.display()))
    }

    /// Build the cache directly from a GTF/GFF3 reader.
    ///
    /// Workflow:
    /// 1) parse records
    /// 2) exon and coding features: intern gene and transcript(s), add the block
    /// 3) finalize transcripts (sort/merge exons, derive ranks)
    /// 4) link transcripts into genes and set gene spans
    /// 5) build per-chromosome gene order and buckets
    ///
    /// ```
    /// use std::io::Cursor;
    /// use splice_quant::cache::{GeneModelCache, IdNameKeys};
    ///
    /// let gtf = "\
    /// chr1\tsrc\texon\t101\t150\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";\n\
    /// chr1\tsrc\texon\t201\t250\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";\n";
    ///
    /// let cache = GeneModelCache::new(100)
    ///     .from_reader(Cursor::new(gtf.as_bytes()), IdNameKeys::default())
    ///     .unwrap();
    ///
    /// assert_eq!(cache.genes.len(), 1);
    /// assert_eq!(cache.transcripts[0].exons().len(), 2);
    /// ```
    pub fn from_reader<R: BufRead>(mut self, reader: R, keys: IdNameKeys) -> Result<Self, ParseError> {
        let mut gene_key_to_id: HashMap<String, GeneId> = HashMap::new();
        let mut tx_key_to_id: HashMap<String, TranscriptId> = HashMap::new();

        for rec in AnnotationReader::new(reader).records() {
            let rec = rec?;

            let is_exon = rec.is_feature(&keys.exon_feature_types);
            let is_coding = rec.is_feature(&keys.coding_feature_types);
            if !is_exon && !is_coding {
                continue;
            }

            let chr_id = self.intern_chr(&rec.seqname);

            let gene_key = rec.pick_first_attr(&keys.gene_id_keys).ok_or_else(|| {
                ParseError::MissingAttribute {
                    line_no: rec.line_no,
                    expected: "gene id attribute",
                    tried: keys.gene_id_keys.clone(),
                }
            })?;

            let tx_key_raw = rec
                .pick_first_attr(&keys.transcript_id_keys)
                .or_else(|| rec.pick_first_attr(&keys.parent_keys))
                .ok_or_else(|| {
                    let mut tried = keys.transcript_id_keys.clone();
                    tried.extend(keys.parent_keys.clone());
                    ParseError::MissingAttribute {
                        line_no: rec.line_no,
                        expected: "transcript id attribute",
                        tried,
                    }
                })?;

            let gene_id = self.intern_gene(&rec, &keys, chr_id, &gene_key, &mut gene_key_to_id);

            // Parent can be comma-separated in GFF3; support multi-parent exons.
            for tx_key in split_gff3_parent_list(&tx_key_raw) {
                let tx_id = self.intern_tx(&rec, &keys, chr_id, gene_id, &tx_key, &mut tx_key_to_id);
                if is_exon {
                    self.transcripts[tx_id].add_exon(rec.block);
                } else {
                    self.transcripts[tx_id].add_coding(rec.block);
                }
            }
        }

        for tx in &mut self.transcripts {
            if tx.exons().is_empty() {
                continue;
            }
            let (start, end) = tx.finalize();
            let gene = &mut self.genes[tx.gene_id];
            gene.add_transcript(tx.id);
            gene.extend_span(start, end);
        }
        for g in &mut self.genes {
            g.finalize();
        }

        self.build_buckets();

        Ok(self)
    }

    pub fn chr_id(&self, chr: &str) -> Option<usize> {
        self.chr_to_id.get(chr).copied()
    }

    pub fn gene_by_stable_id(&self, stable_id: &str) -> Option<&Gene> {
        self.genes.iter().find(|g| g.stable_id == stable_id)
    }

    // -----------------------
    // Internal helpers
    // -----------------------

    fn intern_chr(&mut self, chr: &str) -> usize {
        if let Some(&id) = self.chr_to_id.get(chr) {
            return id;
        }
        let id = self.chr_names.len();
        self.chr_names.push(chr.to_string());
        self.chr_to_id.insert(chr.to_string(), id);
        self.chr_buckets.push(ChrBuckets::new(self.bin_width));
        id
    }

    fn intern_gene(
        &mut self,
        rec: &AnnotationRecord,
        keys: &IdNameKeys,
        chr_id: usize,
        gene_key: &str,
        gene_key_to_id: &mut HashMap<String, GeneId>,
    ) -> GeneId {
        let gid = match gene_key_to_id.get(gene_key) {
            Some(&gid) => gid,
            None => {
                // Primary display name: first gene_name_keys present, else the stable id
                let primary = rec
                    .pick_first_attr(&keys.gene_name_keys)
                    .unwrap_or_else(|| gene_key.to_string());

                let gid = self.genes.len();
                self.genes.push(Gene::new(
                    gid,
                    gene_key,
                    primary,
                    chr_id,
                    rec.seqname.clone(),
                    rec.strand,
                ));
                gene_key_to_id.insert(gene_key.to_string(), gid);
                gid
            }
        };

        for k in &keys.gene_name_keys {
            if let Some(v) = rec.attr(k) {
                self.genes[gid].add_name(v);
            }
        }

        gid
    }

    fn intern_tx(
        &mut self,
        rec: &AnnotationRecord,
        keys: &IdNameKeys,
        chr_id: usize,
        gene_id: GeneId,
        tx_key: &str,
        tx_key_to_id: &mut HashMap<String, TranscriptId>,
    ) -> TranscriptId {
        let tid = match tx_key_to_id.get(tx_key) {
            Some(&tid) => tid,
            None => {
                let primary = rec
                    .pick_first_attr(&keys.transcript_name_keys)
                    .unwrap_or_else(|| tx_key.to_string());

                let tid = self.transcripts.len();
                self.transcripts.push(Transcript::new(tid, gene_id, tx_key, primary, chr_id, rec.strand));
                tx_key_to_id.insert(tx_key.to_string(), tid);
                tid
            }
        };

        for k in &keys.transcript_name_keys {
            if let Some(v) = rec.attr(k) {
                self.transcripts[tid].add_name(v);
            }
        }

        tid
    }

    fn build_buckets(&mut self) {
        self.chr_genes = vec![Vec::new(); self.chr_names.len()];

        for gene in &self.genes {
            let Some(span) = gene.span() else { continue; };
            self.chr_buckets[gene.chr_id].add_span(gene.id, span.start, span.end);
            self.chr_genes[gene.chr_id].push(gene.id);
        }
        for cb in &mut self.chr_buckets {
            cb.finalize();
        }

        let genes = &self.genes;
        for ids in &mut self.chr_genes {
            ids.sort_by_key(|&g| (genes[g].start, genes[g].end, g));
        }
    }

    /// Serialize this cache with a small header (magic + crate version) and a bincode payload.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut f = File::create(path)?;

        f.write_all(MAGIC)?;

        let v = VERSION_STR.as_bytes();
        let len = v.len() as u16;
        f.write_all(&len.to_le_bytes())?;
        f.write_all(v)?;

        let payload = bincode::serialize(self)?;
        f.write_all(&payload)?;

        Ok(())
    }

    /// Load a cache written by `save()`. Rejects wrong file types and version mismatches.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut f = File::open(path)?;

        let mut magic = [0u8; 4];
        f.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail!("Not a gene model cache file (bad magic)");
        }

        let mut len_buf = [0u8; 2];
        f.read_exact(&mut len_buf)?;
        let len = u16::from_le_bytes(len_buf) as usize;

        let mut ver_buf = vec![0u8; len];
        f.read_exact(&mut ver_buf)?;
        let file_version = std::str::from_utf8(&ver_buf)?;

        if file_version != VERSION_STR {
            bail!(
                "Cache version mismatch: file={}, binary={}",
                file_version,
                VERSION_STR
            );
        }

        let mut payload = Vec::new();
        f.read_to_end(&mut payload)?;
        let cache: Self = bincode::deserialize(&payload)?;

        Ok(cache)
    }
}

impl AnnotationProvider for GeneModelCache {
    fn chromosomes(&self) -> Vec<String> {
        self.chr_names.clone()
    }

    fn genes_on_chromosome(&self, chr: &str) -> Vec<&Gene> {
        let Some(chr_id) = self.chr_id(chr) else {
            return Vec::new();
        };
        self.chr_genes
            .get(chr_id)
            .map(|ids| ids.iter().map(|&g| &self.genes[g]).collect())
            .unwrap_or_default()
    }

    fn transcripts_for_gene(&self, gene_id: GeneId) -> Vec<&Transcript> {
        self.genes
            .get(gene_id)
            .map(|g| g.transcript_ids().iter().map(|&t| &self.transcripts[t]).collect())
            .unwrap_or_default()
    }

    fn exon_overlaps_other_gene(&self, chr: &str, block: RefBlock, genes: &[GeneId]) -> bool {
        let Some(chr_id) = self.chr_id(chr) else {
            return false;
        };
        let excluded: HashSet<GeneId> = genes.iter().copied().collect();

        self.chr_buckets[chr_id]
            .candidates(block.start, block.end)
            .into_iter()
            .filter(|g| !excluded.contains(g))
            .flat_map(|g| self.genes[g].transcript_ids())
            .any(|&t| self.transcripts[t].exons().iter().any(|e| e.overlaps(block)))
    }
}

/// Split Parent= list (GFF3) by commas; also trim whitespace.
fn split_gff3_parent_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
