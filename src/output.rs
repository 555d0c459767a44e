//! Result rows per gene collection and the sinks that receive them.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::config::{ALT_SPLICE_JUNCTIONS, CATEGORY_COUNTS, GENE_DATA, TRANSCRIPT_DATA};
use crate::error::{QuantError, Result};
use crate::model::gene::Gene;
use crate::model::transcript::Transcript;
use crate::model::types::{FragmentMatchType, FragmentType, GeneId, TranscriptId};
use crate::rates::MatrixColumn;
use crate::state::GeneReadState;

/// Coordinates in every row are 0-based, half-open.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneRow {
    pub genes: String,
    pub gene_names: String,
    pub chr: String,
    pub strand: String,
    pub start: u32,
    pub end: u32,
    pub transcripts: usize,
    /// Indexed by `FragmentType::index`.
    pub fragment_counts: [u32; 7],
    pub unspliced_allocation: Option<f64>,
    pub fit_residual: Option<f64>,
    pub fit_residual_pct: Option<f64>,
    pub skipped_counts: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptRow {
    pub gene: String,
    pub transcript: String,
    pub name: String,
    pub exon_count: usize,
    pub length: u32,
    /// Indexed by `FragmentMatchType::index`.
    pub counts: [u32; 4],
    pub unique: [u32; 4],
    pub exons_supported: usize,
    pub junctions: usize,
    pub junctions_supported: usize,
    pub covered_bases: u32,
    pub mean_depth: f64,
    pub allocation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JunctionRow {
    pub genes: String,
    pub chr: String,
    pub strand: String,
    pub start: u32,
    pub end: u32,
    pub kind: String,
    pub start_context: String,
    pub end_context: String,
    pub start_transcripts: String,
    pub end_transcripts: String,
    pub fragment_count: u32,
    pub start_depth: u32,
    pub end_depth: u32,
    pub motif: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRow {
    pub genes: String,
    pub category: String,
    pub observed: f64,
    pub fitted: Option<f64>,
}

/// Everything reported for one gene collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionReport {
    pub gene: GeneRow,
    pub transcripts: Vec<TranscriptRow>,
    pub junctions: Vec<JunctionRow>,
    pub categories: Vec<CategoryRow>,
}

fn join_names<I: IntoIterator<Item = String>>(names: I) -> String {
    let v: Vec<String> = names.into_iter().collect();
    if v.is_empty() {
        "-".to_string()
    } else {
        v.join(";")
    }
}

fn opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |x| format!("{x:.4}"))
}

impl CollectionReport {
    pub fn from_state(state: &GeneReadState, genes: &[&Gene], transcripts: &[&Transcript]) -> Self {
        let gene_name = |id: GeneId| {
            genes
                .iter()
                .find(|g| g.id == id)
                .map_or_else(|| id.to_string(), |g| g.stable_id.clone())
        };
        let trans_name = |id: TranscriptId| {
            transcripts
                .iter()
                .find(|t| t.id == id)
                .map_or_else(|| id.to_string(), |t| t.stable_id.clone())
        };
        let label = join_names(state.gene_ids.iter().map(|&g| gene_name(g)));
        let fit = state.fit.as_ref();

        let unspliced_allocation = fit.and_then(|f| {
            let mut any = false;
            let mut total = 0.0;
            for &g in &state.gene_ids {
                if let Some(a) = f.allocation(MatrixColumn::Unspliced(g)) {
                    any = true;
                    total += a;
                }
            }
            any.then_some(total)
        });

        let gene = GeneRow {
            genes: label.clone(),
            gene_names: join_names(
                genes.iter().map(|g| g.primary_name().unwrap_or(g.stable_id.as_str()).to_string()),
            ),
            chr: state.chr.clone(),
            strand: state.strand.to_string(),
            start: state.span.start,
            end: state.span.end,
            transcripts: state.trans_ids.len(),
            fragment_counts: *state.fragment_counts(),
            unspliced_allocation,
            fit_residual: fit.map(|f| f.residual),
            fit_residual_pct: fit.map(|f| f.residual_pct),
            skipped_counts: fit.map(|f| f.skipped_counts),
        };

        let transcript_rows = transcripts
            .iter()
            .filter(|t| state.trans_ids.contains(&t.id))
            .map(|t| {
                let counts = state.transcript_counts(t.id).cloned().unwrap_or_default();
                let (covered_bases, _, mean_depth) = state.model.transcript_coverage(t.id);
                TranscriptRow {
                    gene: gene_name(t.gene_id),
                    transcript: t.stable_id.clone(),
                    name: t.primary_name().unwrap_or(t.stable_id.as_str()).to_string(),
                    exon_count: t.exons().len(),
                    length: t.length(),
                    counts: counts.counts,
                    unique: counts.unique,
                    exons_supported: state.model.supported_exon_count(t.id),
                    junctions: t.junctions().len(),
                    junctions_supported: state.supported_junctions(t),
                    covered_bases,
                    mean_depth,
                    allocation: fit.and_then(|f| f.allocation(MatrixColumn::Transcript(t.id))),
                }
            })
            .collect();

        let junction_rows = state
            .junctions
            .junctions()
            .iter()
            .map(|j| JunctionRow {
                genes: label.clone(),
                chr: state.chr.clone(),
                strand: j.strand.to_string(),
                start: j.start,
                end: j.end,
                kind: j.kind.to_string(),
                start_context: j.contexts[0].to_string(),
                end_context: j.contexts[1].to_string(),
                start_transcripts: join_names(j.transcripts[0].iter().map(|&t| trans_name(t))),
                end_transcripts: join_names(j.transcripts[1].iter().map(|&t| trans_name(t))),
                fragment_count: j.fragment_count,
                start_depth: j.position_counts[0],
                end_depth: j.position_counts[1],
                motif: j.motif.clone().unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        let category_rows = state
            .category_counts()
            .iter()
            .map(|(key, &observed)| CategoryRow {
                genes: label.clone(),
                category: key.label(trans_name, gene_name),
                observed,
                fitted: fit.and_then(|f| f.fitted_count(key)),
            })
            .collect();

        Self { gene, transcripts: transcript_rows, junctions: junction_rows, categories: category_rows }
    }
}

pub const GENE_HEADER: &str = "genes\tgene_names\tchr\tstrand\tstart\tend\ttranscripts\ttotal\ttranscript_supporting\talt\tunspliced\tread_through\tchimeric\tduplicate\tunspliced_allocation\tfit_residual\tfit_residual_pct\tskipped_counts";
pub const TRANSCRIPT_HEADER: &str = "gene\ttranscript\tname\texons\tlength\tspliced\tlong\tshort\tunspliced\tunique_spliced\tunique_long\tunique_short\tunique_unspliced\texons_supported\tjunctions\tjunctions_supported\tcovered_bases\tmean_depth\tallocation";
pub const JUNCTION_HEADER: &str = "genes\tchr\tstrand\tstart\tend\ttype\tstart_context\tend_context\tstart_transcripts\tend_transcripts\tfragments\tstart_depth\tend_depth\tmotif";
pub const CATEGORY_HEADER: &str = "genes\tcategory\tobserved\tfitted";

impl GeneRow {
    pub fn to_tsv(&self) -> String {
        let counts: Vec<String> = FragmentType::ALL
            .iter()
            .map(|t| self.fragment_counts[t.index()].to_string())
            .collect();
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.genes,
            self.gene_names,
            self.chr,
            self.strand,
            self.start,
            self.end,
            self.transcripts,
            counts.join("\t"),
            opt(self.unspliced_allocation),
            opt(self.fit_residual),
            opt(self.fit_residual_pct),
            opt(self.skipped_counts)
        )
    }
}

impl TranscriptRow {
    pub fn to_tsv(&self) -> String {
        let per_type = |v: &[u32; 4]| {
            FragmentMatchType::ALL
                .iter()
                .map(|t| v[t.index()].to_string())
                .collect::<Vec<_>>()
                .join("\t")
        };
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.3}\t{}",
            self.gene,
            self.transcript,
            self.name,
            self.exon_count,
            self.length,
            per_type(&self.counts),
            per_type(&self.unique),
            self.exons_supported,
            self.junctions,
            self.junctions_supported,
            self.covered_bases,
            self.mean_depth,
            opt(self.allocation)
        )
    }
}

impl JunctionRow {
    pub fn to_tsv(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.genes,
            self.chr,
            self.strand,
            self.start,
            self.end,
            self.kind,
            self.start_context,
            self.end_context,
            self.start_transcripts,
            self.end_transcripts,
            self.fragment_count,
            self.start_depth,
            self.end_depth,
            self.motif
        )
    }
}

impl CategoryRow {
    pub fn to_tsv(&self) -> String {
        format!("{}\t{}\t{:.1}\t{}", self.genes, self.category, self.observed, opt(self.fitted))
    }
}

/// Receives one report per gene collection, possibly from several threads.
pub trait ResultSink: Sync {
    fn write_collection(&self, report: &CollectionReport) -> Result<()>;

    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

struct Stream {
    name: &'static str,
    writer: Mutex<BufWriter<File>>,
}

impl Stream {
    fn create(dir: &Path, name: &'static str, header: &str) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(dir.join(name))?);
        writeln!(writer, "{header}")?;
        Ok(Self { name, writer: Mutex::new(writer) })
    }

    fn write_lines<I: IntoIterator<Item = String>>(&self, lines: I) -> Result<()> {
        let mut w = self.writer.lock().map_err(|_| QuantError::Output(self.name.to_string()))?;
        for line in lines {
            writeln!(w, "{line}")?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut w = self.writer.lock().map_err(|_| QuantError::Output(self.name.to_string()))?;
        w.flush()?;
        Ok(())
    }
}

/// Tab-separated files in one directory, one lock per file.
pub struct TsvResultWriter {
    genes: Stream,
    transcripts: Stream,
    junctions: Stream,
    categories: Option<Stream>,
}

impl TsvResultWriter {
    pub fn create<P: AsRef<Path>>(dir: P, write_categories: bool) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            genes: Stream::create(dir, GENE_DATA, GENE_HEADER)?,
            transcripts: Stream::create(dir, TRANSCRIPT_DATA, TRANSCRIPT_HEADER)?,
            junctions: Stream::create(dir, ALT_SPLICE_JUNCTIONS, JUNCTION_HEADER)?,
            categories: if write_categories {
                Some(Stream::create(dir, CATEGORY_COUNTS, CATEGORY_HEADER)?)
            } else {
                None
            },
        })
    }
}

impl ResultSink for TsvResultWriter {
    fn write_collection(&self, report: &CollectionReport) -> Result<()> {
        self.genes.write_lines([report.gene.to_tsv()])?;
        self.transcripts.write_lines(report.transcripts.iter().map(TranscriptRow::to_tsv))?;
        self.junctions.write_lines(report.junctions.iter().map(JunctionRow::to_tsv))?;
        if let Some(categories) = &self.categories {
            categories.write_lines(report.categories.iter().map(CategoryRow::to_tsv))?;
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        self.genes.flush()?;
        self.transcripts.flush()?;
        self.junctions.flush()?;
        if let Some(categories) = &self.categories {
            categories.flush()?;
        }
        Ok(())
    }
}

/// Keeps reports in memory.
#[derive(Default)]
pub struct MemorySink {
    reports: Mutex<Vec<CollectionReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports ordered by chromosome then start.
    pub fn into_reports(self) -> Vec<CollectionReport> {
        let mut reports = self.reports.into_inner().unwrap_or_else(|e| e.into_inner());
        reports.sort_by(|a, b| (&a.gene.chr, a.gene.start).cmp(&(&b.gene.chr, b.gene.start)));
        reports
    }
}

impl ResultSink for MemorySink {
    fn write_collection(&self, report: &CollectionReport) -> Result<()> {
        self.reports
            .lock()
            .map_err(|_| QuantError::Output("memory".to_string()))?
            .push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{FragmentOutcome, TranscriptMatch};
    use crate::junction::classify_junction;
    use crate::model::types::CategoryKey;
    use crate::types::{RefBlock, Strand};

    fn report() -> CollectionReport {
        let mut t = Transcript::new(0, 0, "ENST1", "TX-1", 0, Strand::Minus);
        t.add_exon(RefBlock::new(100, 200));
        t.add_exon(RefBlock::new(300, 400));
        t.finalize();
        let mut g = Gene::new(0, "ENSG1", "GENE1", 0, "chr2", Strand::Minus);
        g.add_transcript(0);
        g.extend_span(100, 400);

        let mut state = GeneReadState::new(&[&g], &[&t]).unwrap();
        let region = state.model.find_region(300, 400).unwrap();
        state.record_outcome(
            &FragmentOutcome::TranscriptSupporting {
                matches: vec![TranscriptMatch { trans_id: 0, match_type: FragmentMatchType::Short, regions: vec![region] }],
                category: CategoryKey::transcripts(vec![0], FragmentMatchType::Short),
            },
            &[],
        );
        let junction = classify_junction(200, 250, &state.model, &[&t]);
        state.junctions.add(junction);
        CollectionReport::from_state(&state, &[&g], &[&t])
    }

    #[test]
    fn report_rows_use_stable_ids() {
        let r = report();
        assert_eq!(r.gene.genes, "ENSG1");
        assert_eq!(r.gene.strand, "-");
        assert_eq!(r.gene.fragment_counts[FragmentType::Total.index()], 1);
        assert_eq!(r.transcripts[0].transcript, "ENST1");
        assert_eq!(r.transcripts[0].exons_supported, 1);
        assert_eq!(r.categories[0].category, "ENST1:SHORT");
        assert_eq!(r.categories[0].fitted, None);
        assert!(r.gene.to_tsv().starts_with("ENSG1\tGENE1\tchr2\t-\t100\t400\t1\t1\t1\t0"));
        assert_eq!(r.gene.to_tsv().split('\t').count(), GENE_HEADER.split('\t').count());
        assert_eq!(r.transcripts[0].to_tsv().split('\t').count(), TRANSCRIPT_HEADER.split('\t').count());
        assert_eq!(r.categories[0].to_tsv().split('\t').count(), CATEGORY_HEADER.split('\t').count());
        assert_eq!(r.junctions[0].strand, "-");
        assert_eq!(r.junctions[0].kind, "NOVEL_5_PRIME");
        assert_eq!(r.junctions[0].to_tsv().split('\t').count(), JUNCTION_HEADER.split('\t').count());
    }

    #[test]
    fn tsv_writer_creates_every_stream() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TsvResultWriter::create(dir.path(), true).unwrap();
        sink.write_collection(&report()).unwrap();
        sink.finish().unwrap();

        let genes = std::fs::read_to_string(dir.path().join(GENE_DATA)).unwrap();
        assert_eq!(genes.lines().count(), 2);
        let junctions = std::fs::read_to_string(dir.path().join(ALT_SPLICE_JUNCTIONS)).unwrap();
        assert_eq!(junctions.lines().next(), Some(JUNCTION_HEADER));
        let categories = std::fs::read_to_string(dir.path().join(CATEGORY_COUNTS)).unwrap();
        assert!(categories.contains("ENST1:SHORT\t1.0\t-"));
    }

    #[test]
    fn memory_sink_collects_reports() {
        let sink = MemorySink::new();
        sink.write_collection(&report()).unwrap();
        assert_eq!(sink.into_reports().len(), 1);
    }
}
