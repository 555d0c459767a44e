//! Runs every gene collection: region model, reads, junctions, rates, fit, report.

use log::{info, warn};
use rayon::prelude::*;

use crate::alignment::AlignmentSource;
use crate::cache::AnnotationProvider;
use crate::config::{get_progress_bar, EngineConfig};
use crate::error::Result;
use crate::fit::{fit_abundances, FitParams};
use crate::model::gene::Gene;
use crate::model::transcript::Transcript;
use crate::output::{CollectionReport, ResultSink};
use crate::processor::{fragment_spans, FragmentProcessor};
use crate::rates::{generate_rates, unspliced_genes};
use crate::reference::RefGenome;
use crate::state::GeneReadState;
use crate::types::RefBlock;

/// Genes processed as one unit of work.
#[derive(Debug, Clone)]
pub struct GeneCollection<'a> {
    pub chr: String,
    pub genes: Vec<&'a Gene>,
    pub span: RefBlock,
}

impl GeneCollection<'_> {
    pub fn label(&self) -> String {
        self.genes.iter().map(|g| g.stable_id.as_str()).collect::<Vec<_>>().join(",")
    }
}

/// Split the genes of one chromosome into collections. With `group_overlapping`,
/// genes whose spans overlap (transitively) share a collection.
pub fn group_genes<'a>(chr: &str, mut genes: Vec<&'a Gene>, group_overlapping: bool) -> Vec<GeneCollection<'a>> {
    genes.retain(|g| g.span().is_some());
    genes.sort_by_key(|g| (g.start, g.end, g.id));

    let mut out: Vec<GeneCollection<'a>> = Vec::new();
    for gene in genes {
        let Some(span) = gene.span() else { continue };
        if group_overlapping {
            if let Some(last) = out.last_mut() {
                if span.start < last.span.end {
                    last.span.end = last.span.end.max(span.end);
                    last.genes.push(gene);
                    continue;
                }
            }
        }
        out.push(GeneCollection { chr: chr.to_string(), genes: vec![gene], span });
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub collections: usize,
    pub reported: usize,
    pub skipped: usize,
}

pub struct Engine<'a> {
    config: &'a EngineConfig,
    annotation: &'a dyn AnnotationProvider,
    alignments: &'a dyn AlignmentSource,
    reference: Option<&'a RefGenome>,
    show_progress: bool,
}

impl<'a> Engine<'a> {
    pub fn new(
        config: &'a EngineConfig,
        annotation: &'a dyn AnnotationProvider,
        alignments: &'a dyn AlignmentSource,
    ) -> Self {
        Self { config, annotation, alignments, reference: None, show_progress: false }
    }

    pub fn with_reference(mut self, reference: Option<&'a RefGenome>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Collections of every chromosome, optionally restricted to some chromosomes.
    pub fn collections(&self, chromosomes: &[String]) -> Vec<GeneCollection<'a>> {
        self.annotation
            .chromosomes()
            .into_iter()
            .filter(|c| chromosomes.is_empty() || chromosomes.contains(c))
            .flat_map(|chr| {
                let genes = self.annotation.genes_on_chromosome(&chr);
                group_genes(&chr, genes, self.config.group_overlapping_genes)
            })
            .collect()
    }

    /// Process collections in parallel and hand every report to `sink`.
    pub fn run(&self, collections: &[GeneCollection<'a>], sink: &dyn ResultSink) -> Result<RunSummary> {
        info!("processing {} gene collections", collections.len());
        let pb = self
            .show_progress
            .then(|| get_progress_bar(collections.len() as u64, "Processing gene collections"));

        let written: Vec<bool> = collections
            .par_iter()
            .map(|collection| -> Result<bool> {
                let report = self.process_collection(collection);
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
                match report? {
                    Some(report) => {
                        sink.write_collection(&report)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
            .collect::<Result<Vec<bool>>>()?;
        sink.finish()?;

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let reported = written.iter().filter(|&&w| w).count();
        let summary = RunSummary { collections: collections.len(), reported, skipped: collections.len() - reported };
        info!("{} collections reported, {} skipped", summary.reported, summary.skipped);
        Ok(summary)
    }

    /// Process one collection. `Ok(None)` when it has nothing to report.
    pub fn process_collection(&self, collection: &GeneCollection<'a>) -> Result<Option<CollectionReport>> {
        let label = collection.label();
        let transcripts: Vec<&'a Transcript> = collection
            .genes
            .iter()
            .flat_map(|g| self.annotation.transcripts_for_gene(g.id))
            .collect();

        let Some(mut state) = GeneReadState::new(&collection.genes, &transcripts) else {
            warn!("{label}: no transcripts with exons, skipped");
            return Ok(None);
        };
        if let Some(genome) = self.reference {
            state.model.set_ref_bases(genome);
        }

        let buffer = self.config.gene_window_buffer;
        let window = RefBlock {
            start: collection.span.start.saturating_sub(buffer),
            end: collection.span.end.saturating_add(buffer),
        };
        let records = self.alignments.query(&collection.chr, window.start, window.end)?;

        let mut processor =
            FragmentProcessor::new(self.config, self.annotation, collection.genes.clone(), transcripts.clone());
        processor.process_records(&mut state, records);

        if !state.junctions.is_empty() {
            let records = self.alignments.query(&collection.chr, window.start, window.end)?;
            state.junctions.count_position_depths(fragment_spans(&records));
            if let Some(genome) = self.reference {
                state.junctions.set_motifs(genome, &collection.chr);
            }
        }

        if self.config.run_fit {
            let matrix = generate_rates(&collection.genes, &transcripts, self.config);
            let expected_columns = transcripts.len() + unspliced_genes(&collection.genes, &transcripts).len();
            let params = FitParams {
                max_iterations: self.config.em_max_iterations,
                tolerance: self.config.em_tolerance,
            };
            state.fit = fit_abundances(&label, Some(&matrix), state.category_counts(), expected_columns, params);
            state.matrix = Some(matrix);
        }

        Ok(Some(CollectionReport::from_state(&state, &collection.genes, &transcripts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::SamSource;
    use crate::cache::{GeneModelCache, IdNameKeys};
    use crate::model::types::{FragmentMatchType, FragmentType};
    use crate::output::MemorySink;
    use std::io::Cursor;

    // G1: T1 101-200,301-400 (1-based); G3 far away on the minus strand
    const GTF: &str = "\
chr1\tsrc\texon\t101\t200\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";
chr1\tsrc\texon\t301\t400\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";
chr1\tsrc\texon\t5001\t5200\t.\t-\t.\tgene_id \"G3\"; transcript_id \"T3\";
";

    fn cache() -> GeneModelCache {
        GeneModelCache::new(1000)
            .from_reader(Cursor::new(GTF.as_bytes()), IdNameKeys::default())
            .unwrap()
    }

    fn pair(name: &str, pos1: u32, cigar1: &str, pos2: u32, cigar2: &str) -> String {
        format!(
            "{name}\t99\tchr1\t{pos1}\t60\t{cigar1}\t=\t{pos2}\t0\t*\t*\n{name}\t147\tchr1\t{pos2}\t60\t{cigar2}\t=\t{pos1}\t0\t*\t*\n"
        )
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            read_length: 50,
            fragment_lengths: vec![(100, 0.5), (150, 0.5)],
            unspliced_window_step: 10,
            ..EngineConfig::default()
        }
    }

    fn run_with(cache: &GeneModelCache, sam: &str, config: &EngineConfig) -> Vec<CollectionReport> {
        let source = SamSource::from_reader(Cursor::new(sam.as_bytes().to_vec())).unwrap();
        let sink = MemorySink::new();
        let engine = Engine::new(config, cache, &source);
        let collections = engine.collections(&[]);
        engine.run(&collections, &sink).unwrap();
        sink.into_reports()
    }

    fn run(sam: &str) -> (GeneModelCache, Vec<CollectionReport>) {
        let cache = cache();
        let reports = run_with(&cache, sam, &test_config());
        (cache, reports)
    }

    fn gene_count(r: &CollectionReport, t: FragmentType) -> u32 {
        r.gene.fragment_counts[t.index()]
    }

    #[test]
    fn overlapping_genes_share_a_collection() {
        let cache = cache();
        let mut g4 = Gene::new(9, "G4", "G4", 0, "chr1", crate::types::Strand::Plus);
        g4.extend_span(350, 700);
        let genes = vec![&cache.genes[0], &g4, &cache.genes[1]];

        let grouped = group_genes("chr1", genes.clone(), true);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].span, RefBlock::new(100, 700));
        assert_eq!(grouped[0].label(), "G1,G4");

        assert_eq!(group_genes("chr1", genes, false).len(), 3);
    }

    #[test]
    fn spliced_fragment_supports_its_transcript() {
        // read 1 spans the junction: 150-200 + 300-350
        let (_, reports) = run(&pair("a", 151, "50M100N50M", 301, "50M"));
        let r = &reports[0];
        assert_eq!(gene_count(r, FragmentType::TranscriptSupporting), 1);
        assert_eq!(r.transcripts[0].counts[FragmentMatchType::Spliced.index()], 1);
        assert_eq!(r.transcripts[0].junctions_supported, 1);
    }

    #[test]
    fn exon_overrun_is_unspliced() {
        let (_, reports) = run(&pair("b", 151, "70M", 301, "50M"));
        let r = &reports[0];
        assert_eq!(gene_count(r, FragmentType::Unspliced), 1);
        assert_eq!(gene_count(r, FragmentType::TranscriptSupporting), 0);
        assert_eq!(r.transcripts[0].counts[FragmentMatchType::Unspliced.index()], 1);
        assert_eq!(r.transcripts[0].counts[FragmentMatchType::Spliced.index()], 0);
    }

    #[test]
    fn intronic_gap_becomes_an_intronic_junction() {
        // gap 205-295 with both sides in the intron
        let (_, reports) = run(&pair("c", 186, "20M90N20M", 321, "50M"));
        let r = &reports[0];
        assert_eq!(gene_count(r, FragmentType::Alt), 1);
        assert_eq!(r.junctions.len(), 1);
        let j = &r.junctions[0];
        assert_eq!((j.start, j.end), (205, 295));
        assert_eq!(j.kind, "INTRONIC");
        assert_eq!((j.start_depth, j.end_depth), (1, 1));
    }

    #[test]
    fn total_counts_every_fragment_in_the_window() {
        let mut sam = String::new();
        sam.push_str(&pair("a", 151, "50M100N50M", 301, "50M"));
        sam.push_str(&pair("b", 151, "70M", 301, "50M"));
        sam.push_str(&pair("c", 186, "20M90N20M", 321, "50M"));
        // outside the gene but inside the query buffer
        sam.push_str(&pair("d", 701, "50M", 751, "50M"));
        // same orientation
        sam.push_str("e\t65\tchr1\t121\t60\t30M\t=\t161\t0\t*\t*\ne\t129\tchr1\t161\t60\t30M\t=\t121\t0\t*\t*\n");

        let (_, reports) = run(&sam);
        let r = &reports[0];
        assert_eq!(gene_count(r, FragmentType::Total), 4);
        assert_eq!(gene_count(r, FragmentType::Chimeric), 1);
        let classified: u32 = [
            FragmentType::TranscriptSupporting,
            FragmentType::Alt,
            FragmentType::Unspliced,
            FragmentType::ReadThrough,
            FragmentType::Chimeric,
        ]
        .iter()
        .map(|&t| gene_count(r, t))
        .sum();
        assert_eq!(classified, gene_count(r, FragmentType::Total));
    }

    #[test]
    fn junction_types_do_not_depend_on_grouping() {
        // G1 on the plus strand overlaps G2 on the minus strand
        let gtf = "\
chr1\tsrc\texon\t101\t200\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";
chr1\tsrc\texon\t301\t400\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";
chr1\tsrc\texon\t351\t450\t.\t-\t.\tgene_id \"G2\"; transcript_id \"T2\";
chr1\tsrc\texon\t601\t700\t.\t-\t.\tgene_id \"G2\"; transcript_id \"T2\";
";
        let cache = GeneModelCache::new(1000)
            .from_reader(Cursor::new(gtf.as_bytes()), IdNameKeys::default())
            .unwrap();
        // gap 450-520 off the end of G2's first exon
        let sam = pair("j", 421, "30M70N30M", 531, "20M");

        let junctions = |group_overlapping_genes: bool| -> Vec<(String, String, String)> {
            let config = EngineConfig { group_overlapping_genes, run_fit: false, ..test_config() };
            run_with(&cache, &sam, &config)
                .iter()
                .flat_map(|r| r.junctions.iter().map(|j| (r.gene.genes.clone(), j.kind.clone(), j.strand.clone())))
                .collect()
        };

        let grouped = junctions(true);
        let separate = junctions(false);
        assert_eq!(grouped.len(), 1);
        assert_eq!(separate.len(), 1);
        assert_eq!(grouped[0].1, "NOVEL_5_PRIME");
        assert_eq!(grouped[0].2, "-");
        assert_eq!(separate[0].0, "G2");
        assert_eq!((&grouped[0].1, &grouped[0].2), (&separate[0].1, &separate[0].2));

        let config = EngineConfig { run_fit: false, ..test_config() };
        let reports = run_with(&cache, &sam, &config);
        assert_eq!(reports[0].gene.strand, ".");
    }

    #[test]
    fn fit_runs_per_collection() {
        let mut sam = String::new();
        for i in 0..20 {
            sam.push_str(&pair(&format!("f{i}"), 121 + i, "50M", 131 + i, "50M"));
        }
        let (_, reports) = run(&sam);
        let r = &reports[0];
        let allocation = r.transcripts[0].allocation.unwrap();
        assert!(allocation > 0.0 && allocation <= 20.0 + 1e-6);
        let pct = r.gene.fit_residual_pct.unwrap();
        assert!((0.0..=100.0).contains(&pct));

        // no reads at all: G3 still reported, fit gives zero allocation
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].transcripts[0].allocation, Some(0.0));
    }
}
