//! Per-collection counters and results.

use std::collections::BTreeMap;

use crate::classifier::FragmentOutcome;
use crate::fit::FitResult;
use crate::junction::AltSpliceJunctionFinder;
use crate::mapper::MappedRead;
use crate::model::gene::Gene;
use crate::model::transcript::Transcript;
use crate::model::types::{CategoryKey, FragmentMatchType, FragmentType, GeneId, TranscriptId};
use crate::rates::CategoryMatrix;
use crate::region::RegionModel;
use crate::types::{RefBlock, Strand};

/// Fragment support for one transcript.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptCounts {
    /// Indexed by `FragmentMatchType::index`.
    pub counts: [u32; 4],
    /// Fragments that supported this transcript alone.
    pub unique: [u32; 4],
    /// Annotated junctions of this transcript crossed by a supporting read.
    pub junction_support: BTreeMap<(u32, u32), u32>,
}

impl TranscriptCounts {
    pub fn count(&self, match_type: FragmentMatchType) -> u32 {
        self.counts[match_type.index()]
    }

    pub fn unique_count(&self, match_type: FragmentMatchType) -> u32 {
        self.unique[match_type.index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    fn add(&mut self, match_type: FragmentMatchType, unique: bool) {
        self.counts[match_type.index()] += 1;
        if unique {
            self.unique[match_type.index()] += 1;
        }
    }
}

/// Everything known about one gene collection while its reads are processed.
#[derive(Debug, Clone)]
pub struct GeneReadState {
    pub chr: String,
    pub strand: Strand,
    pub gene_ids: Vec<GeneId>,
    pub trans_ids: Vec<TranscriptId>,
    /// Collection span without the query buffer.
    pub span: RefBlock,
    pub model: RegionModel,
    fragment_counts: [u32; 7],
    trans_counts: BTreeMap<TranscriptId, TranscriptCounts>,
    category_counts: BTreeMap<CategoryKey, f64>,
    pub junctions: AltSpliceJunctionFinder,
    pub matrix: Option<CategoryMatrix>,
    pub fit: Option<FitResult>,
}

/// The shared strand of the genes, `Unknown` for mixed collections.
fn common_strand(genes: &[&Gene]) -> Strand {
    match genes.split_first() {
        Some((first, rest)) if rest.iter().all(|g| g.strand == first.strand) => first.strand,
        _ => Strand::Unknown,
    }
}

impl GeneReadState {
    /// `None` when the genes have no transcript with exons.
    pub fn new(genes: &[&Gene], transcripts: &[&Transcript]) -> Option<Self> {
        let first = genes.first()?;
        let span = genes
            .iter()
            .filter_map(|g| g.span())
            .reduce(|a, b| RefBlock { start: a.start.min(b.start), end: a.end.max(b.end) })?;
        let transcripts: Vec<&Transcript> = transcripts.iter().copied().filter(|t| !t.exons().is_empty()).collect();
        if transcripts.is_empty() {
            return None;
        }

        let mut gene_ids: Vec<GeneId> = genes.iter().map(|g| g.id).collect();
        gene_ids.sort_unstable();
        let mut trans_ids: Vec<TranscriptId> = transcripts.iter().map(|t| t.id).collect();
        trans_ids.sort_unstable();

        Some(Self {
            chr: first.chr.clone(),
            strand: common_strand(genes),
            gene_ids,
            trans_counts: trans_ids.iter().map(|&t| (t, TranscriptCounts::default())).collect(),
            trans_ids,
            span,
            model: RegionModel::build(&first.chr, &transcripts),
            fragment_counts: [0; 7],
            category_counts: BTreeMap::new(),
            junctions: AltSpliceJunctionFinder::new(),
            matrix: None,
            fit: None,
        })
    }

    pub fn fragment_count(&self, kind: FragmentType) -> u32 {
        self.fragment_counts[kind.index()]
    }

    pub fn fragment_counts(&self) -> &[u32; 7] {
        &self.fragment_counts
    }

    pub fn transcript_counts(&self, trans_id: TranscriptId) -> Option<&TranscriptCounts> {
        self.trans_counts.get(&trans_id)
    }

    pub fn category_counts(&self) -> &BTreeMap<CategoryKey, f64> {
        &self.category_counts
    }

    fn bump(&mut self, kind: FragmentType) {
        self.fragment_counts[kind.index()] += 1;
    }

    /// A duplicate fragment. When it is dropped it still counts toward TOTAL.
    pub fn record_duplicate(&mut self, dropped: bool) {
        self.bump(FragmentType::Duplicate);
        if dropped {
            self.bump(FragmentType::Total);
        }
    }

    /// Count a classified fragment. Discarded fragments leave no trace.
    pub fn record_outcome(&mut self, outcome: &FragmentOutcome, reads: &[MappedRead]) {
        let kind = match outcome {
            FragmentOutcome::Discarded => return,
            FragmentOutcome::Chimeric => FragmentType::Chimeric,
            FragmentOutcome::ReadThrough => FragmentType::ReadThrough,
            FragmentOutcome::Alt { .. } => FragmentType::Alt,
            FragmentOutcome::TranscriptSupporting { matches, category } => {
                let unique = matches.len() == 1;
                for m in matches {
                    for &region in &m.regions {
                        self.model.region_mut(region).add_match(m.trans_id);
                    }
                    let Some(counts) = self.trans_counts.get_mut(&m.trans_id) else {
                        continue;
                    };
                    counts.add(m.match_type, unique);
                    for read in reads {
                        for gap in RefBlock::junctions_from_blocks(&read.blocks, 0) {
                            *counts.junction_support.entry(gap).or_insert(0) += 1;
                        }
                    }
                }
                *self.category_counts.entry(category.clone()).or_insert(0.0) += 1.0;
                FragmentType::TranscriptSupporting
            }
            FragmentOutcome::Unspliced { transcripts, category } => {
                let unique = transcripts.len() == 1;
                for t in transcripts {
                    if let Some(counts) = self.trans_counts.get_mut(t) {
                        counts.add(FragmentMatchType::Unspliced, unique);
                    }
                }
                if let Some(category) = category {
                    *self.category_counts.entry(category.clone()).or_insert(0.0) += 1.0;
                }
                FragmentType::Unspliced
            }
        };
        self.bump(kind);
        self.bump(FragmentType::Total);
    }

    /// Annotated junctions of a transcript with at least one supporting read.
    pub fn supported_junctions(&self, transcript: &Transcript) -> usize {
        let Some(counts) = self.trans_counts.get(&transcript.id) else {
            return 0;
        };
        transcript
            .junctions()
            .iter()
            .filter(|j| counts.junction_support.get(j).is_some_and(|&c| c > 0))
            .count()
    }
}
