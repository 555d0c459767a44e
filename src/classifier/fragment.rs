use std::cmp::Reverse;

use crate::cache::AnnotationProvider;
use crate::mapper::MappedRead;
use crate::model::gene::Gene;
use crate::model::transcript::Transcript;
use crate::model::types::{CategoryKey, FragmentMatchType, RegionMatchType, TransMatchType, TranscriptId};
use crate::region::{RegionId, RegionModel};
use crate::types::RefBlock;

/// Everything the fragment rules need to know about the gene collection.
pub struct FragmentContext<'a> {
    pub model: &'a RegionModel,
    pub transcripts: &'a [&'a Transcript],
    pub genes: &'a [&'a Gene],
    /// Span of the gene collection, without the query buffer.
    pub span: RefBlock,
    pub max_fragment_length: u32,
    pub annotation: &'a dyn AnnotationProvider,
}

impl FragmentContext<'_> {
    fn gene_ids(&self) -> Vec<usize> {
        self.genes.iter().map(|g| g.id).collect()
    }

    fn genes_overlapping(&self, block: RefBlock) -> Vec<usize> {
        self.genes
            .iter()
            .filter(|g| g.span().is_some_and(|s| s.overlaps(block)))
            .map(|g| g.id)
            .collect()
    }
}

/// A transcript the whole fragment supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptMatch {
    pub trans_id: TranscriptId,
    pub match_type: FragmentMatchType,
    /// Exon regions of this transcript recruited by the reads.
    pub regions: Vec<RegionId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentOutcome {
    Chimeric,
    /// Not counted at all.
    Discarded,
    TranscriptSupporting {
        /// Ordered SPLICED > LONG > SHORT, then more regions, then lower id.
        matches: Vec<TranscriptMatch>,
        category: CategoryKey,
    },
    ReadThrough,
    Alt {
        /// Reads carry a splice gap worth passing to the junction finder.
        has_splice_gap: bool,
    },
    Unspliced {
        /// Transcripts for which a read was unspliced.
        transcripts: Vec<TranscriptId>,
        category: Option<CategoryKey>,
    },
}

/// Combine classified reads (one or two) into a fragment outcome.
///
/// Reads must already carry per-transcript verdicts. Reads that fit a transcript
/// the whole fragment does not support are downgraded to OTHER_TRANS when some
/// other transcript is supported.
pub fn classify_fragment(ctx: &FragmentContext, reads: &mut [MappedRead]) -> FragmentOutcome {
    if reads.is_empty() {
        return FragmentOutcome::Discarded;
    }

    if is_chimeric(reads) {
        return FragmentOutcome::Chimeric;
    }

    if is_discarded(ctx, reads) {
        return FragmentOutcome::Discarded;
    }

    let frag_span = fragment_span(reads);

    if reads.iter().all(|r| !r.has_exon_hits(ctx.model)) {
        return unspliced(ctx, reads, frag_span);
    }

    let matches = valid_transcripts(ctx, reads);
    if !matches.is_empty() {
        downgrade_competing(reads, &matches);
        let ids: Vec<TranscriptId> = matches.iter().map(|m| m.trans_id).collect();
        let category = CategoryKey::transcripts(ids, matches[0].match_type);
        return FragmentOutcome::TranscriptSupporting { matches, category };
    }

    if frag_span.start < ctx.span.start || frag_span.end > ctx.span.end {
        return FragmentOutcome::ReadThrough;
    }

    if reads.iter().any(|r| r.has_splice_gap()) {
        return FragmentOutcome::Alt { has_splice_gap: true };
    }

    let unspliced_hits = reads.iter().any(|r| {
        r.has_match_type(RegionMatchType::ExonIntron) || r.has_match_type(RegionMatchType::Intronic)
    });
    if !unspliced_hits && distinct_exon_blocks(ctx.model, reads) >= 2 {
        return FragmentOutcome::Alt { has_splice_gap: false };
    }

    unspliced(ctx, reads, frag_span)
}

/// Fragments that leave no trace in the counters: wholly outside the collection
/// span, or touching no exon of the collection but an exon of another gene.
///
/// Only reads mapped blocks, so it can run before regions are touched.
pub fn is_discarded(ctx: &FragmentContext, reads: &[MappedRead]) -> bool {
    if reads.iter().all(|r| !r.span().overlaps(ctx.span)) {
        return true;
    }
    let touches_exon = reads
        .iter()
        .flat_map(|r| r.blocks.iter())
        .any(|&b| !ctx.model.exon_regions_overlapping(b).is_empty());
    !touches_exon
        && ctx
            .annotation
            .exon_overlaps_other_gene(&ctx.model.chr, fragment_span(reads), &ctx.gene_ids())
}

pub fn fragment_span(reads: &[MappedRead]) -> RefBlock {
    let start = reads.iter().map(|r| r.start).min().unwrap_or(0);
    let end = reads.iter().map(|r| r.end).max().unwrap_or(start + 1);
    RefBlock { start, end: end.max(start + 1) }
}

/// Mate on another chromosome, same orientation, or an outward-facing pair.
pub fn is_chimeric(reads: &[MappedRead]) -> bool {
    match reads {
        [read] => {
            read.mate_on_other_chromosome()
                || (read.expects_mate() && read.is_reverse == read.is_mate_reverse())
        }
        [a, b] => {
            if a.chr != b.chr || a.is_reverse == b.is_reverse {
                return true;
            }
            let (lower, upper) = if a.start <= b.start { (a, b) } else { (b, a) };
            lower.is_reverse && upper.start > lower.start
        }
        _ => false,
    }
}

fn valid_transcripts(ctx: &FragmentContext, reads: &[MappedRead]) -> Vec<TranscriptMatch> {
    let (read1, read2) = match reads {
        [a, b] => (a, b),
        [a, ..] => (a, a),
        [] => return Vec::new(),
    };

    let mut matches: Vec<TranscriptMatch> = ctx
        .transcripts
        .iter()
        .filter(|tx| {
            reads.iter().all(|r| {
                r.trans_classes
                    .get(&tx.id)
                    .is_some_and(|c| c.is_supporting())
            })
        })
        .filter_map(|tx| {
            let match_type =
                tx.fragment_support(&read1.blocks, &read2.blocks, ctx.max_fragment_length)?;
            let mut regions: Vec<RegionId> = reads
                .iter()
                .flat_map(|r| r.hits.iter())
                .map(|h| h.region)
                .filter(|&id| ctx.model.transcript_exons(tx.id).contains(&id))
                .collect();
            regions.sort_unstable();
            regions.dedup();
            Some(TranscriptMatch { trans_id: tx.id, match_type, regions })
        })
        .collect();

    matches.sort_by_key(|m| (Reverse(m.match_type), Reverse(m.regions.len()), m.trans_id));
    matches
}

fn downgrade_competing(reads: &mut [MappedRead], matches: &[TranscriptMatch]) {
    for read in reads.iter_mut() {
        for (trans_id, class) in read.trans_classes.iter_mut() {
            if class.is_supporting() && !matches.iter().any(|m| m.trans_id == *trans_id) {
                *class = TransMatchType::OtherTrans;
            }
        }
    }
}

fn distinct_exon_blocks(model: &RegionModel, reads: &[MappedRead]) -> usize {
    let blocks: Vec<RefBlock> = reads
        .iter()
        .flat_map(|r| r.exon_regions(model))
        .map(|id| model.region(id).block)
        .collect();
    RefBlock::merge_blocks(&blocks).len()
}

fn unspliced(ctx: &FragmentContext, reads: &[MappedRead], frag_span: RefBlock) -> FragmentOutcome {
    let mut transcripts: Vec<TranscriptId> = reads
        .iter()
        .flat_map(|r| r.trans_classes.iter())
        .filter(|(_, c)| **c == TransMatchType::Unspliced)
        .map(|(t, _)| *t)
        .collect();
    transcripts.sort_unstable();
    transcripts.dedup();

    let genes = ctx.genes_overlapping(frag_span);
    let category = (!genes.is_empty()).then(|| CategoryKey::unspliced(genes));

    FragmentOutcome::Unspliced { transcripts, category }
}
