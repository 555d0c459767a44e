//! Novel splice junctions from fragments that fit no transcript.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::mapper::MappedRead;
use crate::model::transcript::Transcript;
use crate::model::types::TranscriptId;
use crate::reference::RefGenome;
use crate::region::{RegionId, RegionModel};
use crate::types::{RefBlock, Strand};

pub const SE_START: usize = 0;
pub const SE_END: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AltSpliceJunctionType {
    SkippedExons,
    MixedTrans,
    Novel3Prime,
    Novel5Prime,
    NovelExon,
    NovelIntron,
    Intronic,
    ExonIntron,
}

impl fmt::Display for AltSpliceJunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AltSpliceJunctionType::SkippedExons => "SKIPPED_EXONS",
            AltSpliceJunctionType::MixedTrans => "MIXED_TRANS",
            AltSpliceJunctionType::Novel3Prime => "NOVEL_3_PRIME",
            AltSpliceJunctionType::Novel5Prime => "NOVEL_5_PRIME",
            AltSpliceJunctionType::NovelExon => "NOVEL_EXON",
            AltSpliceJunctionType::NovelIntron => "NOVEL_INTRON",
            AltSpliceJunctionType::Intronic => "INTRONIC",
            AltSpliceJunctionType::ExonIntron => "EXON_INTRON",
        };
        write!(f, "{s}")
    }
}

/// Where one side of a junction sits relative to known exons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AltSpliceJunctionContext {
    /// On an exon boundary that is spliced in some transcript.
    SpliceJunction,
    Exonic,
    Intronic,
}

impl fmt::Display for AltSpliceJunctionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AltSpliceJunctionContext::SpliceJunction => "SPLICE_JUNC",
            AltSpliceJunctionContext::Exonic => "EXONIC",
            AltSpliceJunctionContext::Intronic => "INTRONIC",
        };
        write!(f, "{s}")
    }
}

/// A junction not found in any annotated transcript.
///
/// `start` is the first skipped base and `end` the first base after the gap, so the
/// gap is `[start, end)`. Per-side fields are indexed by `SE_START` / `SE_END`.
#[derive(Debug, Clone, PartialEq)]
pub struct AltSpliceJunction {
    pub start: u32,
    pub end: u32,
    pub kind: AltSpliceJunctionType,
    /// Strand of the annotated transcripts the junction attaches to, `Unknown` when none.
    pub strand: Strand,
    pub contexts: [AltSpliceJunctionContext; 2],
    pub regions: [Option<RegionId>; 2],
    pub transcripts: [Vec<TranscriptId>; 2],
    pub fragment_count: u32,
    pub position_counts: [u32; 2],
    pub motif: Option<String>,
}

impl AltSpliceJunction {
    pub fn gap(&self) -> RefBlock {
        RefBlock { start: self.start, end: self.end }
    }

    /// Reference positions whose fragment depth is counted: the last base before
    /// the gap and the first base after it.
    pub fn depth_positions(&self) -> [u32; 2] {
        [self.start.saturating_sub(1), self.end]
    }

    /// Transcripts seen on either side.
    pub fn all_transcripts(&self) -> BTreeSet<TranscriptId> {
        self.transcripts[SE_START]
            .iter()
            .chain(self.transcripts[SE_END].iter())
            .copied()
            .collect()
    }

    fn restrict_transcripts(&mut self, keep: &BTreeSet<TranscriptId>) {
        for side in &mut self.transcripts {
            side.retain(|t| keep.contains(t));
        }
    }

    fn merge(&mut self, other: AltSpliceJunction) {
        self.fragment_count += other.fragment_count;
        if other.kind == AltSpliceJunctionType::NovelExon && self.kind != AltSpliceJunctionType::NovelExon {
            self.kind = AltSpliceJunctionType::NovelExon;
            self.transcripts = other.transcripts;
        }
    }
}

/// Collects alt splice junctions for one gene collection, deduplicated by (start, end).
#[derive(Debug, Default, Clone)]
pub struct AltSpliceJunctionFinder {
    junctions: Vec<AltSpliceJunction>,
    index: HashMap<(u32, u32), usize>,
}

impl AltSpliceJunctionFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn junctions(&self) -> &[AltSpliceJunction] {
        &self.junctions
    }

    pub fn len(&self) -> usize {
        self.junctions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.junctions.is_empty()
    }

    pub fn clear(&mut self) {
        self.junctions.clear();
        self.index.clear();
    }

    /// Find and record novel junctions in an ALT fragment.
    ///
    /// Returns the junctions derived from this fragment, after NOVEL_EXON promotion.
    pub fn process_fragment(
        &mut self,
        reads: &[MappedRead],
        model: &RegionModel,
        transcripts: &[&Transcript],
    ) -> Vec<AltSpliceJunction> {
        let mut found: Vec<AltSpliceJunction> = fragment_gaps(reads)
            .into_iter()
            .filter(|&(s, e)| !model.is_known_junction(s, e))
            .map(|(s, e)| classify_junction(s, e, model, transcripts))
            .collect();

        promote_novel_exons(&mut found);

        for j in &found {
            self.add(j.clone());
        }
        found
    }

    /// Insert a junction, merging with an existing one with the same coordinates.
    pub fn add(&mut self, junction: AltSpliceJunction) {
        match self.index.get(&(junction.start, junction.end)) {
            Some(&idx) => self.junctions[idx].merge(junction),
            None => {
                self.index.insert((junction.start, junction.end), self.junctions.len());
                self.junctions.push(junction);
            }
        }
    }

    /// Second pass: count fragments whose combined span covers each junction side.
    pub fn count_position_depths<I>(&mut self, fragment_spans: I)
    where
        I: IntoIterator<Item = RefBlock>,
    {
        if self.junctions.is_empty() {
            return;
        }
        for j in &mut self.junctions {
            j.position_counts = [0, 0];
        }
        for span in fragment_spans {
            for j in &mut self.junctions {
                for (side, pos) in j.depth_positions().into_iter().enumerate() {
                    if span.contains_pos(pos) {
                        j.position_counts[side] += 1;
                    }
                }
            }
        }
    }

    /// Donor and acceptor dinucleotides in genomic orientation, e.g. `GT-AG`.
    pub fn set_motifs(&mut self, genome: &RefGenome, chr: &str) {
        for j in &mut self.junctions {
            if j.end < j.start + 4 {
                continue;
            }
            let donor = genome.bases(chr, RefBlock { start: j.start, end: j.start + 2 });
            let acceptor = genome.bases(chr, RefBlock { start: j.end - 2, end: j.end });
            if let (Some(d), Some(a)) = (donor, acceptor) {
                j.motif = Some(format!("{d}-{a}"));
            }
        }
    }
}

/// Gaps inside single reads that are not covered by the other read.
pub fn fragment_gaps(reads: &[MappedRead]) -> Vec<(u32, u32)> {
    let all_blocks: Vec<RefBlock> = reads.iter().flat_map(|r| r.blocks.iter().copied()).collect();
    let merged = RefBlock::merge_blocks(&all_blocks);
    let union_gaps = RefBlock::junctions_from_blocks(&merged, 0);

    let mut gaps: Vec<(u32, u32)> = reads
        .iter()
        .flat_map(|r| RefBlock::junctions_from_blocks(&r.blocks, 0))
        .filter(|g| union_gaps.contains(g))
        .collect();
    gaps.sort_unstable();
    gaps.dedup();
    gaps
}

fn side_context(
    model: &RegionModel,
    side: usize,
    boundary: u32,
) -> (AltSpliceJunctionContext, Option<RegionId>, Vec<TranscriptId>) {
    let mut transcripts: Vec<TranscriptId> = Vec::new();
    let mut boundary_region: Option<RegionId> = None;
    let mut spliced = false;

    for &id in model.exon_ids() {
        let r = model.region(id);
        let on_boundary = if side == SE_START { r.end() == boundary } else { r.start() == boundary };
        if !on_boundary {
            continue;
        }
        boundary_region.get_or_insert(id);
        transcripts.extend(r.transcripts());
        spliced |= if side == SE_START { r.has_post() } else { r.has_pre() };
    }
    transcripts.sort_unstable();
    transcripts.dedup();

    if spliced {
        return (AltSpliceJunctionContext::SpliceJunction, boundary_region, transcripts);
    }

    // exonic base adjoining the gap on this side
    let pos = if side == SE_START { boundary.saturating_sub(1) } else { boundary };
    let inside = model.overlapping(pos);
    if let Some(&id) = inside.first() {
        return (AltSpliceJunctionContext::Exonic, boundary_region.or(Some(id)), transcripts);
    }

    (AltSpliceJunctionContext::Intronic, boundary_region, transcripts)
}

fn transcript_strand(ids: &[TranscriptId], transcripts: &[&Transcript]) -> Strand {
    ids.iter()
        .find_map(|id| transcripts.iter().find(|t| t.id == *id))
        .map_or(Strand::Unknown, |t| t.strand)
}

/// Classify the gap `[start, end)` against the region model.
///
/// 3'/5' novel ends follow the strand of the transcripts matched at the gap,
/// so genes of either strand can share one model.
pub fn classify_junction(start: u32, end: u32, model: &RegionModel, transcripts: &[&Transcript]) -> AltSpliceJunction {
    let (start_ctx, start_region, start_trans) = side_context(model, SE_START, start);
    let (end_ctx, end_region, end_trans) = side_context(model, SE_END, end);

    let strand = match transcript_strand(&start_trans, transcripts) {
        Strand::Unknown => transcript_strand(&end_trans, transcripts),
        s => s,
    };

    let shared = start_trans.iter().any(|t| end_trans.contains(t));

    let kind = if shared {
        AltSpliceJunctionType::SkippedExons
    } else if !start_trans.is_empty() && !end_trans.is_empty() {
        AltSpliceJunctionType::MixedTrans
    } else if !start_trans.is_empty() {
        if strand == Strand::Minus {
            AltSpliceJunctionType::Novel5Prime
        } else {
            AltSpliceJunctionType::Novel3Prime
        }
    } else if !end_trans.is_empty() {
        if strand == Strand::Minus {
            AltSpliceJunctionType::Novel3Prime
        } else {
            AltSpliceJunctionType::Novel5Prime
        }
    } else if start_ctx == AltSpliceJunctionContext::Intronic && end_ctx == AltSpliceJunctionContext::Intronic {
        AltSpliceJunctionType::Intronic
    } else if start_ctx == AltSpliceJunctionContext::Exonic && end_ctx == AltSpliceJunctionContext::Exonic {
        AltSpliceJunctionType::NovelIntron
    } else {
        AltSpliceJunctionType::ExonIntron
    };

    AltSpliceJunction {
        start,
        end,
        kind,
        strand,
        contexts: [start_ctx, end_ctx],
        regions: [start_region, end_region],
        transcripts: [start_trans, end_trans],
        fragment_count: 1,
        position_counts: [0, 0],
        motif: None,
    }
}

/// A NOVEL_3_PRIME and a NOVEL_5_PRIME junction from one fragment that share a
/// transcript mark the two ends of a novel exon.
fn promote_novel_exons(junctions: &mut [AltSpliceJunction]) {
    let is_novel_end = |k: AltSpliceJunctionType| {
        matches!(k, AltSpliceJunctionType::Novel3Prime | AltSpliceJunctionType::Novel5Prime)
    };

    for i in 0..junctions.len() {
        for j in (i + 1)..junctions.len() {
            let (a, b) = (junctions[i].kind, junctions[j].kind);
            if !is_novel_end(a) || !is_novel_end(b) || a == b {
                continue;
            }
            let shared: BTreeSet<TranscriptId> = junctions[i]
                .all_transcripts()
                .intersection(&junctions[j].all_transcripts())
                .copied()
                .collect();
            if shared.is_empty() {
                continue;
            }
            for idx in [i, j] {
                junctions[idx].kind = AltSpliceJunctionType::NovelExon;
                junctions[idx].restrict_transcripts(&shared);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{AlignmentRecord, Cigar};

    fn mk(id: TranscriptId, strand: Strand, exons: &[(u32, u32)]) -> Transcript {
        let mut t = Transcript::new(id, 0, format!("T{id}"), format!("T{id}"), 0, strand);
        for &(s, e) in exons {
            t.add_exon(RefBlock::new(s, e));
        }
        t.finalize();
        t
    }

    struct Fixture {
        txs: Vec<Transcript>,
        model: RegionModel,
    }

    impl Fixture {
        fn new(txs: Vec<Transcript>) -> Self {
            let model = RegionModel::build("chr1", &txs.iter().collect::<Vec<_>>());
            Self { txs, model }
        }

        fn standard(strand: Strand) -> Self {
            Self::new(vec![
                mk(0, strand, &[(100, 200), (300, 400), (500, 600)]),
                mk(1, strand, &[(1000, 1100), (1200, 1300)]),
            ])
        }

        fn refs(&self) -> Vec<&Transcript> {
            self.txs.iter().collect()
        }

        fn classify(&self, start: u32, end: u32) -> AltSpliceJunction {
            classify_junction(start, end, &self.model, &self.refs())
        }

        fn process(&self, finder: &mut AltSpliceJunctionFinder, reads: &[MappedRead]) -> Vec<AltSpliceJunction> {
            finder.process_fragment(reads, &self.model, &self.refs())
        }
    }

    fn read(pos: u32, cigar: &str) -> MappedRead {
        MappedRead::from_record(AlignmentRecord {
            read_id: "r".into(),
            flags: 0,
            chr: "chr1".into(),
            pos,
            mapq: 60,
            cigar: Cigar::parse(cigar).unwrap(),
            mate_chr: None,
            mate_pos: 0,
            insert_size: 0,
            seq: "*".into(),
        })
    }

    fn kind(start: u32, end: u32, strand: Strand) -> AltSpliceJunctionType {
        Fixture::standard(strand).classify(start, end).kind
    }

    #[test]
    fn junction_types() {
        assert_eq!(kind(200, 500, Strand::Plus), AltSpliceJunctionType::SkippedExons);
        assert_eq!(kind(200, 1200, Strand::Plus), AltSpliceJunctionType::MixedTrans);
        assert_eq!(kind(200, 450, Strand::Plus), AltSpliceJunctionType::Novel3Prime);
        assert_eq!(kind(200, 450, Strand::Minus), AltSpliceJunctionType::Novel5Prime);
        assert_eq!(kind(250, 300, Strand::Plus), AltSpliceJunctionType::Novel5Prime);
        assert_eq!(kind(205, 295, Strand::Plus), AltSpliceJunctionType::Intronic);
        assert_eq!(kind(150, 350, Strand::Plus), AltSpliceJunctionType::NovelIntron);
        assert_eq!(kind(150, 250, Strand::Plus), AltSpliceJunctionType::ExonIntron);
    }

    #[test]
    fn side_contexts() {
        let f = Fixture::standard(Strand::Plus);
        let j = f.classify(150, 450);
        assert_eq!(j.contexts, [AltSpliceJunctionContext::Exonic, AltSpliceJunctionContext::Intronic]);
        assert_eq!(j.strand, Strand::Unknown);
        let j = f.classify(200, 450);
        assert_eq!(j.strand, Strand::Plus);
        assert_eq!(j.contexts[SE_START], AltSpliceJunctionContext::SpliceJunction);
        assert_eq!(j.transcripts[SE_START], vec![0]);
    }

    #[test]
    fn gaps_covered_by_the_mate_are_ignored() {
        // read 1 skips 200..300, read 2 covers 250..280 contiguously
        let reads = vec![read(150, "50M100N50M"), read(250, "30M")];
        assert!(fragment_gaps(&reads).is_empty());

        let reads = vec![read(150, "50M100N50M"), read(320, "30M")];
        assert_eq!(fragment_gaps(&reads), vec![(200, 300)]);
    }

    #[test]
    fn known_junctions_are_skipped() {
        let f = Fixture::standard(Strand::Plus);
        let mut finder = AltSpliceJunctionFinder::new();
        let found = f.process(&mut finder, &[read(150, "50M100N50M")]);
        assert!(found.is_empty());
        assert!(finder.is_empty());
    }

    #[test]
    fn repeated_junctions_merge_counts() {
        let f = Fixture::standard(Strand::Plus);
        let mut finder = AltSpliceJunctionFinder::new();
        f.process(&mut finder, &[read(150, "50M300N50M")]);
        f.process(&mut finder, &[read(160, "40M300N60M")]);

        assert_eq!(finder.len(), 1);
        let j = &finder.junctions()[0];
        assert_eq!((j.start, j.end), (200, 500));
        assert_eq!(j.kind, AltSpliceJunctionType::SkippedExons);
        assert_eq!(j.fragment_count, 2);
    }

    #[test]
    fn novel_exon_promotion() {
        let f = Fixture::standard(Strand::Plus);
        let mut finder = AltSpliceJunctionFinder::new();
        // exon 1 -> novel exon 240..260 -> exon 2
        let reads = vec![read(180, "20M40N20M40N20M")];
        let found = f.process(&mut finder, &reads);

        assert_eq!(found.len(), 2);
        for j in &found {
            assert_eq!(j.kind, AltSpliceJunctionType::NovelExon);
            assert_eq!(j.all_transcripts(), BTreeSet::from([0]));
        }
    }

    #[test]
    fn novel_exon_across_mates_keeps_shared_transcripts() {
        let f = Fixture::new(vec![
            mk(0, Strand::Plus, &[(100, 200), (300, 400)]),
            mk(2, Strand::Plus, &[(100, 200), (700, 800)]),
        ]);
        let mut finder = AltSpliceJunctionFinder::new();
        // read 1: exon 1 -> novel exon 240..260, read 2: novel exon -> exon 2
        let reads = vec![read(180, "20M40N20M"), read(245, "15M40N20M")];
        let found = f.process(&mut finder, &reads);

        assert_eq!(found.len(), 2);
        assert_eq!((found[0].start, found[0].end), (200, 240));
        assert_eq!((found[1].start, found[1].end), (260, 300));
        for j in &found {
            assert_eq!(j.kind, AltSpliceJunctionType::NovelExon);
            assert_eq!(j.all_transcripts(), BTreeSet::from([0]));
        }
        assert_eq!(found[0].transcripts[SE_START], vec![0]);
        assert_eq!(finder.len(), 2);
    }

    #[test]
    fn novel_ends_follow_the_matched_strand() {
        let f = Fixture::new(vec![
            mk(0, Strand::Plus, &[(100, 200), (300, 400)]),
            mk(1, Strand::Minus, &[(350, 450), (600, 700)]),
        ]);

        let minus = f.classify(450, 520);
        assert_eq!(minus.transcripts[SE_START], vec![1]);
        assert_eq!(minus.strand, Strand::Minus);
        assert_eq!(minus.kind, AltSpliceJunctionType::Novel5Prime);

        let plus = f.classify(200, 250);
        assert_eq!(plus.strand, Strand::Plus);
        assert_eq!(plus.kind, AltSpliceJunctionType::Novel3Prime);

        // same gap, model of the minus-strand transcript alone
        let alone = Fixture::new(vec![mk(1, Strand::Minus, &[(350, 450), (600, 700)])]);
        assert_eq!(alone.classify(450, 520).kind, minus.kind);
    }

    #[test]
    fn position_depths() {
        let f = Fixture::standard(Strand::Plus);
        let mut finder = AltSpliceJunctionFinder::new();
        f.process(&mut finder, &[read(150, "50M300N50M")]);

        finder.count_position_depths(vec![
            RefBlock::new(150, 550), // covers both sides
            RefBlock::new(100, 200), // covers 199 only
            RefBlock::new(500, 510), // covers 500 only
            RefBlock::new(200, 500), // covers neither
        ]);
        assert_eq!(finder.junctions()[0].position_counts, [2, 2]);
    }

    #[test]
    fn motifs_from_reference() {
        let mut seq = "A".repeat(600);
        seq.replace_range(200..202, "GT");
        seq.replace_range(498..500, "AG");
        let genome = RefGenome::from_reader(std::io::Cursor::new(format!(">chr1\n{seq}\n").into_bytes())).unwrap();

        let f = Fixture::standard(Strand::Plus);
        let mut finder = AltSpliceJunctionFinder::new();
        f.process(&mut finder, &[read(150, "50M300N50M")]);
        finder.set_motifs(&genome, "chr1");
        assert_eq!(finder.junctions()[0].motif.as_deref(), Some("GT-AG"));
    }
}
