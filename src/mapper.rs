//! Turns one alignment record into mapped blocks and classifies each block
//! against the regions of a gene collection.

use std::collections::BTreeMap;

use crate::alignment::{self, AlignmentRecord, FLAG_DUPLICATE, FLAG_MATE_REVERSE};
use crate::model::types::{RegionMatchType, TransMatchType, TranscriptId};
use crate::region::{Region, RegionId, RegionModel};
use crate::types::RefBlock;

/// One block overlapping one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHit {
    pub block_idx: usize,
    pub region: RegionId,
    pub match_type: RegionMatchType,
}

/// A read mapped onto the regions of a gene collection.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRead {
    pub read_id: String,
    pub chr: String,
    pub flags: u16,
    pub start: u32,
    pub end: u32,
    pub blocks: Vec<RefBlock>,
    pub is_reverse: bool,
    pub mate_chr: Option<String>,
    pub mate_start: u32,
    pub hits: Vec<RegionHit>,
    /// Per-transcript verdict, filled in by the transcript classifier.
    pub trans_classes: BTreeMap<TranscriptId, TransMatchType>,
}

impl MappedRead {
    pub fn from_record(record: AlignmentRecord) -> Self {
        let blocks = record.blocks();
        let end = record.end();
        let is_reverse = record.is_reverse();
        Self {
            read_id: record.read_id,
            chr: record.chr,
            flags: record.flags,
            start: record.pos,
            end,
            blocks,
            is_reverse,
            mate_chr: record.mate_chr,
            mate_start: record.mate_pos,
            hits: Vec::new(),
            trans_classes: BTreeMap::new(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.flags & FLAG_DUPLICATE != 0
    }

    pub fn is_mate_reverse(&self) -> bool {
        self.flags & FLAG_MATE_REVERSE != 0
    }

    /// Paired read whose mate is mapped on the same chromosome.
    pub fn expects_mate(&self) -> bool {
        alignment::expects_mate(self.flags, &self.chr, self.mate_chr.as_deref())
    }

    pub fn mate_on_other_chromosome(&self) -> bool {
        alignment::mate_on_other_chromosome(self.flags, &self.chr, self.mate_chr.as_deref())
    }

    pub fn span(&self) -> RefBlock {
        RefBlock { start: self.start, end: self.end.max(self.start + 1) }
    }

    pub fn has_splice_gap(&self) -> bool {
        self.blocks.len() > 1
    }

    pub fn has_exon_hits(&self, model: &RegionModel) -> bool {
        self.hits.iter().any(|h| model.region(h.region).is_exon())
    }

    pub fn has_match_type(&self, match_type: RegionMatchType) -> bool {
        self.hits.iter().any(|h| h.match_type == match_type)
    }

    /// Distinct exon regions hit by this read.
    pub fn exon_regions(&self, model: &RegionModel) -> Vec<RegionId> {
        let mut ids: Vec<RegionId> = self
            .hits
            .iter()
            .filter(|h| model.region(h.region).is_exon())
            .map(|h| h.region)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Classify every block against the model and record the hits. Adds depth
    /// to each overlapped region as a side effect.
    pub fn map_regions(&mut self, model: &mut RegionModel) {
        self.hits.clear();

        for (block_idx, &block) in self.blocks.iter().enumerate() {
            let exons = model.exon_regions_overlapping(block);

            for &id in &exons {
                let match_type = classify_exon_overlap(block, model.region(id));
                self.hits.push(RegionHit { block_idx, region: id, match_type });
            }

            // intronic only when the block touches no exon at all
            if exons.is_empty() {
                for id in model.intron_regions_overlapping(block) {
                    self.hits.push(RegionHit {
                        block_idx,
                        region: id,
                        match_type: RegionMatchType::Intronic,
                    });
                }
            }

            model.add_depth(block);
        }
    }
}

/// How a mapped block relates to an exon region it overlaps.
pub fn classify_exon_overlap(block: RefBlock, region: &Region) -> RegionMatchType {
    let exon = region.block;
    if !exon.overlaps(block) {
        return RegionMatchType::None;
    }
    if block == exon {
        return RegionMatchType::ExonMatch;
    }
    if !exon.contains(block) {
        return RegionMatchType::ExonIntron;
    }
    let at_start = block.start == exon.start && region.has_pre();
    let at_end = block.end == exon.end && region.has_post();
    if at_start || at_end {
        RegionMatchType::ExonBoundary
    } else {
        RegionMatchType::WithinExon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::Cigar;
    use crate::model::transcript::Transcript;
    use crate::types::Strand;

    fn model() -> RegionModel {
        let mut t = Transcript::new(0, 0, "T0", "T0", 0, Strand::Plus);
        t.add_exon(RefBlock::new(100, 200));
        t.add_exon(RefBlock::new(300, 400));
        t.finalize();
        RegionModel::build("chr1", &[&t])
    }

    fn read(pos: u32, cigar: &str) -> MappedRead {
        MappedRead::from_record(AlignmentRecord {
            read_id: "r".into(),
            flags: 0x1 | 0x40,
            chr: "chr1".into(),
            pos,
            mapq: 60,
            cigar: Cigar::parse(cigar).unwrap(),
            mate_chr: Some("chr1".into()),
            mate_pos: pos + 100,
            insert_size: 0,
            seq: "*".into(),
        })
    }

    fn types(r: &MappedRead) -> Vec<RegionMatchType> {
        r.hits.iter().map(|h| h.match_type).collect()
    }

    #[test]
    fn mate_checks_match_the_record() {
        let mut r = read(120, "50M");
        assert!(r.expects_mate());
        assert!(!r.mate_on_other_chromosome());

        r.mate_chr = Some("chr2".into());
        assert!(!r.expects_mate());
        assert!(r.mate_on_other_chromosome());
    }

    #[test]
    fn in_exon_reads_are_never_intronic() {
        let mut m = model();
        for (pos, cigar) in [(120, "50M"), (100, "100M"), (100, "30M"), (300, "20M"), (150, "50M")] {
            let mut r = read(pos, cigar);
            r.map_regions(&mut m);
            assert!(!r.hits.is_empty());
            for mt in types(&r) {
                assert!(mt.is_exonic(), "{pos} {cigar} gave {mt}");
            }
        }
    }

    #[test]
    fn boundary_requires_a_neighbour() {
        let mut m = model();

        let mut r = read(150, "50M");
        r.map_regions(&mut m);
        assert_eq!(types(&r), vec![RegionMatchType::ExonBoundary]);

        // first exon has no region before it
        let mut r = read(100, "30M");
        r.map_regions(&mut m);
        assert_eq!(types(&r), vec![RegionMatchType::WithinExon]);

        let mut r = read(100, "100M");
        r.map_regions(&mut m);
        assert_eq!(types(&r), vec![RegionMatchType::ExonMatch]);
    }

    #[test]
    fn overruns_and_intronic_reads() {
        let mut m = model();

        let mut r = read(150, "70M");
        r.map_regions(&mut m);
        assert_eq!(types(&r), vec![RegionMatchType::ExonIntron]);

        let mut r = read(220, "50M");
        r.map_regions(&mut m);
        assert_eq!(types(&r), vec![RegionMatchType::Intronic]);
        assert!(!r.has_exon_hits(&m));

        let mut r = read(150, "50M100N50M");
        r.map_regions(&mut m);
        assert_eq!(r.blocks.len(), 2);
        assert_eq!(types(&r), vec![RegionMatchType::ExonBoundary, RegionMatchType::ExonBoundary]);
        assert_eq!(r.exon_regions(&m).len(), 2);
    }

    #[test]
    fn mapping_adds_depth() {
        let mut m = model();
        let mut r = read(150, "50M100N50M");
        r.map_regions(&mut m);
        let id = m.find_region(300, 400).unwrap();
        assert_eq!(m.region(id).coverage().0, 50);
    }
}
