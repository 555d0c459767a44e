//! Exon and intron regions of one gene collection.
//!
//! Regions live in an arena (`Vec<Region>`) and are addressed by `RegionId`.
//! Exon regions are deduplicated by coordinates; intron regions shrink to the
//! narrowest gap seen across transcripts.

use std::collections::{BTreeMap, HashMap};

use crate::model::transcript::Transcript;
use crate::model::types::TranscriptId;
use crate::reference::RefGenome;
use crate::types::RefBlock;

pub type RegionId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Exon,
    Intron,
}

/// A transcript using a region, with the exon rank for exon regions.
/// Intron regions carry the rank of the exon before them (5' side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransExonRef {
    pub trans_id: TranscriptId,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub block: RefBlock,
    pub kind: RegionKind,
    refs: Vec<TransExonRef>,
    /// Exon regions directly before this one in some transcript (lower coordinates).
    pub pre_regions: Vec<RegionId>,
    /// Exon regions directly after this one in some transcript (higher coordinates).
    pub post_regions: Vec<RegionId>,
    ref_bases: Option<String>,
    depth: Vec<u32>,
    match_counts: BTreeMap<TranscriptId, u32>,
}

impl Region {
    fn new(id: RegionId, block: RefBlock, kind: RegionKind) -> Self {
        Self {
            id,
            block,
            kind,
            refs: Vec::new(),
            pre_regions: Vec::new(),
            post_regions: Vec::new(),
            ref_bases: None,
            depth: vec![0; block.len() as usize],
            match_counts: BTreeMap::new(),
        }
    }

    pub fn start(&self) -> u32 {
        self.block.start
    }

    pub fn end(&self) -> u32 {
        self.block.end
    }

    pub fn is_exon(&self) -> bool {
        self.kind == RegionKind::Exon
    }

    pub fn refs(&self) -> &[TransExonRef] {
        &self.refs
    }

    pub fn transcripts(&self) -> impl Iterator<Item = TranscriptId> + '_ {
        self.refs.iter().map(|r| r.trans_id)
    }

    pub fn has_transcript(&self, trans_id: TranscriptId) -> bool {
        self.rank_for(trans_id).is_some()
    }

    pub fn rank_for(&self, trans_id: TranscriptId) -> Option<u32> {
        self.refs.iter().find(|r| r.trans_id == trans_id).map(|r| r.rank)
    }

    pub fn has_pre(&self) -> bool {
        !self.pre_regions.is_empty()
    }

    pub fn has_post(&self) -> bool {
        !self.post_regions.is_empty()
    }

    fn add_ref(&mut self, r: TransExonRef) {
        if let Err(pos) = self.refs.binary_search(&r) {
            self.refs.insert(pos, r);
        }
    }

    fn resize(&mut self, block: RefBlock) {
        self.block = block;
        self.depth = vec![0; block.len() as usize];
    }

    /// Add one to the depth of every base of `block` inside this region.
    pub fn add_depth(&mut self, block: RefBlock) {
        let Some(hit) = self.block.intersect(block) else {
            return;
        };
        let from = (hit.start - self.block.start) as usize;
        let to = (hit.end - self.block.start) as usize;
        for d in &mut self.depth[from..to] {
            *d = d.saturating_add(1);
        }
    }

    pub fn depth(&self) -> &[u32] {
        &self.depth
    }

    /// (bases with depth > 0, mean depth)
    pub fn coverage(&self) -> (u32, f64) {
        let covered = self.depth.iter().filter(|&&d| d > 0).count() as u32;
        let total: u64 = self.depth.iter().map(|&d| d as u64).sum();
        let mean = if self.depth.is_empty() {
            0.0
        } else {
            total as f64 / self.depth.len() as f64
        };
        (covered, mean)
    }

    pub fn add_match(&mut self, trans_id: TranscriptId) {
        *self.match_counts.entry(trans_id).or_insert(0) += 1;
    }

    pub fn match_count(&self, trans_id: TranscriptId) -> u32 {
        self.match_counts.get(&trans_id).copied().unwrap_or(0)
    }

    pub fn ref_bases(&self) -> Option<&str> {
        self.ref_bases.as_deref()
    }
}

/// Exon/intron graph of one gene collection on one chromosome.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionModel {
    pub chr: String,
    regions: Vec<Region>,
    exon_ids: Vec<RegionId>,
    intron_ids: Vec<RegionId>,
    // exon regions per transcript, in genomic order
    trans_exons: BTreeMap<TranscriptId, Vec<RegionId>>,
}

impl RegionModel {
    /// Build regions from finalized transcripts.
    ///
    /// Transcripts are processed in id order so the result does not depend on
    /// the caller's ordering.
    pub fn build(chr: &str, transcripts: &[&Transcript]) -> Self {
        let mut model = Self {
            chr: chr.to_string(),
            regions: Vec::new(),
            exon_ids: Vec::new(),
            intron_ids: Vec::new(),
            trans_exons: BTreeMap::new(),
        };

        let mut sorted: Vec<&Transcript> = transcripts.to_vec();
        sorted.sort_by_key(|t| t.id);

        let mut exon_index: HashMap<RefBlock, RegionId> = HashMap::new();

        for tx in sorted {
            let mut prev: Option<RegionId> = None;
            let mut ids = Vec::with_capacity(tx.exons().len());

            for exon in tx.ranked_exons() {
                let id = *exon_index.entry(exon.block).or_insert_with(|| {
                    let id = model.regions.len();
                    model.regions.push(Region::new(id, exon.block, RegionKind::Exon));
                    model.exon_ids.push(id);
                    id
                });
                model.regions[id].add_ref(TransExonRef { trans_id: tx.id, rank: exon.rank });

                if let Some(p) = prev {
                    link(&mut model.regions[p].post_regions, id);
                    link(&mut model.regions[id].pre_regions, p);
                }
                prev = Some(id);
                ids.push(id);
            }

            for (idx, w) in tx.exons().windows(2).enumerate() {
                if w[1].start <= w[0].end {
                    continue;
                }
                let gap = RefBlock { start: w[0].end, end: w[1].start };
                let five_prime_rank = tx.exon_rank(idx).min(tx.exon_rank(idx + 1));
                model.add_intron(gap, TransExonRef { trans_id: tx.id, rank: five_prime_rank });
            }

            model.trans_exons.insert(tx.id, ids);
        }

        let regions = &model.regions;
        model.exon_ids.sort_by_key(|&id| (regions[id].block.start, regions[id].block.end));
        model.intron_ids.sort_by_key(|&id| (regions[id].block.start, regions[id].block.end));

        model
    }

    fn add_intron(&mut self, gap: RefBlock, r: TransExonRef) {
        let mut matched = false;
        for &id in &self.intron_ids {
            let region = &mut self.regions[id];
            if let Some(narrow) = region.block.intersect(gap) {
                if narrow != region.block {
                    region.resize(narrow);
                }
                region.add_ref(r);
                matched = true;
            }
        }
        if matched {
            return;
        }

        let id = self.regions.len();
        let mut region = Region::new(id, gap, RegionKind::Intron);
        region.add_ref(r);
        self.regions.push(region);
        self.intron_ids.push(id);
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id]
    }

    pub fn region_mut(&mut self, id: RegionId) -> &mut Region {
        &mut self.regions[id]
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Exon region ids ordered by start.
    pub fn exon_ids(&self) -> &[RegionId] {
        &self.exon_ids
    }

    pub fn intron_ids(&self) -> &[RegionId] {
        &self.intron_ids
    }

    /// Exon regions of a transcript in genomic order.
    pub fn transcript_exons(&self, trans_id: TranscriptId) -> &[RegionId] {
        self.trans_exons.get(&trans_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The exon region with exactly these bounds.
    pub fn find_region(&self, start: u32, end: u32) -> Option<RegionId> {
        self.exon_ids
            .iter()
            .copied()
            .find(|&id| self.regions[id].block.start == start && self.regions[id].block.end == end)
    }

    /// Every exon region containing `pos`.
    pub fn overlapping(&self, pos: u32) -> Vec<RegionId> {
        self.exon_ids
            .iter()
            .copied()
            .take_while(|&id| self.regions[id].block.start <= pos)
            .filter(|&id| self.regions[id].block.contains_pos(pos))
            .collect()
    }

    pub fn exon_regions_overlapping(&self, block: RefBlock) -> Vec<RegionId> {
        self.exon_ids
            .iter()
            .copied()
            .take_while(|&id| self.regions[id].block.start < block.end)
            .filter(|&id| self.regions[id].block.overlaps(block))
            .collect()
    }

    pub fn intron_regions_overlapping(&self, block: RefBlock) -> Vec<RegionId> {
        self.intron_ids
            .iter()
            .copied()
            .take_while(|&id| self.regions[id].block.start < block.end)
            .filter(|&id| self.regions[id].block.overlaps(block))
            .collect()
    }

    /// True when some exon region ends at `start` and links to one starting at `end`.
    pub fn is_known_junction(&self, start: u32, end: u32) -> bool {
        self.exon_ids.iter().any(|&id| {
            let r = &self.regions[id];
            r.block.end == start && r.post_regions.iter().any(|&p| self.regions[p].block.start == end)
        })
    }

    /// Increment depth of every region overlapped by `block`.
    pub fn add_depth(&mut self, block: RefBlock) {
        let ids: Vec<RegionId> = self
            .exon_regions_overlapping(block)
            .into_iter()
            .chain(self.intron_regions_overlapping(block))
            .collect();
        for id in ids {
            self.regions[id].add_depth(block);
        }
    }

    /// Cache reference bases on exon regions.
    pub fn set_ref_bases(&mut self, genome: &RefGenome) {
        for &id in &self.exon_ids {
            let region = &mut self.regions[id];
            region.ref_bases = genome.bases(&self.chr, region.block).map(str::to_string);
        }
    }

    /// Bases of `[start, end)` taken from cached exon bases, if one exon region covers it.
    pub fn ref_bases(&self, start: u32, end: u32) -> Option<&str> {
        if end <= start {
            return None;
        }
        let want = RefBlock { start, end };
        self.exon_ids
            .iter()
            .map(|&id| &self.regions[id])
            .find(|r| r.block.contains(want))
            .and_then(|r| {
                let bases = r.ref_bases.as_deref()?;
                bases.get((start - r.block.start) as usize..(end - r.block.start) as usize)
            })
    }

    /// (covered bases, exonic length, mean depth) over a transcript's exon regions.
    pub fn transcript_coverage(&self, trans_id: TranscriptId) -> (u32, u32, f64) {
        let mut covered = 0u32;
        let mut length = 0u32;
        let mut depth_total = 0.0;
        for &id in self.transcript_exons(trans_id) {
            let region = &self.regions[id];
            let (c, mean) = region.coverage();
            covered += c;
            length += region.block.len();
            depth_total += mean * region.block.len() as f64;
        }
        let mean = if length > 0 { depth_total / length as f64 } else { 0.0 };
        (covered, length, mean)
    }

    /// Exon regions of a transcript that were recruited by at least one supporting fragment.
    pub fn supported_exon_count(&self, trans_id: TranscriptId) -> usize {
        self.transcript_exons(trans_id)
            .iter()
            .filter(|&&id| self.regions[id].match_count(trans_id) > 0)
            .count()
    }
}

fn link(list: &mut Vec<RegionId>, id: RegionId) {
    if !list.contains(&id) {
        list.push(id);
    }
}
