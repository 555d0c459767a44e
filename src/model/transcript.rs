use crate::model::types::{FragmentMatchType, TranscriptId};
use crate::types::{RefBlock, Strand};
use serde::{Serialize, Deserialize};

/// One exon of a finalized transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exon {
    pub block: RefBlock,
    /// 1-based, counted from the transcript's 5' end.
    pub rank: u32,
}

/// Transcript model: ordered exons and optional coding bounds.
///
/// Exons are kept sorted by genomic position after `finalize()`; ranks are
/// derived from that order and the strand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: TranscriptId,
    pub gene_id: usize,
    pub stable_id: String,
    pub names: Vec<String>,
    pub chr_id: usize,
    pub strand: Strand,
    pub coding: Option<RefBlock>,
    exons: Vec<RefBlock>,
    finalized: bool,
}

impl Transcript {
    pub fn new(
        id: TranscriptId,
        gene_id: usize,
        stable_id: impl Into<String>,
        primary_name: impl Into<String>,
        chr_id: usize,
        strand: Strand,
    ) -> Self {
        Self {
            id,
            gene_id,
            stable_id: stable_id.into(),
            names: vec![primary_name.into()],
            chr_id,
            strand,
            coding: None,
            exons: Vec::new(),
            finalized: false,
        }
    }

    pub fn add_name(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
    }

    pub fn primary_name(&self) -> Option<&str> {
        self.names.first().map(|s| s.as_str())
    }

    pub fn add_exon(&mut self, block: RefBlock) {
        self.exons.push(block);
        self.finalized = false;
    }

    /// Widen the coding region to include a CDS block.
    pub fn add_coding(&mut self, block: RefBlock) {
        self.coding = Some(match self.coding {
            Some(c) => RefBlock { start: c.start.min(block.start), end: c.end.max(block.end) },
            None => block,
        });
    }

    pub fn exons(&self) -> &[RefBlock] {
        &self.exons
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Rank of the exon at positional index `idx`.
    pub fn exon_rank(&self, idx: usize) -> u32 {
        match self.strand {
            Strand::Minus => (self.exons.len() - idx) as u32,
            _ => idx as u32 + 1,
        }
    }

    pub fn ranked_exons(&self) -> impl Iterator<Item = Exon> + '_ {
        self.exons
            .iter()
            .enumerate()
            .map(|(idx, &block)| Exon { block, rank: self.exon_rank(idx) })
    }

    /// sorts the transcripts exons and returns (total start: u32, total end: u32)
    pub fn finalize(&mut self) -> (u32, u32) {
        if self.exons.is_empty() {
            self.finalized = true;
            return (0, 0);
        }

        self.exons = RefBlock::merge_blocks(&self.exons);
        self.finalized = true;

        let start = self.exons[0].start;
        let end = self.exons[self.exons.len() - 1].end;

        (start, end)
    }

    pub fn span(&self) -> Option<(u32, u32)> {
        let first = self.exons.first()?;
        let last = self.exons.last()?;
        Some((first.start, last.end))
    }

    pub fn junctions(&self) -> Vec<(u32, u32)> {
        RefBlock::junctions_from_blocks(&self.exons, 0)
    }

    pub fn has_junction(&self, start: u32, end: u32) -> bool {
        self.exons
            .windows(2)
            .any(|w| w[0].end == start && w[1].start == end)
    }

    /// Total exonic length.
    pub fn length(&self) -> u32 {
        self.exons.iter().map(|e| e.len()).sum()
    }

    /// Exonic bases of this transcript inside `[start, end)`.
    pub fn exonic_length_between(&self, start: u32, end: u32) -> u32 {
        if end <= start {
            return 0;
        }
        let window = RefBlock { start, end };
        self.exons
            .iter()
            .filter_map(|e| e.intersect(window))
            .map(|b| b.len())
            .sum()
    }

    /// Convert a transcript-space interval (0 = lowest genomic exon base) into genomic blocks.
    pub fn to_genomic(&self, tx_start: u32, tx_end: u32) -> Vec<RefBlock> {
        let mut out = Vec::new();
        let mut offset = 0u32;

        for exon in &self.exons {
            let exon_tx_end = offset + exon.len();
            let s = tx_start.max(offset);
            let e = tx_end.min(exon_tx_end);
            if s < e {
                out.push(RefBlock {
                    start: exon.start + (s - offset),
                    end: exon.start + (e - offset),
                });
            }
            offset = exon_tx_end;
            if offset >= tx_end {
                break;
            }
        }

        out
    }

    /// Positional indices of the first and last exon used by read blocks that follow
    /// this transcript's exon layout, or `None` when they do not.
    ///
    /// Rules:
    /// - every block lies inside one exon
    /// - consecutive blocks use consecutive exons
    /// - a block followed by another must end at its exon's end
    /// - a block preceded by another must start at its exon's start
    pub fn fit_blocks(&self, read_blocks: &[RefBlock]) -> Option<(usize, usize)> {
        if read_blocks.is_empty() {
            return None;
        }

        let mut exon_idx = 0usize;
        let mut first: Option<usize> = None;
        let mut prev: Option<usize> = None;

        for (block_idx, &read_block) in read_blocks.iter().enumerate() {
            // Move exon pointer until we reach an exon whose end is beyond the block start.
            while exon_idx < self.exons.len() && self.exons[exon_idx].end <= read_block.start {
                exon_idx += 1;
            }
            if exon_idx == self.exons.len() {
                return None;
            }

            let exon = self.exons[exon_idx];
            if !exon.contains(read_block) {
                return None;
            }

            if let Some(p) = prev {
                if p + 1 != exon_idx || read_block.start != exon.start {
                    return None;
                }
            }
            if block_idx + 1 < read_blocks.len() && read_block.end != exon.end {
                return None;
            }

            first.get_or_insert(exon_idx);
            prev = Some(exon_idx);
        }

        Some((first?, prev?))
    }

    /// How a two-read fragment supports this transcript, if at all.
    ///
    /// Reads are given as genomic blocks. The fragment is rejected when its exonic
    /// length exceeds `max_fragment_length`, or when overlapping reads leave an exon
    /// of this transcript uncovered between them.
    pub fn fragment_support(
        &self,
        read1: &[RefBlock],
        read2: &[RefBlock],
        max_fragment_length: u32,
    ) -> Option<FragmentMatchType> {
        let (a0, a1) = self.fit_blocks(read1)?;
        let (b0, b1) = self.fit_blocks(read2)?;

        let span = RefBlock::span_of(&[read1, read2].concat())?;
        if self.exonic_length_between(span.start, span.end) > max_fragment_length {
            return None;
        }

        let (lo, hi) = if a0 <= b0 { ((a0, a1), (b0, b1)) } else { ((b0, b1), (a0, a1)) };
        let reads_overlap = RefBlock::span_of(read1)?.overlaps(RefBlock::span_of(read2)?);
        if reads_overlap && hi.0 > lo.1 + 1 {
            return None;
        }

        if read1.len() > 1 || read2.len() > 1 {
            return Some(FragmentMatchType::Spliced);
        }

        let mut used = vec![a0, a1, b0, b1];
        used.sort_unstable();
        used.dedup();
        if used.len() > 1 {
            Some(FragmentMatchType::Long)
        } else {
            Some(FragmentMatchType::Short)
        }
    }
}
