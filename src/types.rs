use serde::{Serialize, Deserialize};
use std::fmt;

/// Genomic strand/orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize )]
pub enum Strand {
    Plus,
    Minus,
    Unknown,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strand::Plus => "+",
            Strand::Minus => "-",
            Strand::Unknown => ".",
        };
        write!(f, "{s}")
    }
}

/// A contiguous genomic interval.
/// Coordinates are 0-based, half-open: [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize )]
pub struct RefBlock {
    pub start: u32,
    pub end: u32,
}

impl RefBlock {
    /// Create a new block. Panics if start >= end.
    pub fn new(start: u32, end: u32) -> Self {
        assert!(start < end, "RefBlock requires start < end");
        Self { start, end }
    }

    #[inline]
    pub fn len(self) -> u32 {
        self.end - self.start
    }

    #[inline]
    pub fn overlaps(self, other: RefBlock) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[inline]
    pub fn contains(self, other: RefBlock) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    #[inline]
    pub fn contains_pos(self, pos: u32) -> bool {
        self.start <= pos && pos < self.end
    }

    /// The shared part of two blocks, if any.
    pub fn intersect(self, other: RefBlock) -> Option<RefBlock> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(RefBlock { start, end })
    }

    /// Compute splice junctions from an ordered list of blocks.
    ///
    /// Junction i is: (blocks[i].end, blocks[i+1].start),
    /// except that small gaps (<= allowed_gap_size) are treated as sequencing/alignment artifacts
    /// and do NOT produce junctions.
    ///
    /// For unspliced reads (len < 2), this returns an empty vec.
    pub fn junctions_from_blocks(blocks: &[RefBlock], allowed_gap_size: u32) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        if blocks.len() < 2 {
            return out;
        }

        for w in blocks.windows(2) {
            let a = w[0];
            let b = w[1];

            // Overlapping or touching blocks: not a junction
            if b.start <= a.end {
                continue;
            }

            if b.start - a.end <= allowed_gap_size {
                continue;
            }

            out.push((a.end, b.start));
        }

        out
    }

    /// Sort blocks by start and merge overlapping or adjacent ones.
    pub fn merge_blocks(blocks: &[RefBlock]) -> Vec<RefBlock> {
        let mut sorted = blocks.to_vec();
        if sorted.is_empty() {
            return sorted;
        }

        sorted.sort_by_key(|b| (b.start, b.end));

        let mut merged: Vec<RefBlock> = Vec::with_capacity(sorted.len());
        let mut cur = sorted[0];

        for &b in &sorted[1..] {
            if b.start <= cur.end {
                cur.end = cur.end.max(b.end);
            } else {
                merged.push(cur);
                cur = b;
            }
        }
        merged.push(cur);

        merged
    }

    /// Span of an ordered block list (min start, max end).
    pub fn span_of(blocks: &[RefBlock]) -> Option<RefBlock> {
        let start = blocks.iter().map(|b| b.start).min()?;
        let end = blocks.iter().map(|b| b.end).max()?;
        Some(RefBlock { start, end })
    }
}

impl fmt::Display for RefBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refblock_junctions() {
        let blocks = vec![RefBlock::new(10, 20), RefBlock::new(30, 40), RefBlock::new(50, 60)];
        assert_eq!(RefBlock::junctions_from_blocks(&blocks, 0), vec![(20, 30), (40, 50)]);
    }

    #[test]
    fn small_gaps_are_not_junctions() {
        let blocks = vec![RefBlock::new(10, 20), RefBlock::new(23, 40)];
        assert!(RefBlock::junctions_from_blocks(&blocks, 5).is_empty());
    }

    #[test]
    fn merge_sorts_and_merges() {
        let merged = RefBlock::merge_blocks(&[
            RefBlock::new(200, 210),
            RefBlock::new(100, 120),
            RefBlock::new(110, 130), // overlap with second
            RefBlock::new(210, 220), // adjacent
        ]);

        assert_eq!(merged, vec![RefBlock::new(100, 130), RefBlock::new(200, 220)]);
        assert_eq!(RefBlock::span_of(&merged), Some(RefBlock::new(100, 220)));
    }

    #[test]
    fn intersect_and_contains() {
        let a = RefBlock::new(100, 200);
        assert_eq!(a.intersect(RefBlock::new(150, 250)), Some(RefBlock::new(150, 200)));
        assert_eq!(a.intersect(RefBlock::new(200, 250)), None);
        assert!(a.contains_pos(100));
        assert!(!a.contains_pos(200));
    }
}
