//! Alignment records and the source that serves them by region.

pub mod cigar;
pub mod sam;

pub use cigar::{Cigar, CigarOp};
pub use sam::SamSource;

use crate::error::Result;
use crate::types::RefBlock;

// SAM flag bits
pub const FLAG_PAIRED: u16 = 0x1;
pub const FLAG_UNMAPPED: u16 = 0x4;
pub const FLAG_MATE_UNMAPPED: u16 = 0x8;
pub const FLAG_REVERSE: u16 = 0x10;
pub const FLAG_MATE_REVERSE: u16 = 0x20;
pub const FLAG_SECONDARY: u16 = 0x100;
pub const FLAG_DUPLICATE: u16 = 0x400;
pub const FLAG_SUPPLEMENTARY: u16 = 0x800;

/// One parsed alignment. Positions are 0-based.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub read_id: String,
    pub flags: u16,
    pub chr: String,
    /// Leftmost aligned reference base.
    pub pos: u32,
    pub mapq: u8,
    pub cigar: Cigar,
    /// Mate chromosome, `None` when unknown.
    pub mate_chr: Option<String>,
    pub mate_pos: u32,
    pub insert_size: i64,
    pub seq: String,
}

impl AlignmentRecord {
    #[inline]
    fn flag(&self, bit: u16) -> bool {
        self.flags & bit != 0
    }

    pub fn is_paired(&self) -> bool {
        self.flag(FLAG_PAIRED)
    }

    pub fn is_unmapped(&self) -> bool {
        self.flag(FLAG_UNMAPPED)
    }

    pub fn is_mate_unmapped(&self) -> bool {
        self.flag(FLAG_MATE_UNMAPPED)
    }

    pub fn is_reverse(&self) -> bool {
        self.flag(FLAG_REVERSE)
    }

    pub fn is_mate_reverse(&self) -> bool {
        self.flag(FLAG_MATE_REVERSE)
    }

    pub fn is_secondary(&self) -> bool {
        self.flag(FLAG_SECONDARY)
    }

    pub fn is_supplementary(&self) -> bool {
        self.flag(FLAG_SUPPLEMENTARY)
    }

    pub fn is_duplicate(&self) -> bool {
        self.flag(FLAG_DUPLICATE)
    }

    /// Exclusive end of the aligned reference span.
    pub fn end(&self) -> u32 {
        self.pos + self.cigar.reference_len()
    }

    pub fn blocks(&self) -> Vec<RefBlock> {
        self.cigar.mapped_blocks(self.pos)
    }

    pub fn mate_on_other_chromosome(&self) -> bool {
        mate_on_other_chromosome(self.flags, &self.chr, self.mate_chr.as_deref())
    }

    pub fn expects_mate(&self) -> bool {
        expects_mate(self.flags, &self.chr, self.mate_chr.as_deref())
    }
}

/// True when a mapped mate sits on another chromosome.
pub fn mate_on_other_chromosome(flags: u16, chr: &str, mate_chr: Option<&str>) -> bool {
    flags & FLAG_PAIRED != 0 && flags & FLAG_MATE_UNMAPPED == 0 && mate_chr.is_some_and(|m| m != chr)
}

/// True when the mate is expected to show up in the same query window.
pub fn expects_mate(flags: u16, chr: &str, mate_chr: Option<&str>) -> bool {
    flags & FLAG_PAIRED != 0 && flags & FLAG_MATE_UNMAPPED == 0 && !mate_on_other_chromosome(flags, chr, mate_chr)
}

/// Bounded region queries over aligned reads.
///
/// Implementations are shared read-only between worker threads.
pub trait AlignmentSource: Sync {
    /// Records whose aligned span overlaps `[start, end)` on `chr`, sorted by position.
    fn query(&self, chr: &str, start: u32, end: u32) -> Result<Vec<AlignmentRecord>>;
}
