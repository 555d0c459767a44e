use std::fmt;

use crate::error::{QuantError, Result};
use crate::types::RefBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    Match,
    Insertion,
    Deletion,
    Skip,
    SoftClip,
    HardClip,
    Padding,
    SeqMatch,
    SeqMismatch,
}

impl CigarOp {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'M' => CigarOp::Match,
            'I' => CigarOp::Insertion,
            'D' => CigarOp::Deletion,
            'N' => CigarOp::Skip,
            'S' => CigarOp::SoftClip,
            'H' => CigarOp::HardClip,
            'P' => CigarOp::Padding,
            '=' => CigarOp::SeqMatch,
            'X' => CigarOp::SeqMismatch,
            _ => return None,
        })
    }

    fn as_char(self) -> char {
        match self {
            CigarOp::Match => 'M',
            CigarOp::Insertion => 'I',
            CigarOp::Deletion => 'D',
            CigarOp::Skip => 'N',
            CigarOp::SoftClip => 'S',
            CigarOp::HardClip => 'H',
            CigarOp::Padding => 'P',
            CigarOp::SeqMatch => '=',
            CigarOp::SeqMismatch => 'X',
        }
    }

    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOp::Match | CigarOp::Deletion | CigarOp::Skip | CigarOp::SeqMatch | CigarOp::SeqMismatch
        )
    }
}

/// Parsed CIGAR operator string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cigar {
    ops: Vec<(CigarOp, u32)>,
}

impl Cigar {
    /// Parse a SAM CIGAR string. `*` gives an empty CIGAR.
    pub fn parse(s: &str) -> Result<Self> {
        let bad = |reason: &str| QuantError::Cigar {
            cigar: s.to_string(),
            reason: reason.to_string(),
        };

        if s == "*" {
            return Ok(Cigar::default());
        }

        let mut ops = Vec::new();
        let mut len: Option<u32> = None;

        for c in s.chars() {
            if let Some(d) = c.to_digit(10) {
                let cur = len.unwrap_or(0);
                len = Some(
                    cur.checked_mul(10)
                        .and_then(|v| v.checked_add(d))
                        .ok_or_else(|| bad("operation length overflows"))?,
                );
                continue;
            }

            let op = CigarOp::from_char(c).ok_or_else(|| bad(&format!("unknown operation '{c}'")))?;
            let n = len.take().ok_or_else(|| bad("operation without a length"))?;
            if n == 0 {
                return Err(bad("zero-length operation"));
            }
            ops.push((op, n));
        }

        if len.is_some() {
            return Err(bad("trailing length without an operation"));
        }
        if ops.is_empty() {
            return Err(bad("empty"));
        }

        Ok(Cigar { ops })
    }

    pub fn ops(&self) -> &[(CigarOp, u32)] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Bases of reference covered from the first to the last aligned base.
    pub fn reference_len(&self) -> u32 {
        self.ops
            .iter()
            .filter(|(op, _)| op.consumes_reference())
            .map(|&(_, n)| n)
            .sum()
    }

    /// Walk the operations from 0-based reference position `pos` and return the
    /// ordered contiguous mapped reference blocks.
    ///
    /// - `M`, `=`, `X` extend the current block
    /// - `D` advances the reference and keeps the block open
    /// - `N` closes the block
    /// - `I`, `S` advance only the read; `H`, `P` consume nothing
    pub fn mapped_blocks(&self, pos: u32) -> Vec<RefBlock> {
        let mut blocks = Vec::new();
        let mut ref_pos = pos;
        let mut block_start: Option<u32> = None;

        for &(op, n) in &self.ops {
            match op {
                CigarOp::Match | CigarOp::SeqMatch | CigarOp::SeqMismatch => {
                    block_start.get_or_insert(ref_pos);
                    ref_pos += n;
                }
                CigarOp::Deletion => {
                    ref_pos += n;
                }
                CigarOp::Skip => {
                    if let Some(start) = block_start.take() {
                        if ref_pos > start {
                            blocks.push(RefBlock { start, end: ref_pos });
                        }
                    }
                    ref_pos += n;
                }
                CigarOp::Insertion | CigarOp::SoftClip | CigarOp::HardClip | CigarOp::Padding => {}
            }
        }

        if let Some(start) = block_start {
            if ref_pos > start {
                blocks.push(RefBlock { start, end: ref_pos });
            }
        }

        blocks
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ops.is_empty() {
            return write!(f, "*");
        }
        for &(op, n) in &self.ops {
            write!(f, "{}{}", n, op.as_char())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spliced_read_splits_at_skips() {
        let cigar = Cigar::parse("5S20M100N30M").unwrap();
        assert_eq!(
            cigar.mapped_blocks(1000),
            vec![RefBlock::new(1000, 1020), RefBlock::new(1120, 1150)]
        );
        assert_eq!(cigar.reference_len(), 150);
    }

    #[test]
    fn deletions_keep_the_block_open() {
        let cigar = Cigar::parse("10M2D10M3I5=1X").unwrap();
        assert_eq!(cigar.mapped_blocks(0), vec![RefBlock::new(0, 28)]);
    }

    #[test]
    fn hard_clips_and_padding_consume_nothing() {
        let cigar = Cigar::parse("3H2S10M1P10M4S").unwrap();
        assert_eq!(cigar.mapped_blocks(50), vec![RefBlock::new(50, 70)]);
        assert_eq!(cigar.to_string(), "3H2S10M1P10M4S");
    }

    #[test]
    fn malformed_strings_are_errors() {
        for bad in ["", "M", "10", "10Q", "0M", "99999999999M"] {
            assert!(
                matches!(Cigar::parse(bad), Err(QuantError::Cigar { .. })),
                "{bad} should not parse"
            );
        }
        assert!(Cigar::parse("*").unwrap().is_empty());
    }
}
