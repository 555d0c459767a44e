use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Internal numeric IDs (indexes into Vecs).
pub type GeneId = usize;
pub type TranscriptId = usize;

/// How one mapped read interval relates to one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionMatchType {
    /// No overlap at all.
    None,

    /// Interval starts or ends exactly at a region boundary that has a neighbour on that side.
    ExonBoundary,

    /// Interval lies inside the exon without touching a spliceable boundary.
    WithinExon,

    /// Interval bounds equal the exon bounds.
    ExonMatch,

    /// Interval crosses an exon boundary into flanking non-exonic sequence.
    ExonIntron,

    /// Interval lies entirely in intronic space.
    Intronic,
}

impl RegionMatchType {
    /// True for the three match types that keep the interval inside the exon.
    pub fn is_exonic(self) -> bool {
        matches!(
            self,
            RegionMatchType::ExonBoundary | RegionMatchType::WithinExon | RegionMatchType::ExonMatch
        )
    }
}

impl fmt::Display for RegionMatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegionMatchType::None => "NONE",
            RegionMatchType::ExonBoundary => "EXON_BOUNDARY",
            RegionMatchType::WithinExon => "WITHIN_EXON",
            RegionMatchType::ExonMatch => "EXON_MATCH",
            RegionMatchType::ExonIntron => "EXON_INTRON",
            RegionMatchType::Intronic => "INTRONIC",
        };
        write!(f, "{s}")
    }
}

/// Per-read, per-transcript classification state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransMatchType {
    Unknown,
    /// Read does not follow the transcript's exon layout.
    Alt,
    /// Read contains intronic sequence relative to the transcript.
    Unspliced,
    /// Read lies inside a single exon of the transcript.
    Exonic,
    /// Read follows two or more consecutive exons with exact junctions.
    SpliceJunction,
    /// Read fits, but another transcript was valid for the whole fragment.
    OtherTrans,
}

impl TransMatchType {
    pub fn is_supporting(self) -> bool {
        matches!(self, TransMatchType::Exonic | TransMatchType::SpliceJunction)
    }
}

impl fmt::Display for TransMatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransMatchType::Unknown => "UNKNOWN",
            TransMatchType::Alt => "ALT",
            TransMatchType::Unspliced => "UNSPLICED",
            TransMatchType::Exonic => "EXONIC",
            TransMatchType::SpliceJunction => "SPLICE_JUNCTION",
            TransMatchType::OtherTrans => "OTHER_TRANS",
        };
        write!(f, "{s}")
    }
}

/// Gene-level fragment counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FragmentType {
    Total,
    TranscriptSupporting,
    Alt,
    Unspliced,
    ReadThrough,
    Chimeric,
    Duplicate,
}

impl FragmentType {
    pub const ALL: [FragmentType; 7] = [
        FragmentType::Total,
        FragmentType::TranscriptSupporting,
        FragmentType::Alt,
        FragmentType::Unspliced,
        FragmentType::ReadThrough,
        FragmentType::Chimeric,
        FragmentType::Duplicate,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FragmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FragmentType::Total => "TOTAL",
            FragmentType::TranscriptSupporting => "TRANSCRIPT_SUPPORTING",
            FragmentType::Alt => "ALT",
            FragmentType::Unspliced => "UNSPLICED",
            FragmentType::ReadThrough => "READ_THROUGH",
            FragmentType::Chimeric => "CHIMERIC",
            FragmentType::Duplicate => "DUPLICATE",
        };
        write!(f, "{s}")
    }
}

/// How a fragment supports one transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentMatchType {
    /// At least one read crosses an annotated junction of the transcript.
    Spliced,
    /// The reads sit in two or more exons without a read crossing a junction.
    Long,
    /// Both reads sit in one exon.
    Short,
    /// Fragment has intronic support only.
    Unspliced,
}

impl FragmentMatchType {
    pub const ALL: [FragmentMatchType; 4] = [
        FragmentMatchType::Spliced,
        FragmentMatchType::Long,
        FragmentMatchType::Short,
        FragmentMatchType::Unspliced,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Numeric ranking used for comparisons.
    /// Higher is better.
    pub fn rank(self) -> u8 {
        match self {
            FragmentMatchType::Spliced => 3,
            FragmentMatchType::Long => 2,
            FragmentMatchType::Short => 1,
            FragmentMatchType::Unspliced => 0,
        }
    }
}

impl Ord for FragmentMatchType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for FragmentMatchType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FragmentMatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FragmentMatchType::Spliced => "SPLICED",
            FragmentMatchType::Long => "LONG",
            FragmentMatchType::Short => "SHORT",
            FragmentMatchType::Unspliced => "UNSPLICED",
        };
        write!(f, "{s}")
    }
}

/// Key shared by simulated and observed category counts.
///
/// Transcript ids are kept sorted so equal sets always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CategoryKey {
    Transcripts {
        ids: Vec<TranscriptId>,
        match_type: FragmentMatchType,
    },
    Unspliced {
        genes: Vec<GeneId>,
    },
}

impl CategoryKey {
    pub fn transcripts(mut ids: Vec<TranscriptId>, match_type: FragmentMatchType) -> Self {
        ids.sort_unstable();
        ids.dedup();
        CategoryKey::Transcripts { ids, match_type }
    }

    pub fn unspliced(mut genes: Vec<GeneId>) -> Self {
        genes.sort_unstable();
        genes.dedup();
        CategoryKey::Unspliced { genes }
    }

    /// Render with caller-supplied id formatters, e.g. stable ids for reports.
    pub fn label<F, G>(&self, trans_name: F, gene_name: G) -> String
    where
        F: Fn(TranscriptId) -> String,
        G: Fn(GeneId) -> String,
    {
        match self {
            CategoryKey::Transcripts { ids, match_type } => {
                let names: Vec<String> = ids.iter().map(|&t| trans_name(t)).collect();
                format!("{}:{}", names.join("-"), match_type)
            }
            CategoryKey::Unspliced { genes } => {
                let names: Vec<String> = genes.iter().map(|&g| gene_name(g)).collect();
                format!("{}:UNSPLICED", names.join("-"))
            }
        }
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label(|t| t.to_string(), |g| g.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_keys_ignore_insertion_order() {
        let a = CategoryKey::transcripts(vec![3, 1, 2], FragmentMatchType::Short);
        let b = CategoryKey::transcripts(vec![1, 2, 3, 3], FragmentMatchType::Short);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "1-2-3:SHORT");
        assert_eq!(CategoryKey::unspliced(vec![4]).to_string(), "4:UNSPLICED");
    }

    #[test]
    fn fragment_match_types_rank_spliced_first() {
        let best = [FragmentMatchType::Short, FragmentMatchType::Spliced, FragmentMatchType::Long]
            .into_iter()
            .max();
        assert_eq!(best, Some(FragmentMatchType::Spliced));
    }
}
