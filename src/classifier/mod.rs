//! Per-read and per-fragment transcript classification.

pub mod fragment;

pub use fragment::{classify_fragment, FragmentContext, FragmentOutcome, TranscriptMatch};

use std::collections::BTreeMap;

use crate::mapper::{MappedRead, RegionHit};
use crate::model::transcript::Transcript;
use crate::model::types::{RegionMatchType, TransMatchType, TranscriptId};
use crate::region::RegionModel;

/// Classify one mapped read against every transcript whose regions it touches.
///
/// Transcripts the read never touches get no entry.
pub fn classify_read(read: &mut MappedRead, model: &RegionModel, transcripts: &[&Transcript]) {
    let mut classes = BTreeMap::new();
    for tx in transcripts {
        if let Some(class) = classify_read_for_transcript(read, model, tx.id) {
            classes.insert(tx.id, class);
        }
    }
    read.trans_classes = classes;
}

/// Verdict of one read for one transcript, `None` when the read does not touch it.
pub fn classify_read_for_transcript(
    read: &MappedRead,
    model: &RegionModel,
    trans_id: TranscriptId,
) -> Option<TransMatchType> {
    let mut hits: Vec<&RegionHit> = read
        .hits
        .iter()
        .filter(|h| {
            let r = model.region(h.region);
            r.is_exon() && r.has_transcript(trans_id)
        })
        .collect();

    if hits.is_empty() {
        let in_intron = read.hits.iter().any(|h| {
            let r = model.region(h.region);
            !r.is_exon() && r.has_transcript(trans_id)
        });
        return in_intron.then_some(TransMatchType::Unspliced);
    }

    let block_count = read.blocks.len();
    if block_count == 1 && hits.len() == 1 && hits[0].match_type == RegionMatchType::ExonIntron {
        return Some(TransMatchType::Unspliced);
    }

    let mut regions: Vec<usize> = hits.iter().map(|h| h.region).collect();
    regions.sort_unstable();
    regions.dedup();
    if block_count > 1 && regions.len() < block_count {
        return Some(TransMatchType::Alt);
    }

    if hits.iter().any(|h| h.match_type == RegionMatchType::ExonIntron) {
        return Some(TransMatchType::Unspliced);
    }

    // one region per block and one block per region
    if hits.len() != block_count || regions.len() != block_count {
        return Some(TransMatchType::Alt);
    }

    hits.sort_by_key(|h| h.block_idx);
    let layout = model.transcript_exons(trans_id);
    let mut prev_idx: Option<usize> = None;

    for (i, hit) in hits.iter().enumerate() {
        if hit.block_idx != i {
            return Some(TransMatchType::Alt);
        }
        let Some(exon_idx) = layout.iter().position(|&id| id == hit.region) else {
            return Some(TransMatchType::Alt);
        };
        if let Some(p) = prev_idx {
            if exon_idx != p + 1 {
                return Some(TransMatchType::Alt);
            }
        }
        prev_idx = Some(exon_idx);

        let block = read.blocks[hit.block_idx];
        let region = model.region(hit.region);
        if i > 0 && block.start != region.start() {
            return Some(TransMatchType::Alt);
        }
        if i + 1 < block_count && block.end != region.end() {
            return Some(TransMatchType::Alt);
        }
    }

    if block_count >= 2 {
        Some(TransMatchType::SpliceJunction)
    } else {
        Some(TransMatchType::Exonic)
    }
}
