use crate::model::types::{TranscriptId, GeneId};
use crate::types::{RefBlock, Strand};
use serde::{Serialize, Deserialize};

/// Gene locus: stable id, one or more names/aliases and its transcript ids.
///
/// Notes:
/// - `names[0]` is treated as the primary display name (if present).
/// - additional names are aliases (deduped).
/// - `start`/`end` cover all of the gene's transcripts once finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gene {
    pub id: GeneId,
    pub stable_id: String,
    pub names: Vec<String>,
    pub chr_id: usize,
    pub chr: String,
    pub strand: Strand,
    pub start: u32,
    pub end: u32,
    transcript_ids: Vec<TranscriptId>,
}

impl Gene {
    pub fn new(
        id: GeneId,
        stable_id: impl Into<String>,
        primary_name: impl Into<String>,
        chr_id: usize,
        chr: impl Into<String>,
        strand: Strand,
    ) -> Self {
        Self {
            id,
            stable_id: stable_id.into(),
            names: vec![primary_name.into()],
            chr_id,
            chr: chr.into(),
            strand,
            start: u32::MAX,
            end: 0,
            transcript_ids: Vec::new(),
        }
    }

    /// Add an alias/alternative name (deduped).
    pub fn add_name(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
    }

    /// Primary name (if any).
    pub fn primary_name(&self) -> Option<&str> {
        self.names.first().map(|s| s.as_str())
    }

    pub fn add_transcript(&mut self, tx_id: TranscriptId) {
        self.transcript_ids.push(tx_id);
    }

    pub fn transcript_ids(&self) -> &[TranscriptId] {
        &self.transcript_ids
    }

    /// Widen the gene bounds to include a transcript span.
    pub fn extend_span(&mut self, start: u32, end: u32) {
        self.start = self.start.min(start);
        self.end = self.end.max(end);
    }

    /// Gene span, or `None` for a gene without any transcript span.
    pub fn span(&self) -> Option<RefBlock> {
        (self.start < self.end).then_some(RefBlock { start: self.start, end: self.end })
    }

    /// Sort transcript IDs and remove duplicates.
    pub fn finalize(&mut self) {
        self.transcript_ids.sort_unstable();
        self.transcript_ids.dedup();
    }
}
