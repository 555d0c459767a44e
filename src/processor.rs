//! Drives alignment records of one gene collection through mapping, pairing
//! and classification.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use crate::alignment::AlignmentRecord;
use crate::cache::AnnotationProvider;
use crate::classifier::{classify_fragment, classify_read, fragment::{is_chimeric, is_discarded}, FragmentContext, FragmentOutcome};
use crate::config::EngineConfig;
use crate::mapper::MappedRead;
use crate::model::gene::Gene;
use crate::model::transcript::Transcript;
use crate::state::GeneReadState;
use crate::types::RefBlock;

// chromosome, lower read start, upper read start, lower read orientation
type DuplicateKey = (String, u32, u32, bool);

/// Reads in, counted fragments out, for one gene collection at a time.
///
/// Owns the pairing buffer. Call [`FragmentProcessor::finish`] at the end of each
/// collection window; it processes reads whose mate never arrived and clears
/// every per-window structure.
pub struct FragmentProcessor<'a> {
    config: &'a EngineConfig,
    annotation: &'a dyn AnnotationProvider,
    genes: Vec<&'a Gene>,
    transcripts: Vec<&'a Transcript>,
    label: String,
    pending: HashMap<String, MappedRead>,
    seen: HashSet<DuplicateKey>,
    read_count: usize,
    cap_reached: bool,
}

impl<'a> FragmentProcessor<'a> {
    pub fn new(
        config: &'a EngineConfig,
        annotation: &'a dyn AnnotationProvider,
        genes: Vec<&'a Gene>,
        transcripts: Vec<&'a Transcript>,
    ) -> Self {
        let label = genes.iter().map(|g| g.stable_id.as_str()).collect::<Vec<_>>().join(",");
        Self {
            config,
            annotation,
            genes,
            transcripts,
            label,
            pending: HashMap::new(),
            seen: HashSet::new(),
            read_count: 0,
            cap_reached: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Reads waiting for their mate.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Process one window of records, then finish the window.
    pub fn process_records<I>(&mut self, state: &mut GeneReadState, records: I)
    where
        I: IntoIterator<Item = AlignmentRecord>,
    {
        for record in records {
            if self.cap_reached {
                break;
            }
            self.process_record(state, record);
        }
        self.finish(state);
    }

    pub fn process_record(&mut self, state: &mut GeneReadState, record: AlignmentRecord) {
        if record.is_unmapped() || record.is_secondary() || record.is_supplementary() || record.chr != state.chr {
            return;
        }

        if let Some(cap) = self.config.read_cap() {
            if self.read_count >= cap {
                if !self.cap_reached {
                    warn!("{}: read cap of {} reached, remaining records ignored", self.label, cap);
                    self.cap_reached = true;
                }
                return;
            }
        }
        self.read_count += 1;

        let read = MappedRead::from_record(record);
        if !read.expects_mate() {
            self.process_fragment(state, vec![read]);
            return;
        }

        match self.pending.remove(&read.read_id) {
            Some(mate) => self.process_fragment(state, vec![mate, read]),
            None => {
                self.pending.insert(read.read_id.clone(), read);
            }
        }
    }

    /// Process lone reads as single-read fragments and clear the window.
    pub fn finish(&mut self, state: &mut GeneReadState) {
        let mut lone: Vec<MappedRead> = self.pending.drain().map(|(_, r)| r).collect();
        if !lone.is_empty() {
            debug!("{}: {} reads without a mate in the window", self.label, lone.len());
        }
        lone.sort_by(|a, b| (a.start, &a.read_id).cmp(&(b.start, &b.read_id)));
        for read in lone {
            self.process_fragment(state, vec![read]);
        }
        self.clear();
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.seen.clear();
        self.read_count = 0;
        self.cap_reached = false;
    }

    fn context<'s>(&'s self, state: &'s GeneReadState) -> FragmentContext<'s> {
        FragmentContext {
            model: &state.model,
            transcripts: &self.transcripts,
            genes: &self.genes,
            span: state.span,
            max_fragment_length: self.config.max_fragment_length,
            annotation: self.annotation,
        }
    }

    fn is_duplicate(&mut self, reads: &[MappedRead]) -> bool {
        let flagged = reads.iter().any(MappedRead::is_duplicate);
        let marked = self.config.mark_duplicates && !self.seen.insert(duplicate_key(reads));
        flagged || marked
    }

    pub fn process_fragment(&mut self, state: &mut GeneReadState, mut reads: Vec<MappedRead>) {
        if is_chimeric(&reads) {
            state.record_outcome(&FragmentOutcome::Chimeric, &reads);
            return;
        }

        if is_discarded(&self.context(state), &reads) {
            return;
        }

        if self.is_duplicate(&reads) {
            state.record_duplicate(self.config.drop_duplicates);
            if self.config.drop_duplicates {
                return;
            }
        }

        for read in reads.iter_mut() {
            read.map_regions(&mut state.model);
            classify_read(read, &state.model, &self.transcripts);
        }

        let outcome = classify_fragment(&self.context(state), &mut reads);
        state.record_outcome(&outcome, &reads);

        if matches!(outcome, FragmentOutcome::Alt { has_splice_gap: true }) && self.config.find_alt_junctions {
            state.junctions.process_fragment(&reads, &state.model, &self.transcripts);
        }
    }
}

fn duplicate_key(reads: &[MappedRead]) -> DuplicateKey {
    match reads {
        [a, b] => {
            let (lower, upper) = if (a.start, a.is_reverse) <= (b.start, b.is_reverse) { (a, b) } else { (b, a) };
            (lower.chr.clone(), lower.start, upper.start, lower.is_reverse)
        }
        [a, ..] => (a.chr.clone(), a.start, a.mate_start, a.is_reverse),
        [] => (String::new(), 0, 0, false),
    }
}

/// Combined spans of the fragments in a window, pairing records by read id.
pub fn fragment_spans(records: &[AlignmentRecord]) -> Vec<RefBlock> {
    let mut spans: HashMap<&str, RefBlock> = HashMap::new();
    for r in records {
        if r.is_unmapped() || r.is_secondary() || r.is_supplementary() {
            continue;
        }
        let Some(span) = RefBlock::span_of(&r.blocks()) else {
            continue;
        };
        spans
            .entry(r.read_id.as_str())
            .and_modify(|s| {
                s.start = s.start.min(span.start);
                s.end = s.end.max(span.end);
            })
            .or_insert(span);
    }
    let mut out: Vec<RefBlock> = spans.into_values().collect();
    out.sort_unstable();
    out
}
