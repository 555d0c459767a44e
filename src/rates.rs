//! Expected category rates per transcript, simulated from the annotation alone.
//!
//! Every transcript (and every gene with at least two disjoint exonic blocks, as an
//! unspliced source) becomes one column of a category x column matrix. A column
//! holds the probability of each fragment category given that source.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ndarray::{Array2, Axis};
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::model::gene::Gene;
use crate::model::transcript::Transcript;
use crate::model::types::{CategoryKey, FragmentMatchType, GeneId, TranscriptId};
use crate::types::RefBlock;

/// Source of one matrix column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatrixColumn {
    Transcript(TranscriptId),
    Unspliced(GeneId),
}

impl fmt::Display for MatrixColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixColumn::Transcript(t) => write!(f, "T{t}"),
            MatrixColumn::Unspliced(g) => write!(f, "G{g}:UNSPLICED"),
        }
    }
}

/// Category definitions for one gene collection.
///
/// Rows are categories in key order, columns are sources. Each column sums to 1,
/// or to 0 when its source produced no simulated fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryMatrix {
    pub categories: Vec<CategoryKey>,
    pub columns: Vec<MatrixColumn>,
    pub data: Array2<f64>,
}

impl CategoryMatrix {
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() || self.columns.is_empty()
    }

    /// Shape agrees with the category and column lists.
    pub fn is_consistent(&self) -> bool {
        self.data.dim() == (self.categories.len(), self.columns.len())
    }

    pub fn category_index(&self, key: &CategoryKey) -> Option<usize> {
        self.categories.binary_search(key).ok()
    }

    pub fn column_index(&self, column: MatrixColumn) -> Option<usize> {
        self.columns.iter().position(|&c| c == column)
    }

    pub fn column_sums(&self) -> Vec<f64> {
        self.data.sum_axis(Axis(0)).to_vec()
    }
}

/// Genes whose transcripts cover at least two disjoint exonic blocks.
pub fn unspliced_genes(genes: &[&Gene], transcripts: &[&Transcript]) -> Vec<GeneId> {
    genes
        .iter()
        .filter(|g| {
            let exons: Vec<RefBlock> = transcripts
                .iter()
                .filter(|t| t.gene_id == g.id)
                .flat_map(|t| t.exons().iter().copied())
                .collect();
            RefBlock::merge_blocks(&exons).len() >= 2
        })
        .map(|g| g.id)
        .collect()
}

/// Build the category matrix for a gene collection. Columns are simulated in parallel.
pub fn generate_rates(genes: &[&Gene], transcripts: &[&Transcript], config: &EngineConfig) -> CategoryMatrix {
    let mut columns: Vec<MatrixColumn> = transcripts.iter().map(|t| MatrixColumn::Transcript(t.id)).collect();
    columns.sort_unstable();
    let mut unspliced: Vec<MatrixColumn> = unspliced_genes(genes, transcripts)
        .into_iter()
        .map(MatrixColumn::Unspliced)
        .collect();
    unspliced.sort_unstable();
    columns.extend(unspliced);

    let counts: Vec<BTreeMap<CategoryKey, f64>> = columns
        .par_iter()
        .map(|&column| match column {
            MatrixColumn::Transcript(tid) => transcripts
                .iter()
                .find(|t| t.id == tid)
                .map(|t| simulate_transcript(t, transcripts, config))
                .unwrap_or_default(),
            MatrixColumn::Unspliced(gid) => genes
                .iter()
                .find(|g| g.id == gid)
                .map(|g| simulate_unspliced(g, genes, transcripts, config))
                .unwrap_or_default(),
        })
        .collect();

    let categories: Vec<CategoryKey> = counts
        .iter()
        .flat_map(|c| c.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut data = Array2::<f64>::zeros((categories.len(), columns.len()));
    for (col, column_counts) in counts.iter().enumerate() {
        for (key, &count) in column_counts {
            if let Ok(row) = categories.binary_search(key) {
                data[[row, col]] = count;
            }
        }
    }
    normalize_columns(&mut data);

    CategoryMatrix { categories, columns, data }
}

/// Scale every column with a non-zero sum to sum 1.
pub fn normalize_columns(data: &mut Array2<f64>) {
    for mut column in data.axis_iter_mut(Axis(1)) {
        let sum = column.sum();
        if sum > 0.0 {
            column.mapv_inplace(|v| v / sum);
        }
    }
}

/// Category of a simulated read pair: every transcript supporting it, tagged with
/// the best match type among them.
fn simulated_category(
    read1: &[RefBlock],
    read2: &[RefBlock],
    transcripts: &[&Transcript],
    max_fragment_length: u32,
) -> Option<CategoryKey> {
    let mut ids = Vec::new();
    let mut best: Option<FragmentMatchType> = None;
    for t in transcripts {
        if let Some(mt) = t.fragment_support(read1, read2, max_fragment_length) {
            ids.push(t.id);
            best = best.max(Some(mt));
        }
    }
    best.map(|mt| CategoryKey::transcripts(ids, mt))
}

fn simulate_transcript(
    source: &Transcript,
    transcripts: &[&Transcript],
    config: &EngineConfig,
) -> BTreeMap<CategoryKey, f64> {
    let mut counts: BTreeMap<CategoryKey, f64> = BTreeMap::new();
    let length = source.length();

    for &(frag_len, weight) in &config.fragment_lengths {
        if frag_len == 0 || frag_len > length || frag_len > config.max_fragment_length || weight <= 0.0 {
            continue;
        }
        let read_len = config.read_length.min(frag_len);

        for offset in 0..=(length - frag_len) {
            let read1 = source.to_genomic(offset, offset + read_len);
            let read2 = source.to_genomic(offset + frag_len - read_len, offset + frag_len);
            if let Some(key) = simulated_category(&read1, &read2, transcripts, config.max_fragment_length) {
                *counts.entry(key).or_insert(0.0) += weight;
            }
        }
    }
    counts
}

fn simulate_unspliced(
    gene: &Gene,
    genes: &[&Gene],
    transcripts: &[&Transcript],
    config: &EngineConfig,
) -> BTreeMap<CategoryKey, f64> {
    let mut counts: BTreeMap<CategoryKey, f64> = BTreeMap::new();
    let Some(span) = gene.span() else {
        return counts;
    };
    let step = config.unspliced_window_step.max(1) as usize;

    for &(frag_len, weight) in &config.fragment_lengths {
        if frag_len == 0 || frag_len > span.len() || frag_len > config.max_fragment_length || weight <= 0.0 {
            continue;
        }
        let read_len = config.read_length.min(frag_len);

        for start in (span.start..=(span.end - frag_len)).step_by(step) {
            let read1 = [RefBlock { start, end: start + read_len }];
            let read2 = [RefBlock { start: start + frag_len - read_len, end: start + frag_len }];

            let key = simulated_category(&read1, &read2, transcripts, config.max_fragment_length)
                .unwrap_or_else(|| {
                    let window = RefBlock { start, end: start + frag_len };
                    let overlapping: Vec<GeneId> = genes
                        .iter()
                        .filter(|g| g.span().is_some_and(|s| s.overlaps(window)))
                        .map(|g| g.id)
                        .collect();
                    CategoryKey::unspliced(overlapping)
                });
            *counts.entry(key).or_insert(0.0) += weight;
        }
    }
    counts
}
