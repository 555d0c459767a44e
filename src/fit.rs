//! Non-negative EM deconvolution of observed category counts into per-source
//! allocations.

use std::collections::BTreeMap;

use log::{debug, warn};
use ndarray::{Array1, Axis};

use crate::model::types::CategoryKey;
use crate::rates::{CategoryMatrix, MatrixColumn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitParams {
    pub max_iterations: usize,
    /// Relative to the observed total.
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub columns: Vec<MatrixColumn>,
    /// Fragments allocated to each column.
    pub allocations: Vec<f64>,
    pub categories: Vec<CategoryKey>,
    pub observed: Vec<f64>,
    pub fitted: Vec<f64>,
    /// Sum of |observed - fitted|.
    pub residual: f64,
    /// Residual as a percentage of the observed total, capped at 100.
    pub residual_pct: f64,
    /// Observed counts in categories the matrix does not define.
    pub skipped_counts: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl FitResult {
    pub fn allocation(&self, column: MatrixColumn) -> Option<f64> {
        self.columns
            .iter()
            .position(|&c| c == column)
            .map(|i| self.allocations[i])
    }

    pub fn fitted_count(&self, key: &CategoryKey) -> Option<f64> {
        self.categories.binary_search(key).ok().map(|i| self.fitted[i])
    }
}

/// Fit observed counts against the category matrix.
///
/// Returns `None`, with a warning, when the matrix is missing, empty or its
/// columns do not match `expected_columns`.
pub fn fit_abundances(
    label: &str,
    matrix: Option<&CategoryMatrix>,
    observed: &BTreeMap<CategoryKey, f64>,
    expected_columns: usize,
    params: FitParams,
) -> Option<FitResult> {
    let Some(matrix) = matrix else {
        warn!("{label}: no category matrix, fit skipped");
        return None;
    };
    if matrix.is_empty() {
        warn!("{label}: empty category matrix, fit skipped");
        return None;
    }
    if !matrix.is_consistent() || matrix.ncols() != expected_columns {
        warn!(
            "{label}: category matrix is {}x{} for {} sources, fit skipped",
            matrix.nrows(),
            matrix.ncols(),
            expected_columns
        );
        return None;
    }

    let mut obs = Array1::<f64>::zeros(matrix.nrows());
    let mut skipped_counts = 0.0;
    for (key, &count) in observed {
        match matrix.category_index(key) {
            Some(row) => obs[row] = count,
            None => {
                debug!("{label}: category {key} not simulated, {count} fragments skipped");
                skipped_counts += count;
            }
        }
    }

    let (alloc, iterations, converged) = em(matrix, &obs, params);
    let fitted = matrix.data.dot(&alloc);

    let residual: f64 = obs.iter().zip(fitted.iter()).map(|(o, f)| (o - f).abs()).sum();
    let total = obs.sum();
    let residual_pct = if total > 0.0 { (100.0 * residual / total).min(100.0) } else { 0.0 };

    Some(FitResult {
        columns: matrix.columns.clone(),
        allocations: alloc.to_vec(),
        categories: matrix.categories.clone(),
        observed: obs.to_vec(),
        fitted: fitted.to_vec(),
        residual,
        residual_pct,
        skipped_counts,
        iterations,
        converged,
    })
}

/// Multiplicative EM updates: a_j <- sum_i obs_i * M_ij * a_j / (M a)_i.
fn em(matrix: &CategoryMatrix, obs: &Array1<f64>, params: FitParams) -> (Array1<f64>, usize, bool) {
    let m = &matrix.data;
    let total = obs.sum();
    let col_sums = m.sum_axis(Axis(0));

    let active = col_sums.iter().filter(|&&s| s > 0.0).count();
    let mut alloc = Array1::<f64>::zeros(m.ncols());
    if total <= 0.0 || active == 0 {
        return (alloc, 0, true);
    }
    for (a, &s) in alloc.iter_mut().zip(col_sums.iter()) {
        if s > 0.0 {
            *a = total / active as f64;
        }
    }

    let threshold = params.tolerance * total;
    for iteration in 1..=params.max_iterations {
        let expected = m.dot(&alloc);
        let ratio: Array1<f64> = obs
            .iter()
            .zip(expected.iter())
            .map(|(&o, &e)| if e > 0.0 { o / e } else { 0.0 })
            .collect();

        let next = m.t().dot(&ratio) * &alloc;
        let change = next
            .iter()
            .zip(alloc.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        alloc = next;

        if change < threshold {
            return (alloc, iteration, true);
        }
    }
    (alloc, params.max_iterations, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::FragmentMatchType;
    use ndarray::array;

    fn params() -> FitParams {
        FitParams { max_iterations: 20_000, tolerance: 1e-12 }
    }

    fn key(ids: Vec<usize>) -> CategoryKey {
        CategoryKey::transcripts(ids, FragmentMatchType::Short)
    }

    fn matrix() -> CategoryMatrix {
        let mut categories = vec![key(vec![0]), key(vec![1]), key(vec![2]), key(vec![0, 1]), key(vec![0, 1, 2])];
        categories.sort();
        let mut data = ndarray::Array2::<f64>::zeros((5, 3));
        let rows = |k: &CategoryKey| categories.binary_search(k).unwrap();
        let cols = [
            [(vec![0], 0.5), (vec![0, 1], 0.3), (vec![0, 1, 2], 0.2)],
            [(vec![1], 0.4), (vec![0, 1], 0.4), (vec![0, 1, 2], 0.2)],
            [(vec![2], 0.7), (vec![0, 1, 2], 0.3), (vec![2], 0.0)],
        ];
        for (c, col) in cols.iter().enumerate() {
            for (ids, v) in col {
                data[[rows(&key(ids.clone())), c]] += v;
            }
        }
        CategoryMatrix {
            categories: categories.clone(),
            columns: vec![MatrixColumn::Transcript(0), MatrixColumn::Transcript(1), MatrixColumn::Transcript(2)],
            data,
        }
    }

    #[test]
    fn recovers_a_single_source() {
        let m = matrix();
        let n = 1000.0;
        let observed: BTreeMap<CategoryKey, f64> = m
            .categories
            .iter()
            .enumerate()
            .map(|(row, k)| (k.clone(), n * m.data[[row, 1]]))
            .filter(|(_, v)| *v > 0.0)
            .collect();

        let fit = fit_abundances("G", Some(&m), &observed, 3, params()).unwrap();
        assert!((fit.allocations[1] - n).abs() < 1e-3 * n, "{:?}", fit.allocations);
        assert!(fit.allocations[0] < 1e-3 * n);
        assert!(fit.allocations[2] < 1e-3 * n);
        assert!(fit.residual < 1e-2 * n);
        assert_eq!(fit.skipped_counts, 0.0);
    }

    #[test]
    fn recovers_a_simulated_transcript() {
        use crate::config::EngineConfig;
        use crate::model::gene::Gene;
        use crate::model::transcript::Transcript;
        use crate::rates::generate_rates;
        use crate::types::{RefBlock, Strand};

        let mk = |id, exons: &[(u32, u32)]| {
            let mut t = Transcript::new(id, 0, format!("T{id}"), format!("T{id}"), 0, Strand::Plus);
            for &(s, e) in exons {
                t.add_exon(RefBlock::new(s, e));
            }
            t.finalize();
            t
        };
        let t0 = mk(0, &[(100, 300), (400, 600)]);
        let t1 = mk(1, &[(100, 300), (700, 900)]);
        let t2 = mk(2, &[(1000, 1300)]);
        let mut g = Gene::new(0, "G", "G", 0, "chr1", Strand::Plus);
        for t in [&t0, &t1, &t2] {
            g.add_transcript(t.id);
            let (s, e) = t.span().unwrap();
            g.extend_span(s, e);
        }
        let config = EngineConfig {
            read_length: 40,
            fragment_lengths: vec![(80, 0.5), (150, 0.5)],
            unspliced_window_step: 10,
            ..EngineConfig::default()
        };
        let m = generate_rates(&[&g], &[&t0, &t1, &t2], &config);
        assert_eq!(m.ncols(), 4);

        let n = 500.0;
        let observed: BTreeMap<CategoryKey, f64> = m
            .categories
            .iter()
            .enumerate()
            .map(|(row, k)| (k.clone(), n * m.data[[row, 0]]))
            .filter(|(_, v)| *v > 0.0)
            .collect();

        let fit = fit_abundances("G", Some(&m), &observed, 4, params()).unwrap();
        assert!((fit.allocations[0] - n).abs() < 0.01 * n, "{:?}", fit.allocations);
        for other in &fit.allocations[1..] {
            assert!(*other < 0.01 * n, "{:?}", fit.allocations);
        }
        assert!(fit.residual < 0.01 * n);
    }

    #[test]
    fn unknown_categories_are_skipped() {
        let m = matrix();
        let mut observed = BTreeMap::new();
        observed.insert(key(vec![0]), 10.0);
        observed.insert(CategoryKey::unspliced(vec![7]), 4.0);

        let fit = fit_abundances("G", Some(&m), &observed, 3, params()).unwrap();
        assert_eq!(fit.skipped_counts, 4.0);
        assert!(fit.allocation(MatrixColumn::Transcript(0)).unwrap() > 0.0);
        assert_eq!(fit.fitted_count(&CategoryKey::unspliced(vec![7])), None);
    }

    #[test]
    fn residual_pct_is_bounded() {
        let m = matrix();
        for counts in [[1.0, 0.0, 0.0, 0.0, 0.0], [0.0, 5.0, 3.0, 0.0, 1.0], [9.0, 1.0, 1.0, 1.0, 40.0]] {
            let observed: BTreeMap<CategoryKey, f64> =
                m.categories.iter().cloned().zip(counts).collect();
            let fit = fit_abundances("G", Some(&m), &observed, 3, params()).unwrap();
            let total: f64 = counts.iter().sum();
            assert!((0.0..=100.0).contains(&fit.residual_pct), "{}", fit.residual_pct);
            assert!((fit.residual_pct - (100.0 * fit.residual / total).min(100.0)).abs() < 1e-9);
            assert!(fit.allocations.iter().all(|&a| a >= 0.0));
        }
    }

    #[test]
    fn residual_pct_is_relative_to_the_observed_total() {
        // only column 1 explains category {1}; it spreads 60% of its mass elsewhere
        let m = matrix();
        let mut observed = BTreeMap::new();
        observed.insert(key(vec![1]), 10.0);

        let fit = fit_abundances("G", Some(&m), &observed, 3, params()).unwrap();
        assert!((fit.allocations[1] - 10.0).abs() < 1e-9);
        assert!((fit.residual - 12.0).abs() < 1e-9);
        assert_eq!(fit.residual_pct, 100.0);

        let exact: BTreeMap<CategoryKey, f64> = m
            .categories
            .iter()
            .enumerate()
            .map(|(row, k)| (k.clone(), 10.0 * m.data[[row, 1]]))
            .collect();
        let fit = fit_abundances("G", Some(&m), &exact, 3, params()).unwrap();
        assert!(fit.residual_pct < 1.0);
    }

    #[test]
    fn bad_matrices_skip_the_fit() {
        let observed = BTreeMap::new();
        assert!(fit_abundances("G", None, &observed, 3, params()).is_none());

        let m = matrix();
        assert!(fit_abundances("G", Some(&m), &observed, 4, params()).is_none());

        let empty = CategoryMatrix {
            categories: Vec::new(),
            columns: Vec::new(),
            data: ndarray::Array2::zeros((0, 0)),
        };
        assert!(fit_abundances("G", Some(&empty), &observed, 0, params()).is_none());

        let inconsistent = CategoryMatrix { data: array![[1.0, 0.0]], ..matrix() };
        assert!(fit_abundances("G", Some(&inconsistent), &observed, 3, params()).is_none());
    }
}
