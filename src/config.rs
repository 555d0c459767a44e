//! Run configuration and shared constants.

use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use crate::error::{QuantError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// numeric defaults
pub const DEFAULT_READ_LENGTH: u32 = 76;
pub const DEFAULT_MAX_FRAGMENT_LENGTH: u32 = 550;
pub const DEFAULT_GENE_WINDOW_BUFFER: u32 = 1000;
pub const DEFAULT_MAX_READ_COUNT: usize = 1_000_000;
pub const DEFAULT_EM_MAX_ITERATIONS: usize = 1000;
pub const DEFAULT_EM_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_BIN_WIDTH: u32 = 1_000_000;

// output file names
pub const GENE_DATA: &str = "gene_data.tsv";
pub const TRANSCRIPT_DATA: &str = "transcript_data.tsv";
pub const ALT_SPLICE_JUNCTIONS: &str = "alt_splice_junctions.tsv";
pub const CATEGORY_COUNTS: &str = "category_counts.tsv";

// os
#[cfg(not(windows))]
const TICK_SETTINGS: (&str, u64) = ("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ", 80);
#[cfg(windows)]
const TICK_SETTINGS: (&str, u64) = (r"+-x| ", 200);

/// Assumed fragment length distribution: (length, relative frequency).
pub fn default_fragment_lengths() -> Vec<(u32, f64)> {
    vec![
        (50, 0.05),
        (100, 0.1),
        (150, 0.2),
        (200, 0.25),
        (250, 0.2),
        (300, 0.1),
        (400, 0.05),
        (550, 0.05),
    ]
}

/// Engine settings. Every field has a default, so a JSON file only needs to
/// name what it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Read length used when simulating expected rates.
    pub read_length: u32,
    /// Fragments longer than this in transcript space do not support a transcript.
    pub max_fragment_length: u32,
    /// Bases added on both sides of a gene collection for the alignment query.
    pub gene_window_buffer: u32,
    /// Records ingested per gene collection before the rest are ignored. 0 disables the cap.
    pub max_read_count: usize,
    pub fragment_lengths: Vec<(u32, f64)>,
    /// Process coordinate-overlapping genes as one unit.
    pub group_overlapping_genes: bool,
    /// Stop classifying fragments once they are counted as duplicates.
    pub drop_duplicates: bool,
    /// Detect duplicates by start/mate-start/orientation in addition to the SAM flag.
    pub mark_duplicates: bool,
    pub find_alt_junctions: bool,
    pub run_fit: bool,
    /// Step between simulated windows over a gene span for unspliced columns.
    pub unspliced_window_step: u32,
    pub em_max_iterations: usize,
    pub em_tolerance: f64,
    pub write_category_counts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_length: DEFAULT_READ_LENGTH,
            max_fragment_length: DEFAULT_MAX_FRAGMENT_LENGTH,
            gene_window_buffer: DEFAULT_GENE_WINDOW_BUFFER,
            max_read_count: DEFAULT_MAX_READ_COUNT,
            fragment_lengths: default_fragment_lengths(),
            group_overlapping_genes: true,
            drop_duplicates: false,
            mark_duplicates: false,
            find_alt_junctions: true,
            run_fit: true,
            unspliced_window_step: 1,
            em_max_iterations: DEFAULT_EM_MAX_ITERATIONS,
            em_tolerance: DEFAULT_EM_TOLERANCE,
            write_category_counts: true,
        }
    }
}

impl EngineConfig {
    /// Load settings from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)
            .map_err(|e| QuantError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_length == 0 {
            return Err(QuantError::Config("read_length must be positive".into()));
        }
        if self.max_fragment_length == 0 {
            return Err(QuantError::Config("max_fragment_length must be positive".into()));
        }
        if self.unspliced_window_step == 0 {
            return Err(QuantError::Config("unspliced_window_step must be positive".into()));
        }
        if self
            .fragment_lengths
            .iter()
            .any(|&(len, w)| len == 0 || !w.is_finite() || w < 0.0)
        {
            return Err(QuantError::Config(
                "fragment_lengths need positive lengths and non-negative weights".into(),
            ));
        }
        if self.em_tolerance.is_nan() || self.em_tolerance <= 0.0 {
            return Err(QuantError::Config("em_tolerance must be positive".into()));
        }
        Ok(())
    }

    /// Read cap for one gene collection, `None` when disabled.
    pub fn read_cap(&self) -> Option<usize> {
        (self.max_read_count > 0).then_some(self.max_read_count)
    }
}

/// return a pre-configured progress bar
pub fn get_progress_bar(length: u64, msg: &str) -> ProgressBar {
    let style = ProgressStyle::default_spinner()
        .tick_chars(TICK_SETTINGS.0)
        .template(" {spinner} {msg:<30} {wide_bar} ETA {eta_precise} ")
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    let progress_bar = ProgressBar::new(length);

    progress_bar.set_style(style);
    progress_bar.enable_steady_tick(Duration::from_millis(TICK_SETTINGS.1));
    progress_bar.set_message(msg.to_owned());

    progress_bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "read_length": 100, "fragment_lengths": [[200, 1.0]] }}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.read_length, 100);
        assert_eq!(config.fragment_lengths, vec![(200, 1.0)]);
        assert_eq!(config.max_fragment_length, DEFAULT_MAX_FRAGMENT_LENGTH);
        assert!(config.run_fit);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = EngineConfig {
            fragment_lengths: vec![(0, 1.0)],
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(QuantError::Config(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(EngineConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn read_cap_zero_disables() {
        let config = EngineConfig {
            max_read_count: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.read_cap(), None);
        assert_eq!(EngineConfig::default().read_cap(), Some(DEFAULT_MAX_READ_COUNT));
    }
}
